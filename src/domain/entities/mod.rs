pub mod investment_model;
pub mod portfolio;
pub mod position;
pub mod rebalance_record;
