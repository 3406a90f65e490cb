pub mod rebalance_handler;

pub use rebalance_handler::AppState;
