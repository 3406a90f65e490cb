pub mod drift_calculator;
pub mod optimization;
