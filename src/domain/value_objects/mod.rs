pub mod drift_bounds;
pub mod target_percentage;
