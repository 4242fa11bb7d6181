pub mod rolling;
pub mod smoothing;

pub use rolling::compute_rolling_metrics;
