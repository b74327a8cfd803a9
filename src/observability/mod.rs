// Logging configuration
pub mod config;

// Structured logging
pub mod logging;

// Shaping counters through the metrics facade
pub mod metrics;

pub use config::{LogConfig, LogFormat};
pub use logging::init_logging;
pub use metrics::{describe_metrics, ShapingMetrics};
