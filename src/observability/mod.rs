pub mod metrics;
pub mod monitor;

pub use metrics::{LoggerMetrics, MetricsSnapshot};
pub use monitor::LoggerMonitor;
