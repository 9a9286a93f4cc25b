use std::sync::Arc;

use super::LoggerMetrics;

pub struct LoggerMonitor {
    metrics: Arc<LoggerMetrics>,
}

impl LoggerMonitor {
    pub fn new(metrics: Arc<LoggerMetrics>) -> Self {
        Self { metrics }
    }

    pub fn generate_report(&self) -> String {
        let snapshot = self.metrics.snapshot();

        let mut report = String::from("=== Logging Metrics ===\n");
        report.push_str(&format!(
            "  Records: {} written, {} dropped\n  Timesteps: {}\n  Errors: {}\n  Avg Write Latency: {}μs\n",
            snapshot.records_written,
            snapshot.records_dropped,
            snapshot.timesteps_written,
            snapshot.write_errors,
            snapshot.avg_latency_us
        ));

        report
    }

    pub fn metrics(&self) -> &LoggerMetrics {
        &self.metrics
    }
}
