use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters updated by the logging consumer, readable from any thread.
#[derive(Debug, Default)]
pub struct LoggerMetrics {
    records_written: AtomicU64,
    records_dropped: AtomicU64,
    timesteps_written: AtomicU64,
    write_errors: AtomicU64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_written: u64,
    pub records_dropped: u64,
    pub timesteps_written: u64,
    pub write_errors: u64,
    pub avg_latency_us: u64,
}

impl LoggerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    pub fn timesteps_written(&self) -> u64 {
        self.timesteps_written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub fn record_written(&self, timesteps: u64) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
        self.timesteps_written.fetch_add(timesteps, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start_write(&self) -> Instant {
        Instant::now()
    }

    pub fn finish_write(&self, start: Instant) {
        let latency_us = start.elapsed().as_micros() as u64;
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_us(&self) -> u64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0;
        }
        self.total_latency_us.load(Ordering::Relaxed) / samples
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_written: self.records_written(),
            records_dropped: self.records_dropped(),
            timesteps_written: self.timesteps_written(),
            write_errors: self.write_errors(),
            avg_latency_us: self.avg_latency_us(),
        }
    }
}
