use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::state::LoggerState;
use crate::core::{AbortSignal, LogMessage, TrialRecord};
use crate::error::{Result, SessionError};
use crate::observability::{LoggerMetrics, LoggerMonitor};
use crate::store::{PersistentStore, TrialAnnotation};

/// Durable destination for completed trials, owned by the logging consumer.
pub trait RecordSink: Send + 'static {
    fn append_trial(&mut self, record: &TrialRecord) -> Result<()>;

    /// Flush and finalize. Nothing may be written afterwards.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

impl RecordSink for PersistentStore {
    fn append_trial(&mut self, record: &TrialRecord) -> Result<()> {
        let sample_start = self.timesteps();
        self.append(&record.samples)?;
        self.annotate(&TrialAnnotation::for_record(record, sample_start))
    }

    fn close(self) -> Result<()> {
        PersistentStore::close(self)
    }
}

/// Cloneable enqueue handle. `submit` never blocks.
#[derive(Clone)]
pub struct LogProducer {
    tx: Sender<LogMessage>,
}

impl LogProducer {
    pub fn submit(&self, record: TrialRecord) -> Result<()> {
        self.tx
            .send(LogMessage::Record(Box::new(record)))
            .map_err(|_| SessionError::StoreWrite("logging consumer has stopped".to_string()))
    }
}

/// Final account of the consumer, returned by `shutdown`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggerReport {
    pub state: LoggerState,
    pub records_written: u64,
    pub records_dropped: u64,
    pub timesteps_written: u64,
    pub error: Option<SessionError>,
}

/// Producer/consumer channel between the presentation loop and the store.
///
/// One blocking task owns the sink and drains the queue until `Shutdown`.
/// State changes are published on a watch channel so the session can see a
/// write failure without touching the store.
pub struct LoggingPipeline {
    producer: LogProducer,
    status: watch::Receiver<LoggerState>,
    metrics: Arc<LoggerMetrics>,
    handle: Option<JoinHandle<LoggerReport>>,
    shutdown_sent: bool,
}

impl LoggingPipeline {
    /// Start the consumer. A write failure raises `abort`.
    pub fn spawn<S: RecordSink>(sink: S, abort: AbortSignal) -> Self {
        let (tx, rx) = unbounded();
        let (status_tx, status) = watch::channel(LoggerState::Running);
        let metrics = Arc::new(LoggerMetrics::new());

        let consumer = Consumer {
            sink: Some(sink),
            rx,
            status_tx,
            state: LoggerState::Running,
            metrics: metrics.clone(),
            abort,
            error: None,
        };
        let handle = tokio::task::spawn_blocking(move || consumer.run());

        log::info!("Logging pipeline started");

        Self {
            producer: LogProducer { tx },
            status,
            metrics,
            handle: Some(handle),
            shutdown_sent: false,
        }
    }

    pub fn producer(&self) -> LogProducer {
        self.producer.clone()
    }

    pub fn submit(&self, record: TrialRecord) -> Result<()> {
        self.producer.submit(record)
    }

    pub fn state(&self) -> LoggerState {
        self.status.borrow().clone()
    }

    /// Receiver for awaiting state changes
    pub fn status(&self) -> watch::Receiver<LoggerState> {
        self.status.clone()
    }

    /// The write failure, once the consumer has entered `Failed`
    pub fn failure(&self) -> Option<SessionError> {
        match &*self.status.borrow() {
            LoggerState::Failed { error_msg } => Some(SessionError::StoreWrite(error_msg.clone())),
            _ => None,
        }
    }

    pub fn metrics(&self) -> Arc<LoggerMetrics> {
        self.metrics.clone()
    }

    pub fn monitor(&self) -> LoggerMonitor {
        LoggerMonitor::new(self.metrics.clone())
    }

    /// Enqueue `Shutdown` and wait until every earlier record has been
    /// persisted and the sink is closed.
    pub async fn shutdown(mut self) -> Result<LoggerReport> {
        self.send_shutdown();

        let Some(handle) = self.handle.take() else {
            return Err(SessionError::StoreWrite("logging consumer already joined".to_string()));
        };
        handle
            .await
            .map_err(|e| SessionError::StoreWrite(format!("logging consumer panicked: {}", e)))
    }

    fn send_shutdown(&mut self) {
        if self.shutdown_sent {
            return;
        }
        self.shutdown_sent = true;
        // Fails only if the consumer is already gone
        let _ = self.producer.tx.send(LogMessage::Shutdown);
    }
}

impl Drop for LoggingPipeline {
    fn drop(&mut self) {
        // Let the consumer finalize the store on its own
        self.send_shutdown();
    }
}

struct Consumer<S: RecordSink> {
    sink: Option<S>,
    rx: Receiver<LogMessage>,
    status_tx: watch::Sender<LoggerState>,
    state: LoggerState,
    metrics: Arc<LoggerMetrics>,
    abort: AbortSignal,
    error: Option<SessionError>,
}

impl<S: RecordSink> Consumer<S> {
    fn run(mut self) -> LoggerReport {
        // Every producer dropped without Shutdown ends the loop the same way
        while let Ok(LogMessage::Record(record)) = self.rx.recv() {
            self.handle_record(&record);
        }

        let leftover = self.rx.try_iter().count();
        if leftover > 0 {
            log::warn!("{} messages enqueued after shutdown were ignored", leftover);
        }

        if self.state == LoggerState::Running {
            self.transition_to(LoggerState::Draining);
        }
        self.close_sink();
        self.transition_to(LoggerState::Closed);

        let snapshot = self.metrics.snapshot();
        log::info!(
            "Logging pipeline closed: {} records written, {} dropped",
            snapshot.records_written,
            snapshot.records_dropped
        );

        LoggerReport {
            state: self.state,
            records_written: snapshot.records_written,
            records_dropped: snapshot.records_dropped,
            timesteps_written: snapshot.timesteps_written,
            error: self.error,
        }
    }

    fn handle_record(&mut self, record: &TrialRecord) {
        let Some(sink) = self.sink.as_mut() else {
            // Failed: no retries, the record is lost
            self.metrics.record_dropped();
            return;
        };

        let start = self.metrics.start_write();
        match sink.append_trial(record) {
            Ok(()) => {
                self.metrics.finish_write(start);
                self.metrics.record_written(record.samples.timesteps() as u64);
                log::debug!(
                    "Persisted block {} trial {} ({} timesteps)",
                    record.block,
                    record.trial,
                    record.samples.timesteps()
                );
            }
            Err(e) => {
                self.metrics.record_error();
                self.metrics.record_dropped();
                log::error!(
                    "Write failed for block {} trial {}: {}",
                    record.block,
                    record.trial,
                    e
                );
                self.fail(e);
                self.close_sink();
            }
        }
    }

    fn close_sink(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        if let Err(e) = sink.close() {
            log::error!("Failed to close store: {}", e);
            self.fail(e);
        }
    }

    fn fail(&mut self, error: SessionError) {
        self.abort.raise();
        self.transition_to(LoggerState::Failed {
            error_msg: error.to_string(),
        });
        self.error.get_or_insert(error);
    }

    fn transition_to(&mut self, next: LoggerState) {
        if !self.state.can_transition_to(&next) {
            log::debug!(
                "Ignoring logger transition {} -> {}",
                self.state.name(),
                next.name()
            );
            return;
        }
        self.state = next;
        self.status_tx.send_replace(self.state.clone());
    }
}
