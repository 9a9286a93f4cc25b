use chrono::Utc;
use neurostim::config::SessionConfig;
use neurostim::core::{AbortSignal, SampleMatrix, StimulusRef, TrialRecord};
use neurostim::engine::{LoggerState, LoggingPipeline, RecordSink};
use neurostim::store::{PersistentStore, SessionMetadata, StoreReader};
use neurostim::SessionError;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

fn record(trial: usize, timesteps: usize) -> TrialRecord {
    TrialRecord {
        block: 0,
        trial,
        stimulus: StimulusRef::Cached { trial },
        visits: Vec::new(),
        samples: SampleMatrix::from_channels(vec![vec![trial as f64; timesteps]; 3]).unwrap(),
        stimulus_window: None,
    }
}

/// Sink that fails on the `fail_at`-th record (0-based) and keeps the rest
#[derive(Clone, Default)]
struct FailingSink {
    fail_at: usize,
    seen: Arc<Mutex<usize>>,
    persisted: Arc<Mutex<Vec<usize>>>,
}

impl RecordSink for FailingSink {
    fn append_trial(&mut self, record: &TrialRecord) -> neurostim::error::Result<()> {
        let mut seen = self.seen.lock().unwrap();
        let index = *seen;
        *seen += 1;
        if index == self.fail_at {
            return Err(SessionError::store_write("disk full"));
        }
        self.persisted.lock().unwrap().push(record.trial);
        Ok(())
    }

    fn close(self) -> neurostim::error::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_every_record_before_shutdown_reaches_the_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.nst");

    let mut config = SessionConfig::default();
    config.device.n_channels_total = 3;
    config.device.eeg_channels = vec![0, 1];
    config.device.marker_channel = 2;
    let metadata = SessionMetadata::from_config(&config, Utc::now());
    let store = PersistentStore::open(&path, &metadata, 3).unwrap();

    let pipeline = LoggingPipeline::spawn(store, AbortSignal::new());
    let producer = pipeline.producer();
    for trial in 0..20 {
        producer.submit(record(trial, 10)).unwrap();
    }
    let report = pipeline.shutdown().await.unwrap();

    assert_eq!(report.state, LoggerState::Closed);
    assert_eq!(report.records_written, 20);
    assert_eq!(report.timesteps_written, 200);
    assert!(report.error.is_none());

    let reader = StoreReader::open(&path).unwrap();
    assert!(reader.is_finalized());
    assert_eq!(reader.timesteps(), 200);
    let trials = reader.trials();
    assert_eq!(trials.len(), 20);
    for (i, annotation) in trials.iter().enumerate() {
        assert_eq!(annotation.trial, i);
        assert_eq!(annotation.sample_start, i as u64 * 10);
        assert_eq!(annotation.sample_count, 10);
    }
    // Each trial's samples carry its own index
    assert_eq!(reader.samples().channel(0).unwrap()[195], 19.0);
}

#[tokio::test]
async fn test_write_failure_keeps_earlier_records_and_raises_abort() {
    let sink = FailingSink {
        fail_at: 2,
        ..FailingSink::default()
    };
    let abort = AbortSignal::new();
    let pipeline = LoggingPipeline::spawn(sink.clone(), abort.clone());

    let mut status = pipeline.status();
    for trial in 0..6 {
        pipeline.submit(record(trial, 4)).unwrap();
    }
    status
        .wait_for(|state| matches!(state, LoggerState::Failed { .. }))
        .await
        .unwrap();

    assert!(abort.is_raised());
    assert!(matches!(pipeline.failure(), Some(SessionError::StoreWrite(_))));

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.state, LoggerState::Closed);
    assert_eq!(report.records_written, 2);
    assert_eq!(report.records_dropped, 4);
    assert!(matches!(report.error, Some(SessionError::StoreWrite(_))));
    assert_eq!(*sink.persisted.lock().unwrap(), vec![0, 1]);
}

#[tokio::test]
async fn test_monitor_reports_counts() {
    let sink = FailingSink {
        fail_at: usize::MAX,
        ..FailingSink::default()
    };
    let pipeline = LoggingPipeline::spawn(sink, AbortSignal::new());
    let monitor = pipeline.monitor();

    pipeline.submit(record(0, 8)).unwrap();
    pipeline.submit(record(1, 8)).unwrap();
    pipeline.shutdown().await.unwrap();

    let report = monitor.generate_report();
    assert!(report.contains("Records: 2 written, 0 dropped"));
    assert!(report.contains("Timesteps: 16"));
}
