use image::{ImageFormat, Rgba, RgbaImage};
use neurostim::config::{SessionConfig, SessionMode};
use neurostim::core::{AbortSignal, Phase, StimulusRef, TrialRecord};
use neurostim::engine::{RecordSink, Stage, TrialResult};
use neurostim::hal::mock::{RecordingCue, ScriptedSurface, SimulatedEegSource, SurfaceLog, SurfaceOp};
use neurostim::hal::{InputEvent, KeyCode};
use neurostim::imaging::load_stimulus_set;
use neurostim::replay::{CachedTrial, ReplayCache};
use neurostim::store::{AttrValue, StoreReader};
use neurostim::{SessionController, SessionError, SessionOutcome};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use tokio::time::Duration;

fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([shade, shade, shade, 255]));
    let mut buf = std::io::Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn cache(trials: usize, artifacts: usize) -> ReplayCache {
    ReplayCache::new(
        (0..trials)
            .map(|t| CachedTrial {
                stimulus_image_bytes: png(64, 48, t as u8 * 10),
                generated_images_bytes: (0..artifacts).map(|a| png(32, 32, a as u8)).collect(),
                phase_timestamps: Default::default(),
            })
            .collect(),
    )
}

fn replay_config(autoregressive: bool) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.seed = Some(7);
    config.with_mode(SessionMode::Replay { autoregressive })
}

fn replay_controller(config: SessionConfig, cache: ReplayCache) -> (SessionController, SurfaceLog) {
    let surface = ScriptedSurface::new(800, 600).with_auto_continue(KeyCode::Space);
    let log = surface.log();
    let stage = Stage::new(Box::new(surface), Box::new(RecordingCue::new()), &config);
    (
        SessionController::replay(config, stage, cache, AbortSignal::new()),
        log,
    )
}

/// Short phases so acquisition sessions finish in about a second of real time
fn acquisition_config(out_dir: &Path, image_dir: &Path) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.seed = Some(3);
    config.sample_format = neurostim::hal::SampleFormat::F64;
    config.device.sampling_rate = 500.0;
    config.device.n_channels_total = 3;
    config.device.eeg_channels = vec![0, 1];
    config.device.marker_channel = 2;
    config.timing.initial_rest_duration = 0.0;
    config.timing.pre_stimulus_interval = 0.1;
    config.timing.tone_pre_stimulus_onset = 0.05;
    config.timing.image_duration = Some(0.05);
    config.timing.post_stimulus_interval = 0.05;
    config.timing.inter_block_grey_duration = 0.0;
    config.timing.isi_jitter = 0.0;
    config.structure.n_blocks = 2;
    config.structure.images_per_block = 2;
    config.paths.path_out_data = out_dir.to_path_buf();
    config.paths.image_directory = image_dir.to_path_buf();
    config
}

fn write_stimuli(dir: &Path) {
    for (name, shade) in [("a.png", 40u8), ("b.png", 200u8)] {
        std::fs::write(dir.join(name), png(40, 30, shade)).unwrap();
    }
}

fn acquisition_controller(config: SessionConfig, surface: ScriptedSurface) -> SessionController {
    let stimuli = load_stimulus_set(&config.paths.image_directory, 800, 600).unwrap();
    let source = SimulatedEegSource::new(config.device.descriptor());
    let stage = Stage::new(Box::new(surface), Box::new(RecordingCue::new()), &config);
    SessionController::acquisition(config, stage, Box::new(source), stimuli, AbortSignal::new())
}

fn store_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

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
            return Err(SessionError::store_write("device full"));
        }
        self.persisted.lock().unwrap().push(record.trial);
        Ok(())
    }

    fn close(self) -> neurostim::error::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_replay_session_visits_every_phase_in_order() {
    let (controller, log) = replay_controller(replay_config(false), cache(3, 2));
    let report = controller.run().await;

    assert_eq!(report.outcome, SessionOutcome::Completed { trials: 3 });
    assert!(report.logger.is_none());

    let mut expected = vec![(Phase::Rest, 0)];
    for _ in 0..3 {
        expected.extend([
            (Phase::PreStimulus, 0),
            (Phase::Stimulus, 0),
            (Phase::PostStimulus, 0),
            (Phase::ReviewSequence, 2),
            (Phase::InterTrial, 0),
        ]);
    }
    assert_eq!(report.phase_sequence(), expected);

    let ops = log.ops();
    assert!(ops.contains(&SurfaceOp::Caption("Reconstruction 2/2".to_string())));
    // Stimuli are scaled to the full surface, review images to half of it
    assert!(ops.contains(&SurfaceOp::Render {
        width: 800,
        height: 600,
        position: neurostim::hal::Position::new(400, 300),
    }));
}

#[tokio::test(start_paused = true)]
async fn test_replay_without_artifacts_skips_review() {
    let (controller, _log) = replay_controller(replay_config(false), cache(2, 0));
    let report = controller.run().await;

    assert_eq!(report.outcome, SessionOutcome::Completed { trials: 2 });
    assert!(report
        .phase_sequence()
        .iter()
        .all(|(phase, _)| *phase != Phase::ReviewSequence));
}

#[tokio::test(start_paused = true)]
async fn test_autoregressive_replay_shows_previous_reconstruction() {
    let (controller, _log) = replay_controller(replay_config(true), cache(3, 2));
    let report = controller.run().await;

    let stimuli: Vec<StimulusRef> = report.trials.iter().map(|t| t.stimulus.clone()).collect();
    assert_eq!(
        stimuli,
        vec![
            StimulusRef::Cached { trial: 0 },
            StimulusRef::Reconstruction { from_trial: 0 },
            StimulusRef::Reconstruction { from_trial: 1 },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_cache_entry_abandons_only_that_trial() {
    let mut cache = cache(3, 1);
    cache.trials[1].stimulus_image_bytes = b"not an image".to_vec();

    let (controller, _log) = replay_controller(replay_config(false), cache);
    let report = controller.run().await;

    assert_eq!(report.outcome, SessionOutcome::Completed { trials: 2 });
    assert!(matches!(report.trials[1].result, TrialResult::Abandoned(_)));
    assert!(report.trials[1].visits.is_empty());
    assert_eq!(report.trials[2].result, TrialResult::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_failing_surface_abandons_trials_without_failing_session() {
    let config = replay_config(false);
    let surface = ScriptedSurface::new(800, 600)
        .with_auto_continue(KeyCode::Space)
        .with_failing_renders();
    let stage = Stage::new(Box::new(surface), Box::new(RecordingCue::new()), &config);
    let report = SessionController::replay(config, stage, cache(2, 1), AbortSignal::new())
        .run()
        .await;

    assert_eq!(report.outcome, SessionOutcome::Completed { trials: 0 });
    assert!(report
        .trials
        .iter()
        .all(|t| matches!(t.result, TrialResult::Abandoned(_))));
}

#[tokio::test(start_paused = true)]
async fn test_empty_cache_fails_before_first_trial() {
    let (controller, _log) = replay_controller(replay_config(false), ReplayCache::new(Vec::new()));
    let report = controller.run().await;

    assert!(matches!(
        report.outcome,
        SessionOutcome::Failed {
            trials_completed: 0,
            error: SessionError::Cache(_)
        }
    ));
    assert!(report.trials.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_operator_escape_ends_replay_cleanly() {
    let config = replay_config(false);
    // The first trial takes well over a second
    let surface = ScriptedSurface::new(800, 600)
        .with_event_at(Duration::from_millis(500), InputEvent::KeyPress(KeyCode::Escape));
    let stage = Stage::new(Box::new(surface), Box::new(RecordingCue::new()), &config);
    let report = SessionController::replay(config, stage, cache(3, 1), AbortSignal::new())
        .run()
        .await;

    assert_eq!(report.outcome, SessionOutcome::Aborted { trials_completed: 0 });
    assert_eq!(report.outcome.exit_code(), 0);
    assert_eq!(report.trials.len(), 1);
    assert_eq!(report.trials[0].result, TrialResult::Aborted);
}

#[tokio::test]
async fn test_acquisition_logs_contiguous_trial_windows() {
    let out = tempdir().unwrap();
    let images = tempdir().unwrap();
    write_stimuli(images.path());
    let config = acquisition_config(out.path(), images.path());

    let report = acquisition_controller(config, ScriptedSurface::new(800, 600))
        .run()
        .await;

    assert_eq!(report.outcome, SessionOutcome::Completed { trials: 4 });
    let logger = report.logger.as_ref().unwrap();
    assert_eq!(logger.records_written, 4);

    let files = store_files(out.path());
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("eeg_data_") && name.ends_with(".nst"));

    let reader = StoreReader::open(&files[0]).unwrap();
    assert!(reader.is_finalized());
    assert_eq!(reader.channel_count(), 3);
    assert_eq!(reader.attribute("demo_mode"), Some(&AttrValue::Bool(false)));

    let trials = reader.trials();
    assert_eq!(trials.len(), 4);
    let mut next_start = 0;
    for annotation in trials {
        assert_eq!(annotation.sample_start, next_start);
        assert!(annotation.sample_count > 0);
        assert!(matches!(annotation.stimulus, StimulusRef::File(_)));
        next_start += annotation.sample_count;
    }
    assert_eq!(next_start, reader.timesteps() as u64);

    // Each block shows every image once when the pool matches the block size
    for block in 0..2 {
        let mut shown: Vec<String> = trials
            .iter()
            .filter(|t| t.block == block)
            .map(|t| t.stimulus.to_string())
            .collect();
        shown.sort();
        shown.dedup();
        assert_eq!(shown.len(), 2);
    }

    // One onset and one offset marker per trial, on either side of the
    // recorded stimulus span
    let markers = reader.samples().channel(2).unwrap();
    for annotation in trials {
        let start = annotation.sample_start as usize;
        let end = start + annotation.sample_count as usize;
        let placed: Vec<(usize, f64)> = (start..end)
            .filter(|&i| markers[i] != 0.0)
            .map(|i| (i, markers[i]))
            .collect();
        let values: Vec<f64> = placed.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![1.0, 2.0], "trial {}", annotation.trial);

        let onset = annotation.stimulus_start.unwrap() as usize;
        let offset = onset + annotation.stimulus_count.unwrap() as usize;
        assert!(onset >= start && offset <= end);
        assert!(
            placed[0].0 >= onset && placed[0].0 < offset,
            "onset marker at {} outside {}..{}",
            placed[0].0,
            onset,
            offset
        );
        assert!(placed[1].0 >= offset, "offset marker at {} before {}", placed[1].0, offset);
    }
}

#[tokio::test]
async fn test_acquisition_write_failure_fails_session() {
    let out = tempdir().unwrap();
    let images = tempdir().unwrap();
    write_stimuli(images.path());
    let config = acquisition_config(out.path(), images.path());

    let sink = FailingSink {
        fail_at: 1,
        ..FailingSink::default()
    };
    let report = acquisition_controller(config, ScriptedSurface::new(800, 600))
        .run_with_sink(sink.clone())
        .await;

    match &report.outcome {
        SessionOutcome::Failed { error, .. } => {
            assert!(matches!(error, SessionError::StoreWrite(_)))
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(report.outcome.exit_code(), 1);
    assert_eq!(*sink.persisted.lock().unwrap(), vec![0]);
    assert_eq!(report.logger.as_ref().unwrap().records_written, 1);
}

#[tokio::test]
async fn test_aborted_acquisition_still_finalizes_store() {
    let out = tempdir().unwrap();
    let images = tempdir().unwrap();
    write_stimuli(images.path());
    let mut config = acquisition_config(out.path(), images.path());
    config.structure.n_blocks = 10;

    let surface = ScriptedSurface::new(800, 600)
        .with_event_at(Duration::from_millis(600), InputEvent::Quit);
    let report = acquisition_controller(config, surface).run().await;

    let completed = match report.outcome {
        SessionOutcome::Aborted { trials_completed } => trials_completed,
        ref other => panic!("expected abort, got {:?}", other),
    };
    assert!(completed < 20);

    let files = store_files(out.path());
    let reader = StoreReader::open(&files[0]).unwrap();
    assert!(reader.is_finalized());
    assert!(!reader.recovered());
    assert_eq!(reader.trials().len(), completed);
}

#[tokio::test]
async fn test_unreachable_device_fails_without_creating_store() {
    let out = tempdir().unwrap();
    let images = tempdir().unwrap();
    write_stimuli(images.path());
    let config = acquisition_config(out.path(), images.path());

    let stimuli = load_stimulus_set(images.path(), 800, 600).unwrap();
    let source = SimulatedEegSource::new(config.device.descriptor()).unavailable();
    let stage = Stage::new(
        Box::new(ScriptedSurface::new(800, 600)),
        Box::new(RecordingCue::new()),
        &config,
    );
    let report = SessionController::acquisition(config, stage, Box::new(source), stimuli, AbortSignal::new())
        .run()
        .await;

    assert!(matches!(
        report.outcome,
        SessionOutcome::Failed {
            trials_completed: 0,
            error: SessionError::Device(_)
        }
    ));
    assert!(store_files(out.path()).is_empty());
}

#[tokio::test]
async fn test_empty_stimulus_directory_is_config_error() {
    let out = tempdir().unwrap();
    let images = tempdir().unwrap();
    let config = acquisition_config(out.path(), images.path());

    let report = acquisition_controller(config, ScriptedSurface::new(800, 600))
        .run()
        .await;

    assert!(matches!(
        report.outcome,
        SessionOutcome::Failed {
            error: SessionError::Config(_),
            ..
        }
    ));
}
