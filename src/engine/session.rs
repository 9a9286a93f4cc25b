use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;

use super::logging::{LoggerReport, LoggingPipeline, RecordSink};
use super::presenter::{drive_trial, ReviewAssets, Stage, TrialAssets};
use super::trial::{Tick, TrialStateMachine};
use super::window::SampleWindow;
use crate::config::{SessionConfig, SessionMode};
use crate::core::{
    AbortSignal, Phase, PhaseVisit, SampleFrame, SampleMatrix, StimulusRef, TrialRecord,
};
use crate::error::{Result, SessionError};
use crate::hal::{FrameStream, ManagedSource, MarkerSink, SampleSource};
use crate::imaging::{decode_and_scale, LoadedStimulus};
use crate::replay::ReplayCache;
use crate::resilience::TrialErrorPolicy;
use crate::store::{PersistentStore, SessionMetadata};

/// How a session ended. Operator abort is a normal ending.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed { trials: usize },
    Aborted { trials_completed: usize },
    Failed { trials_completed: usize, error: SessionError },
}

impl SessionOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } | Self::Aborted { .. } => 0,
            Self::Failed { .. } => 1,
        }
    }

    pub fn trials_completed(&self) -> usize {
        match self {
            Self::Completed { trials } => *trials,
            Self::Aborted { trials_completed } | Self::Failed { trials_completed, .. } => {
                *trials_completed
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrialResult {
    Completed,
    /// Collaborator failure; the session moved on
    Abandoned(String),
    Aborted,
}

#[derive(Debug, Clone)]
pub struct TrialSummary {
    pub block: usize,
    pub trial: usize,
    pub stimulus: StimulusRef,
    pub result: TrialResult,
    pub visits: Vec<PhaseVisit>,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub trials: Vec<TrialSummary>,
    /// `None` when nothing was logged (replay sessions, failures before start)
    pub logger: Option<LoggerReport>,
}

impl SessionReport {
    fn failed_before_start(error: SessionError) -> Self {
        Self {
            outcome: SessionOutcome::Failed {
                trials_completed: 0,
                error,
            },
            trials: Vec::new(),
            logger: None,
        }
    }

    /// Every phase visited, across trials, in order
    pub fn phase_sequence(&self) -> Vec<(Phase, usize)> {
        self.trials
            .iter()
            .flat_map(|t| t.visits.iter().map(|v| (v.phase, v.steps)))
            .collect()
    }
}

/// File name for a new acquisition store under `paths.path_out_data`.
pub fn store_path(config: &SessionConfig, start: DateTime<Utc>) -> PathBuf {
    config
        .paths
        .path_out_data
        .join(format!("eeg_data_{}.nst", start.format("%Y%m%d_%H%M%S")))
}

fn open_session_store(config: &SessionConfig) -> Result<PersistentStore> {
    let start = Utc::now();
    let dir = &config.paths.path_out_data;
    std::fs::create_dir_all(dir).map_err(|e| SessionError::StoreCreate {
        path: dir.clone(),
        reason: e.to_string(),
    })?;
    let metadata = SessionMetadata::from_config(config, start);
    PersistentStore::open(store_path(config, start), &metadata, config.device.n_channels_total)
}

enum StimulusPlan {
    Acquisition {
        source: ManagedSource,
        stimuli: Vec<LoadedStimulus>,
    },
    Replay {
        cache: ReplayCache,
        autoregressive: bool,
    },
}

struct PlannedTrial {
    block: usize,
    trial: usize,
    /// Stimulus pool index (acquisition) or cache entry (replay)
    index: usize,
}

/// Owns the block/trial loop and wires the trial machine to the logging
/// pipeline and collaborators.
pub struct SessionController {
    config: SessionConfig,
    stage: Stage,
    plan: StimulusPlan,
    abort: AbortSignal,
}

impl SessionController {
    pub fn acquisition(
        config: SessionConfig,
        stage: Stage,
        source: Box<dyn SampleSource>,
        stimuli: Vec<LoadedStimulus>,
        abort: AbortSignal,
    ) -> Self {
        Self {
            config: config.with_mode(SessionMode::Acquisition),
            stage,
            plan: StimulusPlan::Acquisition {
                source: ManagedSource::new(source),
                stimuli,
            },
            abort,
        }
    }

    pub fn replay(config: SessionConfig, stage: Stage, cache: ReplayCache, abort: AbortSignal) -> Self {
        let autoregressive = matches!(config.mode, SessionMode::Replay { autoregressive: true });
        Self {
            config: config.with_mode(SessionMode::Replay { autoregressive }),
            stage,
            plan: StimulusPlan::Replay {
                cache,
                autoregressive,
            },
            abort,
        }
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Run the session. Acquisition sessions log into a new store under
    /// `paths.path_out_data`; replay sessions persist nothing.
    pub async fn run(mut self) -> SessionReport {
        let frames = match self.prepare().await {
            Ok(frames) => frames,
            Err(e) => return self.fail_before_start(e).await,
        };

        if self.config.mode.is_replay() {
            return self.run_trials::<PersistentStore>(None, frames).await;
        }
        match open_session_store(&self.config) {
            Ok(store) => self.run_trials(Some(store), frames).await,
            Err(e) => self.fail_before_start(e).await,
        }
    }

    /// Run the session, logging completed trials into `sink`.
    pub async fn run_with_sink<S: RecordSink>(mut self, sink: S) -> SessionReport {
        let frames = match self.prepare().await {
            Ok(frames) => frames,
            Err(e) => return self.fail_before_start(e).await,
        };
        self.run_trials(Some(sink), frames).await
    }

    /// Start the sample source and check there is something to show.
    async fn prepare(&mut self) -> Result<Option<FrameStream>> {
        match &mut self.plan {
            StimulusPlan::Acquisition { source, stimuli } => {
                if stimuli.is_empty() {
                    return Err(SessionError::Config(format!(
                        "no stimulus images in {:?}",
                        self.config.paths.image_directory
                    )));
                }
                source.open().await?;
                let frames = source.start().await?;
                log::info!("Sample source streaming: {}", source.describe().board_description);
                Ok(Some(frames))
            }
            StimulusPlan::Replay { cache, .. } => {
                if cache.is_empty() {
                    return Err(SessionError::Cache("replay cache holds no trials".to_string()));
                }
                Ok(None)
            }
        }
    }

    async fn fail_before_start(mut self, error: SessionError) -> SessionReport {
        log::error!("Session failed before the first trial: {}", error);
        self.release_source().await;
        SessionReport::failed_before_start(error)
    }

    async fn release_source(&mut self) {
        if let StimulusPlan::Acquisition { source, .. } = &mut self.plan {
            if let Err(e) = source.close().await {
                log::error!("Failed to stop sample source: {}", e);
            }
        }
    }

    fn schedule(&self) -> Vec<PlannedTrial> {
        match &self.plan {
            StimulusPlan::Acquisition { stimuli, .. } => {
                let mut rng = match self.config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let per_block = self.config.structure.images_per_block;
                (0..self.config.structure.n_blocks)
                    .flat_map(|block| {
                        block_order(stimuli.len(), per_block, &mut rng)
                            .into_iter()
                            .enumerate()
                            .map(move |(trial, index)| PlannedTrial { block, trial, index })
                            .collect::<Vec<_>>()
                    })
                    .collect()
            }
            StimulusPlan::Replay { cache, .. } => (0..cache.len())
                .map(|i| PlannedTrial {
                    block: 0,
                    trial: i,
                    index: i,
                })
                .collect(),
        }
    }

    fn stimulus_ref(&self, planned: &PlannedTrial) -> StimulusRef {
        match &self.plan {
            StimulusPlan::Acquisition { stimuli, .. } => {
                StimulusRef::File(stimuli[planned.index].path.clone())
            }
            StimulusPlan::Replay {
                cache,
                autoregressive,
            } => {
                let i = planned.index;
                let previous_has_artifacts = i > 0
                    && !cache.trials[i - 1].generated_images_bytes.is_empty();
                if *autoregressive && previous_has_artifacts {
                    StimulusRef::Reconstruction { from_trial: i - 1 }
                } else {
                    StimulusRef::Cached { trial: i }
                }
            }
        }
    }

    fn prepare_assets(&self, planned: &PlannedTrial, stimulus: &StimulusRef) -> Result<TrialAssets> {
        let (width, height) = self.stage.size();
        let decode = |bytes: &[u8], w: u32, h: u32| {
            decode_and_scale(bytes, w, h).map_err(|e| SessionError::collaborator(format!("{:#}", e)))
        };

        match &self.plan {
            StimulusPlan::Acquisition { stimuli, .. } => Ok(TrialAssets {
                stimulus: stimuli[planned.index].drawable.clone(),
                review: None,
            }),
            StimulusPlan::Replay { cache, .. } => {
                let entry = &cache.trials[planned.index];
                let stimulus_bytes: &[u8] = match stimulus {
                    StimulusRef::Reconstruction { from_trial } => cache.trials[*from_trial]
                        .generated_images_bytes
                        .last()
                        .map(Vec::as_slice)
                        .unwrap_or(entry.stimulus_image_bytes.as_slice()),
                    _ => entry.stimulus_image_bytes.as_slice(),
                };

                let review = if entry.generated_images_bytes.is_empty() {
                    None
                } else {
                    let (half_w, half_h) = (width / 2, height / 2);
                    Some(ReviewAssets {
                        original: decode(stimulus_bytes, half_w, half_h)?,
                        steps: entry
                            .generated_images_bytes
                            .iter()
                            .map(|bytes| decode(bytes, half_w, half_h))
                            .collect::<Result<Vec<_>>>()?,
                    })
                };

                Ok(TrialAssets {
                    stimulus: decode(stimulus_bytes, width, height)?,
                    review,
                })
            }
        }
    }

    async fn run_trials<S: RecordSink>(
        mut self,
        sink: Option<S>,
        frames: Option<FrameStream>,
    ) -> SessionReport {
        let pipeline = sink.map(|sink| LoggingPipeline::spawn(sink, self.abort.clone()));
        let schedule = self.schedule();
        let mut machine = TrialStateMachine::new(&self.config);

        let mut trials = Vec::with_capacity(schedule.len());
        let mut completed = 0;
        let mut fatal: Option<SessionError> = None;
        let mut aborted = false;
        // Samples of trials that were never recorded roll into the next record
        let mut carried: Vec<SampleFrame> = Vec::new();

        log::info!(
            "Starting {} session with {} trials",
            if self.config.mode.is_replay() { "replay" } else { "acquisition" },
            schedule.len()
        );

        for planned in &schedule {
            if self.abort.is_raised() {
                aborted = true;
                break;
            }

            let stimulus = self.stimulus_ref(planned);
            let window = match (&self.plan, &frames) {
                (StimulusPlan::Acquisition { source, .. }, Some(frames)) => Some(SampleWindow::new(
                    source,
                    frames,
                    self.config.stim_start_marker,
                    self.config.stim_end_marker,
                    std::mem::take(&mut carried),
                )),
                _ => None,
            };
            let (outcome, started) = match self.prepare_assets(planned, &stimulus) {
                Ok(assets) => {
                    let markers = window.as_ref().map(|w| w as &dyn MarkerSink);
                    let tick =
                        drive_trial(&mut machine, &mut self.stage, &assets, markers, &self.abort)
                            .await;
                    (tick, true)
                }
                Err(e) => (Err(e), false),
            };

            let result = match outcome {
                Ok(Tick::TrialComplete) => {
                    completed += 1;
                    log::info!(
                        "Block {} trial {} complete ({})",
                        planned.block,
                        planned.trial,
                        stimulus
                    );
                    if let (Some(pipeline), Some(window)) = (&pipeline, window) {
                        let handed_off = self
                            .collect_record(planned, &stimulus, machine.visits(), window)
                            .and_then(|record| pipeline.submit(record));
                        if let Err(e) = handed_off {
                            fatal = Some(e);
                        }
                    }
                    TrialResult::Completed
                }
                Ok(_) => {
                    aborted = true;
                    TrialResult::Aborted
                }
                Err(e) => {
                    if let Some(window) = window {
                        carried = window.into_frames();
                    }
                    match TrialErrorPolicy::for_error(&e) {
                        TrialErrorPolicy::AbandonTrial => {
                            log::warn!(
                                "Abandoned block {} trial {}: {}",
                                planned.block,
                                planned.trial,
                                e
                            );
                        }
                        TrialErrorPolicy::AbortSession => {
                            log::error!("Session failed: {}", e);
                            fatal = Some(e.clone());
                        }
                    }
                    TrialResult::Abandoned(e.to_string())
                }
            };

            trials.push(TrialSummary {
                block: planned.block,
                trial: planned.trial,
                stimulus,
                result,
                // Assets that fail to load leave the previous trial's visits in the machine
                visits: if started {
                    machine.visits().to_vec()
                } else {
                    Vec::new()
                },
            });

            if let Some(failure) = pipeline.as_ref().and_then(LoggingPipeline::failure) {
                fatal.get_or_insert(failure);
            }
            if aborted || fatal.is_some() {
                break;
            }
        }

        self.release_source().await;

        let mut logger = None;
        if let Some(pipeline) = pipeline {
            let monitor = pipeline.monitor();
            match pipeline.shutdown().await {
                Ok(report) => {
                    log::info!("\n{}", monitor.generate_report());
                    if let Some(error) = &report.error {
                        fatal.get_or_insert(error.clone());
                    }
                    logger = Some(report);
                }
                Err(e) => {
                    fatal.get_or_insert(e);
                }
            }
        }

        let outcome = match fatal {
            Some(error) => {
                log::error!("Session failed after {} trials: {}", completed, error);
                SessionOutcome::Failed {
                    trials_completed: completed,
                    error,
                }
            }
            None if aborted || self.abort.is_raised() => {
                log::info!("Session aborted after {} trials", completed);
                SessionOutcome::Aborted {
                    trials_completed: completed,
                }
            }
            None => {
                log::info!("Session completed: {} trials", completed);
                SessionOutcome::Completed { trials: completed }
            }
        };

        SessionReport {
            outcome,
            trials,
            logger,
        }
    }

    /// Everything the source delivered since the previous hand-off.
    fn collect_record(
        &self,
        planned: &PlannedTrial,
        stimulus: &StimulusRef,
        visits: &[PhaseVisit],
        window: SampleWindow<'_>,
    ) -> Result<TrialRecord> {
        let (received, stimulus_window) = window.finish();
        let samples = SampleMatrix::from_frames(self.config.device.n_channels_total, &received)
            .map_err(|e| SessionError::device(format!("{:#}", e)))?;

        Ok(TrialRecord {
            block: planned.block,
            trial: planned.trial,
            stimulus: stimulus.clone(),
            visits: visits.to_vec(),
            samples,
            stimulus_window,
        })
    }
}

/// Shuffled pool indices for one block, reshuffling the pool each time it
/// runs out.
fn block_order(pool: usize, len: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut order = Vec::with_capacity(len);
    if pool == 0 {
        return order;
    }
    while order.len() < len {
        let mut round: Vec<usize> = (0..pool).collect();
        round.shuffle(rng);
        order.extend(round);
    }
    order.truncate(len);
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_order_cycles_through_pool() {
        let mut rng = StdRng::seed_from_u64(3);
        let order = block_order(3, 7, &mut rng);
        assert_eq!(order.len(), 7);

        let mut first_round = order[..3].to_vec();
        first_round.sort();
        assert_eq!(first_round, vec![0, 1, 2]);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SessionOutcome::Completed { trials: 3 }.exit_code(), 0);
        assert_eq!(SessionOutcome::Aborted { trials_completed: 1 }.exit_code(), 0);
        let failed = SessionOutcome::Failed {
            trials_completed: 1,
            error: SessionError::store_write("disk full"),
        };
        assert_eq!(failed.exit_code(), 1);
    }
}
