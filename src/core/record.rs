use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{Phase, SampleMatrix};

/// Identity of the image shown during a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StimulusRef {
    /// Image file from the stimulus directory
    File(PathBuf),
    /// Stimulus stored in a replay cache entry
    Cached { trial: usize },
    /// Final reconstruction of an earlier cache entry (autoregressive replay)
    Reconstruction { from_trial: usize },
}

impl std::fmt::Display for StimulusRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Cached { trial } => write!(f, "cache[{}]", trial),
            Self::Reconstruction { from_trial } => write!(f, "reconstruction[{}]", from_trial),
        }
    }
}

/// One entry/exit pair of a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseVisit {
    pub phase: Phase,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    /// Measured on the monotonic clock
    pub duration_s: f64,
    /// Intermediate artifacts shown (ReviewSequence only)
    pub steps: usize,
}

/// Run of samples inside a trial's window, counted from the window start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSpan {
    pub start: usize,
    pub count: usize,
}

/// Outcome of one completed trial, handed to the logging pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub block: usize,
    pub trial: usize,
    pub stimulus: StimulusRef,
    pub visits: Vec<PhaseVisit>,
    /// Samples received since the previous trial's hand-off, bracketing the
    /// stimulus window via the marker channel
    pub samples: SampleMatrix,
    /// Samples received while the stimulus was up: from the onset marker
    /// being sent to the offset marker being sent
    #[serde(default)]
    pub stimulus_window: Option<SampleSpan>,
}

impl TrialRecord {
    fn visit(&self, phase: Phase) -> Option<&PhaseVisit> {
        self.visits.iter().find(|v| v.phase == phase)
    }

    pub fn stimulus_start_time(&self) -> Option<DateTime<Utc>> {
        self.visit(Phase::Stimulus).map(|v| v.entered_at)
    }

    pub fn stimulus_end_time(&self) -> Option<DateTime<Utc>> {
        self.visit(Phase::Stimulus).and_then(|v| v.exited_at)
    }

    pub fn stimulus_duration_s(&self) -> Option<f64> {
        self.visit(Phase::Stimulus).map(|v| v.duration_s)
    }
}

/// Message carried by the logging channel.
#[derive(Debug)]
pub enum LogMessage {
    Record(Box<TrialRecord>),
    Shutdown,
}
