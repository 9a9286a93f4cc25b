use serde::{Deserialize, Serialize};

use crate::core::{PhaseVisit, StimulusRef, TrialRecord};

/// Per-trial record stored next to the sample chunks. The trial's samples
/// are `sample_start .. sample_start + sample_count` of the matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialAnnotation {
    pub block: usize,
    pub trial: usize,
    pub stimulus: StimulusRef,
    pub visits: Vec<PhaseVisit>,
    pub sample_start: u64,
    pub sample_count: u64,
    /// Matrix index of the first sample received after the onset marker
    /// went out. Absent for trials recorded without acquisition.
    #[serde(default)]
    pub stimulus_start: Option<u64>,
    /// Samples received until the offset marker went out
    #[serde(default)]
    pub stimulus_count: Option<u64>,
}

impl TrialAnnotation {
    pub fn for_record(record: &TrialRecord, sample_start: u64) -> Self {
        Self {
            block: record.block,
            trial: record.trial,
            stimulus: record.stimulus.clone(),
            visits: record.visits.clone(),
            sample_start,
            sample_count: record.samples.timesteps() as u64,
            stimulus_start: record
                .stimulus_window
                .map(|w| sample_start + w.start as u64),
            stimulus_count: record.stimulus_window.map(|w| w.count as u64),
        }
    }
}
