use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::hal::{AudioCue, SamplesBuffer};

/// Audio cue that records when it was asked to play.
#[derive(Debug, Clone, Default)]
pub struct RecordingCue {
    plays: Arc<Mutex<Vec<Instant>>>,
}

impl RecordingCue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plays(&self) -> Vec<Instant> {
        self.plays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AudioCue for RecordingCue {
    fn sample_rate(&self) -> u32 {
        44100
    }

    fn play(&mut self, _buffer: &SamplesBuffer) -> Result<()> {
        self.plays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Instant::now());
        Ok(())
    }
}
