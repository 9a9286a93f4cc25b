//! Replay cache: previously captured trials with their reconstruction
//! sequences, stored as MessagePack.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, SessionError};

/// One captured trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTrial {
    /// Encoded stimulus image
    pub stimulus_image_bytes: Vec<u8>,
    /// Encoded intermediate reconstructions, in generation order
    pub generated_images_bytes: Vec<Vec<u8>>,
    /// Phase name -> seconds since session start, from the capturing session
    #[serde(default)]
    pub phase_timestamps: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReplayCache {
    pub trials: Vec<CachedTrial>,
}

impl ReplayCache {
    pub fn new(trials: Vec<CachedTrial>) -> Self {
        Self { trials }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| SessionError::Cache(format!("Failed to read {:?}: {}", path, e)))?;
        let cache: ReplayCache = rmp_serde::from_slice(&bytes)
            .map_err(|e| SessionError::Cache(format!("Failed to decode {:?}: {}", path, e)))?;

        log::info!("Loaded {} cached trials from {:?}", cache.len(), path);
        Ok(cache)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = rmp_serde::to_vec_named(self)
            .map_err(|e| SessionError::Cache(format!("Failed to encode cache: {}", e)))?;
        std::fs::write(path, bytes)
            .map_err(|e| SessionError::Cache(format!("Failed to write {:?}: {}", path, e)))
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }
}
