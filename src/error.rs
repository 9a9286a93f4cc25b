use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy for a presentation session.
///
/// Operator aborts are not errors; they surface as `SessionOutcome::Aborted`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Failed to create store at {path:?}: {reason}")]
    StoreCreate { path: PathBuf, reason: String },

    #[error("Store write failed: {0}")]
    StoreWrite(String),

    #[error("Sample source unavailable: {0}")]
    Device(String),

    #[error("Collaborator failure: {0}")]
    Collaborator(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Replay cache error: {0}")]
    Cache(String),
}

impl SessionError {
    pub fn store_write(err: impl std::fmt::Display) -> Self {
        Self::StoreWrite(err.to_string())
    }

    pub fn collaborator(err: impl std::fmt::Display) -> Self {
        Self::Collaborator(err.to_string())
    }

    pub fn device(err: impl std::fmt::Display) -> Self {
        Self::Device(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
