//! Stimulus presentation sessions with concurrent EEG logging.
//!
//! A `SessionController` walks the block/trial schedule, driving a
//! `TrialStateMachine` against presentation collaborators while a
//! `LoggingPipeline` persists each completed trial's samples into a
//! `PersistentStore` on a separate task.

pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod hal;
pub mod imaging;
pub mod observability;
pub mod replay;
pub mod resilience;
pub mod store;

pub use config::{SessionConfig, SessionMode};
pub use engine::{SessionController, SessionOutcome, SessionReport};
pub use error::SessionError;
