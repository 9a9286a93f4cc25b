pub mod logging;
pub mod presenter;
pub mod session;
pub mod state;
pub mod trial;
pub mod window;

pub use logging::{LogProducer, LoggerReport, LoggingPipeline, RecordSink};
pub use presenter::{drive_trial, Layout, ReviewAssets, Stage, TrialAssets};
pub use session::{SessionController, SessionOutcome, SessionReport, TrialResult, TrialSummary};
pub use state::LoggerState;
pub use trial::{inter_trial_duration, Command, Tick, TrialStateMachine};
pub use window::SampleWindow;
