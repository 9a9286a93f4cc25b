pub mod abort;
pub mod frame;
pub mod phase;
pub mod record;

pub use abort::AbortSignal;
pub use frame::{SampleFrame, SampleMatrix};
pub use phase::Phase;
pub use record::{LogMessage, PhaseVisit, SampleSpan, StimulusRef, TrialRecord};
