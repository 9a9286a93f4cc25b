pub mod audio;
pub mod eeg;
pub mod surface;

pub use audio::RecordingCue;
pub use eeg::SimulatedEegSource;
pub use surface::{ScriptedSurface, SurfaceLog, SurfaceOp};
