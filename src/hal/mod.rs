pub mod drivers;
pub mod lifecycle;
pub mod mock;
pub mod tone;
pub mod traits;
pub mod types;

pub use lifecycle::ManagedSource;
pub use tone::synthesize_tone;
pub use traits::{AudioCue, MarkerSink, PresentationSurface, SampleSource};
pub use types::{
    DeviceDescriptor, DeviceState, Drawable, FrameStream, InputEvent, KeyCode, Position, Rgb,
    SampleFormat, SamplesBuffer,
};
