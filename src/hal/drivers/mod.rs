pub mod audio;
pub mod headless;

pub use audio::{CpalCue, SilentCue};
pub use headless::HeadlessSurface;
