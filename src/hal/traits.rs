use anyhow::Result;
use async_trait::async_trait;

use super::types::{
    DeviceDescriptor, Drawable, FrameStream, InputEvent, Position, Rgb, SamplesBuffer,
};

/// EEG acquisition device pushing timestamped frames.
#[async_trait]
pub trait SampleSource: Send {
    /// Channel layout and sampling rate
    fn describe(&self) -> DeviceDescriptor;

    /// Prepare the device for streaming
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Start pushing frames
    async fn start(&mut self) -> Result<()>;

    /// Stop pushing frames; the frame stream closes once drained
    async fn stop(&mut self) -> Result<()>;

    /// Frames delivered by the device
    fn frames(&mut self) -> FrameStream;

    /// Queue `value` for the marker channel. Queued markers land on
    /// consecutive frames in insertion order.
    fn insert_marker(&self, value: f64) -> Result<()>;

    fn is_streaming(&self) -> bool;
}

/// Receives synchronisation markers at phase boundaries.
pub trait MarkerSink {
    fn insert_marker(&self, value: f64) -> Result<()>;
}

/// Window or display the stimuli are drawn on.
///
/// Calls happen on the presentation loop only; none of them may block for
/// longer than a frame.
pub trait PresentationSurface: Send {
    fn size(&self) -> (u32, u32);

    fn fill(&mut self, color: Rgb) -> Result<()>;

    fn render(&mut self, drawable: &Drawable, position: Position) -> Result<()>;

    fn caption(&mut self, text: &str, position: Position) -> Result<()>;

    /// Flip the composed frame onto the display
    fn present(&mut self) -> Result<()>;

    /// Pending input since the last call, each event returned exactly once
    fn poll_events(&mut self) -> Vec<InputEvent>;
}

/// Fire-and-forget audio playback.
pub trait AudioCue: Send {
    /// Output sample rate the cue should be synthesized at
    fn sample_rate(&self) -> u32;

    fn play(&mut self, buffer: &SamplesBuffer) -> Result<()>;
}
