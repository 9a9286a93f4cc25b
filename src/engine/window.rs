//! Sample window of one trial in acquisition mode.

use std::cell::RefCell;

use anyhow::Result;

use crate::core::{SampleFrame, SampleSpan};
use crate::hal::{FrameStream, MarkerSink};

/// Frames received since the previous hand-off.
///
/// Markers are forwarded to the device through this window. Before each
/// one goes out the window pulls every frame delivered so far, so the
/// onset and offset markers fix the stimulus position by sample count.
pub struct SampleWindow<'a> {
    device: &'a dyn MarkerSink,
    frames: &'a FrameStream,
    onset_marker: f64,
    offset_marker: f64,
    state: RefCell<WindowState>,
}

#[derive(Default)]
struct WindowState {
    received: Vec<SampleFrame>,
    onset: Option<usize>,
    offset: Option<usize>,
}

impl<'a> SampleWindow<'a> {
    /// `carried` holds frames of earlier trials that were never recorded.
    pub fn new(
        device: &'a dyn MarkerSink,
        frames: &'a FrameStream,
        onset_marker: f64,
        offset_marker: f64,
        carried: Vec<SampleFrame>,
    ) -> Self {
        Self {
            device,
            frames,
            onset_marker,
            offset_marker,
            state: RefCell::new(WindowState {
                received: carried,
                ..WindowState::default()
            }),
        }
    }

    fn pull(&self) -> usize {
        let mut state = self.state.borrow_mut();
        state.received.extend(self.frames.drain());
        state.received.len()
    }

    /// Every frame received, and where the stimulus sits among them when
    /// both markers went out.
    pub fn finish(self) -> (Vec<SampleFrame>, Option<SampleSpan>) {
        self.pull();
        let state = self.state.into_inner();
        let span = match (state.onset, state.offset) {
            (Some(start), Some(end)) if end >= start => Some(SampleSpan {
                start,
                count: end - start,
            }),
            _ => None,
        };
        (state.received, span)
    }

    /// Frames to carry into the next window when this trial is not recorded.
    pub fn into_frames(self) -> Vec<SampleFrame> {
        self.pull();
        self.state.into_inner().received
    }
}

impl MarkerSink for SampleWindow<'_> {
    fn insert_marker(&self, value: f64) -> Result<()> {
        let received = self.pull();
        self.device.insert_marker(value)?;

        let mut state = self.state.borrow_mut();
        if value == self.onset_marker {
            state.onset = Some(received);
            state.offset = None;
        } else if value == self.offset_marker {
            state.offset = Some(received);
        }
        Ok(())
    }
}
