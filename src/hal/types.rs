use crossbeam_channel::{Receiver, TryRecvError};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::SampleFrame;

/// RGB colour
pub type Rgb = [u8; 3];

/// Sample element type persisted in the data file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32, // 32-bit float
    F64, // 64-bit float
}

impl Default for SampleFormat {
    fn default() -> Self {
        SampleFormat::F32
    }
}

impl SampleFormat {
    pub fn element_size(&self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::F32 => 1,
            Self::F64 => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::F32),
            2 => Some(Self::F64),
            _ => None,
        }
    }

    pub fn dtype_name(&self) -> &'static str {
        match self {
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }
}

/// Keys the session reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Space,
    Escape,
    Enter,
    Char(char),
    Other(u32),
}

/// Operator input delivered by the presentation surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Quit,
    KeyPress(KeyCode),
}

impl InputEvent {
    /// Quit and Escape both end the session
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Quit | Self::KeyPress(KeyCode::Escape))
    }
}

/// Centre point of a drawable on the surface, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Decoded, display-ready image
#[derive(Clone)]
pub struct Drawable {
    image: Arc<RgbaImage>,
}

impl Drawable {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

impl std::fmt::Debug for Drawable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drawable")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Interleaved audio samples ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct SamplesBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Arc<Vec<f32>>,
}

impl SamplesBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Static description of an EEG sample source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub board_description: String,
    pub sampling_rate: f64,
    pub channel_count: usize,
    pub eeg_channels: Vec<usize>,
    pub marker_channel: usize,
    pub channel_mapping: BTreeMap<String, usize>,
    pub address: String,
}

/// Device lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    Unopened,
    Opened,
    Running,
    Stopped,
    Closed,
    Error(String),
}

/// Receiving end of a sample source's frame channel
#[derive(Clone)]
pub struct FrameStream {
    rx: Receiver<SampleFrame>,
}

impl FrameStream {
    pub fn new(rx: Receiver<SampleFrame>) -> Self {
        Self { rx }
    }

    /// Block until the next frame; `None` once the source has closed.
    pub fn next_frame(&self) -> Option<SampleFrame> {
        self.rx.recv().ok()
    }

    pub fn try_next_frame(&self) -> Option<SampleFrame> {
        self.rx.try_recv().ok()
    }

    /// Take every frame delivered so far without blocking.
    pub fn drain(&self) -> Vec<SampleFrame> {
        let mut frames = Vec::with_capacity(self.rx.len());
        loop {
            match self.rx.try_recv() {
                Ok(frame) => frames.push(frame),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        frames
    }
}
