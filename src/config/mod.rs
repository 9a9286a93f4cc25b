use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::SessionError;
use crate::hal::{DeviceDescriptor, KeyCode, Rgb, SampleFormat};

/// Presentation mode, chosen on the command line rather than in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionMode {
    /// Live EEG recording against a directory of stimulus images
    #[default]
    Acquisition,
    /// Cached trials with reconstruction review ("demo" mode)
    Replay { autoregressive: bool },
}

impl SessionMode {
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replay { .. })
    }
}

/// EEG device description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    pub board_description: String,
    pub sampling_rate: f64,
    pub n_channels_total: usize,
    pub eeg_channels: Vec<usize>,
    pub marker_channel: usize,
    /// Electrode label -> channel index. Stored as text in the data file header.
    pub channel_mapping: BTreeMap<String, usize>,
    pub device_address: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            board_description: "simulated".to_string(),
            sampling_rate: 250.0,
            n_channels_total: 9,
            eeg_channels: (0..8).collect(),
            marker_channel: 8,
            channel_mapping: BTreeMap::new(),
            device_address: String::new(),
        }
    }
}

impl DeviceSettings {
    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            board_description: self.board_description.clone(),
            sampling_rate: self.sampling_rate,
            channel_count: self.n_channels_total,
            eeg_channels: self.eeg_channels.clone(),
            marker_channel: self.marker_channel,
            channel_mapping: self.channel_mapping.clone(),
            address: self.device_address.clone(),
        }
    }
}

/// Phase durations in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingProfile {
    pub initial_rest_duration: f64,
    pub pre_stimulus_interval: f64,
    /// Fixed stimulus duration; `None` waits for the continue key
    pub image_duration: Option<f64>,
    pub post_stimulus_interval: f64,
    pub isi_jitter: f64,
    pub inter_block_grey_duration: f64,
    pub image_generation_step_delay: f64,
    pub tone_pre_stimulus_onset: f64,
    pub poll_interval_ms: u64,
}

impl Default for TimingProfile {
    fn default() -> Self {
        Self {
            initial_rest_duration: 0.2,
            pre_stimulus_interval: 1.1,
            image_duration: None,
            post_stimulus_interval: 0.7,
            isi_jitter: 0.1,
            inter_block_grey_duration: 0.1,
            image_generation_step_delay: 0.2,
            tone_pre_stimulus_onset: 0.6,
            poll_interval_ms: 50,
        }
    }
}

impl TimingProfile {
    pub const MAX_POLL_INTERVAL_MS: u64 = 100;

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

/// Audio cue parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToneSettings {
    pub frequency: f64,
    pub duration: f64,
    pub amplitude: f64,
    pub sample_rate: u32,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            duration: 0.3,
            amplitude: 0.5,
            sample_rate: 44100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StructureSettings {
    pub n_blocks: usize,
    pub images_per_block: usize,
}

impl Default for StructureSettings {
    fn default() -> Self {
        Self {
            n_blocks: 1,
            images_per_block: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreenSettings {
    pub width: u32,
    pub height: u32,
    pub continue_key: KeyCode,
}

impl Default for ScreenSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            continue_key: KeyCode::Space,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PathSettings {
    pub image_directory: PathBuf,
    pub path_out_data: PathBuf,
    pub replay_cache: Option<PathBuf>,
}

/// Immutable session configuration, built once and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub config_version: String,
    pub rest_condition_color: Rgb,
    pub stim_start_marker: f64,
    pub stim_end_marker: f64,
    pub sample_format: SampleFormat,
    pub device: DeviceSettings,
    pub timing: TimingProfile,
    pub tone: ToneSettings,
    pub structure: StructureSettings,
    pub screen: ScreenSettings,
    pub paths: PathSettings,
    /// Seed for jitter and stimulus order; entropy when absent
    pub seed: Option<u64>,
    #[serde(skip)]
    pub mode: SessionMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            config_version: "v1".to_string(),
            rest_condition_color: [128, 128, 128],
            stim_start_marker: 1.0,
            stim_end_marker: 2.0,
            sample_format: SampleFormat::F32,
            device: DeviceSettings::default(),
            timing: TimingProfile::default(),
            tone: ToneSettings::default(),
            structure: StructureSettings::default(),
            screen: ScreenSettings::default(),
            paths: PathSettings::default(),
            seed: None,
            mode: SessionMode::Acquisition,
        }
    }
}

impl SessionConfig {
    /// Load from YAML (`.yaml`/`.yml`) or JSON (anything else).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config from {:?}", path))?;

        let is_yaml = matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: SessionConfig = if is_yaml {
            serde_yaml::from_str(&content).context("Failed to parse config YAML")?
        } else {
            serde_json::from_str(&content).context("Failed to parse config JSON")?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn total_trials(&self) -> usize {
        self.structure.n_blocks * self.structure.images_per_block
    }

    pub fn validate(&self) -> std::result::Result<(), SessionError> {
        let fail = |msg: String| Err(SessionError::Config(msg));

        let device = &self.device;
        if device.n_channels_total == 0 {
            return fail("n_channels_total must be at least 1".into());
        }
        if device.marker_channel >= device.n_channels_total {
            return fail(format!(
                "marker_channel {} out of range (0..{})",
                device.marker_channel, device.n_channels_total
            ));
        }
        if let Some(ch) = device.eeg_channels.iter().find(|&&ch| ch >= device.n_channels_total) {
            return fail(format!("EEG channel {} out of range", ch));
        }
        if let Some((label, ch)) = device
            .channel_mapping
            .iter()
            .find(|(_, &ch)| ch >= device.n_channels_total)
        {
            return fail(format!("Channel mapping {} -> {} out of range", label, ch));
        }
        if !(device.sampling_rate > 0.0) {
            return fail("sampling_rate must be positive".into());
        }

        let t = &self.timing;
        let durations = [
            ("initial_rest_duration", t.initial_rest_duration),
            ("pre_stimulus_interval", t.pre_stimulus_interval),
            ("post_stimulus_interval", t.post_stimulus_interval),
            ("isi_jitter", t.isi_jitter),
            ("inter_block_grey_duration", t.inter_block_grey_duration),
            ("image_generation_step_delay", t.image_generation_step_delay),
            ("tone_pre_stimulus_onset", t.tone_pre_stimulus_onset),
            ("image_duration", t.image_duration.unwrap_or(0.0)),
        ];
        if let Some((name, value)) = durations.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
            return fail(format!("{} must be a non-negative number, got {}", name, value));
        }
        if t.poll_interval_ms == 0 || t.poll_interval_ms > TimingProfile::MAX_POLL_INTERVAL_MS {
            return fail(format!(
                "poll_interval_ms must be within 1..={}",
                TimingProfile::MAX_POLL_INTERVAL_MS
            ));
        }

        // 0.0 fills the marker channel between markers
        let markers = [self.stim_start_marker, self.stim_end_marker];
        if markers.iter().any(|m| !m.is_finite() || *m == 0.0) || markers[0] == markers[1] {
            return fail(format!(
                "stimulus markers must be distinct, finite and non-zero, got {} and {}",
                markers[0], markers[1]
            ));
        }

        if self.structure.n_blocks == 0 || self.structure.images_per_block == 0 {
            return fail("n_blocks and images_per_block must be at least 1".into());
        }
        if self.tone.sample_rate == 0 || !(0.0..=1.0).contains(&self.tone.amplitude) {
            return fail("tone sample_rate must be positive and amplitude within 0..=1".into());
        }
        if self.screen.width == 0 || self.screen.height == 0 {
            return fail("screen dimensions must be non-zero".into());
        }

        Ok(())
    }
}
