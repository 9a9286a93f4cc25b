use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::format::AttrValue;
use crate::config::{SessionConfig, TimingProfile};
use crate::hal::{Rgb, SampleFormat};

/// Session description written once into the store header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub config_version: String,
    pub rest_condition_color: Rgb,
    pub stim_start_marker: f64,
    pub stim_end_marker: f64,
    pub sample_format: SampleFormat,
    pub board_description: String,
    pub sampling_rate: f64,
    pub n_channels_total: usize,
    pub eeg_channels: Vec<usize>,
    pub marker_channel: usize,
    pub channel_mapping: BTreeMap<String, usize>,
    pub timing: TimingProfile,
    pub n_blocks: usize,
    pub images_per_block: usize,
    pub demo_mode: bool,
    pub image_directory: PathBuf,
    pub session_start: DateTime<Utc>,
}

impl SessionMetadata {
    pub fn from_config(config: &SessionConfig, session_start: DateTime<Utc>) -> Self {
        Self {
            config_version: config.config_version.clone(),
            rest_condition_color: config.rest_condition_color,
            stim_start_marker: config.stim_start_marker,
            stim_end_marker: config.stim_end_marker,
            sample_format: config.sample_format,
            board_description: config.device.board_description.clone(),
            sampling_rate: config.device.sampling_rate,
            n_channels_total: config.device.n_channels_total,
            eeg_channels: config.device.eeg_channels.clone(),
            marker_channel: config.device.marker_channel,
            channel_mapping: config.device.channel_mapping.clone(),
            timing: config.timing.clone(),
            n_blocks: config.structure.n_blocks,
            images_per_block: config.structure.images_per_block,
            demo_mode: config.mode.is_replay(),
            image_directory: config.paths.image_directory.clone(),
            session_start,
        }
    }

    /// Flatten into header attributes. Scalars are stored directly,
    /// structured values as JSON text.
    pub fn to_attributes(&self) -> Vec<(String, AttrValue)> {
        let json = |v: serde_json::Result<String>| AttrValue::Text(v.unwrap_or_default());
        let t = &self.timing;

        let mut attrs = vec![
            ("config_version", AttrValue::Text(self.config_version.clone())),
            ("rest_condition_color", json(serde_json::to_string(&self.rest_condition_color))),
            ("stim_start_marker", AttrValue::Float(self.stim_start_marker)),
            ("stim_end_marker", AttrValue::Float(self.stim_end_marker)),
            ("dtype", AttrValue::Text(self.sample_format.dtype_name().to_string())),
            ("board_description", AttrValue::Text(self.board_description.clone())),
            ("sampling_rate", AttrValue::Float(self.sampling_rate)),
            ("n_channels_total", AttrValue::Int(self.n_channels_total as i64)),
            ("eeg_channels", json(serde_json::to_string(&self.eeg_channels))),
            ("marker_channel", AttrValue::Int(self.marker_channel as i64)),
            ("channel_mapping", json(serde_json::to_string(&self.channel_mapping))),
            ("initial_rest_duration", AttrValue::Float(t.initial_rest_duration)),
            ("pre_stimulus_interval", AttrValue::Float(t.pre_stimulus_interval)),
            ("post_stimulus_interval", AttrValue::Float(t.post_stimulus_interval)),
            ("isi_jitter", AttrValue::Float(t.isi_jitter)),
            ("inter_block_grey_duration", AttrValue::Float(t.inter_block_grey_duration)),
            ("image_generation_step_delay", AttrValue::Float(t.image_generation_step_delay)),
            ("tone_pre_stimulus_onset", AttrValue::Float(t.tone_pre_stimulus_onset)),
            ("n_blocks", AttrValue::Int(self.n_blocks as i64)),
            ("images_per_block", AttrValue::Int(self.images_per_block as i64)),
            ("demo_mode", AttrValue::Bool(self.demo_mode)),
            ("image_directory", AttrValue::Text(self.image_directory.display().to_string())),
            ("session_start", AttrValue::Text(self.session_start.to_rfc3339())),
        ];
        if let Some(image_duration) = t.image_duration {
            attrs.push(("image_duration", AttrValue::Float(image_duration)));
        }

        attrs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}
