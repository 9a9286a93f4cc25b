use serde::{Deserialize, Serialize};

/// One timestep across all channels, as delivered by a sample source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFrame {
    /// Device timestamp in seconds
    pub timestamp: f64,

    /// One value per channel, marker channel included
    pub values: Vec<f64>,
}

impl SampleFrame {
    pub fn new(timestamp: f64, values: Vec<f64>) -> Self {
        Self { timestamp, values }
    }

    pub fn channel_count(&self) -> usize {
        self.values.len()
    }
}

/// Fixed-channel, time-growable `C x T` matrix.
///
/// Stored channel-major so that appending along the time axis only touches
/// the tail of each channel vector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleMatrix {
    channels: Vec<Vec<f64>>,
}

impl SampleMatrix {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channels: vec![Vec::new(); channel_count],
        }
    }

    pub fn with_capacity(channel_count: usize, timesteps: usize) -> Self {
        Self {
            channels: (0..channel_count)
                .map(|_| Vec::with_capacity(timesteps))
                .collect(),
        }
    }

    /// Build from channel-major rows. All rows must have equal length.
    pub fn from_channels(channels: Vec<Vec<f64>>) -> anyhow::Result<Self> {
        if let Some(first) = channels.first() {
            let len = first.len();
            if let Some((idx, row)) = channels.iter().enumerate().find(|(_, r)| r.len() != len) {
                anyhow::bail!(
                    "Channel {} has {} timesteps, expected {}",
                    idx,
                    row.len(),
                    len
                );
            }
        }
        Ok(Self { channels })
    }

    /// Collect frames into a matrix, rejecting frames of the wrong width.
    pub fn from_frames(channel_count: usize, frames: &[SampleFrame]) -> anyhow::Result<Self> {
        let mut matrix = Self::with_capacity(channel_count, frames.len());
        for frame in frames {
            matrix.push_frame(frame)?;
        }
        Ok(matrix)
    }

    pub fn push_frame(&mut self, frame: &SampleFrame) -> anyhow::Result<()> {
        if frame.channel_count() != self.channel_count() {
            anyhow::bail!(
                "Frame has {} channels, expected {}",
                frame.channel_count(),
                self.channel_count()
            );
        }
        for (row, value) in self.channels.iter_mut().zip(&frame.values) {
            row.push(*value);
        }
        Ok(())
    }

    /// Append another matrix along the time axis.
    pub fn extend(&mut self, other: &SampleMatrix) -> anyhow::Result<()> {
        self.append_range(other, 0, other.timesteps())
    }

    /// Append `len` timesteps of `other` starting at `start`.
    pub fn append_range(&mut self, other: &SampleMatrix, start: usize, len: usize) -> anyhow::Result<()> {
        if other.channel_count() != self.channel_count() {
            anyhow::bail!(
                "Cannot extend {}-channel matrix with {} channels",
                self.channel_count(),
                other.channel_count()
            );
        }
        if start + len > other.timesteps() {
            anyhow::bail!("Range {}..{} exceeds {} timesteps", start, start + len, other.timesteps());
        }
        for (row, tail) in self.channels.iter_mut().zip(&other.channels) {
            row.extend_from_slice(&tail[start..start + len]);
        }
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of timesteps (`T`)
    pub fn timesteps(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.timesteps() == 0
    }

    pub fn channel(&self, idx: usize) -> Option<&[f64]> {
        self.channels.get(idx).map(|c| c.as_slice())
    }

    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    pub fn clear(&mut self) {
        for row in &mut self.channels {
            row.clear();
        }
    }
}
