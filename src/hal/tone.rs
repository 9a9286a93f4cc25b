use std::f64::consts::PI;
use std::sync::Arc;

use super::types::SamplesBuffer;

/// Stereo sine tone, `round(duration * sample_rate)` frames long.
pub fn synthesize_tone(frequency: f64, duration: f64, amplitude: f64, sample_rate: u32) -> SamplesBuffer {
    let frames = (duration.max(0.0) * sample_rate as f64).round() as usize;
    let phase_increment = 2.0 * PI * frequency / sample_rate as f64;

    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let value = (amplitude * (i as f64 * phase_increment).sin()) as f32;
        samples.push(value);
        samples.push(value);
    }

    SamplesBuffer {
        sample_rate,
        channels: 2,
        samples: Arc::new(samples),
    }
}
