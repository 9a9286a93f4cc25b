use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::hal::{AudioCue, SamplesBuffer};

#[derive(Default)]
struct Playback {
    samples: Arc<Vec<f32>>,
    channels: usize,
    position: usize, // frame index
}

/// Plays cues on the default output device.
///
/// The cpal stream lives on its own thread for the lifetime of the cue;
/// `play` only swaps the buffer the output callback reads from.
pub struct CpalCue {
    playback: Arc<Mutex<Playback>>,
    sample_rate: u32,
    shutdown_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalCue {
    pub fn open_default() -> Result<Self> {
        let playback = Arc::new(Mutex::new(Playback::default()));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, String>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let shared = playback.clone();
        let worker = thread::spawn(move || {
            let stream = match build_stream(shared) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("{:#}", e)));
                    return;
                }
            };
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        let sample_rate = ready_rx
            .recv()
            .context("Audio thread exited before reporting")?
            .map_err(|e| anyhow!(e))?;

        log::info!("Audio output ready at {} Hz", sample_rate);

        Ok(Self {
            playback,
            sample_rate,
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
        })
    }
}

fn build_stream(playback: Arc<Mutex<Playback>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;
    let supported = device
        .default_output_config()
        .context("No output config available")?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(anyhow!(
            "Unsupported output sample format {:?}",
            supported.sample_format()
        ));
    }

    let config: cpal::StreamConfig = supported.into();
    let rate = config.sample_rate.0;
    let out_channels = config.channels as usize;

    let err_fn = |err: cpal::StreamError| log::warn!("Audio output error: {}", err);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // Never block the audio thread
                let Ok(mut pb) = playback.try_lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(out_channels) {
                    let total = if pb.channels == 0 { 0 } else { pb.samples.len() / pb.channels };
                    if pb.position >= total {
                        frame.fill(0.0);
                        continue;
                    }
                    let base = pb.position * pb.channels;
                    for (ch, out) in frame.iter_mut().enumerate() {
                        *out = pb.samples[base + ch.min(pb.channels - 1)];
                    }
                    pb.position += 1;
                }
            },
            err_fn,
            None,
        )
        .context("Failed to build output stream")?;
    stream.play().context("Failed to start output stream")?;

    Ok((stream, rate))
}

impl AudioCue for CpalCue {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&mut self, buffer: &SamplesBuffer) -> Result<()> {
        if buffer.sample_rate != self.sample_rate {
            log::warn!(
                "Cue synthesized at {} Hz, device runs at {} Hz",
                buffer.sample_rate,
                self.sample_rate
            );
        }
        let mut pb = self
            .playback
            .lock()
            .map_err(|_| anyhow!("Audio playback state poisoned"))?;
        pb.samples = buffer.samples.clone();
        pb.channels = buffer.channels as usize;
        pb.position = 0;
        Ok(())
    }
}

impl Drop for CpalCue {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Cue that discards everything; used when audio is muted or unavailable.
#[derive(Debug, Clone)]
pub struct SilentCue {
    sample_rate: u32,
}

impl SilentCue {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl AudioCue for SilentCue {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&mut self, buffer: &SamplesBuffer) -> Result<()> {
        log::debug!("Muted cue ({:.3}s)", buffer.duration_secs());
        Ok(())
    }
}
