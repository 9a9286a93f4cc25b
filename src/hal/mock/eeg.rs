use anyhow::{anyhow, Result};
use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::Rng;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::SampleFrame;
use crate::hal::{DeviceDescriptor, FrameStream, SampleSource};

/// Synthetic EEG board: one sine per channel plus noise, pushed from a
/// background thread at the nominal sampling rate.
///
/// Inserted markers are queued and written one per frame, in order.
pub struct SimulatedEegSource {
    descriptor: DeviceDescriptor,
    block_size: usize,
    amplitude: f64,
    noise: f64,
    unavailable: bool,
    streaming: Arc<AtomicBool>,
    marker_tx: Sender<f64>,
    marker_rx: Receiver<f64>,
    rx: Receiver<SampleFrame>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedEegSource {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        let (_tx, rx) = unbounded();
        let (marker_tx, marker_rx) = unbounded();
        Self {
            descriptor,
            block_size: 10,
            amplitude: 20.0,
            noise: 1.0,
            unavailable: false,
            streaming: Arc::new(AtomicBool::new(false)),
            marker_tx,
            marker_rx,
            rx,
            worker: None,
        }
    }

    /// Frames generated per wake-up of the producer thread
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Simulate a board that cannot be reached
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    fn spawn_producer(&self, tx: Sender<SampleFrame>) -> JoinHandle<()> {
        let streaming = self.streaming.clone();
        let markers = self.marker_rx.clone();
        let rate = self.descriptor.sampling_rate;
        let channels = self.descriptor.channel_count;
        let marker_channel = self.descriptor.marker_channel;
        let block_size = self.block_size;
        let amplitude = self.amplitude;
        let noise = self.noise;

        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let period = Duration::from_secs_f64(block_size as f64 / rate);
            let mut next_wake = Instant::now();
            let mut index: u64 = 0;

            while streaming.load(Ordering::Acquire) {
                for _ in 0..block_size {
                    let t = index as f64 / rate;
                    let values = (0..channels)
                        .map(|ch| {
                            if ch == marker_channel {
                                markers.try_recv().unwrap_or(0.0)
                            } else {
                                let freq = 8.0 + ch as f64;
                                amplitude * (2.0 * PI * freq * t).sin()
                                    + rng.gen_range(-noise..=noise)
                            }
                        })
                        .collect();

                    if tx.send(SampleFrame::new(t, values)).is_err() {
                        return; // Receiver gone
                    }
                    index += 1;
                }

                next_wake += period;
                let now = Instant::now();
                if next_wake > now {
                    thread::sleep(next_wake - now);
                }
            }
        })
    }
}

#[async_trait]
impl SampleSource for SimulatedEegSource {
    fn describe(&self) -> DeviceDescriptor {
        self.descriptor.clone()
    }

    async fn open(&mut self) -> Result<()> {
        if self.unavailable {
            return Err(anyhow!(
                "No board reachable at {:?}",
                self.descriptor.address
            ));
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if self.unavailable {
            return Err(anyhow!("Board not available"));
        }
        if self.streaming.load(Ordering::Acquire) {
            return Ok(());
        }

        let (tx, rx) = unbounded();
        self.rx = rx;
        // Markers from a previous run are stale
        while self.marker_rx.try_recv().is_ok() {}
        self.streaming.store(true, Ordering::Release);
        self.worker = Some(self.spawn_producer(tx));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.streaming.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("Sample producer thread panicked"))?;
        }
        Ok(())
    }

    fn frames(&mut self) -> FrameStream {
        FrameStream::new(self.rx.clone())
    }

    fn insert_marker(&self, value: f64) -> Result<()> {
        if !self.streaming.load(Ordering::Acquire) {
            return Err(anyhow!("Device not streaming"));
        }
        self.marker_tx
            .send(value)
            .map_err(|_| anyhow!("Marker queue closed"))
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }
}

impl Drop for SimulatedEegSource {
    fn drop(&mut self) {
        self.streaming.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            board_description: "test".to_string(),
            sampling_rate: 1000.0,
            channel_count: 3,
            eeg_channels: vec![0, 1],
            marker_channel: 2,
            channel_mapping: BTreeMap::new(),
            address: String::new(),
        }
    }

    #[tokio::test]
    async fn test_frames_have_descriptor_width() {
        let mut source = SimulatedEegSource::new(descriptor());
        source.start().await.unwrap();
        let stream = source.frames();

        let frame = stream.next_frame().unwrap();
        assert_eq!(frame.channel_count(), 3);

        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_marker_lands_in_marker_channel() {
        let mut source = SimulatedEegSource::new(descriptor());
        source.start().await.unwrap();
        let stream = source.frames();

        source.insert_marker(1.0).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        source.stop().await.unwrap();

        let markers: Vec<f64> = std::iter::from_fn(|| stream.next_frame())
            .map(|f| f.values[2])
            .filter(|v| *v != 0.0)
            .collect();
        assert_eq!(markers, vec![1.0]);
    }

    #[tokio::test]
    async fn test_back_to_back_markers_all_land_in_order() {
        let mut source = SimulatedEegSource::new(descriptor());
        source.start().await.unwrap();
        let stream = source.frames();

        source.insert_marker(1.0).unwrap();
        source.insert_marker(2.0).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        source.stop().await.unwrap();

        let markers: Vec<f64> = std::iter::from_fn(|| stream.next_frame())
            .map(|f| f.values[2])
            .filter(|v| *v != 0.0)
            .collect();
        assert_eq!(markers, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_stream_closes_after_stop() {
        let mut source = SimulatedEegSource::new(descriptor());
        source.start().await.unwrap();
        let stream = source.frames();
        source.stop().await.unwrap();

        while stream.next_frame().is_some() {}
        assert!(stream.next_frame().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_board_fails_to_open() {
        let mut source = SimulatedEegSource::new(descriptor()).unavailable();
        assert!(source.open().await.is_err());
    }
}
