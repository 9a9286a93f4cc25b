use anyhow::Result;

use super::traits::{MarkerSink, SampleSource};
use super::types::{DeviceDescriptor, DeviceState, FrameStream};
use crate::error::SessionError;

/// Drives a `SampleSource` through its lifecycle with validated transitions.
pub struct ManagedSource {
    inner: Box<dyn SampleSource>,
    state: DeviceState,
    stream: Option<FrameStream>,
}

impl ManagedSource {
    pub fn new(source: Box<dyn SampleSource>) -> Self {
        Self {
            inner: source,
            state: DeviceState::Unopened,
            stream: None,
        }
    }

    pub fn describe(&self) -> DeviceDescriptor {
        self.inner.describe()
    }

    pub async fn open(&mut self) -> Result<(), SessionError> {
        if self.state != DeviceState::Unopened {
            return Err(SessionError::Device(format!(
                "Cannot open device in state {:?}",
                self.state
            )));
        }
        let result = self.inner.open().await;
        result.map_err(|e| self.fail(e))?;
        self.state = DeviceState::Opened;
        Ok(())
    }

    /// Start streaming and return the frame stream.
    pub async fn start(&mut self) -> Result<FrameStream, SessionError> {
        if self.state != DeviceState::Opened && self.state != DeviceState::Stopped {
            return Err(SessionError::Device(format!(
                "Cannot start device in state {:?}",
                self.state
            )));
        }
        let result = self.inner.start().await;
        result.map_err(|e| self.fail(e))?;
        self.state = DeviceState::Running;

        let stream = self.inner.frames();
        self.stream = Some(stream.clone());
        Ok(stream)
    }

    pub async fn stop(&mut self) -> Result<(), SessionError> {
        if self.state != DeviceState::Running {
            return Ok(()); // Already stopped
        }
        let result = self.inner.stop().await;
        result.map_err(|e| self.fail(e))?;
        self.state = DeviceState::Stopped;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.state == DeviceState::Running {
            self.stop().await?;
        }
        self.stream = None;
        self.state = DeviceState::Closed;
        Ok(())
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == DeviceState::Running && self.inner.is_streaming()
    }

    fn fail(&mut self, err: anyhow::Error) -> SessionError {
        self.state = DeviceState::Error(err.to_string());
        SessionError::device(format!("{:#}", err))
    }
}

impl MarkerSink for ManagedSource {
    fn insert_marker(&self, value: f64) -> Result<()> {
        if self.state != DeviceState::Running {
            anyhow::bail!("Cannot insert marker in state {:?}", self.state);
        }
        self.inner.insert_marker(value)
    }
}
