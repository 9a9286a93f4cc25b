use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

use crate::hal::{Drawable, InputEvent, KeyCode, Position, PresentationSurface, Rgb};

/// Draw call recorded by `ScriptedSurface`
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    Fill(Rgb),
    Render {
        width: u32,
        height: u32,
        position: Position,
    },
    Caption(String),
    Present,
}

/// Shared view of the operations a surface has performed
#[derive(Debug, Clone, Default)]
pub struct SurfaceLog {
    ops: Arc<Mutex<Vec<SurfaceOp>>>,
}

impl SurfaceLog {
    fn push(&self, op: SurfaceOp) {
        self.ops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(op);
    }

    pub fn ops(&self) -> Vec<SurfaceOp> {
        self.ops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn presents(&self) -> usize {
        self.ops().iter().filter(|op| **op == SurfaceOp::Present).count()
    }
}

/// Display-free surface replaying a timed script of input events.
pub struct ScriptedSurface {
    width: u32,
    height: u32,
    created: Instant,
    script: VecDeque<(Duration, InputEvent)>,
    auto_continue: Option<KeyCode>,
    fail_renders: bool,
    log: SurfaceLog,
}

impl ScriptedSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            created: Instant::now(),
            script: VecDeque::new(),
            auto_continue: None,
            fail_renders: false,
            log: SurfaceLog::default(),
        }
    }

    /// Deliver `event` on the first poll at least `delay` after creation
    pub fn with_event_at(mut self, delay: Duration, event: InputEvent) -> Self {
        let idx = self.script.partition_point(|(at, _)| *at <= delay);
        self.script.insert(idx, (delay, event));
        self
    }

    /// Report a press of `key` on every poll
    pub fn with_auto_continue(mut self, key: KeyCode) -> Self {
        self.auto_continue = Some(key);
        self
    }

    /// Make every `render` call fail
    pub fn with_failing_renders(mut self) -> Self {
        self.fail_renders = true;
        self
    }

    pub fn log(&self) -> SurfaceLog {
        self.log.clone()
    }
}

impl PresentationSurface for ScriptedSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fill(&mut self, color: Rgb) -> Result<()> {
        self.log.push(SurfaceOp::Fill(color));
        Ok(())
    }

    fn render(&mut self, drawable: &Drawable, position: Position) -> Result<()> {
        if self.fail_renders {
            return Err(anyhow!("Render failed"));
        }
        self.log.push(SurfaceOp::Render {
            width: drawable.width(),
            height: drawable.height(),
            position,
        });
        Ok(())
    }

    fn caption(&mut self, text: &str, _position: Position) -> Result<()> {
        self.log.push(SurfaceOp::Caption(text.to_string()));
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.log.push(SurfaceOp::Present);
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<InputEvent> {
        let elapsed = self.created.elapsed();
        let mut events = Vec::new();
        while let Some((at, _)) = self.script.front() {
            if *at > elapsed {
                break;
            }
            if let Some((_, event)) = self.script.pop_front() {
                events.push(event);
            }
        }
        if let Some(key) = self.auto_continue {
            events.push(InputEvent::KeyPress(key));
        }
        events
    }
}
