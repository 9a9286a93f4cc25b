use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver};
use std::io::BufRead;
use std::thread;

use crate::hal::{Drawable, InputEvent, KeyCode, Position, PresentationSurface, Rgb};

/// Surface without a display: frames are reported to the log and operator
/// input is read line by line from stdin.
///
/// An empty line presses the continue key, `q` quits.
pub struct HeadlessSurface {
    width: u32,
    height: u32,
    continue_key: KeyCode,
    auto_advance: bool,
    pending: Vec<String>,
    frames_presented: u64,
    input_rx: Option<Receiver<InputEvent>>,
}

impl HeadlessSurface {
    pub fn new(width: u32, height: u32, continue_key: KeyCode) -> Self {
        Self {
            width,
            height,
            continue_key,
            auto_advance: false,
            pending: Vec::new(),
            frames_presented: 0,
            input_rx: None,
        }
    }

    /// Press the continue key on every poll
    pub fn with_auto_advance(mut self) -> Self {
        self.auto_advance = true;
        self
    }

    /// Read operator input from stdin on a background thread
    pub fn with_stdin(mut self) -> Self {
        let (tx, rx) = unbounded();
        let continue_key = self.continue_key;
        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let event = match line.trim() {
                    "q" | "quit" => InputEvent::Quit,
                    _ => InputEvent::KeyPress(continue_key),
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        self.input_rx = Some(rx);
        self
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }
}

impl PresentationSurface for HeadlessSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fill(&mut self, color: Rgb) -> Result<()> {
        self.pending.clear();
        self.pending.push(format!("fill{:?}", color));
        Ok(())
    }

    fn render(&mut self, drawable: &Drawable, position: Position) -> Result<()> {
        self.pending.push(format!(
            "image {}x{} @({},{})",
            drawable.width(),
            drawable.height(),
            position.x,
            position.y
        ));
        Ok(())
    }

    fn caption(&mut self, text: &str, _position: Position) -> Result<()> {
        self.pending.push(format!("\"{}\"", text));
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.frames_presented += 1;
        log::debug!("frame {}: {}", self.frames_presented, self.pending.join(", "));
        self.pending.clear();
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<InputEvent> {
        let mut events: Vec<InputEvent> = match &self.input_rx {
            Some(rx) => rx.try_iter().collect(),
            None => Vec::new(),
        };
        if self.auto_advance {
            events.push(InputEvent::KeyPress(self.continue_key));
        }
        events
    }
}
