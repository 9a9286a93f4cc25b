use tokio::time::Instant;

use super::trial::{Command, Tick, TrialStateMachine};
use crate::config::SessionConfig;
use crate::core::AbortSignal;
use crate::error::{Result, SessionError};
use crate::hal::{
    synthesize_tone, AudioCue, Drawable, MarkerSink, Position, PresentationSurface, Rgb,
    SamplesBuffer,
};

/// Screen positions, as centre points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    pub stimulus: Position,
    pub review_original: Position,
    pub review_artifact: Position,
    pub original_caption: Position,
    pub artifact_caption: Position,
}

impl Layout {
    pub fn for_screen(width: u32, height: u32) -> Self {
        let (w, h) = (width as i32, height as i32);
        Self {
            stimulus: Position::new(w / 2, h / 2),
            review_original: Position::new(w / 4, h / 2 + 50),
            review_artifact: Position::new(3 * w / 4, h / 2 + 50),
            original_caption: Position::new(w / 4, h / 4 - 50),
            artifact_caption: Position::new(3 * w / 4, h / 4 - 50),
        }
    }
}

/// Images shown next to each other during `ReviewSequence`
#[derive(Debug, Clone)]
pub struct ReviewAssets {
    pub original: Drawable,
    pub steps: Vec<Drawable>,
}

/// Everything a single trial draws
#[derive(Debug, Clone)]
pub struct TrialAssets {
    pub stimulus: Drawable,
    pub review: Option<ReviewAssets>,
}

impl TrialAssets {
    pub fn review_steps(&self) -> usize {
        self.review.as_ref().map_or(0, |r| r.steps.len())
    }
}

/// Presentation collaborators plus the pre-synthesized cue.
pub struct Stage {
    surface: Box<dyn PresentationSurface>,
    audio: Box<dyn AudioCue>,
    cue: SamplesBuffer,
    rest_color: Rgb,
    layout: Layout,
}

impl Stage {
    pub fn new(
        surface: Box<dyn PresentationSurface>,
        audio: Box<dyn AudioCue>,
        config: &SessionConfig,
    ) -> Self {
        let tone = &config.tone;
        let cue = synthesize_tone(tone.frequency, tone.duration, tone.amplitude, audio.sample_rate());
        let (width, height) = surface.size();
        Self {
            surface,
            audio,
            cue,
            rest_color: config.rest_condition_color,
            layout: Layout::for_screen(width, height),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.surface.size()
    }

    fn execute(
        &mut self,
        command: Command,
        assets: &TrialAssets,
        markers: Option<&dyn MarkerSink>,
    ) -> Result<()> {
        match command {
            Command::Clear => self
                .surface
                .fill(self.rest_color)
                .map_err(SessionError::collaborator),
            Command::DrawStimulus => self
                .surface
                .render(&assets.stimulus, self.layout.stimulus)
                .map_err(SessionError::collaborator),
            Command::DrawReview { step } => self.draw_review(assets, step),
            Command::Present => self.surface.present().map_err(SessionError::collaborator),
            Command::PlayCue => self.audio.play(&self.cue).map_err(SessionError::collaborator),
            Command::Marker(value) => match markers {
                Some(sink) => sink.insert_marker(value).map_err(SessionError::device),
                None => Ok(()),
            },
        }
    }

    fn draw_review(&mut self, assets: &TrialAssets, step: usize) -> Result<()> {
        let review = assets
            .review
            .as_ref()
            .ok_or_else(|| SessionError::collaborator("trial has no review images"))?;
        if step >= review.steps.len() {
            return Err(SessionError::collaborator(format!("no review image {}", step)));
        }

        compose_review(self.surface.as_mut(), &self.layout, review, step)
            .map_err(SessionError::collaborator)
    }
}

fn compose_review(
    surface: &mut dyn PresentationSurface,
    layout: &Layout,
    review: &ReviewAssets,
    step: usize,
) -> anyhow::Result<()> {
    surface.render(&review.original, layout.review_original)?;
    surface.render(&review.steps[step], layout.review_artifact)?;
    surface.caption("Original", layout.original_caption)?;
    surface.caption(
        &format!("Reconstruction {}/{}", step + 1, review.steps.len()),
        layout.artifact_caption,
    )?;
    Ok(())
}

/// Run one trial to completion or abort.
///
/// Between ticks the loop sleeps until the machine's next deadline, never
/// longer than the poll interval, so abort requests are seen promptly.
/// A failing collaborator ends the trial with its error; the machine is
/// left ready for the next `begin_trial`.
pub async fn drive_trial(
    machine: &mut TrialStateMachine,
    stage: &mut Stage,
    assets: &TrialAssets,
    markers: Option<&dyn MarkerSink>,
    abort: &AbortSignal,
) -> Result<Tick> {
    machine.begin_trial(Instant::now(), assets.review_steps());

    loop {
        let events = stage.surface.poll_events();
        let tick = machine.tick(Instant::now(), &events, abort);

        for command in machine.drain_commands() {
            if let Err(e) = stage.execute(command, assets, markers) {
                machine.abandon(Instant::now());
                return Err(e);
            }
        }

        if tick != Tick::Continue {
            return Ok(tick);
        }
        tokio::time::sleep(machine.next_wakeup(Instant::now())).await;
    }
}
