use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{Duration, Instant};

use crate::config::{SessionConfig, TimingProfile};
use crate::core::{AbortSignal, Phase, PhaseVisit};
use crate::hal::{InputEvent, KeyCode};

/// Presentation work requested by the machine, executed by the presenter
/// in emission order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Fill the back buffer with the rest colour
    Clear,
    /// Draw the trial's stimulus, centred
    DrawStimulus,
    /// Draw the stimulus next to review artifact `step`
    DrawReview { step: usize },
    Present,
    PlayCue,
    Marker(f64),
}

/// Result of one `tick`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    TrialComplete,
    Aborted,
}

/// `inter_block_grey_duration - tone_pre_stimulus_onset + U(0, isi_jitter)`,
/// never negative. Draws a fresh jitter on every call.
pub fn inter_trial_duration<R: Rng + ?Sized>(timing: &TimingProfile, rng: &mut R) -> f64 {
    let jitter = if timing.isi_jitter > 0.0 {
        rng.gen_range(0.0..timing.isi_jitter)
    } else {
        0.0
    };
    (timing.inter_block_grey_duration - timing.tone_pre_stimulus_onset + jitter).max(0.0)
}

fn secs(duration: f64) -> Duration {
    Duration::from_secs_f64(duration.max(0.0))
}

struct ActivePhase {
    phase: Phase,
    entered: Instant,
    visit: usize,
    /// `None` waits for the continue key
    deadline: Option<Instant>,
}

/// Display-free trial sequencer.
///
/// Each `tick` consumes the input events delivered since the previous one,
/// advances through every phase whose deadline has passed and queues the
/// `Command`s the presenter must execute. Deadlines are absolute instants
/// fixed at phase entry, so late ticks never accumulate drift.
pub struct TrialStateMachine {
    timing: TimingProfile,
    continue_key: KeyCode,
    stim_start_marker: f64,
    stim_end_marker: f64,
    rng: StdRng,
    rest_pending: bool,
    active: Option<ActivePhase>,
    cue_at: Option<Instant>,
    review_steps: usize,
    review_step: usize,
    next_step_at: Option<Instant>,
    visits: Vec<PhaseVisit>,
    commands: Vec<Command>,
}

impl TrialStateMachine {
    pub fn new(config: &SessionConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            timing: config.timing.clone(),
            continue_key: config.screen.continue_key,
            stim_start_marker: config.stim_start_marker,
            stim_end_marker: config.stim_end_marker,
            rng,
            rest_pending: true,
            active: None,
            cue_at: None,
            review_steps: 0,
            review_step: 0,
            next_step_at: None,
            visits: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Start a trial. The first trial of a session opens with `Rest`.
    /// `review_steps > 0` adds a `ReviewSequence` with that many artifacts.
    pub fn begin_trial(&mut self, now: Instant, review_steps: usize) {
        self.visits.clear();
        self.commands.clear();
        self.review_steps = review_steps;

        let first = if std::mem::replace(&mut self.rest_pending, false) {
            Phase::Rest
        } else {
            Phase::PreStimulus
        };
        self.enter(first, now);
    }

    pub fn phase(&self) -> Option<Phase> {
        self.active.as_ref().map(|a| a.phase)
    }

    /// Visits of the current (or just finished) trial, in order
    pub fn visits(&self) -> &[PhaseVisit] {
        &self.visits
    }

    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Poll-and-dispatch step.
    pub fn tick(&mut self, now: Instant, events: &[InputEvent], abort: &AbortSignal) -> Tick {
        if self.active.is_none() {
            return Tick::TrialComplete;
        }

        if events.iter().any(InputEvent::is_abort) {
            log::info!("Abort requested by operator");
            abort.raise();
        }
        if abort.is_raised() {
            self.abandon(now);
            return Tick::Aborted;
        }

        // Edge-triggered: a press only counts for the phase active now
        let mut continue_pressed = events
            .iter()
            .any(|e| *e == InputEvent::KeyPress(self.continue_key));

        loop {
            let Some(active) = self.active.as_ref() else {
                return Tick::TrialComplete;
            };
            let phase = active.phase;
            let deadline = active.deadline;

            if phase == Phase::PreStimulus {
                if let Some(cue_at) = self.cue_at {
                    if now >= cue_at {
                        self.commands.push(Command::PlayCue);
                        self.cue_at = None;
                    }
                }
            }
            if phase == Phase::ReviewSequence {
                self.advance_review(now);
            }

            let expired = match deadline {
                Some(deadline) => now >= deadline,
                None => {
                    // The final artifact must be up for a full step delay
                    let ready = phase != Phase::ReviewSequence
                        || (self.review_step + 1 >= self.review_steps
                            && self.next_step_at.is_none());
                    let advance = continue_pressed && ready;
                    if advance {
                        continue_pressed = false;
                    }
                    advance
                }
            };
            if !expired {
                return Tick::Continue;
            }

            self.exit_current(now);
            match phase.successor(self.review_steps > 0) {
                Some(next) => {
                    self.enter(next, now);
                    continue_pressed = false;
                }
                None => {
                    self.active = None;
                    return Tick::TrialComplete;
                }
            }
        }
    }

    /// Time until the next deadline, cue or review step, capped at the
    /// poll interval.
    pub fn next_wakeup(&self, now: Instant) -> Duration {
        let mut wake = self.timing.poll_interval();
        let candidates = [
            self.active.as_ref().and_then(|a| a.deadline),
            self.cue_at,
            self.next_step_at,
        ];
        for at in candidates.into_iter().flatten() {
            wake = wake.min(at.saturating_duration_since(now));
        }
        wake
    }

    /// End the trial early, closing the open phase visit.
    pub fn abandon(&mut self, now: Instant) {
        if self.active.is_some() {
            self.exit_current(now);
            self.active = None;
        }
        self.cue_at = None;
        self.next_step_at = None;
    }

    fn enter(&mut self, phase: Phase, now: Instant) {
        let t = &self.timing;
        let deadline = match phase {
            // The session's opening rest absorbs the cue pre-roll
            Phase::Rest => Some(now + secs(t.initial_rest_duration - t.tone_pre_stimulus_onset)),
            Phase::PreStimulus => Some(now + secs(t.pre_stimulus_interval)),
            Phase::Stimulus => t.image_duration.map(|d| now + secs(d)),
            Phase::PostStimulus => Some(now + secs(t.post_stimulus_interval)),
            Phase::ReviewSequence => None,
            Phase::InterTrial => Some(now + secs(inter_trial_duration(t, &mut self.rng))),
        };

        match phase {
            Phase::Rest | Phase::PostStimulus | Phase::InterTrial => {
                self.commands.extend([Command::Clear, Command::Present]);
            }
            Phase::PreStimulus => {
                // Neutral screen now, stimulus composed for the next present
                self.commands.extend([
                    Command::Clear,
                    Command::Present,
                    Command::Clear,
                    Command::DrawStimulus,
                ]);
                let lead = t.pre_stimulus_interval - t.tone_pre_stimulus_onset;
                self.cue_at = Some(now + secs(lead));
            }
            Phase::Stimulus => {
                self.commands
                    .extend([Command::Present, Command::Marker(self.stim_start_marker)]);
            }
            Phase::ReviewSequence => {
                self.review_step = 0;
                self.commands.extend([
                    Command::Clear,
                    Command::DrawReview { step: 0 },
                    Command::Present,
                ]);
                self.next_step_at = Some(now + secs(t.image_generation_step_delay));
            }
        }

        self.visits.push(PhaseVisit {
            phase,
            entered_at: Utc::now(),
            exited_at: None,
            duration_s: 0.0,
            steps: usize::from(phase == Phase::ReviewSequence),
        });
        self.active = Some(ActivePhase {
            phase,
            entered: now,
            visit: self.visits.len() - 1,
            deadline,
        });

        log::trace!("Entered {}", phase);
    }

    /// Show every artifact whose step time has passed. `next_step_at` is
    /// cleared only once the final artifact has been up for a full delay.
    fn advance_review(&mut self, now: Instant) {
        while let Some(step_at) = self.next_step_at {
            if now < step_at {
                return;
            }
            if self.review_step + 1 >= self.review_steps {
                // Final artifact stays up until continue
                self.next_step_at = None;
                return;
            }
            self.review_step += 1;
            self.commands.extend([
                Command::Clear,
                Command::DrawReview {
                    step: self.review_step,
                },
                Command::Present,
            ]);
            self.next_step_at = Some(step_at + secs(self.timing.image_generation_step_delay));
            if let Some(active) = &self.active {
                self.visits[active.visit].steps = self.review_step + 1;
            }
        }
    }

    fn exit_current(&mut self, now: Instant) {
        let Some(active) = &self.active else {
            return;
        };
        if active.phase == Phase::Stimulus {
            self.commands.push(Command::Marker(self.stim_end_marker));
        }
        if active.phase == Phase::PreStimulus {
            self.cue_at = None;
        }
        let visit = &mut self.visits[active.visit];
        visit.exited_at = Some(Utc::now());
        visit.duration_s = now.saturating_duration_since(active.entered).as_secs_f64();
    }
}
