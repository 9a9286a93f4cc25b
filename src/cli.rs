use clap::Parser;
use std::path::PathBuf;

use crate::config::{SessionConfig, SessionMode};
use crate::core::AbortSignal;
use crate::engine::{SessionController, SessionOutcome, Stage};
use crate::hal::drivers::{CpalCue, HeadlessSurface, SilentCue};
use crate::hal::mock::SimulatedEegSource;
use crate::hal::{AudioCue, PresentationSurface};
use crate::imaging::load_stimulus_set;
use crate::replay::ReplayCache;

pub const EXIT_FAILED: i32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "neurostim",
    version,
    about = "EEG stimulus presentation with concurrent sample logging",
    long_about = "Runs a block/trial stimulus session. Acquisition mode records EEG into a\n\
                  session store; --live-demo replays cached trials with their reconstructions."
)]
pub struct Cli {
    /// Session configuration (YAML or JSON)
    #[arg(long)]
    pub config: PathBuf,

    /// Replay cached trials instead of recording
    #[arg(long)]
    pub live_demo: bool,

    /// In replay, show each trial's final reconstruction as the next stimulus
    #[arg(long, requires = "live_demo")]
    pub autoregressive: bool,

    /// Replay cache path, overriding paths.replay_cache
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Record from a simulated EEG board
    #[arg(long)]
    pub simulate: bool,

    /// Press the continue key automatically
    #[arg(long)]
    pub auto_advance: bool,

    /// Disable the audio cue
    #[arg(long)]
    pub mute: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    pub fn mode(&self) -> SessionMode {
        if self.live_demo {
            SessionMode::Replay {
                autoregressive: self.autoregressive,
            }
        } else {
            SessionMode::Acquisition
        }
    }
}

fn open_audio(mute: bool, fallback_rate: u32) -> Box<dyn AudioCue> {
    if mute {
        return Box::new(SilentCue::new(fallback_rate));
    }
    match CpalCue::open_default() {
        Ok(cue) => Box::new(cue),
        Err(e) => {
            log::warn!("Audio unavailable, continuing without cue: {:#}", e);
            Box::new(SilentCue::new(fallback_rate))
        }
    }
}

/// Build and run the session described by `cli`; returns the exit code.
pub async fn execute(cli: Cli) -> i32 {
    let config = match SessionConfig::load(&cli.config) {
        Ok(config) => config.with_mode(cli.mode()),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_FAILED;
        }
    };

    let abort = AbortSignal::new();
    let ctrl_c_abort = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, ending session");
            ctrl_c_abort.raise();
        }
    });

    let mut surface = HeadlessSurface::new(
        config.screen.width,
        config.screen.height,
        config.screen.continue_key,
    )
    .with_stdin();
    if cli.auto_advance {
        surface = surface.with_auto_advance();
    }
    let surface: Box<dyn PresentationSurface> = Box::new(surface);
    let stage = Stage::new(surface, open_audio(cli.mute, config.tone.sample_rate), &config);

    let controller = if config.mode.is_replay() {
        let Some(path) = cli.cache.clone().or_else(|| config.paths.replay_cache.clone()) else {
            eprintln!("Error: replay needs --cache or paths.replay_cache");
            return EXIT_FAILED;
        };
        match ReplayCache::load(&path) {
            Ok(cache) => SessionController::replay(config, stage, cache, abort),
            Err(e) => {
                eprintln!("Error: {}", e);
                return EXIT_FAILED;
            }
        }
    } else {
        if !cli.simulate {
            eprintln!("Error: no EEG board driver is linked; use --simulate to record from a simulated board");
            return EXIT_FAILED;
        }
        let stimuli = match load_stimulus_set(
            &config.paths.image_directory,
            config.screen.width,
            config.screen.height,
        ) {
            Ok(stimuli) => stimuli,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                return EXIT_FAILED;
            }
        };
        let source = Box::new(SimulatedEegSource::new(config.device.descriptor()));
        SessionController::acquisition(config, stage, source, stimuli, abort)
    };

    let report = controller.run().await;
    match &report.outcome {
        SessionOutcome::Completed { trials } => {
            println!("Session completed: {} trials", trials);
        }
        SessionOutcome::Aborted { trials_completed } => {
            println!("Session aborted after {} trials", trials_completed);
        }
        SessionOutcome::Failed {
            trials_completed,
            error,
        } => {
            eprintln!("Session failed after {} trials: {}", trials_completed, error);
        }
    }
    if let Some(logger) = &report.logger {
        println!(
            "Persisted {} trials ({} timesteps)",
            logger.records_written, logger.timesteps_written
        );
    }

    report.outcome.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        let cli = Cli::parse_from(["neurostim", "--config", "c.yaml", "-vv"]);
        assert_eq!(cli.log_level(), log::LevelFilter::Debug);
        assert_eq!(cli.mode(), SessionMode::Acquisition);
    }

    #[test]
    fn test_autoregressive_requires_live_demo() {
        assert!(Cli::try_parse_from(["neurostim", "--config", "c.yaml", "--autoregressive"]).is_err());

        let cli = Cli::parse_from([
            "neurostim",
            "--config",
            "c.yaml",
            "--live-demo",
            "--autoregressive",
        ]);
        assert_eq!(
            cli.mode(),
            SessionMode::Replay {
                autoregressive: true
            }
        );
    }
}
