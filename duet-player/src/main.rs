//! # Duet Player
//!
//! Plays a media file with video slaved to the audio device clock.
//!
//! ```text
//! duet <file> [--headless] [--config <file.json>]
//! duet testsrc:<frames> --headless
//! ```

mod app;
mod yuv;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use eframe::egui;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use duet_core::audio_output::{AudioOutput, PacedAudioOutput};
use duet_core::presenter::initial_surface_size;
use duet_core::{open_source, run_session, EventLoop, MediaSession, NullPresenter, SessionConfig};

use crate::app::{DuetApp, Outcome};

/// Exit status for a missing argument or failed start.
const EXIT_FAILURE: u8 = 255;

struct AppOptions {
    source: Option<String>,
    headless: bool,
    config: Option<PathBuf>,
}

impl AppOptions {
    fn from_args(args: &[String]) -> Result<Self> {
        let mut source = None;
        let mut headless = false;
        let mut config = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--headless" => {
                    headless = true;
                    i += 1;
                }
                "--config" | "-c" => {
                    let value = args
                        .get(i + 1)
                        .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                    config = Some(PathBuf::from(value));
                    i += 2;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other => {
                    if source.is_none() {
                        source = Some(other.to_string());
                    } else {
                        tracing::warn!("Ignoring extra argument {:?}", other);
                    }
                    i += 1;
                }
            }
        }
        Ok(Self { source, headless, config })
    }

    fn session_config(&self) -> Result<SessionConfig> {
        match &self.config {
            Some(path) => SessionConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display())),
            None => Ok(SessionConfig::default()),
        }
    }
}

fn print_usage() {
    println!("Duet Player v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: duet <file|testsrc[:frames]> [options]");
    println!();
    println!("Options:");
    println!("  --headless         Play without a window, print stats as JSON");
    println!("  -c, --config FILE  Session configuration (JSON)");
    println!("  -h, --help         Show this help");
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("duet=info,eframe=warn")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(args: &[String]) -> Result<()> {
    let options = AppOptions::from_args(args)?;
    let Some(source) = options.source.clone() else {
        print_usage();
        anyhow::bail!("Missing media source");
    };
    let config = options.session_config()?;

    tracing::info!("Duet Player v{} (core {})", env!("CARGO_PKG_VERSION"), duet_core::VERSION);

    if options.headless {
        run_headless(&source, config)
    } else {
        run_windowed(&source, config)
    }
}

fn start_session(
    source: &str,
    config: SessionConfig,
    audio: Box<dyn AudioOutput>,
) -> Result<MediaSession> {
    let media = open_source(source).with_context(|| format!("Cannot open {}", source))?;
    MediaSession::start(media, audio, config).context("Failed to start playback")
}

fn run_headless(source: &str, config: SessionConfig) -> Result<()> {
    let mut session = start_session(source, config, Box::new(PacedAudioOutput::new()))?;
    let mut presenter = NullPresenter::new();
    let mut events = EventLoop::new();

    let end = run_session(&mut session, &mut presenter, &mut events).context("Playback failed")?;
    let stats = session.shutdown();
    tracing::info!("Headless playback finished: {:?}", end);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

#[cfg(feature = "audio")]
fn device_output() -> Box<dyn AudioOutput> {
    Box::new(duet_core::audio_output::CpalAudioOutput::new())
}

#[cfg(not(feature = "audio"))]
fn device_output() -> Box<dyn AudioOutput> {
    tracing::warn!("Built without audio output; audio is paced silently");
    Box::new(PacedAudioOutput::new())
}

fn run_windowed(source: &str, config: SessionConfig) -> Result<()> {
    let session = start_session(source, config, device_output())?;
    let geometry = session.geometry();
    let (width, height) = initial_surface_size(geometry.width, geometry.height);
    let title = format!("Duet - {}", session.source_name());

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(title)
            .with_inner_size([width as f32, height as f32])
            .with_min_inner_size([160.0, 90.0]),
        ..Default::default()
    };

    let outcome: Outcome = Arc::new(Mutex::new(None));
    let app_outcome = outcome.clone();
    eframe::run_native(
        "Duet Player",
        options,
        Box::new(move |cc| Ok(Box::new(DuetApp::new(cc, session, app_outcome)))),
    )
    .map_err(|e| anyhow::anyhow!("eframe error: {}", e))?;

    let result = outcome.lock().take();
    match result {
        Some(Err(e)) => anyhow::bail!("Playback failed: {}", e),
        Some(Ok(end)) => tracing::debug!("Window closed after {:?}", end),
        None => tracing::debug!("Window closed"),
    }
    Ok(())
}
