//! Session Recorder - triggered machine-vision camera recording.
//!
//! This is the library crate behind the `session-recorder` binary. It
//! configures a camera's trigger and exposure, streams frames into a live
//! preview and size-rotated AVI files, and stops cleanly on request.

pub mod capture;
pub mod cli;
pub mod config;
pub mod container;
pub mod preview;
pub mod recorder;
pub mod utils;

use clap::Parser;
use cli::Cli;
use config::AppConfig;
use recorder::{RecordingCoordinator, RecordingEvent, RecordingOutput, StopSignal};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::error::{AppError, AppResult};

/// Exit code for a recording that ended on a camera failure
const EXIT_FATAL: u8 = 1;
/// Exit code for command line errors
const EXIT_USAGE: u8 = 2;

/// Initialize tracing/logging
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Run the recorder with the process arguments
pub async fn run(args: Vec<String>) -> ExitCode {
    ExitCode::from(execute(args).await)
}

/// Run the recorder and return the numeric exit code
pub async fn execute(args: Vec<String>) -> u8 {
    init_tracing();

    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Help and version requests are not errors
            return if e.use_stderr() { EXIT_USAGE } else { 0 };
        }
    };

    tracing::info!("Starting Session Recorder v{}", env!("CARGO_PKG_VERSION"));

    let config = match AppConfig::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return e.exit_code();
        }
    };

    match record(config, cli.prefix).await {
        Ok(output) if output.report.is_fatal() => {
            tracing::error!(
                "Recording ended on a camera failure: {}",
                output.report.fatal_error.as_deref().unwrap_or("unknown error")
            );
            EXIT_FATAL
        }
        Ok(_) => 0,
        Err(e) => {
            tracing::error!("Recording failed: {}", e);
            e.exit_code()
        }
    }
}

/// Record until stopped
///
/// Ctrl-C and, if enabled, a `TERM` line on stdin set the stop signal. The
/// recording itself runs on a blocking thread.
pub async fn record(config: AppConfig, prefix: PathBuf) -> AppResult<RecordingOutput> {
    let stop = config.stop_signal();

    let ctrl_c = {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, stopping");
                stop.trigger();
            }
        })
    };

    if config.stop.stdin_term {
        spawn_stdin_listener(stop.clone());
    }

    let coordinator = RecordingCoordinator::new(config.recorder_settings());
    let events = tokio::spawn(log_events(coordinator.subscribe()));

    let result = tokio::task::spawn_blocking(move || {
        let system = config.camera_system()?;
        let mut preview = config.preview_surface();
        coordinator.record(system.as_ref(), &prefix, preview.as_mut(), stop)
    })
    .await
    .map_err(|e| AppError::Task(e.to_string()))?;

    ctrl_c.abort();
    // The coordinator is gone, so the event stream ends
    let _ = events.await;
    result
}

/// Watch stdin for a `TERM` line from a parent process
///
/// Uses a plain thread: a pending stdin read cannot be cancelled and must not
/// hold up runtime shutdown.
fn spawn_stdin_listener(stop: StopSignal) {
    let spawned = std::thread::Builder::new()
        .name("stdin-term".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim() == "TERM" => {
                        tracing::info!("TERM received on stdin, stopping");
                        stop.trigger();
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("stdin closed: {}", e);
                        return;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Failed to start stdin listener: {}", e);
    }
}

async fn log_events(mut rx: tokio::sync::broadcast::Receiver<RecordingEvent>) {
    loop {
        match rx.recv().await {
            Ok(RecordingEvent::Started { camera, path }) => {
                tracing::info!("Recording camera {} to {:?}", camera, path)
            }
            Ok(RecordingEvent::Rotated(segment)) => tracing::info!(
                "Segment {} complete: {:?} ({} frames, {} bytes)",
                segment.index,
                segment.path,
                segment.frames,
                segment.bytes
            ),
            Ok(RecordingEvent::FrameDropped { frame_id, reason }) => {
                tracing::debug!("Frame {} dropped: {}", frame_id, reason)
            }
            Ok(RecordingEvent::Progress { frames_written }) => {
                tracing::debug!("{} frames written", frames_written)
            }
            Ok(RecordingEvent::Stopped(reason)) => tracing::info!("Recording stopped: {:?}", reason),
            Ok(RecordingEvent::Error(message)) => tracing::error!("Recording error: {}", message),
            Err(RecvError::Lagged(missed)) => tracing::debug!("Event log skipped {} events", missed),
            Err(RecvError::Closed) => break,
        }
    }
}
