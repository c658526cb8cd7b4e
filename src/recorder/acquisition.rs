//! Acquisition loop
//!
//! Pulls frames from a streaming camera and forwards complete ones to the
//! preview surface and the container writer until a stop is requested or the
//! driver fails. Teardown (end acquisition, close container) runs on every
//! exit path.

use super::coordinator::RecordingEvent;
use super::state::{LoopReport, LoopState, LoopStats};
use super::stop::StopSignal;
use crate::capture::{CameraDriver, PullError};
use crate::container::ContainerWriter;
use crate::preview::PreviewSurface;
use tokio::sync::broadcast;

/// Emit a progress event every this many written frames
const PROGRESS_INTERVAL: u64 = 100;

fn emit(events: &Option<broadcast::Sender<RecordingEvent>>, event: RecordingEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Outcome of one loop iteration
enum Step {
    Continue,
    Stop(LoopState),
}

/// Steady-state frame loop over a camera that is already acquiring
pub struct AcquisitionLoop<'a> {
    driver: &'a mut dyn CameraDriver,
    writer: &'a mut ContainerWriter,
    preview: &'a mut dyn PreviewSurface,
    stop: StopSignal,
    events: Option<broadcast::Sender<RecordingEvent>>,
    state: LoopState,
    stats: LoopStats,
    fatal_error: Option<String>,
}

impl<'a> AcquisitionLoop<'a> {
    pub fn new(
        driver: &'a mut dyn CameraDriver,
        writer: &'a mut ContainerWriter,
        preview: &'a mut dyn PreviewSurface,
        stop: StopSignal,
    ) -> Self {
        Self {
            driver,
            writer,
            preview,
            stop,
            events: None,
            state: LoopState::NotStarted,
            stats: LoopStats::default(),
            fatal_error: None,
        }
    }

    /// Publish rotation, dropped-frame and progress events
    pub fn with_events(mut self, events: broadcast::Sender<RecordingEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until stopped, then end acquisition and close the container
    pub fn run(mut self) -> LoopReport {
        self.state = LoopState::Running;
        tracing::info!("Acquisition loop running");

        let stop_reason = loop {
            match self.step() {
                Step::Continue => {}
                Step::Stop(reason) => break reason,
            }
        };
        self.state = stop_reason;

        let close_error = self.drain();
        self.state = LoopState::Drained;

        tracing::info!(
            "Acquisition loop ended ({:?}): {} pulled, {} written, {} incomplete, {} append failures, {} timeouts",
            stop_reason,
            self.stats.frames_pulled,
            self.stats.frames_written,
            self.stats.frames_incomplete,
            self.stats.append_failures,
            self.stats.timeouts
        );

        LoopReport {
            stop_reason,
            state: self.state,
            stats: self.stats,
            fatal_error: self.fatal_error,
            close_error,
        }
    }

    fn step(&mut self) -> Step {
        if self.stop.is_set() {
            tracing::info!("Stop requested");
            return Step::Stop(LoopState::StoppedByUser);
        }
        self.stats.iterations += 1;

        let frame = match self.driver.pull_frame() {
            Ok(frame) => frame,
            Err(PullError::Timeout(timeout)) => {
                self.stats.timeouts += 1;
                tracing::warn!("No frame within {:?}, waiting again", timeout);
                return Step::Continue;
            }
            Err(PullError::Driver(e)) => {
                tracing::error!("Frame pull failed: {}", e);
                emit(&self.events, RecordingEvent::Error(e.to_string()));
                self.fatal_error = Some(e.to_string());
                return Step::Stop(LoopState::StoppedByFatalError);
            }
        };
        self.stats.frames_pulled += 1;

        if let Err(e) = frame.check_integrity() {
            self.stats.frames_incomplete += 1;
            tracing::warn!("Discarding {}", e);
            frame.release();
            emit(&self.events, RecordingEvent::FrameDropped {
                frame_id: e.frame_id,
                reason: e.to_string(),
            });
            return Step::Continue;
        }

        if let Err(e) = self.preview.show(&frame) {
            self.stats.preview_failures += 1;
            tracing::warn!("Preview of frame {} failed: {}", frame.frame_id(), e);
        }

        let frame_id = frame.frame_id();
        let appended = self.writer.append(&frame);
        frame.release();

        match appended {
            Ok(()) => {
                self.stats.frames_written += 1;
                tracing::trace!("Frame {} written", frame_id);

                let segment = self.writer.current_segment();
                if segment.finalized {
                    emit(&self.events, RecordingEvent::Rotated(segment.clone()));
                }
                if self.stats.frames_written % PROGRESS_INTERVAL == 0 {
                    emit(&self.events, RecordingEvent::Progress {
                        frames_written: self.stats.frames_written,
                    });
                }
            }
            Err(e) => {
                // Dropped, not retried
                self.stats.append_failures += 1;
                tracing::warn!("Failed to append frame {}: {}", frame_id, e);
                emit(&self.events, RecordingEvent::FrameDropped {
                    frame_id,
                    reason: e.to_string(),
                });
            }
        }
        Step::Continue
    }

    /// End acquisition and close the container exactly once
    fn drain(&mut self) -> Option<String> {
        if let Err(e) = self.driver.end_acquisition() {
            tracing::warn!("Failed to end acquisition: {}", e);
        }
        match self.writer.close() {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("Failed to close container: {}", e);
                Some(e.to_string())
            }
        }
    }
}
