//! Recording state management
//!
//! Defines the run-level and loop-level state machines and the summary of a
//! finished recording.

use crate::capture::{CameraInfo, TriggerConfig};
use crate::container::{CodecProfile, SegmentInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Phase of a recording run
///
/// Phases only move forward. A setup failure jumps straight to `Closed`; the
/// run is never resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingState {
    /// Camera open, nothing configured yet
    Idle,
    /// Trigger (if any) applied, container open
    TriggerConfigured,
    /// Camera streaming, loop running
    Acquiring,
    /// Loop exited, tearing down
    Draining,
    /// Container closed and trigger reset
    Closed,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

impl RecordingState {
    /// Move to `next` if that is forward
    pub fn advance(&mut self, next: RecordingState) -> bool {
        if next > *self {
            tracing::debug!("Recording state {:?} -> {:?}", self, next);
            *self = next;
            true
        } else {
            tracing::warn!("Ignoring backward recording state change {:?} -> {:?}", self, next);
            false
        }
    }
}

/// State of the acquisition loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopState {
    NotStarted,
    Running,
    StoppedByUser,
    StoppedByFatalError,
    /// Acquisition ended and container closed
    Drained,
}

/// Per-run frame counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopStats {
    /// Loop iterations that got past the stop check
    pub iterations: u64,
    /// Frames delivered by the driver
    pub frames_pulled: u64,
    /// Frames appended to the container
    pub frames_written: u64,
    /// Partial transfers that were discarded
    pub frames_incomplete: u64,
    /// Complete frames the container refused
    pub append_failures: u64,
    pub preview_failures: u64,
    pub timeouts: u64,
}

/// How the acquisition loop ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopReport {
    /// `StoppedByUser` or `StoppedByFatalError`
    pub stop_reason: LoopState,
    /// Final loop state, `Drained` after teardown
    pub state: LoopState,
    pub stats: LoopStats,
    /// Driver error that ended the loop
    pub fatal_error: Option<String>,
    /// Error raised while closing the container
    pub close_error: Option<String>,
}

impl LoopReport {
    pub fn is_fatal(&self) -> bool {
        self.stop_reason == LoopState::StoppedByFatalError
    }
}

/// Summary of a finished recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutput {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub camera: CameraInfo,
    /// Trigger configuration, `None` when free-running
    pub trigger: Option<TriggerConfig>,
    pub profile: CodecProfile,
    pub max_bytes: u64,
    pub report: LoopReport,
    pub segments: Vec<SegmentInfo>,
    /// Whether the trigger was reset to idle after acquisition
    pub trigger_reset: bool,
}

impl RecordingOutput {
    /// Total duration in milliseconds
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_state_is_monotonic() {
        let mut state = RecordingState::default();
        assert!(state.advance(RecordingState::TriggerConfigured));
        assert!(state.advance(RecordingState::Acquiring));
        assert!(!state.advance(RecordingState::Idle));
        assert_eq!(state, RecordingState::Acquiring);
        assert!(!state.advance(RecordingState::Acquiring));
        assert!(state.advance(RecordingState::Closed));
        assert!(!state.advance(RecordingState::Draining));
    }

    #[test]
    fn test_setup_failure_jumps_to_closed() {
        let mut state = RecordingState::Idle;
        assert!(state.advance(RecordingState::Closed));
        assert_eq!(state, RecordingState::Closed);
    }

    #[test]
    fn test_loop_state_serialization() {
        let json = serde_json::to_string(&LoopState::StoppedByFatalError).unwrap();
        assert_eq!(json, "\"stoppedByFatalError\"");
    }
}
