//! Recording pipeline
//!
//! This module runs a camera recording:
//! - StopSignal for cooperative cancellation
//! - AcquisitionLoop pulling frames into preview and container
//! - RecordingCoordinator sequencing setup, acquisition and teardown

pub mod acquisition;
pub mod coordinator;
pub mod state;
pub mod stop;

pub use acquisition::AcquisitionLoop;
pub use coordinator::{summary_path, RecorderSettings, RecordingCoordinator, RecordingEvent};
pub use state::{LoopReport, LoopState, LoopStats, RecordingOutput, RecordingState};
pub use stop::StopSignal;
