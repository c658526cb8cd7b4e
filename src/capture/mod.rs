//! Camera capture
//!
//! Driver contract, property registry, sensor and trigger setup, and the
//! camera backends.

pub mod node;
pub mod session;
pub mod setup;
pub mod simulated;
pub mod traits;
pub mod trigger;

#[cfg(feature = "webcam")]
pub mod webcam;

pub use node::{NodeAccessError, NodeMap, NodeValue};
pub use session::CameraSession;
pub use setup::{apply_sensor_settings, read_stream_geometry, SensorSettings, StreamGeometry};
pub use traits::{
    CameraDriver, CameraInfo, CameraSystem, ConfigurationError, DriverError, FrameIntegrityError,
    FrameRelease, FrameStatus, PixelFormat, PullError, StreamFrame,
};
pub use trigger::{TriggerConfig, TriggerController};
