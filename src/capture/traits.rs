//! Capture trait definitions
//!
//! The contract between the recording core and a camera driver: stream
//! frames, acquisition start/stop, the property registry, and the errors
//! each of those can raise.

use super::node::{NodeAccessError, NodeMap};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Information about a camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Serial number (if the device reports one)
    pub serial_number: Option<String>,
}

/// Pixel layout of a raw frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit monochrome
    Mono8,
    /// 8-bit RGB, packed
    Rgb8,
    /// 8-bit BGR, packed
    Bgr8,
    /// YUV 4:2:2, packed as Y0 U Y1 V
    Yuyv422,
}

impl PixelFormat {
    /// Size in bytes of one tightly packed frame
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Mono8 => pixels,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => pixels * 3,
            PixelFormat::Yuyv422 => pixels * 2,
        }
    }

    /// FFmpeg `-pixel_format` name
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "gray",
            PixelFormat::Rgb8 => "rgb24",
            PixelFormat::Bgr8 => "bgr24",
            PixelFormat::Yuyv422 => "yuyv422",
        }
    }

    /// Entry name used by the `PixelFormat` camera node
    pub fn node_entry(&self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Bgr8 => "BGR8",
            PixelFormat::Yuyv422 => "YUV422_8",
        }
    }

    /// Parse a `PixelFormat` node entry name
    pub fn from_node_entry(entry: &str) -> Option<Self> {
        match entry {
            "Mono8" => Some(PixelFormat::Mono8),
            "RGB8" | "RGB8Packed" => Some(PixelFormat::Rgb8),
            "BGR8" | "BGR8Packed" => Some(PixelFormat::Bgr8),
            "YUV422_8" | "YUV422Packed" => Some(PixelFormat::Yuyv422),
            _ => None,
        }
    }
}

/// Transfer status reported by the driver for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Complete,
    /// Partial or corrupt transfer with the driver's image status code
    Incomplete { code: u32 },
}

/// Returns frame buffers to the driver that lent them
pub trait FrameRelease {
    fn release(&self, frame_id: u64);
}

/// One camera-delivered image, borrowed from the driver
///
/// The pixel buffer belongs to the driver. A `StreamFrame` lives for one loop
/// iteration at most: it is handed back either explicitly with `release` or
/// implicitly when dropped, and the borrow on the driver prevents a second
/// frame from being pulled while this one is held.
pub struct StreamFrame<'a> {
    owner: &'a dyn FrameRelease,
    frame_id: u64,
    data: &'a [u8],
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    status: FrameStatus,
    released: bool,
}

impl<'a> StreamFrame<'a> {
    pub fn new(
        owner: &'a dyn FrameRelease,
        frame_id: u64,
        data: &'a [u8],
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        status: FrameStatus,
    ) -> Self {
        Self {
            owner,
            frame_id,
            data,
            width,
            height,
            pixel_format,
            status,
            released: false,
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn data(&self) -> &[u8] {
        self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn status(&self) -> FrameStatus {
        self.status
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self.status, FrameStatus::Incomplete { .. })
    }

    /// Fail with the driver's status code if the transfer was partial
    pub fn check_integrity(&self) -> Result<(), FrameIntegrityError> {
        match self.status {
            FrameStatus::Complete => Ok(()),
            FrameStatus::Incomplete { code } => Err(FrameIntegrityError {
                frame_id: self.frame_id,
                code,
            }),
        }
    }

    /// Hand the buffer back to the driver
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.owner.release(self.frame_id);
        }
    }
}

impl Drop for StreamFrame<'_> {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for StreamFrame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFrame")
            .field("frame_id", &self.frame_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_format", &self.pixel_format)
            .field("status", &self.status)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// A camera driver call failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{call} failed with status {code}: {message}")]
pub struct DriverError {
    /// Driver call that failed (e.g. "GetNextImage")
    pub call: String,
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(call: &str, code: i32, message: impl Into<String>) -> Self {
        Self {
            call: call.to_string(),
            code,
            message: message.into(),
        }
    }
}

/// Outcome of a failed frame pull
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PullError {
    /// No frame arrived within the driver's grab timeout
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// A frame arrived with a partial transfer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("frame {frame_id} incomplete with image status {code}")]
pub struct FrameIntegrityError {
    pub frame_id: u64,
    pub code: u32,
}

/// Camera setup (sensor or trigger) failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("{step}: {source}")]
    Node {
        step: &'static str,
        source: NodeAccessError,
    },

    /// The device refused a trigger write because trigger mode was enabled
    #[error("{step}: device rejected write to '{node}' while trigger mode was on ({reason})")]
    OrderingViolation {
        step: &'static str,
        node: String,
        reason: String,
    },

    #[error("trigger mode still reports '{0}' after being disabled")]
    TriggerStillEnabled(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// A camera exclusively owned by one recording run
pub trait CameraDriver {
    fn info(&self) -> &CameraInfo;

    /// Property registry for reads
    fn nodes(&self) -> &dyn NodeMap;

    /// Property registry for writes
    fn nodes_mut(&mut self) -> &mut dyn NodeMap;

    /// Start streaming frames
    fn begin_acquisition(&mut self) -> Result<(), DriverError>;

    /// Stop streaming frames
    fn end_acquisition(&mut self) -> Result<(), DriverError>;

    /// Block until the next frame arrives, the grab timeout elapses or the
    /// stream fails
    fn pull_frame(&mut self) -> Result<StreamFrame<'_>, PullError>;
}

/// Enumerates and opens cameras
pub trait CameraSystem {
    fn cameras(&self) -> Result<Vec<CameraInfo>, DriverError>;

    fn open(&self, index: usize) -> Result<Box<dyn CameraDriver>, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingPool(AtomicU64);

    impl FrameRelease for CountingPool {
        fn release(&self, _frame_id: u64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_frame_released_once() {
        let pool = CountingPool::default();
        let data = vec![0u8; 4];
        let frame = StreamFrame::new(&pool, 1, &data, 2, 2, PixelFormat::Mono8, FrameStatus::Complete);
        frame.release();
        assert_eq!(pool.0.load(Ordering::SeqCst), 1);

        {
            let _dropped =
                StreamFrame::new(&pool, 2, &data, 2, 2, PixelFormat::Mono8, FrameStatus::Complete);
        }
        assert_eq!(pool.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_incomplete_frame_integrity() {
        let pool = CountingPool::default();
        let data = vec![0u8; 4];
        let frame = StreamFrame::new(
            &pool,
            9,
            &data,
            2,
            2,
            PixelFormat::Mono8,
            FrameStatus::Incomplete { code: 3 },
        );
        assert!(frame.is_incomplete());
        assert_eq!(
            frame.check_integrity(),
            Err(FrameIntegrityError { frame_id: 9, code: 3 })
        );
    }

    #[test]
    fn test_pixel_format_sizes_and_names() {
        assert_eq!(PixelFormat::Mono8.frame_size(1000, 400), 400_000);
        assert_eq!(PixelFormat::Bgr8.frame_size(10, 10), 300);
        assert_eq!(PixelFormat::Yuyv422.frame_size(10, 10), 200);
        assert_eq!(PixelFormat::from_node_entry("Mono8"), Some(PixelFormat::Mono8));
        assert_eq!(PixelFormat::from_node_entry("Bayer8"), None);
    }
}
