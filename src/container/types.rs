//! Container types and configuration
//!
//! Codec profiles, segment descriptors and the errors raised while writing
//! video containers.

use crate::capture::PixelFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Codec used for the AVI video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AviCodec {
    /// Raw DIB frames
    Uncompressed,
    /// Motion JPEG
    Mjpg,
    /// H.264
    H264,
}

impl AviCodec {
    /// Get the FFmpeg video encoder for this codec
    pub fn ffmpeg_encoder(&self) -> Option<&'static str> {
        match self {
            AviCodec::Uncompressed => None,
            AviCodec::Mjpg => Some("mjpeg"),
            AviCodec::H264 => Some("libx264"),
        }
    }
}

/// Upper bound on the frame rate a profile may declare
const MAX_FRAME_RATE: f64 = 1000.0;
const MIN_H264_BITRATE: u32 = 10_000;
const MAX_H264_BITRATE: u32 = 200_000_000;

/// Encoding parameters fixed for the lifetime of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecProfile {
    pub codec: AviCodec,
    /// Playback frame rate in Hz
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    /// Layout of the frames that will be appended
    pub pixel_format: PixelFormat,
    /// Target bitrate in bits per second (H.264 only)
    pub bitrate: Option<u32>,
    /// JPEG quality 1-100 (MJPG only)
    pub quality: Option<u8>,
}

impl CodecProfile {
    pub fn uncompressed(width: u32, height: u32, frame_rate: f64, pixel_format: PixelFormat) -> Self {
        Self {
            codec: AviCodec::Uncompressed,
            frame_rate,
            width,
            height,
            pixel_format,
            bitrate: None,
            quality: None,
        }
    }

    pub fn mjpg(width: u32, height: u32, frame_rate: f64, pixel_format: PixelFormat, quality: u8) -> Self {
        Self {
            codec: AviCodec::Mjpg,
            quality: Some(quality),
            ..Self::uncompressed(width, height, frame_rate, pixel_format)
        }
    }

    pub fn h264(width: u32, height: u32, frame_rate: f64, pixel_format: PixelFormat, bitrate: u32) -> Self {
        Self {
            codec: AviCodec::H264,
            bitrate: Some(bitrate),
            ..Self::uncompressed(width, height, frame_rate, pixel_format)
        }
    }

    /// Check the codec / frame rate / bitrate combination
    pub fn validate(&self) -> Result<(), ContainerError> {
        let unsupported = |reason: String| Err(ContainerError::UnsupportedProfile(reason));

        if self.width == 0 || self.height == 0 {
            return unsupported(format!("frame size {}x{} is empty", self.width, self.height));
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0 && self.frame_rate <= MAX_FRAME_RATE)
        {
            return unsupported(format!(
                "frame rate {} outside (0, {}]",
                self.frame_rate, MAX_FRAME_RATE
            ));
        }

        match self.codec {
            AviCodec::Uncompressed => {
                if self.bitrate.is_some() || self.quality.is_some() {
                    return unsupported("uncompressed video takes no bitrate or quality".to_string());
                }
                if self.pixel_format == PixelFormat::Yuyv422 {
                    return unsupported("uncompressed AVI supports mono8, rgb8 and bgr8 only".to_string());
                }
            }
            AviCodec::Mjpg => {
                if self.bitrate.is_some() {
                    return unsupported("MJPG is quality-controlled, not bitrate-controlled".to_string());
                }
                match self.quality {
                    Some(q) if (1..=100).contains(&q) => {}
                    other => return unsupported(format!("MJPG quality {other:?} outside 1-100")),
                }
            }
            AviCodec::H264 => {
                if self.quality.is_some() {
                    return unsupported("H264 is bitrate-controlled, not quality-controlled".to_string());
                }
                match self.bitrate {
                    Some(b) if (MIN_H264_BITRATE..=MAX_H264_BITRATE).contains(&b) => {}
                    other => {
                        return unsupported(format!(
                            "H264 bitrate {other:?} outside {MIN_H264_BITRATE}-{MAX_H264_BITRATE}"
                        ))
                    }
                }
                // 4:2:0 chroma subsampling needs even dimensions
                if self.width % 2 != 0 || self.height % 2 != 0 {
                    return unsupported(format!(
                        "H264 needs even dimensions, got {}x{}",
                        self.width, self.height
                    ));
                }
            }
        }
        Ok(())
    }

    /// Size of one raw input frame
    pub fn frame_size(&self) -> usize {
        self.pixel_format.frame_size(self.width, self.height)
    }
}

/// One file of a rotated recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentInfo {
    /// Sequence number (0, 1, 2, ...)
    pub index: usize,
    pub path: PathBuf,
    /// Frames written to this file
    pub frames: u64,
    /// Size of the file once finalized
    pub bytes: u64,
    /// Whether the index/trailer has been written
    pub finalized: bool,
}

/// Container errors
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported codec profile: {0}")]
    UnsupportedProfile(String),

    #[error("Frame is {actual_width}x{actual_height}, container expects {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Frame pixel format {actual:?} does not match container format {expected:?}")]
    PixelFormatMismatch {
        expected: PixelFormat,
        actual: PixelFormat,
    },

    #[error("Frame buffer holds {actual} bytes, expected {expected}")]
    FrameData { expected: usize, actual: usize },

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    #[error("Container already closed")]
    Closed,
}
