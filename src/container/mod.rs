//! Video container output
//!
//! This module writes acquired frames into AVI files:
//! - Codec profiles and segment descriptors
//! - Native uncompressed AVI writer and header probe
//! - FFmpeg-encoded MJPG/H.264 segments
//! - ContainerWriter with size-based rotation

pub mod avi;
pub mod ffmpeg;
pub mod types;
pub mod writer;

pub use avi::{probe_avi, AviProbe, AviSegment, SegmentFile};
pub use ffmpeg::{ffmpeg_available, FfmpegSegment, DEFAULT_ENCODER};
pub use types::{AviCodec, CodecProfile, ContainerError, SegmentInfo};
pub use writer::{segment_path, ContainerWriter, SegmentSink};
