//! Size-rotated container writer
//!
//! A recording is a sequence of AVI segments named `<prefix>-0000.avi`,
//! `<prefix>-0001.avi`, ... sharing one codec profile. The size cap is checked
//! after each successful append: once the current segment reaches it, that
//! segment is finalized and the next append opens its successor. A segment
//! that cannot take another frame (a native AVI nearing the 4 GiB RIFF
//! limit) is rotated before the frame is written instead.

use super::avi::AviSegment;
use super::ffmpeg::{FfmpegSegment, DEFAULT_ENCODER, STARTUP_GRACE};
use super::types::{AviCodec, CodecProfile, ContainerError, SegmentInfo};
use crate::capture::StreamFrame;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One open container file
pub trait SegmentSink: Send {
    fn path(&self) -> &Path;

    /// Encode and write one raw frame
    fn write_frame(&mut self, data: &[u8]) -> Result<(), ContainerError>;

    fn frames(&self) -> u64;

    /// Whether another frame of `frame_len` raw bytes can still be written
    fn accepts(&self, _frame_len: usize) -> bool {
        true
    }

    /// Bytes the file occupies (or will occupy once finalized)
    fn size(&self) -> u64;

    /// Write the index/trailer. Calling it again is a no-op returning the
    /// final size.
    fn finalize(&mut self) -> Result<u64, ContainerError>;
}

fn create_sink(
    path: &Path,
    profile: &CodecProfile,
    encoder: &Path,
    grace: Duration,
) -> Result<Box<dyn SegmentSink>, ContainerError> {
    Ok(match profile.codec {
        AviCodec::Uncompressed => Box::new(AviSegment::create(path, profile)?),
        AviCodec::Mjpg | AviCodec::H264 => Box::new(FfmpegSegment::create(encoder, path, profile, grace)?),
    })
}

/// Path of segment `index` for a recording prefix
pub fn segment_path(prefix: &Path, index: usize) -> PathBuf {
    let stem = prefix
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    let stem = stem.strip_suffix(".avi").unwrap_or(&stem);
    prefix.with_file_name(format!("{}-{:04}.avi", stem, index))
}

/// Writes frames into a sequence of size-capped AVI files
pub struct ContainerWriter {
    prefix: PathBuf,
    profile: CodecProfile,
    /// Program run for MJPG and H.264 segments
    encoder: PathBuf,
    /// Rotation threshold in bytes, 0 disables rotation
    max_bytes: u64,
    segments: Vec<SegmentInfo>,
    /// Index into `segments` of the segment being written
    current: usize,
    /// Open file for `segments[current]`; `None` between a rotation and the
    /// next append
    sink: Option<Box<dyn SegmentSink>>,
    closed: bool,
}

impl ContainerWriter {
    /// Validate the profile and create the first segment
    pub fn open(prefix: impl AsRef<Path>, profile: CodecProfile, max_bytes: u64) -> Result<Self, ContainerError> {
        Self::open_with_encoder(prefix, profile, max_bytes, DEFAULT_ENCODER)
    }

    /// Like [`ContainerWriter::open`], running `encoder` instead of `ffmpeg`
    /// for compressed segments
    pub fn open_with_encoder(
        prefix: impl AsRef<Path>,
        profile: CodecProfile,
        max_bytes: u64,
        encoder: impl Into<PathBuf>,
    ) -> Result<Self, ContainerError> {
        profile.validate()?;

        let prefix = prefix.as_ref().to_path_buf();
        if let Some(parent) = prefix.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = Self {
            prefix,
            profile,
            encoder: encoder.into(),
            max_bytes,
            segments: Vec::new(),
            current: 0,
            sink: None,
            closed: false,
        };
        writer.open_segment(0)?;

        tracing::info!(
            "Container opened: {:?} ({:?}, {}x{} @ {}fps, max {} bytes)",
            writer.segments[0].path,
            writer.profile.codec,
            writer.profile.width,
            writer.profile.height,
            writer.profile.frame_rate,
            max_bytes
        );
        Ok(writer)
    }

    fn open_segment(&mut self, index: usize) -> Result<(), ContainerError> {
        let path = segment_path(&self.prefix, index);
        // Startup failures of the first encoder surface from `open`
        let grace = if index == 0 { STARTUP_GRACE } else { Duration::ZERO };
        let sink = create_sink(&path, &self.profile, &self.encoder, grace)?;
        self.segments.push(SegmentInfo {
            index,
            path,
            frames: 0,
            bytes: sink.size(),
            finalized: false,
        });
        self.current = index;
        self.sink = Some(sink);
        Ok(())
    }

    /// Encode one frame into the current segment, rotating afterwards if the
    /// segment reached the size cap
    pub fn append(&mut self, frame: &StreamFrame<'_>) -> Result<(), ContainerError> {
        if self.closed {
            return Err(ContainerError::Closed);
        }
        if frame.width() != self.profile.width || frame.height() != self.profile.height {
            return Err(ContainerError::DimensionMismatch {
                expected_width: self.profile.width,
                expected_height: self.profile.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }
        if frame.pixel_format() != self.profile.pixel_format {
            return Err(ContainerError::PixelFormatMismatch {
                expected: self.profile.pixel_format,
                actual: frame.pixel_format(),
            });
        }
        let expected = self.profile.frame_size();
        if frame.data().len() < expected {
            return Err(ContainerError::FrameData {
                expected,
                actual: frame.data().len(),
            });
        }

        if self
            .sink
            .as_ref()
            .is_some_and(|sink| sink.frames() > 0 && !sink.accepts(expected))
        {
            tracing::info!(
                "{:?} cannot hold another frame, rotating early",
                self.segments[self.current].path
            );
            self.rotate();
        }
        if self.sink.is_none() {
            self.open_segment(self.current + 1)?;
        }
        let sink = self.sink.as_mut().ok_or(ContainerError::Closed)?;
        sink.write_frame(&frame.data()[..expected])?;

        let size = sink.size();
        let info = &mut self.segments[self.current];
        info.frames = sink.frames();
        info.bytes = size;

        if self.max_bytes > 0 && size >= self.max_bytes {
            self.rotate();
        }
        Ok(())
    }

    /// Finalize the current segment; its successor is created on demand
    fn rotate(&mut self) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        let info = &mut self.segments[self.current];
        match sink.finalize() {
            Ok(bytes) => {
                info.bytes = bytes;
                info.finalized = true;
                tracing::info!(
                    "Rotated {:?} at {} bytes ({} frames)",
                    info.path,
                    bytes,
                    info.frames
                );
            }
            Err(e) => {
                tracing::error!("Failed to finalize {:?} on rotation: {}", info.path, e);
            }
        }
    }

    /// Finalize the current segment. Closing again does nothing.
    pub fn close(&mut self) -> Result<(), ContainerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let Some(mut sink) = self.sink.take() else {
            return Ok(());
        };
        let info = &mut self.segments[self.current];
        let bytes = sink.finalize()?;
        info.bytes = bytes;
        info.finalized = true;

        tracing::info!(
            "Container closed: {} segment(s), {} frames",
            self.segments.len(),
            self.frames_written()
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn profile(&self) -> &CodecProfile {
        &self.profile
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Descriptors of every segment created so far
    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    pub fn current_segment(&self) -> &SegmentInfo {
        &self.segments[self.current]
    }

    /// Frames successfully appended across all segments
    pub fn frames_written(&self) -> u64 {
        self.segments.iter().map(|s| s.frames).sum()
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                tracing::warn!("Failed to close container on drop: {}", e);
            }
        }
    }
}
