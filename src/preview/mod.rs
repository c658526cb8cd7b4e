//! Live preview surfaces
//!
//! The acquisition loop hands every complete frame to a preview surface.
//! Showing a frame is best-effort: errors are reported to the caller, which
//! logs them and keeps recording.

use crate::capture::{PixelFormat, StreamFrame};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Preview errors
#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PNG encode error: {0}")]
    Encoding(#[from] png::EncodingError),

    #[error("Frame buffer holds {actual} bytes, expected {expected}")]
    FrameData { expected: usize, actual: usize },
}

/// Displays frames while they are recorded
pub trait PreviewSurface {
    fn show(&mut self, frame: &StreamFrame<'_>) -> Result<(), PreviewError>;
}

/// Discards every frame
#[derive(Debug, Default)]
pub struct NullPreview;

impl PreviewSurface for NullPreview {
    fn show(&mut self, _frame: &StreamFrame<'_>) -> Result<(), PreviewError> {
        Ok(())
    }
}

/// Writes the latest frame to a PNG file every N frames
///
/// The image is encoded into a temporary file next to the target and renamed
/// over it, so viewers polling the path never see a partial PNG.
#[derive(Debug)]
pub struct SnapshotPreview {
    path: PathBuf,
    every: u64,
    seen: u64,
    written: u64,
}

impl SnapshotPreview {
    pub fn new(path: impl Into<PathBuf>, every: u64) -> Self {
        Self {
            path: path.into(),
            every: every.max(1),
            seen: 0,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshots written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    fn write_png(&self, frame: &StreamFrame<'_>) -> Result<(), PreviewError> {
        let (color, pixels) = png_pixels(frame)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut buffered = BufWriter::new(tmp.as_file_mut());
            let mut encoder = png::Encoder::new(&mut buffered, frame.width(), frame.height());
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&pixels)?;
            writer.finish()?;
            buffered.flush()?;
        }
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Convert a frame into PNG-ready pixels
fn png_pixels(frame: &StreamFrame<'_>) -> Result<(png::ColorType, Vec<u8>), PreviewError> {
    let format = frame.pixel_format();
    let expected = format.frame_size(frame.width(), frame.height());
    let data = frame.data();
    if data.len() < expected {
        return Err(PreviewError::FrameData {
            expected,
            actual: data.len(),
        });
    }
    let data = &data[..expected];

    Ok(match format {
        PixelFormat::Mono8 => (png::ColorType::Grayscale, data.to_vec()),
        PixelFormat::Rgb8 => (png::ColorType::Rgb, data.to_vec()),
        PixelFormat::Bgr8 => {
            let mut rgb = data.to_vec();
            for pixel in rgb.chunks_exact_mut(3) {
                pixel.swap(0, 2);
            }
            (png::ColorType::Rgb, rgb)
        }
        // Luma only
        PixelFormat::Yuyv422 => (
            png::ColorType::Grayscale,
            data.iter().step_by(2).copied().collect(),
        ),
    })
}

impl PreviewSurface for SnapshotPreview {
    fn show(&mut self, frame: &StreamFrame<'_>) -> Result<(), PreviewError> {
        self.seen += 1;
        if (self.seen - 1) % self.every != 0 {
            return Ok(());
        }
        self.write_png(frame)?;
        self.written += 1;
        tracing::debug!("Preview snapshot of frame {} written to {:?}", frame.frame_id(), self.path);
        Ok(())
    }
}
