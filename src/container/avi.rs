//! Native AVI (RIFF) segment writer and reader
//!
//! Uncompressed recordings are written directly: the header is emitted on
//! open with zero counts, each frame becomes one `00db` chunk inside the
//! `movi` list, and finalizing appends the `idx1` index and patches the
//! header counts and list sizes so the file plays on its own.

use super::types::{CodecProfile, ContainerError};
use super::writer::SegmentSink;
use crate::capture::PixelFormat;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const INDEX_ENTRY_SIZE: u64 = 16;
const CHUNK_HEADER_SIZE: u64 = 8;
/// RIFF sizes are 32-bit
const MAX_RIFF_SIZE: u64 = u32::MAX as u64;

/// Row layout of a bottom-up DIB
#[derive(Debug, Clone, Copy)]
struct DibLayout {
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    stride: usize,
    swap_red_blue: bool,
}

impl DibLayout {
    fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, ContainerError> {
        let (bytes_per_pixel, swap_red_blue) = match format {
            PixelFormat::Mono8 => (1, false),
            PixelFormat::Bgr8 => (3, false),
            PixelFormat::Rgb8 => (3, true),
            PixelFormat::Yuyv422 => {
                return Err(ContainerError::UnsupportedProfile(
                    "uncompressed AVI cannot hold yuyv422 frames".to_string(),
                ))
            }
        };
        let width = width as usize;
        // Rows are padded to 4 bytes
        let stride = (width * bytes_per_pixel + 3) & !3;
        Ok(Self {
            width,
            height: height as usize,
            bytes_per_pixel,
            stride,
            swap_red_blue,
        })
    }

    fn image_size(&self) -> usize {
        self.stride * self.height
    }

    fn bit_count(&self) -> u16 {
        (self.bytes_per_pixel * 8) as u16
    }

    /// Append a top-down packed frame to `out` as a bottom-up padded DIB
    fn encode(&self, data: &[u8], out: &mut Vec<u8>) {
        let base = out.len();
        out.resize(base + self.image_size(), 0);
        let row_bytes = self.width * self.bytes_per_pixel;
        for y in 0..self.height {
            let src = &data[y * row_bytes..(y + 1) * row_bytes];
            let dst_start = base + (self.height - 1 - y) * self.stride;
            let dst = &mut out[dst_start..dst_start + row_bytes];
            dst.copy_from_slice(src);
            if self.swap_red_blue {
                for pixel in dst.chunks_exact_mut(3) {
                    pixel.swap(0, 2);
                }
            }
        }
    }
}

/// Byte offsets of header fields patched on finalize
#[derive(Debug, Clone, Copy)]
struct HeaderOffsets {
    avih_total_frames: u64,
    strh_length: u64,
    movi_list_size: u64,
    /// Position of the `movi` fourcc; index offsets are relative to it
    movi_fourcc: u64,
}

struct HeaderBuilder {
    buf: Vec<u8>,
}

impl HeaderBuilder {
    fn fourcc(&mut self, code: &[u8; 4]) {
        self.buf.extend_from_slice(code);
    }

    fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn pos(&self) -> u64 {
        self.buf.len() as u64
    }

    fn patch_u32(&mut self, at: u64, value: u32) {
        let at = at as usize;
        self.buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }
}

fn build_header(profile: &CodecProfile, layout: &DibLayout) -> (Vec<u8>, HeaderOffsets) {
    let image_size = layout.image_size() as u32;
    let rate = (profile.frame_rate * 1000.0).round() as u32;
    let scale = 1000u32;
    let palette_entries: u32 = if layout.bytes_per_pixel == 1 { 256 } else { 0 };
    let strf_size = 40 + palette_entries * 4;

    let mut h = HeaderBuilder { buf: Vec::with_capacity(2048) };

    h.fourcc(b"RIFF");
    h.u32(0);
    h.fourcc(b"AVI ");

    h.fourcc(b"LIST");
    let hdrl_size_at = h.pos();
    h.u32(0);
    h.fourcc(b"hdrl");

    // Main header
    h.fourcc(b"avih");
    h.u32(56);
    h.u32((1_000_000.0 / profile.frame_rate).round() as u32);
    h.u32((image_size as f64 * profile.frame_rate).min(u32::MAX as f64) as u32);
    h.u32(0);
    h.u32(AVIF_HASINDEX);
    let avih_total_frames = h.pos();
    h.u32(0);
    h.u32(0);
    h.u32(1);
    h.u32(image_size + CHUNK_HEADER_SIZE as u32);
    h.u32(profile.width);
    h.u32(profile.height);
    for _ in 0..4 {
        h.u32(0);
    }

    h.fourcc(b"LIST");
    let strl_size_at = h.pos();
    h.u32(0);
    h.fourcc(b"strl");

    // Stream header
    h.fourcc(b"strh");
    h.u32(56);
    h.fourcc(b"vids");
    h.fourcc(b"DIB ");
    h.u32(0);
    h.u16(0);
    h.u16(0);
    h.u32(0);
    h.u32(scale);
    h.u32(rate);
    h.u32(0);
    let strh_length = h.pos();
    h.u32(0);
    h.u32(image_size);
    h.u32(u32::MAX);
    h.u32(0);
    h.u16(0);
    h.u16(0);
    h.u16(profile.width.min(u16::MAX as u32) as u16);
    h.u16(profile.height.min(u16::MAX as u32) as u16);

    // Stream format: BITMAPINFOHEADER + grey palette for 8-bit
    h.fourcc(b"strf");
    h.u32(strf_size);
    h.u32(40);
    h.i32(profile.width as i32);
    h.i32(profile.height as i32);
    h.u16(1);
    h.u16(layout.bit_count());
    h.u32(0);
    h.u32(image_size);
    h.i32(0);
    h.i32(0);
    h.u32(palette_entries);
    h.u32(0);
    for i in 0..palette_entries {
        let level = i as u8;
        h.buf.extend_from_slice(&[level, level, level, 0]);
    }

    let hdrl_end = h.pos();
    h.patch_u32(hdrl_size_at, (hdrl_end - hdrl_size_at - 4) as u32);
    h.patch_u32(strl_size_at, (hdrl_end - strl_size_at - 4) as u32);

    h.fourcc(b"LIST");
    let movi_list_size = h.pos();
    h.u32(4);
    let movi_fourcc = h.pos();
    h.fourcc(b"movi");

    let offsets = HeaderOffsets {
        avih_total_frames,
        strh_length,
        movi_list_size,
        movi_fourcc,
    };
    (h.buf, offsets)
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    offset: u32,
    size: u32,
}

/// Storage behind an AVI segment
pub trait SegmentFile: Write + Seek + Send {
    /// Cut the file down to `len` bytes
    fn truncate(&mut self, len: u64) -> std::io::Result<()>;

    fn sync(&mut self) -> std::io::Result<()>;
}

impl SegmentFile for File {
    fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_all()
    }
}

/// One uncompressed AVI file
pub struct AviSegment<F: SegmentFile = File> {
    path: PathBuf,
    file: F,
    layout: DibLayout,
    offsets: HeaderOffsets,
    /// End of the data written so far
    position: u64,
    index: Vec<IndexEntry>,
    /// Next `00db` chunk, header and padding included
    chunk: Vec<u8>,
    finalized: bool,
    /// A failed write could not be rolled back; the file ends somewhere
    /// past `position`
    damaged: bool,
}

impl AviSegment {
    /// Create the file and write its header
    pub fn create(path: &Path, profile: &CodecProfile) -> Result<Self, ContainerError> {
        let file = File::create(path)?;
        Self::with_file(path, file, profile)
    }
}

impl<F: SegmentFile> AviSegment<F> {
    /// Write the header into `file`, which is reported as `path`
    pub fn with_file(path: &Path, mut file: F, profile: &CodecProfile) -> Result<Self, ContainerError> {
        let layout = DibLayout::new(profile.width, profile.height, profile.pixel_format)?;
        let (header, offsets) = build_header(profile, &layout);

        file.write_all(&header)?;

        tracing::debug!("Created AVI segment {:?} ({} byte header)", path, header.len());

        Ok(Self {
            path: path.to_path_buf(),
            file,
            layout,
            offsets,
            position: header.len() as u64,
            index: Vec::new(),
            chunk: Vec::with_capacity(layout.image_size() + CHUNK_HEADER_SIZE as usize + 1),
            finalized: false,
            damaged: false,
        })
    }

    /// On-disk bytes of one frame chunk
    fn chunk_len(&self) -> u64 {
        let size = self.layout.image_size() as u64;
        CHUNK_HEADER_SIZE + size + (size & 1)
    }

    fn projected_size(&self, extra_chunks: u64, extra_bytes: u64) -> u64 {
        self.position
            + extra_bytes
            + CHUNK_HEADER_SIZE
            + INDEX_ENTRY_SIZE * (self.index.len() as u64 + extra_chunks)
    }

    /// Whether one more frame keeps the finalized file within RIFF limits
    fn fits_another(&self) -> bool {
        self.projected_size(1, self.chunk_len()) <= MAX_RIFF_SIZE
    }

    /// Drop whatever part of a failed chunk reached the file
    fn roll_back(&mut self) {
        let position = self.position;
        let result = self
            .file
            .truncate(position)
            .and_then(|()| self.file.seek(SeekFrom::Start(position)).map(drop));
        match result {
            Ok(()) => tracing::warn!("Discarded partial frame in {:?}", self.path),
            Err(e) => {
                tracing::error!("Failed to discard partial frame in {:?}: {}", self.path, e);
                self.damaged = true;
            }
        }
    }

    fn patch(&mut self, at: u64, value: u32) -> Result<(), ContainerError> {
        self.file.seek(SeekFrom::Start(at))?;
        self.file.write_all(&value.to_le_bytes())?;
        Ok(())
    }
}

impl<F: SegmentFile> SegmentSink for AviSegment<F> {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, data: &[u8]) -> Result<(), ContainerError> {
        if self.finalized {
            return Err(ContainerError::Closed);
        }
        if self.damaged {
            return Err(ContainerError::InvalidContainer(format!(
                "{:?} was damaged by an earlier failed write",
                self.path
            )));
        }
        if !self.fits_another() {
            return Err(ContainerError::InvalidContainer(format!(
                "{:?} would exceed the 4 GiB RIFF limit",
                self.path
            )));
        }

        let size = self.layout.image_size();
        self.chunk.clear();
        self.chunk.extend_from_slice(b"00db");
        self.chunk.extend_from_slice(&(size as u32).to_le_bytes());
        self.layout.encode(data, &mut self.chunk);
        if size & 1 == 1 {
            self.chunk.push(0);
        }

        if let Err(e) = self.file.write_all(&self.chunk) {
            self.roll_back();
            return Err(e.into());
        }

        let offset = (self.position - self.offsets.movi_fourcc) as u32;
        self.position += self.chunk.len() as u64;
        self.index.push(IndexEntry {
            offset,
            size: size as u32,
        });
        Ok(())
    }

    fn frames(&self) -> u64 {
        self.index.len() as u64
    }

    fn accepts(&self, _frame_len: usize) -> bool {
        !self.damaged && self.fits_another()
    }

    fn size(&self) -> u64 {
        self.projected_size(0, 0)
    }

    fn finalize(&mut self) -> Result<u64, ContainerError> {
        if self.finalized {
            return Ok(self.size());
        }
        self.finalized = true;

        let idx1_start = self.position;
        let mut idx = Vec::with_capacity(8 + self.index.len() * INDEX_ENTRY_SIZE as usize);
        idx.extend_from_slice(b"idx1");
        idx.extend_from_slice(&((self.index.len() as u64 * INDEX_ENTRY_SIZE) as u32).to_le_bytes());
        for entry in &self.index {
            idx.extend_from_slice(b"00db");
            idx.extend_from_slice(&AVIIF_KEYFRAME.to_le_bytes());
            idx.extend_from_slice(&entry.offset.to_le_bytes());
            idx.extend_from_slice(&entry.size.to_le_bytes());
        }
        self.file.seek(SeekFrom::Start(idx1_start))?;
        self.file.write_all(&idx)?;
        let end = idx1_start + idx.len() as u64;
        if self.damaged {
            self.file.truncate(end)?;
        }

        let frames = self.index.len() as u32;
        let offsets = self.offsets;
        self.patch(4, (end - 8) as u32)?;
        self.patch(offsets.avih_total_frames, frames)?;
        self.patch(offsets.strh_length, frames)?;
        self.patch(offsets.movi_list_size, (idx1_start - offsets.movi_fourcc) as u32)?;
        self.file.flush()?;
        self.file.sync()?;

        tracing::debug!("Finalized {:?}: {} frames, {} bytes", self.path, frames, end);
        Ok(end)
    }
}

/// Header and index summary of an AVI file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AviProbe {
    pub width: u32,
    pub height: u32,
    /// Frame count from the main header
    pub total_frames: u32,
    /// Frame count from the video stream header
    pub stream_length: u32,
    pub frame_rate: f64,
    /// Stream handler fourcc (e.g. "DIB ", "H264", "MJPG")
    pub handler: String,
    /// Video chunks found in the `movi` list
    pub movi_frames: u64,
    /// Entries in the legacy `idx1` index, if present
    pub index_entries: Option<u64>,
}

fn read_fourcc<R: Read>(reader: &mut R) -> std::io::Result<[u8; 4]> {
    let mut code = [0u8; 4];
    reader.read_exact(&mut code)?;
    Ok(code)
}

fn read_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .unwrap_or(0)
}

fn invalid(reason: &str) -> ContainerError {
    ContainerError::InvalidContainer(reason.to_string())
}

/// Read an AVI file's headers and count its video chunks
pub fn probe_avi(path: &Path) -> Result<AviProbe, ContainerError> {
    let mut reader = BufReader::new(File::open(path)?);
    let file_len = reader.get_ref().metadata()?.len();

    if &read_fourcc(&mut reader)? != b"RIFF" {
        return Err(invalid("missing RIFF signature"));
    }
    let _riff_size = read_u32(&mut reader)?;
    if &read_fourcc(&mut reader)? != b"AVI " {
        return Err(invalid("not an AVI file"));
    }

    let mut probe = AviProbe {
        width: 0,
        height: 0,
        total_frames: 0,
        stream_length: 0,
        frame_rate: 0.0,
        handler: String::new(),
        movi_frames: 0,
        index_entries: None,
    };
    let mut saw_video_stream = false;

    let mut pos = 12u64;
    while pos + CHUNK_HEADER_SIZE <= file_len {
        reader.seek(SeekFrom::Start(pos))?;
        let id = read_fourcc(&mut reader)?;
        let size = read_u32(&mut reader)? as u64;
        let body = pos + CHUNK_HEADER_SIZE;

        match &id {
            b"LIST" => {
                let kind = read_fourcc(&mut reader)?;
                match &kind {
                    b"hdrl" => {
                        let mut hdrl = vec![0u8; size.saturating_sub(4) as usize];
                        reader.read_exact(&mut hdrl)?;
                        parse_hdrl(&hdrl, &mut probe, &mut saw_video_stream);
                    }
                    b"movi" => {
                        probe.movi_frames += count_video_chunks(&mut reader, body + 4, body + size)?;
                    }
                    _ => {}
                }
            }
            b"idx1" => probe.index_entries = Some(size / INDEX_ENTRY_SIZE),
            _ => {}
        }

        pos = body + size + (size & 1);
    }

    if !saw_video_stream {
        return Err(invalid("no video stream header"));
    }
    Ok(probe)
}

/// Walk the sub-chunks of a `hdrl` list body
fn parse_hdrl(bytes: &[u8], probe: &mut AviProbe, saw_video_stream: &mut bool) {
    let mut at = 0usize;
    while at + 8 <= bytes.len() {
        let id = &bytes[at..at + 4];
        let size = le_u32(bytes, at + 4) as usize;
        let body = at + 8;
        let end = (body + size).min(bytes.len());

        match id {
            b"avih" => {
                probe.total_frames = le_u32(bytes, body + 16);
                probe.width = le_u32(bytes, body + 32);
                probe.height = le_u32(bytes, body + 36);
            }
            b"LIST" if bytes.get(body..body + 4) == Some(b"strl".as_slice()) => {
                let strl = bytes.get(body + 4..end).unwrap_or(&[]);
                if let Some(strh) = find_chunk(strl, b"strh") {
                    if strh.len() >= 36
                        && strh.get(0..4) == Some(b"vids".as_slice())
                        && !*saw_video_stream
                    {
                        *saw_video_stream = true;
                        probe.handler = String::from_utf8_lossy(&strh[4..8]).to_string();
                        let scale = le_u32(strh, 20);
                        let rate = le_u32(strh, 24);
                        if scale > 0 {
                            probe.frame_rate = rate as f64 / scale as f64;
                        }
                        probe.stream_length = le_u32(strh, 32);
                    }
                }
            }
            _ => {}
        }

        at = body + size + (size & 1);
    }
}

fn find_chunk<'a>(bytes: &'a [u8], wanted: &[u8; 4]) -> Option<&'a [u8]> {
    let mut at = 0usize;
    while at + 8 <= bytes.len() {
        let size = le_u32(bytes, at + 4) as usize;
        let body = at + 8;
        if &bytes[at..at + 4] == wanted {
            return bytes.get(body..(body + size).min(bytes.len()));
        }
        at = body + size + (size & 1);
    }
    None
}

/// Count `##db`/`##dc` chunks between `start` and `end`, descending into
/// `rec ` lists
fn count_video_chunks<R: Read + Seek>(reader: &mut R, start: u64, end: u64) -> Result<u64, ContainerError> {
    let mut count = 0;
    let mut pos = start;
    while pos + CHUNK_HEADER_SIZE <= end {
        reader.seek(SeekFrom::Start(pos))?;
        let id = read_fourcc(reader)?;
        let size = read_u32(reader)? as u64;
        let body = pos + CHUNK_HEADER_SIZE;

        if &id == b"LIST" {
            count += count_video_chunks(reader, body + 4, body + size)?;
        } else if &id[2..4] == b"db" || &id[2..4] == b"dc" {
            count += 1;
        }
        pos = body + size + (size & 1);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn mono_profile(width: u32, height: u32) -> CodecProfile {
        CodecProfile::uncompressed(width, height, 135.0, PixelFormat::Mono8)
    }

    #[test]
    fn test_empty_segment_has_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.avi");
        let mut segment = AviSegment::create(&path, &mono_profile(1000, 400)).unwrap();
        assert!(path.exists());
        segment.finalize().unwrap();

        let probe = probe_avi(&path).unwrap();
        assert_eq!((probe.width, probe.height), (1000, 400));
        assert_eq!(probe.total_frames, 0);
        assert_eq!(probe.handler, "DIB ");
        assert_eq!(probe.frame_rate, 135.0);
        assert_eq!(probe.index_entries, Some(0));
    }

    #[test]
    fn test_frames_indexed_and_counted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frames.avi");
        let profile = mono_profile(7, 3);
        let mut segment = AviSegment::create(&path, &profile).unwrap();
        let frame = vec![0x40u8; profile.frame_size()];
        for _ in 0..5 {
            segment.write_frame(&frame).unwrap();
        }
        let projected = segment.size();
        let size = segment.finalize().unwrap();

        assert_eq!(size, projected);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size);

        let probe = probe_avi(&path).unwrap();
        assert_eq!(probe.total_frames, 5);
        assert_eq!(probe.stream_length, 5);
        assert_eq!(probe.movi_frames, 5);
        assert_eq!(probe.index_entries, Some(5));
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("twice.avi");
        let profile = mono_profile(4, 4);
        let mut segment = AviSegment::create(&path, &profile).unwrap();
        segment.write_frame(&vec![1u8; 16]).unwrap();
        let first = segment.finalize().unwrap();
        let bytes = std::fs::read(&path).unwrap();

        assert_eq!(segment.finalize().unwrap(), first);
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
        assert!(matches!(segment.write_frame(&[0u8; 16]), Err(ContainerError::Closed)));
    }

    #[test]
    fn test_dib_rows_bottom_up_and_padded() {
        let layout = DibLayout::new(3, 2, PixelFormat::Mono8).unwrap();
        assert_eq!(layout.stride, 4);
        let mut out = Vec::new();
        layout.encode(&[1, 2, 3, 4, 5, 6], &mut out);
        assert_eq!(out, vec![4, 5, 6, 0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_rgb_swapped_to_bgr() {
        let layout = DibLayout::new(1, 1, PixelFormat::Rgb8).unwrap();
        let mut out = Vec::new();
        layout.encode(&[10, 20, 30], &mut out);
        assert_eq!(out, vec![30, 20, 10, 0]);
    }

    #[test]
    fn test_probe_rejects_non_avi() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not.avi");
        std::fs::write(&path, b"RIFF\x04\x00\x00\x00WAVE").unwrap();
        assert!(matches!(probe_avi(&path), Err(ContainerError::InvalidContainer(_))));
    }

    /// In-memory file whose writes fail once `budget` bytes are spent
    struct FlakyFile {
        data: Cursor<Vec<u8>>,
        budget: Option<usize>,
        truncate_fails: bool,
    }

    impl FlakyFile {
        fn new() -> Self {
            Self {
                data: Cursor::new(Vec::new()),
                budget: None,
                truncate_fails: false,
            }
        }
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match self.budget {
                Some(0) => Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device")),
                Some(left) => {
                    let n = left.min(buf.len());
                    self.budget = Some(left - n);
                    self.data.write(&buf[..n])
                }
                None => self.data.write(buf),
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FlakyFile {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.data.seek(pos)
        }
    }

    impl SegmentFile for FlakyFile {
        fn truncate(&mut self, len: u64) -> std::io::Result<()> {
            if self.truncate_fails {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "I/O error"));
            }
            self.data.get_mut().truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_leaves_index_consistent() {
        let profile = mono_profile(8, 4);
        let mut segment = AviSegment::with_file(Path::new("flaky.avi"), FlakyFile::new(), &profile).unwrap();
        segment.write_frame(&vec![0x11u8; 32]).unwrap();

        // Space runs out part way through the second chunk
        segment.file.budget = Some(12);
        assert!(matches!(segment.write_frame(&vec![0xEEu8; 32]), Err(ContainerError::Io(_))));
        segment.file.budget = None;
        assert!(segment.accepts(32));

        segment.write_frame(&vec![0x22u8; 32]).unwrap();
        let size = segment.finalize().unwrap();

        let movi = segment.offsets.movi_fourcc as usize;
        let bytes = segment.file.data.into_inner();
        assert_eq!(bytes.len() as u64, size);

        let dir = tempdir().unwrap();
        let path = dir.path().join("flaky.avi");
        std::fs::write(&path, &bytes).unwrap();
        let probe = probe_avi(&path).unwrap();
        assert_eq!(probe.total_frames, 2);
        assert_eq!(probe.movi_frames, 2);
        assert_eq!(probe.index_entries, Some(2));

        // Every index entry points at its own frame chunk
        let idx = &bytes[bytes.len() - 2 * INDEX_ENTRY_SIZE as usize..];
        for (entry, fill) in idx.chunks_exact(16).zip([0x11u8, 0x22]) {
            let offset = movi + le_u32(entry, 8) as usize;
            assert_eq!(&bytes[offset..offset + 4], b"00db");
            assert_eq!(bytes[offset + 8], fill);
        }
    }

    #[test]
    fn test_unrecoverable_write_stops_accepting() {
        let profile = mono_profile(8, 4);
        let mut segment = AviSegment::with_file(Path::new("broken.avi"), FlakyFile::new(), &profile).unwrap();
        segment.write_frame(&vec![1u8; 32]).unwrap();

        segment.file.budget = Some(4);
        segment.file.truncate_fails = true;
        assert!(segment.write_frame(&vec![2u8; 32]).is_err());
        assert!(!segment.accepts(32));

        segment.file.budget = None;
        assert!(matches!(
            segment.write_frame(&vec![3u8; 32]),
            Err(ContainerError::InvalidContainer(_))
        ));
        assert_eq!(segment.frames(), 1);
    }

    #[test]
    fn test_segment_near_riff_limit_stops_accepting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.avi");
        let profile = mono_profile(1000, 400);
        let frame = vec![0u8; profile.frame_size()];
        let mut segment = AviSegment::create(&path, &profile).unwrap();
        assert!(segment.accepts(frame.len()));

        segment.position = MAX_RIFF_SIZE - 300_000;
        assert!(!segment.accepts(frame.len()));
        assert!(matches!(
            segment.write_frame(&frame),
            Err(ContainerError::InvalidContainer(_))
        ));
        assert_eq!(segment.frames(), 0);
    }
}
