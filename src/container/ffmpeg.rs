//! FFmpeg-backed AVI segments
//!
//! MJPG and H.264 recordings are encoded by an `ffmpeg` child process: raw
//! frames go in on stdin, ffmpeg muxes them into an AVI file. The on-disk
//! size lags the frames written by whatever ffmpeg still has buffered.

use super::types::{AviCodec, CodecProfile, ContainerError};
use super::writer::SegmentSink;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Encoder binary used unless configured otherwise
pub const DEFAULT_ENCODER: &str = "ffmpeg";

/// How long the first encoder of a recording is watched for an early exit
pub const STARTUP_GRACE: Duration = Duration::from_millis(250);

const STDERR_TAIL_LINES: usize = 20;

/// Check whether an `ffmpeg` binary is on the PATH
pub fn ffmpeg_available() -> bool {
    Command::new(DEFAULT_ENCODER)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Map JPEG quality (1-100, higher is better) to ffmpeg's qscale (31-2)
fn mjpeg_qscale(quality: u8) -> u8 {
    let quality = quality.clamp(1, 100) as u32;
    (31 - (quality - 1) * 29 / 99) as u8
}

/// Build the ffmpeg command line for one segment
fn build_encoder_args(profile: &CodecProfile, output: &Path) -> Result<Vec<String>, ContainerError> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pixel_format".to_string(),
        profile.pixel_format.ffmpeg_name().to_string(),
        "-video_size".to_string(),
        format!("{}x{}", profile.width, profile.height),
        "-framerate".to_string(),
        profile.frame_rate.to_string(),
        "-i".to_string(),
        "-".to_string(),
    ];

    match profile.codec {
        AviCodec::H264 => {
            let bitrate = profile.bitrate.ok_or_else(|| {
                ContainerError::UnsupportedProfile("H264 requires a bitrate".to_string())
            })?;
            let gop = ((profile.frame_rate * 2.0).round() as u32).max(1);
            args.extend([
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                "veryfast".to_string(),
                "-b:v".to_string(),
                bitrate.to_string(),
                "-maxrate".to_string(),
                bitrate.to_string(),
                "-bufsize".to_string(),
                (bitrate.saturating_mul(2)).to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-g".to_string(),
                gop.to_string(),
            ]);
        }
        AviCodec::Mjpg => {
            let quality = profile.quality.ok_or_else(|| {
                ContainerError::UnsupportedProfile("MJPG requires a quality".to_string())
            })?;
            args.extend([
                "-c:v".to_string(),
                "mjpeg".to_string(),
                "-q:v".to_string(),
                mjpeg_qscale(quality).to_string(),
                "-pix_fmt".to_string(),
                "yuvj420p".to_string(),
            ]);
        }
        AviCodec::Uncompressed => {
            return Err(ContainerError::UnsupportedProfile(
                "uncompressed video is written natively".to_string(),
            ))
        }
    }

    args.extend([
        "-f".to_string(),
        "avi".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    Ok(args)
}

/// One AVI file encoded by an ffmpeg child process
pub struct FfmpegSegment {
    path: PathBuf,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    /// Reader thread returning the last lines ffmpeg logged
    stderr: Option<JoinHandle<String>>,
    frames: u64,
    final_size: Option<u64>,
}

impl FfmpegSegment {
    /// Start `encoder` writing to `path`
    ///
    /// The output file is created before the encoder starts, so an unwritable
    /// path fails here with an IO error. The encoder is then watched for
    /// `grace`; exiting within it is reported with its stderr. On any error
    /// the output file is removed again.
    pub fn create(
        encoder: &Path,
        path: &Path,
        profile: &CodecProfile,
        grace: Duration,
    ) -> Result<Self, ContainerError> {
        let args = build_encoder_args(profile, path)?;

        // ffmpeg truncates it (-y)
        File::create(path)?;

        Self::start(encoder, path, &args, grace).map_err(|e| {
            if let Err(remove) = std::fs::remove_file(path) {
                tracing::warn!("Failed to remove {:?}: {}", path, remove);
            }
            e
        })
    }

    fn start(encoder: &Path, path: &Path, args: &[String], grace: Duration) -> Result<Self, ContainerError> {
        tracing::info!("Starting FFmpeg encoder {:?}: {:?}", encoder, args);

        let mut process = Command::new(encoder)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ContainerError::Ffmpeg(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process.stdin.take();
        let stderr = process.stderr.take();
        let mut segment = Self {
            path: path.to_path_buf(),
            process: Some(process),
            stdin,
            stderr: None,
            frames: 0,
            final_size: None,
        };
        if segment.stdin.is_none() {
            return Err(ContainerError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()));
        }
        if let Some(stderr) = stderr {
            segment.stderr = Some(drain_stderr(stderr)?);
        }

        segment.watch_startup(grace)?;
        Ok(segment)
    }

    fn watch_startup(&mut self, grace: Duration) -> Result<(), ContainerError> {
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.exit_status() {
                self.process = None;
                drop(self.stdin.take());
                return Err(ContainerError::Ffmpeg(format!(
                    "FFmpeg exited during startup with {}: {}",
                    status,
                    self.stderr_tail()
                )));
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Exit status if the encoder already terminated
    fn exit_status(&mut self) -> Option<ExitStatus> {
        self.process.as_mut().and_then(|p| p.try_wait().ok().flatten())
    }

    fn stderr_tail(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default()
    }
}

/// Keep reading ffmpeg's stderr so a chatty encoder never blocks on a full
/// pipe. Lines are logged; the last few are returned for error messages.
fn drain_stderr(stderr: ChildStderr) -> Result<JoinHandle<String>, ContainerError> {
    std::thread::Builder::new()
        .name("ffmpeg-stderr".to_string())
        .spawn(move || {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            for line in BufReader::new(stderr).split(b'\n') {
                let Ok(line) = line else { break };
                let line = String::from_utf8_lossy(&line).trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                tracing::warn!("ffmpeg: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail).join("\n")
        })
        .map_err(|e| ContainerError::Ffmpeg(format!("Failed to start FFmpeg stderr reader: {}", e)))
}

impl SegmentSink for FfmpegSegment {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, data: &[u8]) -> Result<(), ContainerError> {
        let stdin = self.stdin.as_mut().ok_or(ContainerError::Closed)?;
        if let Err(e) = stdin.write_all(data) {
            let message = match self.exit_status() {
                Some(status) => format!("Failed to write frame: {} (encoder exited with {})", e, status),
                None => format!("Failed to write frame: {}", e),
            };
            return Err(ContainerError::Ffmpeg(message));
        }
        self.frames += 1;
        Ok(())
    }

    fn frames(&self) -> u64 {
        self.frames
    }

    fn size(&self) -> u64 {
        if let Some(size) = self.final_size {
            return size;
        }
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    fn finalize(&mut self) -> Result<u64, ContainerError> {
        if let Some(size) = self.final_size {
            return Ok(size);
        }

        // Close stdin to signal EOF to FFmpeg
        drop(self.stdin.take());

        if let Some(mut process) = self.process.take() {
            let status = process
                .wait()
                .map_err(|e| ContainerError::Ffmpeg(format!("Failed to wait for FFmpeg: {}", e)))?;
            let stderr = self.stderr_tail();

            if !status.success() {
                return Err(ContainerError::Ffmpeg(format!("FFmpeg exited with {}: {}", status, stderr)));
            }
        }

        let size = std::fs::metadata(&self.path)?.len();
        self.final_size = Some(size);
        tracing::info!(
            "FFmpeg encoder finished {:?}: {} frames, {} bytes",
            self.path,
            self.frames,
            size
        );
        Ok(size)
    }
}

impl Drop for FfmpegSegment {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut process) = self.process.take() {
            let _ = process.wait();
        }
        let _ = self.stderr_tail();
    }
}

/// Write an executable shell script standing in for ffmpeg
#[cfg(all(test, unix))]
pub(crate) fn stub_encoder(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ffmpeg-stub");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
