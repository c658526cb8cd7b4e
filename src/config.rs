//! Recorder configuration
//!
//! Optional JSON file, located with `--config <path>` or the
//! `SESSION_RECORDER_CONFIG` environment variable. Every section has
//! defaults, so an empty object (or no file at all) is a valid
//! configuration.

use crate::capture::simulated::{SimulatedConfig, SimulatedSystem};
use crate::capture::{CameraSystem, SensorSettings, TriggerConfig};
use crate::container::AviCodec;
use crate::preview::{NullPreview, PreviewSurface, SnapshotPreview};
use crate::recorder::{RecorderSettings, StopSignal};
use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "SESSION_RECORDER_CONFIG";

const MIB: u64 = 1024 * 1024;

/// Camera backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    Simulated,
    /// UVC webcam (requires the `webcam` feature)
    Webcam,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraSection {
    pub backend: CameraBackend,
    /// Index into the detected camera list
    pub index: usize,
    pub simulated: SimulatedConfig,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            backend: CameraBackend::Simulated,
            index: 0,
            simulated: SimulatedConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerSection {
    /// Configure the trigger before acquisition; otherwise free-run
    pub enabled: bool,
    #[serde(flatten)]
    pub config: TriggerConfig,
}

impl Default for TriggerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            config: TriggerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingSection {
    pub codec: AviCodec,
    /// H.264 bitrate in bits per second
    pub bitrate: u32,
    /// MJPG quality 1-100
    pub mjpeg_quality: u8,
    /// Segment size cap in MiB, 0 disables rotation
    pub max_file_mib: u64,
    /// Write `<prefix>.json` after the run
    pub write_summary: bool,
    /// ffmpeg binary for MJPG and H.264
    pub encoder: PathBuf,
}

impl Default for RecordingSection {
    fn default() -> Self {
        Self {
            codec: AviCodec::H264,
            bitrate: 8_000_000,
            mjpeg_quality: 75,
            max_file_mib: 2048,
            write_summary: true,
            encoder: PathBuf::from(crate::container::DEFAULT_ENCODER),
        }
    }
}

/// Live preview output
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum PreviewConfig {
    #[default]
    None,
    /// Write the latest frame to `path` every `every` frames
    Snapshot { path: PathBuf, every: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StopSection {
    /// Stop once this file exists
    pub sentinel: Option<PathBuf>,
    /// Stop when a `TERM` line arrives on stdin
    pub stdin_term: bool,
}

impl Default for StopSection {
    fn default() -> Self {
        Self {
            sentinel: Some(PathBuf::from("KILL")),
            stdin_term: true,
        }
    }
}

/// Complete recorder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub camera: CameraSection,
    /// Applied before trigger setup; `null` keeps the camera's own settings
    pub sensor: Option<SensorSettings>,
    pub trigger: TriggerSection,
    pub recording: RecordingSection,
    pub preview: PreviewConfig,
    pub stop: StopSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera: CameraSection::default(),
            sensor: Some(SensorSettings::default()),
            trigger: TriggerSection::default(),
            recording: RecordingSection::default(),
            preview: PreviewConfig::default(),
            stop: StopSection::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Settings(format!("cannot read {}: {}", path.display(), e)))?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load from `explicit`, else from `$SESSION_RECORDER_CONFIG`, else use
    /// the defaults
    pub fn resolve(explicit: Option<&Path>) -> AppResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => {
                tracing::debug!("No configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.recording.max_file_mib.checked_mul(MIB).is_none() {
            return Err(AppError::Settings(format!(
                "maxFileMib {} is too large",
                self.recording.max_file_mib
            )));
        }
        if let PreviewConfig::Snapshot { every: 0, .. } = self.preview {
            return Err(AppError::Settings("snapshot preview needs every >= 1".to_string()));
        }
        if self.trigger.enabled && self.trigger.config.hardware_line.trim().is_empty() {
            return Err(AppError::Settings("trigger hardwareLine is empty".to_string()));
        }
        Ok(())
    }

    /// Segment size cap in bytes
    pub fn max_bytes(&self) -> u64 {
        self.recording.max_file_mib.saturating_mul(MIB)
    }

    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            camera_index: self.camera.index,
            sensor: self.sensor.clone(),
            trigger: self.trigger.enabled.then(|| self.trigger.config.clone()),
            codec: self.recording.codec,
            bitrate: self.recording.bitrate,
            quality: self.recording.mjpeg_quality,
            max_bytes: self.max_bytes(),
            write_summary: self.recording.write_summary,
            encoder: self.recording.encoder.clone(),
        }
    }

    /// Camera system for the configured backend
    pub fn camera_system(&self) -> AppResult<Box<dyn CameraSystem>> {
        match self.camera.backend {
            CameraBackend::Simulated => Ok(Box::new(SimulatedSystem::new(self.camera.simulated.clone()))),
            #[cfg(feature = "webcam")]
            CameraBackend::Webcam => Ok(Box::new(crate::capture::webcam::WebcamSystem)),
            #[cfg(not(feature = "webcam"))]
            CameraBackend::Webcam => Err(AppError::Settings(
                "webcam backend requires building with the `webcam` feature".to_string(),
            )),
        }
    }

    pub fn preview_surface(&self) -> Box<dyn PreviewSurface> {
        match &self.preview {
            PreviewConfig::None => Box::new(NullPreview),
            PreviewConfig::Snapshot { path, every } => Box::new(SnapshotPreview::new(path, *every)),
        }
    }

    /// Stop signal with the configured sentinel file
    pub fn stop_signal(&self) -> StopSignal {
        match &self.stop.sentinel {
            Some(path) => {
                if path.exists() {
                    tracing::warn!("Stop sentinel {:?} already exists, recording will stop at once", path);
                }
                StopSignal::with_sentinel(path)
            }
            None => StopSignal::new(),
        }
    }
}
