//! Recording coordinator
//!
//! Runs one recording end to end: open the camera, apply sensor and trigger
//! setup, open the container, stream frames until stopped, then tear down in
//! reverse order and summarize the run.

use super::acquisition::AcquisitionLoop;
use super::state::{LoopState, RecordingOutput, RecordingState};
use super::stop::StopSignal;
use crate::capture::{
    apply_sensor_settings, read_stream_geometry, CameraDriver, CameraSession, CameraSystem, SensorSettings,
    StreamGeometry, TriggerConfig, TriggerController,
};
use crate::container::{AviCodec, CodecProfile, ContainerWriter, SegmentInfo};
use crate::preview::PreviewSurface;
use crate::utils::error::{AppError, AppResult};
use chrono::Utc;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Camera streaming, first segment open
    Started { camera: String, path: PathBuf },
    /// A segment reached the size cap and was finalized
    Rotated(SegmentInfo),
    /// A frame was discarded
    FrameDropped { frame_id: u64, reason: String },
    /// Frames written so far
    Progress { frames_written: u64 },
    /// Acquisition ended
    Stopped(LoopState),
    /// Error occurred
    Error(String),
}

/// What to record and how
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub camera_index: usize,
    /// Sensor geometry and exposure, `None` to keep the camera's settings
    pub sensor: Option<SensorSettings>,
    /// Trigger setup, `None` to free-run
    pub trigger: Option<TriggerConfig>,
    pub codec: AviCodec,
    /// H.264 bitrate in bits per second
    pub bitrate: u32,
    /// MJPG quality 1-100
    pub quality: u8,
    /// Segment size cap, 0 disables rotation
    pub max_bytes: u64,
    /// Write `<prefix>.json` after the run
    pub write_summary: bool,
    /// Program encoding MJPG and H.264 segments
    pub encoder: PathBuf,
}

impl RecorderSettings {
    /// Codec profile for frames of the given geometry
    pub fn profile_for(&self, geometry: &StreamGeometry) -> CodecProfile {
        let StreamGeometry {
            width,
            height,
            pixel_format,
            frame_rate,
            ..
        } = *geometry;
        match self.codec {
            AviCodec::Uncompressed => CodecProfile::uncompressed(width, height, frame_rate, pixel_format),
            AviCodec::Mjpg => CodecProfile::mjpg(width, height, frame_rate, pixel_format, self.quality),
            AviCodec::H264 => CodecProfile::h264(width, height, frame_rate, pixel_format, self.bitrate),
        }
    }
}

/// Path of the JSON summary for a recording prefix
pub fn summary_path(prefix: &Path) -> PathBuf {
    let stem = prefix
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    let stem = stem.strip_suffix(".avi").unwrap_or(&stem);
    prefix.with_file_name(format!("{}.json", stem))
}

/// Drives a single camera recording
pub struct RecordingCoordinator {
    settings: RecorderSettings,

    /// Current recording state
    state: Arc<RwLock<RecordingState>>,

    /// Event broadcaster
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingCoordinator {
    pub fn new(settings: RecorderSettings) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            settings,
            state: Arc::new(RwLock::new(RecordingState::Idle)),
            event_tx,
        }
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    /// Get the current recording state
    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    fn advance(&self, next: RecordingState) {
        self.state.write().advance(next);
    }

    /// Abort during setup
    fn fail(&self, error: AppError) -> AppError {
        tracing::error!("Recording setup failed: {}", error);
        let _ = self.event_tx.send(RecordingEvent::Error(error.to_string()));
        self.advance(RecordingState::Closed);
        error
    }

    /// Record from the configured camera into `<prefix>-NNNN.avi` files
    /// until `stop` fires or the camera fails
    ///
    /// Setup failures abort before any frame is pulled. Once acquisition has
    /// started the run always ends with the container closed and the
    /// trigger reset; a fatal loop error is reported in the returned summary.
    /// Blocks the calling thread for the whole run.
    pub fn record(
        &self,
        system: &dyn CameraSystem,
        prefix: &Path,
        preview: &mut dyn PreviewSurface,
        stop: StopSignal,
    ) -> AppResult<RecordingOutput> {
        let started_at = Utc::now();
        let mut session = CameraSession::open(system, self.settings.camera_index).map_err(|e| self.fail(e))?;
        let camera = session.info().clone();
        let driver = session.driver();

        if let Some(sensor) = &self.settings.sensor {
            apply_sensor_settings(driver.nodes_mut(), sensor).map_err(|e| self.fail(e.into()))?;
        }
        let geometry = read_stream_geometry(driver.nodes()).map_err(|e| self.fail(e.into()))?;
        if let Some(serial) = &geometry.serial_number {
            tracing::info!("Camera serial number: {}", serial);
        }

        let trigger = self.settings.trigger.clone().map(TriggerController::new);
        if let Some(controller) = &trigger {
            controller
                .configure(driver.nodes_mut())
                .map_err(|e| self.fail(e.into()))?;
        }

        let profile = self.settings.profile_for(&geometry);
        let opened = ContainerWriter::open_with_encoder(
            prefix,
            profile.clone(),
            self.settings.max_bytes,
            &self.settings.encoder,
        );
        let mut writer = match opened {
            Ok(writer) => writer,
            Err(e) => {
                reset_trigger(trigger.as_ref(), driver);
                return Err(self.fail(e.into()));
            }
        };
        self.advance(RecordingState::TriggerConfigured);

        if let Err(e) = driver.begin_acquisition() {
            if let Err(close) = writer.close() {
                tracing::warn!("Failed to close container: {}", close);
            }
            reset_trigger(trigger.as_ref(), driver);
            return Err(self.fail(e.into()));
        }
        self.advance(RecordingState::Acquiring);
        tracing::info!("Acquiring images from camera {}", camera.id);
        let _ = self.event_tx.send(RecordingEvent::Started {
            camera: camera.id.clone(),
            path: writer.current_segment().path.clone(),
        });

        let report = AcquisitionLoop::new(&mut *driver, &mut writer, preview, stop)
            .with_events(self.event_tx.clone())
            .run();
        self.advance(RecordingState::Draining);

        let trigger_reset = reset_trigger(trigger.as_ref(), driver);
        self.advance(RecordingState::Closed);
        let _ = self.event_tx.send(RecordingEvent::Stopped(report.stop_reason));

        let output = RecordingOutput {
            id: Uuid::new_v4(),
            started_at,
            ended_at: Utc::now(),
            camera,
            trigger: self.settings.trigger.clone(),
            profile,
            max_bytes: self.settings.max_bytes,
            report,
            segments: writer.segments().to_vec(),
            trigger_reset,
        };

        tracing::info!(
            "Recording finished in {}ms: {} frames in {} segment(s)",
            output.duration_ms(),
            output.report.stats.frames_written,
            output.segments.len()
        );

        if self.settings.write_summary {
            let path = summary_path(prefix);
            if let Err(e) = write_summary(&path, &output) {
                tracing::warn!("Failed to write recording summary {:?}: {}", path, e);
            }
        }

        Ok(output)
    }
}

/// Put the trigger back to idle; failures are logged, not raised
fn reset_trigger(trigger: Option<&TriggerController>, driver: &mut dyn CameraDriver) -> bool {
    let Some(controller) = trigger else {
        return false;
    };
    match controller.reset(driver.nodes_mut()) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to reset trigger: {}", e);
            false
        }
    }
}

fn write_summary(path: &Path, output: &RecordingOutput) -> AppResult<()> {
    let json = serde_json::to_string_pretty(output)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::{SimEvent, SimulatedCamera, SimulatedConfig, SimulatedSystem};
    use crate::capture::{NodeValue, PixelFormat};
    use crate::container::{probe_avi, ContainerError};
    use crate::preview::NullPreview;
    use tempfile::tempdir;

    fn settings(codec: AviCodec) -> RecorderSettings {
        RecorderSettings {
            camera_index: 0,
            sensor: Some(SensorSettings {
                width: 64,
                height: 32,
                offset_x: 0,
                offset_y: 0,
                frame_rate: 135.0,
                exposure_us: 250.0,
            }),
            trigger: Some(TriggerConfig::default()),
            codec,
            bitrate: 8_000_000,
            quality: 75,
            max_bytes: 0,
            write_summary: true,
            encoder: PathBuf::from(crate::container::DEFAULT_ENCODER),
        }
    }

    #[test]
    fn test_summary_path() {
        assert_eq!(summary_path(Path::new("/r/run")), PathBuf::from("/r/run.json"));
        assert_eq!(summary_path(Path::new("/r/run.avi")), PathBuf::from("/r/run.json"));
    }

    #[test]
    fn test_profile_follows_camera_geometry() {
        let geometry = StreamGeometry {
            width: 1000,
            height: 400,
            pixel_format: PixelFormat::Mono8,
            frame_rate: 135.0,
            serial_number: None,
        };
        let profile = settings(AviCodec::H264).profile_for(&geometry);
        assert_eq!(profile, CodecProfile::h264(1000, 400, 135.0, PixelFormat::Mono8, 8_000_000));
    }

    #[test]
    fn test_full_run_with_trigger() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("session");
        let camera = SimulatedCamera::scripted(vec![SimEvent::Frame; 4]);
        let stats = camera.stats();
        let log = camera.write_log();
        let system = SimulatedSystem::with_camera(camera);

        let coordinator = RecordingCoordinator::new(settings(AviCodec::Uncompressed));
        let mut events = coordinator.subscribe();
        let output = coordinator
            .record(&system, &prefix, &mut NullPreview, StopSignal::new())
            .unwrap();

        assert_eq!(coordinator.state(), RecordingState::Closed);
        assert!(output.report.is_fatal());
        assert_eq!(output.report.stats.frames_written, 4);
        assert!(output.trigger_reset);
        assert_eq!(stats.lock().end_calls, 1);

        // Trigger enabled before acquisition, disabled after
        let writes = log.lock();
        let modes: Vec<String> = writes
            .iter()
            .filter(|w| w.node == "TriggerMode")
            .map(|w| w.value.to_string())
            .collect();
        assert_eq!(modes, vec!["Off", "On", "Off"]);

        let probe = probe_avi(&output.segments[0].path).unwrap();
        assert_eq!((probe.width, probe.height), (64, 32));
        assert_eq!(probe.total_frames, 4);
        assert_eq!(probe.frame_rate, 135.0);

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("session.json")).unwrap()).unwrap();
        assert_eq!(summary["report"]["stopReason"], "stoppedByFatalError");
        assert_eq!(summary["segments"][0]["frames"], 4);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event {
                RecordingEvent::Started { .. } => "started",
                RecordingEvent::Stopped(_) => "stopped",
                RecordingEvent::Error(_) => "error",
                _ => "other",
            });
        }
        assert_eq!(kinds.first(), Some(&"started"));
        assert_eq!(kinds.last(), Some(&"stopped"));
    }

    #[test]
    fn test_no_cameras_touches_nothing() {
        let dir = tempdir().unwrap();
        let system = SimulatedSystem::new(SimulatedConfig {
            camera_count: 0,
            ..SimulatedConfig::default()
        });
        let coordinator = RecordingCoordinator::new(settings(AviCodec::Uncompressed));
        let result = coordinator.record(&system, &dir.path().join("none"), &mut NullPreview, StopSignal::new());

        assert!(matches!(result, Err(AppError::NoCameras)));
        assert_eq!(coordinator.state(), RecordingState::Closed);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_trigger_failure_aborts_before_container() {
        let dir = tempdir().unwrap();
        let mut camera = SimulatedCamera::scripted(vec![SimEvent::Frame]);
        camera.node_map_mut().remove("TriggerActivation");
        let stats = camera.stats();
        let system = SimulatedSystem::with_camera(camera);

        let coordinator = RecordingCoordinator::new(settings(AviCodec::Uncompressed));
        let err = coordinator
            .record(&system, &dir.path().join("trig"), &mut NullPreview, StopSignal::new())
            .unwrap_err();

        assert!(matches!(err, AppError::Configuration(_)));
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("TriggerActivation"));
        assert_eq!(stats.lock().begin_calls, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_container_failure_resets_trigger() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let camera = SimulatedCamera::scripted(vec![SimEvent::Frame]);
        let stats = camera.stats();
        let log = camera.write_log();
        let system = SimulatedSystem::with_camera(camera);

        let coordinator = RecordingCoordinator::new(settings(AviCodec::Uncompressed));
        let err = coordinator
            .record(&system, &blocker.join("rec"), &mut NullPreview, StopSignal::new())
            .unwrap_err();

        assert!(matches!(err, AppError::Container(_)));
        assert_eq!(stats.lock().begin_calls, 0);
        let last_mode = log
            .lock()
            .iter()
            .filter(|w| w.node == "TriggerMode")
            .last()
            .map(|w| w.value.to_string());
        assert_eq!(last_mode.as_deref(), Some("Off"));
    }

    #[cfg(unix)]
    #[test]
    fn test_encoder_failure_aborts_before_acquisition() {
        let dir = tempdir().unwrap();
        let camera = SimulatedCamera::scripted(vec![SimEvent::Frame]);
        let stats = camera.stats();
        let system = SimulatedSystem::with_camera(camera);

        let mut settings = settings(AviCodec::H264);
        settings.encoder = crate::container::ffmpeg::stub_encoder(
            dir.path(),
            "echo 'Could not open output file' >&2\nexit 1",
        );
        let coordinator = RecordingCoordinator::new(settings);
        let prefix = dir.path().join("h264");
        let err = coordinator
            .record(&system, &prefix, &mut NullPreview, StopSignal::new())
            .unwrap_err();

        assert!(matches!(err, AppError::Container(ContainerError::Ffmpeg(_))));
        assert_eq!(err.exit_code(), 4);
        assert_eq!(stats.lock().begin_calls, 0);
        assert!(!crate::container::segment_path(&prefix, 0).exists());
    }

    #[test]
    fn test_free_run_without_trigger() {
        let dir = tempdir().unwrap();
        let mut camera = SimulatedCamera::scripted(vec![SimEvent::Frame, SimEvent::Frame]).repeating();
        camera
            .node_map_mut()
            .insert("Width", NodeValue::Integer(16))
            .insert("Height", NodeValue::Integer(16));
        let log = camera.write_log();
        let system = SimulatedSystem::with_camera(camera);

        let mut settings = settings(AviCodec::Uncompressed);
        settings.sensor = None;
        settings.trigger = None;
        settings.write_summary = false;

        let stop = StopSignal::new();
        stop.trigger();
        let coordinator = RecordingCoordinator::new(settings);
        let output = coordinator
            .record(&system, &dir.path().join("free"), &mut NullPreview, stop)
            .unwrap();

        assert_eq!(output.report.stop_reason, LoopState::StoppedByUser);
        assert!(!output.trigger_reset);
        assert!(log.lock().is_empty());
        assert!(!dir.path().join("free.json").exists());
    }
}
