//! Webcam backend using nokhwa
//!
//! UVC webcams have no trigger subsystem and expose only a handful of
//! read-only properties, so trigger and sensor setup should be disabled when
//! recording from one. Raw frames are passed through without decoding.

use super::node::{NodeAccessError, NodeMap, NodeValue};
use super::traits::{
    CameraDriver, CameraInfo, CameraSystem, DriverError, FrameRelease, FrameStatus, PixelFormat,
    PullError, StreamFrame,
};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::{Buffer, Camera};
use std::sync::atomic::{AtomicU64, Ordering};

/// Camera system over the platform's native webcam API
#[derive(Debug, Default)]
pub struct WebcamSystem;

impl CameraSystem for WebcamSystem {
    fn cameras(&self) -> Result<Vec<CameraInfo>, DriverError> {
        let cameras = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| DriverError::new("query", -1, e.to_string()))?;

        Ok(cameras
            .into_iter()
            .map(|info| CameraInfo {
                id: match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                },
                name: info.human_name(),
                serial_number: None,
            })
            .collect())
    }

    fn open(&self, index: usize) -> Result<Box<dyn CameraDriver>, DriverError> {
        let info = self
            .cameras()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| DriverError::new("open", -1, format!("no webcam at index {index}")))?;
        Ok(Box::new(WebcamCamera::new(index as u32, info)?))
    }
}

/// Read-only properties reported by a webcam
struct WebcamNodes {
    width: u32,
    height: u32,
    frame_rate: u32,
    pixel_format: Option<PixelFormat>,
    model: String,
}

impl NodeMap for WebcamNodes {
    fn get(&self, name: &str) -> Result<NodeValue, NodeAccessError> {
        match name {
            "Width" => Ok(NodeValue::Integer(self.width as i64)),
            "Height" => Ok(NodeValue::Integer(self.height as i64)),
            "AcquisitionFrameRate" => Ok(NodeValue::Float(self.frame_rate as f64)),
            "PixelFormat" => self
                .pixel_format
                .map(|f| NodeValue::entry(f.node_entry()))
                .ok_or_else(|| NodeAccessError::NotReadable(name.to_string())),
            "DeviceModelName" => Ok(NodeValue::String(self.model.clone())),
            _ => Err(NodeAccessError::NotFound(name.to_string())),
        }
    }

    fn set(&mut self, name: &str, _value: NodeValue) -> Result<(), NodeAccessError> {
        match self.get(name) {
            Ok(_) => Err(NodeAccessError::NotWritable(name.to_string())),
            Err(e) => Err(e),
        }
    }
}

#[derive(Default)]
struct ReleaseCounter(AtomicU64);

impl FrameRelease for ReleaseCounter {
    fn release(&self, _frame_id: u64) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// A UVC webcam opened through nokhwa
pub struct WebcamCamera {
    info: CameraInfo,
    camera: Camera,
    nodes: WebcamNodes,
    streaming: bool,
    next_frame_id: u64,
    current: Option<Buffer>,
    released: ReleaseCounter,
}

impl WebcamCamera {
    fn new(index: u32, info: CameraInfo) -> Result<Self, DriverError> {
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let camera = Camera::new(CameraIndex::Index(index), format)
            .map_err(|e| DriverError::new("Camera::new", -1, e.to_string()))?;

        let camera_format = camera.camera_format();
        let pixel_format = map_frame_format(camera_format.format());
        if pixel_format.is_none() {
            tracing::warn!(
                "Webcam delivers {:?}, which cannot be recorded without decoding",
                camera_format.format()
            );
        }

        let nodes = WebcamNodes {
            width: camera_format.resolution().width(),
            height: camera_format.resolution().height(),
            frame_rate: camera_format.frame_rate(),
            pixel_format,
            model: info.name.clone(),
        };

        tracing::info!(
            "Webcam opened: {}x{} @ {}fps, format={:?}",
            nodes.width,
            nodes.height,
            nodes.frame_rate,
            camera_format.format()
        );

        Ok(Self {
            info,
            camera,
            nodes,
            streaming: false,
            next_frame_id: 0,
            current: None,
            released: ReleaseCounter::default(),
        })
    }
}

fn map_frame_format(format: FrameFormat) -> Option<PixelFormat> {
    match format {
        FrameFormat::YUYV => Some(PixelFormat::Yuyv422),
        FrameFormat::GRAY => Some(PixelFormat::Mono8),
        FrameFormat::RAWRGB => Some(PixelFormat::Rgb8),
        _ => None,
    }
}

impl CameraDriver for WebcamCamera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn nodes(&self) -> &dyn NodeMap {
        &self.nodes
    }

    fn nodes_mut(&mut self) -> &mut dyn NodeMap {
        &mut self.nodes
    }

    fn begin_acquisition(&mut self) -> Result<(), DriverError> {
        if self.nodes.pixel_format.is_none() {
            return Err(DriverError::new(
                "open_stream",
                -1,
                "stream format is not a raw pixel format",
            ));
        }
        self.camera
            .open_stream()
            .map_err(|e| DriverError::new("open_stream", -1, e.to_string()))?;
        self.streaming = true;
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), DriverError> {
        self.streaming = false;
        self.current = None;
        self.camera
            .stop_stream()
            .map_err(|e| DriverError::new("stop_stream", -1, e.to_string()))
    }

    fn pull_frame(&mut self) -> Result<StreamFrame<'_>, PullError> {
        if !self.streaming {
            return Err(DriverError::new("frame", -1, "camera is not streaming").into());
        }
        let pixel_format = self
            .nodes
            .pixel_format
            .ok_or_else(|| DriverError::new("frame", -1, "stream format is not a raw pixel format"))?;

        let buffer = self
            .camera
            .frame()
            .map_err(|e| DriverError::new("frame", -1, e.to_string()))?;
        let width = buffer.resolution().width();
        let height = buffer.resolution().height();

        // Short transfers show up as truncated buffers
        let status = if buffer.buffer().len() < pixel_format.frame_size(width, height) {
            FrameStatus::Incomplete { code: 1 }
        } else {
            FrameStatus::Complete
        };

        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        let buffer: &Buffer = self.current.insert(buffer);

        Ok(StreamFrame::new(
            &self.released,
            frame_id,
            buffer.buffer(),
            width,
            height,
            pixel_format,
            status,
        ))
    }
}
