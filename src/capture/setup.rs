//! Sensor and exposure setup
//!
//! Applies region of interest, frame rate and exposure settings before the
//! trigger is configured, and reads back the stream geometry the video
//! container has to match.

use super::node::{NodeAccessError, NodeMap, NodeValue};
use super::traits::{ConfigurationError, PixelFormat};
use serde::{Deserialize, Serialize};

/// Region of interest, frame rate and exposure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SensorSettings {
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    /// Acquisition frame rate in Hz
    pub frame_rate: f64,
    /// Exposure time in microseconds
    pub exposure_us: f64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 400,
            offset_x: 200,
            offset_y: 350,
            frame_rate: 135.0,
            exposure_us: 250.0,
        }
    }
}

impl SensorSettings {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigurationError::InvalidSetting(format!(
                "region of interest {}x{} is empty",
                self.width, self.height
            )));
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "frame rate {} is not positive",
                self.frame_rate
            )));
        }
        if !(self.exposure_us.is_finite() && self.exposure_us > 0.0) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "exposure {}us is not positive",
                self.exposure_us
            )));
        }
        Ok(())
    }
}

/// Stream geometry reported by the camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamGeometry {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate: f64,
    pub serial_number: Option<String>,
}

/// Write region of interest, frame rate and exposure settings
///
/// Dimensions go before offsets since the offset range depends on them.
pub fn apply_sensor_settings(
    nodes: &mut dyn NodeMap,
    settings: &SensorSettings,
) -> Result<(), ConfigurationError> {
    settings.validate()?;

    let writes = [
        ("set height", "Height", NodeValue::Integer(settings.height as i64)),
        ("set width", "Width", NodeValue::Integer(settings.width as i64)),
        ("set horizontal offset", "OffsetX", NodeValue::Integer(settings.offset_x as i64)),
        ("set vertical offset", "OffsetY", NodeValue::Integer(settings.offset_y as i64)),
        ("enable frame rate control", "AcquisitionFrameRateEnable", NodeValue::Boolean(true)),
        ("set frame rate", "AcquisitionFrameRate", NodeValue::Float(settings.frame_rate)),
        ("disable auto exposure", "ExposureAuto", NodeValue::entry("Off")),
        ("select timed exposure", "ExposureMode", NodeValue::entry("Timed")),
        ("set exposure time", "ExposureTime", NodeValue::Float(settings.exposure_us)),
        ("set continuous acquisition", "AcquisitionMode", NodeValue::entry("Continuous")),
    ];

    for (step, node, value) in writes {
        nodes
            .set(node, value)
            .map_err(|source| ConfigurationError::Node { step, source })?;
    }

    tracing::info!(
        "Sensor configured: {}x{} at +{}+{}, {} fps, exposure {}us",
        settings.width,
        settings.height,
        settings.offset_x,
        settings.offset_y,
        settings.frame_rate,
        settings.exposure_us
    );
    Ok(())
}

/// Read back the geometry frames will be delivered at
///
/// The frame rate is required so recordings play back in real time; the
/// serial number is informational.
pub fn read_stream_geometry(nodes: &dyn NodeMap) -> Result<StreamGeometry, ConfigurationError> {
    let read = |step: &'static str, source: NodeAccessError| ConfigurationError::Node { step, source };

    let width = nodes.get_integer("Width").map_err(|e| read("read width", e))?;
    let height = nodes.get_integer("Height").map_err(|e| read("read height", e))?;
    let entry = nodes
        .get_enum("PixelFormat")
        .map_err(|e| read("read pixel format", e))?;
    let pixel_format = PixelFormat::from_node_entry(&entry).ok_or_else(|| {
        ConfigurationError::InvalidSetting(format!("unsupported pixel format {entry}"))
    })?;
    let frame_rate = nodes
        .get_float("AcquisitionFrameRate")
        .map_err(|e| read("read frame rate", e))?;

    let (width, height) = match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(ConfigurationError::InvalidSetting(format!(
                "camera reports invalid dimensions {width}x{height}"
            )))
        }
    };

    let serial_number = match nodes.get_string("DeviceSerialNumber") {
        Ok(serial) => {
            tracing::info!("Device serial number retrieved as {}", serial);
            Some(serial)
        }
        Err(e) => {
            tracing::debug!("Serial number unavailable: {}", e);
            None
        }
    };

    Ok(StreamGeometry {
        width,
        height,
        pixel_format,
        frame_rate,
        serial_number,
    })
}
