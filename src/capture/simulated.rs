//! Simulated camera backend
//!
//! A deterministic stand-in for a machine-vision camera. It carries a
//! property registry with the same node names and write rules as the real
//! firmware (trigger settings are refused while trigger mode is on) and a
//! scripted frame stream with incomplete frames, grab timeouts and driver
//! failures.

use super::node::{NodeAccessError, NodeMap, NodeValue};
use super::traits::{
    CameraDriver, CameraInfo, CameraSystem, DriverError, FrameRelease, FrameStatus, PixelFormat,
    PullError, StreamFrame,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Nodes the firmware refuses to change while trigger mode is on
const TRIGGER_GUARDED: [&str; 3] = ["TriggerSource", "TriggerSelector", "TriggerActivation"];

#[derive(Debug, Clone)]
struct Node {
    value: NodeValue,
    readable: bool,
    writable: bool,
    /// Valid entries for enumeration nodes
    entries: Option<Vec<String>>,
}

/// One attempted node write, as seen by the device
#[derive(Debug, Clone, PartialEq)]
pub struct NodeWrite {
    pub node: String,
    pub value: NodeValue,
    /// `TriggerMode` entry at the moment of the write
    pub trigger_mode_before: String,
    pub accepted: bool,
}

/// Property registry held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryNodeMap {
    nodes: BTreeMap<String, Node>,
    log: Arc<Mutex<Vec<NodeWrite>>>,
}

impl InMemoryNodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of a monochrome machine-vision camera in free-run state
    pub fn camera_defaults() -> Self {
        let mut nodes = Self::new();
        nodes
            .insert_enum("TriggerMode", "Off", &["Off", "On"])
            .insert_enum(
                "TriggerSelector",
                "FrameStart",
                &["AcquisitionStart", "FrameStart", "FrameBurstStart"],
            )
            .insert_enum(
                "TriggerSource",
                "Software",
                &["Software", "Line0", "Line1", "Line2", "Line3"],
            )
            .insert_enum(
                "TriggerActivation",
                "RisingEdge",
                &["LevelHigh", "LevelLow", "RisingEdge", "FallingEdge", "AnyEdge"],
            )
            .insert("Width", NodeValue::Integer(1440))
            .insert("Height", NodeValue::Integer(1080))
            .insert("OffsetX", NodeValue::Integer(0))
            .insert("OffsetY", NodeValue::Integer(0))
            .insert_enum("PixelFormat", "Mono8", &["Mono8", "RGB8", "BGR8"])
            .insert("AcquisitionFrameRateEnable", NodeValue::Boolean(false))
            .insert("AcquisitionFrameRate", NodeValue::Float(30.0))
            .insert_enum("ExposureAuto", "Continuous", &["Off", "Once", "Continuous"])
            .insert_enum("ExposureMode", "Timed", &["Timed", "TriggerWidth"])
            .insert("ExposureTime", NodeValue::Float(5000.0))
            .insert_enum(
                "AcquisitionMode",
                "SingleFrame",
                &["Continuous", "SingleFrame", "MultiFrame"],
            )
            .insert("DeviceSerialNumber", NodeValue::String("SIM00001".to_string()))
            .insert(
                "DeviceModelName",
                NodeValue::String("Simulated Mono Camera".to_string()),
            );
        nodes.set_writable("DeviceSerialNumber", false);
        nodes.set_writable("DeviceModelName", false);
        nodes
    }

    /// Add a readable, writable node
    pub fn insert(&mut self, name: &str, value: NodeValue) -> &mut Self {
        self.nodes.insert(
            name.to_string(),
            Node {
                value,
                readable: true,
                writable: true,
                entries: None,
            },
        );
        self
    }

    /// Add an enumeration node with its valid entries
    pub fn insert_enum(&mut self, name: &str, selected: &str, entries: &[&str]) -> &mut Self {
        self.nodes.insert(
            name.to_string(),
            Node {
                value: NodeValue::entry(selected),
                readable: true,
                writable: true,
                entries: Some(entries.iter().map(|e| e.to_string()).collect()),
            },
        );
        self
    }

    pub fn remove(&mut self, name: &str) {
        self.nodes.remove(name);
    }

    pub fn set_readable(&mut self, name: &str, readable: bool) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.readable = readable;
        }
    }

    pub fn set_writable(&mut self, name: &str, writable: bool) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.writable = writable;
        }
    }

    /// Shared handle on the log of attempted writes
    pub fn write_log(&self) -> Arc<Mutex<Vec<NodeWrite>>> {
        self.log.clone()
    }

    fn trigger_mode(&self) -> String {
        self.nodes
            .get("TriggerMode")
            .map(|n| n.value.to_string())
            .unwrap_or_default()
    }

    fn check_write(&self, name: &str, node: &Node, value: &NodeValue) -> Result<(), NodeAccessError> {
        if TRIGGER_GUARDED.contains(&name) && self.trigger_mode() == "On" {
            return Err(NodeAccessError::Rejected {
                node: name.to_string(),
                reason: "trigger mode is on".to_string(),
            });
        }

        match (&node.entries, value) {
            (Some(entries), NodeValue::Enumeration(entry)) => {
                if entries.iter().any(|e| e == entry) {
                    Ok(())
                } else {
                    Err(NodeAccessError::EntryNotFound {
                        node: name.to_string(),
                        entry: entry.clone(),
                    })
                }
            }
            (Some(_), _) => Err(type_mismatch(name, &node.value, value)),
            (None, _) if std::mem::discriminant(&node.value) == std::mem::discriminant(value) => {
                Ok(())
            }
            (None, NodeValue::Integer(_)) if matches!(node.value, NodeValue::Float(_)) => Ok(()),
            (None, _) => Err(type_mismatch(name, &node.value, value)),
        }
    }
}

fn type_mismatch(name: &str, current: &NodeValue, value: &NodeValue) -> NodeAccessError {
    let kind = |v: &NodeValue| match v {
        NodeValue::Integer(_) => "integer",
        NodeValue::Float(_) => "float",
        NodeValue::Boolean(_) => "boolean",
        NodeValue::Enumeration(_) => "enumeration",
        NodeValue::String(_) => "string",
    };
    NodeAccessError::TypeMismatch {
        node: name.to_string(),
        expected: kind(current),
        actual: kind(value),
    }
}

impl NodeMap for InMemoryNodeMap {
    fn get(&self, name: &str) -> Result<NodeValue, NodeAccessError> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| NodeAccessError::NotFound(name.to_string()))?;
        if !node.readable {
            return Err(NodeAccessError::NotReadable(name.to_string()));
        }
        Ok(node.value.clone())
    }

    fn set(&mut self, name: &str, value: NodeValue) -> Result<(), NodeAccessError> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| NodeAccessError::NotFound(name.to_string()))?;
        if !node.writable {
            return Err(NodeAccessError::NotWritable(name.to_string()));
        }

        let result = self.check_write(name, node, &value);
        self.log.lock().push(NodeWrite {
            node: name.to_string(),
            value: value.clone(),
            trigger_mode_before: self.trigger_mode(),
            accepted: result.is_ok(),
        });
        result?;

        let value = match (&node.value, value) {
            (NodeValue::Float(_), NodeValue::Integer(v)) => NodeValue::Float(v as f64),
            (_, value) => value,
        };
        if let Some(node) = self.nodes.get_mut(name) {
            node.value = value;
        }
        Ok(())
    }
}

/// Scripted stream event
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A complete frame at the configured geometry
    Frame,
    /// A partial transfer with the given image status
    Incomplete { code: u32 },
    /// A complete frame at a different geometry
    Resized { width: u32, height: u32 },
    /// No frame within the grab timeout
    Timeout,
    /// Driver-level stream failure
    Fail { code: i32, message: String },
}

/// Counters observed from outside the camera
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    pub begin_calls: u32,
    pub end_calls: u32,
    pub pulls: u64,
    pub delivered: u64,
    pub released: u64,
}

/// Simulated camera options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatedConfig {
    /// Number of cameras the simulated system reports
    pub camera_count: usize,
    /// Grab timeout reported for scripted timeouts
    pub grab_timeout_ms: u64,
    /// Mark every Nth frame incomplete
    pub incomplete_every: Option<u64>,
    /// Pace frames at the configured acquisition frame rate
    pub realtime: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            camera_count: 1,
            grab_timeout_ms: 1000,
            incomplete_every: None,
            realtime: true,
        }
    }
}

struct SimLedger {
    stats: Arc<Mutex<SimStats>>,
}

impl FrameRelease for SimLedger {
    fn release(&self, frame_id: u64) {
        tracing::trace!("Released simulated frame {}", frame_id);
        self.stats.lock().released += 1;
    }
}

/// Camera that produces synthetic frames
pub struct SimulatedCamera {
    info: CameraInfo,
    nodes: InMemoryNodeMap,
    script: VecDeque<SimEvent>,
    /// Keep producing frames once the script runs out, otherwise fail
    repeat_after_script: bool,
    config: SimulatedConfig,
    acquiring: bool,
    next_frame_id: u64,
    buffer: Vec<u8>,
    ledger: SimLedger,
}

impl SimulatedCamera {
    pub fn new(index: usize, config: SimulatedConfig) -> Self {
        Self {
            info: CameraInfo {
                id: index.to_string(),
                name: "Simulated Mono Camera".to_string(),
                serial_number: Some(format!("SIM{:05}", index + 1)),
            },
            nodes: InMemoryNodeMap::camera_defaults(),
            script: VecDeque::new(),
            repeat_after_script: true,
            config,
            acquiring: false,
            next_frame_id: 0,
            buffer: Vec::new(),
            ledger: SimLedger {
                stats: Arc::new(Mutex::new(SimStats::default())),
            },
        }
    }

    /// Camera that plays `events` and then reports a stream failure
    pub fn scripted(events: impl IntoIterator<Item = SimEvent>) -> Self {
        let config = SimulatedConfig {
            realtime: false,
            ..SimulatedConfig::default()
        };
        let mut camera = Self::new(0, config);
        camera.script = events.into_iter().collect();
        camera.repeat_after_script = false;
        camera
    }

    /// Keep producing complete frames after the script runs out
    pub fn repeating(mut self) -> Self {
        self.repeat_after_script = true;
        self
    }

    /// Shared handle on the camera's counters
    pub fn stats(&self) -> Arc<Mutex<SimStats>> {
        self.ledger.stats.clone()
    }

    /// Shared handle on the node write log
    pub fn write_log(&self) -> Arc<Mutex<Vec<NodeWrite>>> {
        self.nodes.write_log()
    }

    pub fn node_map_mut(&mut self) -> &mut InMemoryNodeMap {
        &mut self.nodes
    }

    fn next_event(&mut self) -> SimEvent {
        if let Some(event) = self.script.pop_front() {
            return event;
        }
        if self.repeat_after_script {
            SimEvent::Frame
        } else {
            SimEvent::Fail {
                code: -1011,
                message: "stream ended".to_string(),
            }
        }
    }

    fn geometry(&self) -> Result<(u32, u32, PixelFormat), DriverError> {
        let read_error = |e: NodeAccessError| DriverError::new("GetNextImage", -1010, e.to_string());
        let width = self.nodes.get_integer("Width").map_err(read_error)?;
        let height = self.nodes.get_integer("Height").map_err(read_error)?;
        let entry = self.nodes.get_enum("PixelFormat").map_err(read_error)?;
        let format = PixelFormat::from_node_entry(&entry).ok_or_else(|| {
            DriverError::new("GetNextImage", -1010, format!("unsupported pixel format {entry}"))
        })?;
        let (width, height) = image_size(width, height)?;
        Ok((width, height, format))
    }

    fn render(&mut self, frame_id: u64, width: u32, height: u32, format: PixelFormat, filled: bool) {
        let size = format.frame_size(width, height);
        self.buffer.clear();
        self.buffer.resize(size, 0);
        // Partial transfers leave the bottom half empty
        let limit = if filled { size } else { size / 2 };
        let row = size / height as usize;
        for (i, byte) in self.buffer[..limit].iter_mut().enumerate() {
            let x = i % row;
            let y = i / row;
            *byte = (x as u64 + y as u64 + frame_id) as u8;
        }
    }

    fn pace(&self) {
        if !self.config.realtime {
            return;
        }
        if let Ok(rate) = self.nodes.get_float("AcquisitionFrameRate") {
            if rate > 0.0 {
                std::thread::sleep(Duration::from_secs_f64(1.0 / rate));
            }
        }
    }
}

/// Reject image sizes no buffer can be laid out for
fn image_size(width: i64, height: i64) -> Result<(u32, u32), DriverError> {
    match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(DriverError::new(
            "GetNextImage",
            -1010,
            format!("invalid image size {width}x{height}"),
        )),
    }
}

impl CameraDriver for SimulatedCamera {
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
        self.ledger.stats.lock().begin_calls += 1;
        if self.acquiring {
            return Err(DriverError::new("BeginAcquisition", -1004, "already streaming"));
        }
        self.acquiring = true;
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), DriverError> {
        self.ledger.stats.lock().end_calls += 1;
        if !self.acquiring {
            return Err(DriverError::new("EndAcquisition", -1002, "camera is not streaming"));
        }
        self.acquiring = false;
        Ok(())
    }

    fn pull_frame(&mut self) -> Result<StreamFrame<'_>, PullError> {
        self.ledger.stats.lock().pulls += 1;
        if !self.acquiring {
            return Err(DriverError::new("GetNextImage", -1002, "camera is not streaming").into());
        }

        let (width, height, format) = self.geometry()?;
        let (width, height, status) = match self.next_event() {
            SimEvent::Frame => (width, height, FrameStatus::Complete),
            SimEvent::Incomplete { code } => (width, height, FrameStatus::Incomplete { code }),
            SimEvent::Resized { width, height } => {
                let (width, height) = image_size(width.into(), height.into())?;
                (width, height, FrameStatus::Complete)
            }
            SimEvent::Timeout => {
                return Err(PullError::Timeout(Duration::from_millis(
                    self.config.grab_timeout_ms,
                )))
            }
            SimEvent::Fail { code, message } => {
                return Err(DriverError::new("GetNextImage", code, message).into())
            }
        };

        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        let status = match (status, self.config.incomplete_every) {
            (FrameStatus::Complete, Some(every)) if every > 0 && (frame_id + 1) % every == 0 => {
                FrameStatus::Incomplete { code: 3 }
            }
            (status, _) => status,
        };

        self.pace();
        self.render(frame_id, width, height, format, status == FrameStatus::Complete);
        self.ledger.stats.lock().delivered += 1;

        Ok(StreamFrame::new(
            &self.ledger,
            frame_id,
            &self.buffer,
            width,
            height,
            format,
            status,
        ))
    }
}

/// Camera system backed by simulated cameras
pub struct SimulatedSystem {
    config: SimulatedConfig,
    /// Prepared camera handed out by the first `open` call
    prepared: Mutex<Option<SimulatedCamera>>,
}

impl SimulatedSystem {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            prepared: Mutex::new(None),
        }
    }

    /// System with a single, pre-built camera
    pub fn with_camera(camera: SimulatedCamera) -> Self {
        Self {
            config: camera.config.clone(),
            prepared: Mutex::new(Some(camera)),
        }
    }
}

impl CameraSystem for SimulatedSystem {
    fn cameras(&self) -> Result<Vec<CameraInfo>, DriverError> {
        if let Some(camera) = self.prepared.lock().as_ref() {
            return Ok(vec![camera.info.clone()]);
        }
        Ok((0..self.config.camera_count)
            .map(|i| SimulatedCamera::new(i, self.config.clone()).info)
            .collect())
    }

    fn open(&self, index: usize) -> Result<Box<dyn CameraDriver>, DriverError> {
        if let Some(camera) = self.prepared.lock().take() {
            return Ok(Box::new(camera));
        }
        if index >= self.config.camera_count {
            return Err(DriverError::new(
                "GetByIndex",
                -1001,
                format!("camera index {index} out of range ({} cameras)", self.config.camera_count),
            ));
        }
        Ok(Box::new(SimulatedCamera::new(index, self.config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_write_rejected_while_trigger_on() {
        let mut nodes = InMemoryNodeMap::camera_defaults();
        nodes.set_enum("TriggerMode", "On").unwrap();
        let err = nodes.set_enum("TriggerSource", "Line0").unwrap_err();
        assert!(matches!(err, NodeAccessError::Rejected { .. }));

        let log = nodes.write_log();
        let last = log.lock().last().cloned().unwrap();
        assert!(!last.accepted);
        assert_eq!(last.trigger_mode_before, "On");
    }

    #[test]
    fn test_enum_and_type_checks() {
        let mut nodes = InMemoryNodeMap::camera_defaults();
        assert!(matches!(
            nodes.set_enum("ExposureAuto", "Sometimes"),
            Err(NodeAccessError::EntryNotFound { .. })
        ));
        assert!(matches!(
            nodes.set("Width", NodeValue::Boolean(true)),
            Err(NodeAccessError::TypeMismatch { .. })
        ));
        nodes.set("ExposureTime", NodeValue::Integer(250)).unwrap();
        assert_eq!(nodes.get("ExposureTime").unwrap(), NodeValue::Float(250.0));
        assert_eq!(
            nodes.set("DeviceSerialNumber", NodeValue::String("X".into())),
            Err(NodeAccessError::NotWritable("DeviceSerialNumber".into()))
        );
    }

    #[test]
    fn test_scripted_stream() {
        let mut camera = SimulatedCamera::scripted([
            SimEvent::Frame,
            SimEvent::Incomplete { code: 7 },
            SimEvent::Timeout,
        ]);
        camera.nodes_mut().set("Width", NodeValue::Integer(8)).unwrap();
        camera.nodes_mut().set("Height", NodeValue::Integer(4)).unwrap();
        let stats = camera.stats();

        assert!(matches!(camera.pull_frame(), Err(PullError::Driver(_))));
        camera.begin_acquisition().unwrap();

        let frame = camera.pull_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 4));
        assert_eq!(frame.data().len(), 32);
        frame.release();

        let frame = camera.pull_frame().unwrap();
        assert_eq!(frame.status(), FrameStatus::Incomplete { code: 7 });
        drop(frame);

        assert!(matches!(camera.pull_frame(), Err(PullError::Timeout(_))));
        assert!(matches!(camera.pull_frame(), Err(PullError::Driver(e)) if e.code == -1011));

        camera.end_acquisition().unwrap();
        let stats = stats.lock().clone();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.end_calls, 1);
    }

    #[test]
    fn test_empty_resize_is_a_driver_error() {
        let mut camera = SimulatedCamera::scripted([
            SimEvent::Resized { width: 8, height: 0 },
            SimEvent::Resized { width: 0, height: 8 },
            SimEvent::Frame,
        ]);
        camera.begin_acquisition().unwrap();

        assert!(matches!(camera.pull_frame(), Err(PullError::Driver(e)) if e.code == -1010));
        assert!(matches!(camera.pull_frame(), Err(PullError::Driver(e)) if e.code == -1010));
        // The stream carries on with the next event
        assert!(camera.pull_frame().is_ok());
    }

    #[test]
    fn test_out_of_range_size_nodes_rejected() {
        for (width, height) in [(-5, 4), (8, 0), (i64::from(u32::MAX) + 1, 4)] {
            let mut camera = SimulatedCamera::scripted([SimEvent::Frame]);
            camera
                .node_map_mut()
                .insert("Width", NodeValue::Integer(width))
                .insert("Height", NodeValue::Integer(height));
            camera.begin_acquisition().unwrap();
            assert!(
                matches!(camera.pull_frame(), Err(PullError::Driver(e)) if e.code == -1010),
                "{width}x{height}"
            );
        }
    }

    #[test]
    fn test_system_reports_camera_count() {
        let system = SimulatedSystem::new(SimulatedConfig {
            camera_count: 0,
            ..SimulatedConfig::default()
        });
        assert!(system.cameras().unwrap().is_empty());
        assert!(system.open(0).is_err());
    }
}
