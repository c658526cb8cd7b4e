//! Trigger configuration
//!
//! The trigger subsystem is driven through an off -> configure -> on
//! sequence: source, selector and activation may only be written while
//! trigger mode is off, and re-enabling trigger mode is always the last
//! write. Camera firmware rejects out-of-order writes.

use super::node::{NodeAccessError, NodeMap};
use super::traits::ConfigurationError;
use serde::{Deserialize, Serialize};

const TRIGGER_MODE: &str = "TriggerMode";
const TRIGGER_SELECTOR: &str = "TriggerSelector";
const TRIGGER_SOURCE: &str = "TriggerSource";
const TRIGGER_ACTIVATION: &str = "TriggerActivation";

/// What fires a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    /// Software-issued trigger command
    Software,
    /// Electrical signal on a GPIO line
    Hardware,
}

/// Signal condition that fires a hardware trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerActivation {
    LevelHigh,
    LevelLow,
    RisingEdge,
    FallingEdge,
    AnyEdge,
}

impl TriggerActivation {
    fn entry(&self) -> &'static str {
        match self {
            TriggerActivation::LevelHigh => "LevelHigh",
            TriggerActivation::LevelLow => "LevelLow",
            TriggerActivation::RisingEdge => "RisingEdge",
            TriggerActivation::FallingEdge => "FallingEdge",
            TriggerActivation::AnyEdge => "AnyEdge",
        }
    }
}

/// Which event the trigger starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerSelector {
    AcquisitionStart,
    FrameStart,
}

impl TriggerSelector {
    fn entry(&self) -> &'static str {
        match self {
            TriggerSelector::AcquisitionStart => "AcquisitionStart",
            TriggerSelector::FrameStart => "FrameStart",
        }
    }
}

/// Trigger setup applied once before acquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerConfig {
    pub source: TriggerSource,
    /// GPIO line used when `source` is hardware
    pub hardware_line: String,
    pub activation: TriggerActivation,
    pub selector: TriggerSelector,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            source: TriggerSource::Hardware,
            hardware_line: "Line0".to_string(),
            activation: TriggerActivation::LevelHigh,
            selector: TriggerSelector::AcquisitionStart,
        }
    }
}

impl TriggerConfig {
    fn source_entry(&self) -> &str {
        match self.source {
            TriggerSource::Software => "Software",
            TriggerSource::Hardware => &self.hardware_line,
        }
    }
}

/// Drives the camera's trigger subsystem
///
/// Holds only the chosen configuration; the node map is borrowed per call.
#[derive(Debug, Clone)]
pub struct TriggerController {
    config: TriggerConfig,
}

impl TriggerController {
    pub fn new(config: TriggerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Disable trigger mode, write selector, source and activation, then
    /// re-enable trigger mode
    ///
    /// Any failure leaves the trigger in an indeterminate state and must
    /// abort the run before acquisition starts.
    pub fn configure(&self, nodes: &mut dyn NodeMap) -> Result<(), ConfigurationError> {
        tracing::info!(
            "Configuring {:?} trigger (source={}, activation={:?}, selector={:?})",
            self.config.source,
            self.config.source_entry(),
            self.config.activation,
            self.config.selector
        );

        nodes
            .set_enum(TRIGGER_MODE, "Off")
            .map_err(|e| node_error("disable trigger mode", e))?;

        let mode = nodes
            .get_enum(TRIGGER_MODE)
            .map_err(|e| node_error("verify trigger mode", e))?;
        if mode != "Off" {
            return Err(ConfigurationError::TriggerStillEnabled(mode));
        }
        tracing::debug!("Trigger mode disabled");

        nodes
            .set_enum(TRIGGER_SELECTOR, self.config.selector.entry())
            .map_err(|e| node_error("select trigger", e))?;

        nodes
            .set_enum(TRIGGER_SOURCE, self.config.source_entry())
            .map_err(|e| node_error("select trigger source", e))?;
        tracing::debug!("Trigger source set to {}", self.config.source_entry());

        nodes
            .set_enum(TRIGGER_ACTIVATION, self.config.activation.entry())
            .map_err(|e| node_error("set trigger activation", e))?;

        nodes
            .set_enum(TRIGGER_MODE, "On")
            .map_err(|e| node_error("enable trigger mode", e))?;

        tracing::info!("Trigger mode enabled");
        Ok(())
    }

    /// Disable trigger mode, returning the camera to free-run
    ///
    /// Called during teardown; callers log the error and keep going.
    pub fn reset(&self, nodes: &mut dyn NodeMap) -> Result<(), ConfigurationError> {
        nodes
            .set_enum(TRIGGER_MODE, "Off")
            .map_err(|e| node_error("reset trigger mode", e))?;
        tracing::info!("Trigger mode disabled");
        Ok(())
    }
}

fn node_error(step: &'static str, error: NodeAccessError) -> ConfigurationError {
    match error {
        NodeAccessError::Rejected { node, reason } => {
            ConfigurationError::OrderingViolation { step, node, reason }
        }
        source => ConfigurationError::Node { step, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::node::NodeValue;
    use crate::capture::simulated::{InMemoryNodeMap, NodeWrite};

    fn trigger_writes(log: &[NodeWrite]) -> Vec<(String, String)> {
        log.iter()
            .filter(|w| w.node.starts_with("Trigger"))
            .map(|w| (w.node.clone(), w.value.to_string()))
            .collect()
    }

    #[test]
    fn test_configure_disables_mode_before_other_writes() {
        let mut nodes = InMemoryNodeMap::camera_defaults();
        nodes.set_enum(TRIGGER_MODE, "On").unwrap();
        let log = nodes.write_log();
        log.lock().clear();

        let controller = TriggerController::new(TriggerConfig::default());
        controller.configure(&mut nodes).unwrap();

        let writes = trigger_writes(&log.lock());
        assert_eq!(
            writes,
            vec![
                ("TriggerMode".to_string(), "Off".to_string()),
                ("TriggerSelector".to_string(), "AcquisitionStart".to_string()),
                ("TriggerSource".to_string(), "Line0".to_string()),
                ("TriggerActivation".to_string(), "LevelHigh".to_string()),
                ("TriggerMode".to_string(), "On".to_string()),
            ]
        );
        assert_eq!(nodes.get_enum(TRIGGER_MODE).unwrap(), "On");
    }

    #[test]
    fn test_no_trigger_write_while_mode_reported_on() {
        for source in [TriggerSource::Software, TriggerSource::Hardware] {
            for activation in [
                TriggerActivation::LevelHigh,
                TriggerActivation::RisingEdge,
                TriggerActivation::FallingEdge,
            ] {
                let mut nodes = InMemoryNodeMap::camera_defaults();
                nodes.set_enum(TRIGGER_MODE, "On").unwrap();
                let log = nodes.write_log();

                let config = TriggerConfig {
                    source,
                    activation,
                    ..TriggerConfig::default()
                };
                TriggerController::new(config).configure(&mut nodes).unwrap();

                // Every write carries the mode observed just before it
                for write in log.lock().iter() {
                    if write.node != TRIGGER_MODE && write.node.starts_with("Trigger") {
                        assert_eq!(write.trigger_mode_before, "Off", "{write:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_software_source_entry() {
        let mut nodes = InMemoryNodeMap::camera_defaults();
        let config = TriggerConfig {
            source: TriggerSource::Software,
            ..TriggerConfig::default()
        };
        TriggerController::new(config).configure(&mut nodes).unwrap();
        assert_eq!(nodes.get_enum(TRIGGER_SOURCE).unwrap(), "Software");
    }

    #[test]
    fn test_missing_node_is_configuration_error() {
        let mut nodes = InMemoryNodeMap::camera_defaults();
        nodes.remove(TRIGGER_SOURCE);

        let err = TriggerController::new(TriggerConfig::default())
            .configure(&mut nodes)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::Node {
                step: "select trigger source",
                source: NodeAccessError::NotFound(TRIGGER_SOURCE.to_string()),
            }
        );
        // Trigger mode was never turned back on
        assert_eq!(nodes.get_enum(TRIGGER_MODE).unwrap(), "Off");
    }

    #[test]
    fn test_unknown_hardware_line_rejected() {
        let mut nodes = InMemoryNodeMap::camera_defaults();
        let config = TriggerConfig {
            hardware_line: "Line9".to_string(),
            ..TriggerConfig::default()
        };
        let err = TriggerController::new(config).configure(&mut nodes).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::Node {
                source: NodeAccessError::EntryNotFound { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_mode_stuck_on_is_reported() {
        let mut nodes = InMemoryNodeMap::camera_defaults();
        nodes.set_enum(TRIGGER_MODE, "On").unwrap();
        nodes.set_writable(TRIGGER_MODE, false);
        let err = TriggerController::new(TriggerConfig::default())
            .configure(&mut nodes)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::Node {
                step: "disable trigger mode",
                source: NodeAccessError::NotWritable(TRIGGER_MODE.to_string()),
            }
        );
    }

    #[test]
    fn test_firmware_rejection_is_ordering_violation() {
        struct OutOfOrder(InMemoryNodeMap);

        // Ignores the request to turn trigger mode off
        impl NodeMap for OutOfOrder {
            fn get(&self, name: &str) -> Result<NodeValue, NodeAccessError> {
                if name == TRIGGER_MODE {
                    return Ok(NodeValue::entry("Off"));
                }
                self.0.get(name)
            }

            fn set(&mut self, name: &str, value: NodeValue) -> Result<(), NodeAccessError> {
                if name == TRIGGER_MODE && value == NodeValue::entry("Off") {
                    return Ok(());
                }
                self.0.set(name, value)
            }
        }

        let mut inner = InMemoryNodeMap::camera_defaults();
        inner.set_enum(TRIGGER_MODE, "On").unwrap();
        let mut nodes = OutOfOrder(inner);

        let err = TriggerController::new(TriggerConfig::default())
            .configure(&mut nodes)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::OrderingViolation { ref node, .. } if node == TRIGGER_SELECTOR
        ));
    }

    #[test]
    fn test_reset_turns_mode_off() {
        let mut nodes = InMemoryNodeMap::camera_defaults();
        let controller = TriggerController::new(TriggerConfig::default());
        controller.configure(&mut nodes).unwrap();
        controller.reset(&mut nodes).unwrap();
        assert_eq!(nodes.get_enum(TRIGGER_MODE).unwrap(), "Off");
    }

    #[test]
    fn test_reset_reports_missing_node() {
        let mut nodes = InMemoryNodeMap::camera_defaults();
        nodes.remove(TRIGGER_MODE);
        let err = TriggerController::new(TriggerConfig::default())
            .reset(&mut nodes)
            .unwrap_err();
        assert!(err.to_string().contains("reset trigger mode"));
    }
}
