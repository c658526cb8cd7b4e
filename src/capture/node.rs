//! Typed access to the camera's property registry
//!
//! Vendor SDKs expose camera properties as a dynamic, name-keyed node map
//! whose nodes may be absent, read-only or write-only. `NodeMap` wraps that
//! lookup behind `get`/`set` calls that report every failure as a value, so
//! callers can compose checks with `?` instead of probing predicates first.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Value held by a camera node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum NodeValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Symbolic name of the selected enumeration entry
    Enumeration(String),
    String(String),
}

impl NodeValue {
    /// Shorthand for an enumeration entry
    pub fn entry(name: &str) -> Self {
        NodeValue::Enumeration(name.to_string())
    }

    fn kind(&self) -> &'static str {
        match self {
            NodeValue::Integer(_) => "integer",
            NodeValue::Float(_) => "float",
            NodeValue::Boolean(_) => "boolean",
            NodeValue::Enumeration(_) => "enumeration",
            NodeValue::String(_) => "string",
        }
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Integer(v) => write!(f, "{v}"),
            NodeValue::Float(v) => write!(f, "{v}"),
            NodeValue::Boolean(v) => write!(f, "{v}"),
            NodeValue::Enumeration(v) | NodeValue::String(v) => f.write_str(v),
        }
    }
}

/// Failure to read or write a node
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeAccessError {
    #[error("node '{0}' not found")]
    NotFound(String),

    #[error("node '{0}' is not readable")]
    NotReadable(String),

    #[error("node '{0}' is not writable")]
    NotWritable(String),

    #[error("node '{node}' has no entry '{entry}'")]
    EntryNotFound { node: String, entry: String },

    #[error("node '{node}' holds a {actual} value, expected {expected}")]
    TypeMismatch {
        node: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// The device refused an otherwise well-formed write
    #[error("write to '{node}' rejected by device: {reason}")]
    Rejected { node: String, reason: String },
}

/// Name-keyed camera property registry
pub trait NodeMap {
    /// Read a node's current value
    fn get(&self, name: &str) -> Result<NodeValue, NodeAccessError>;

    /// Write a node's value
    fn set(&mut self, name: &str, value: NodeValue) -> Result<(), NodeAccessError>;

    /// Read an enumeration node's selected entry name
    fn get_enum(&self, name: &str) -> Result<String, NodeAccessError> {
        match self.get(name)? {
            NodeValue::Enumeration(entry) => Ok(entry),
            other => Err(mismatch(name, "enumeration", &other)),
        }
    }

    /// Select an enumeration node's entry by name
    fn set_enum(&mut self, name: &str, entry: &str) -> Result<(), NodeAccessError> {
        self.set(name, NodeValue::entry(entry))
    }

    /// Read a numeric node as a float
    fn get_float(&self, name: &str) -> Result<f64, NodeAccessError> {
        match self.get(name)? {
            NodeValue::Float(v) => Ok(v),
            NodeValue::Integer(v) => Ok(v as f64),
            other => Err(mismatch(name, "float", &other)),
        }
    }

    /// Read an integer node
    fn get_integer(&self, name: &str) -> Result<i64, NodeAccessError> {
        match self.get(name)? {
            NodeValue::Integer(v) => Ok(v),
            other => Err(mismatch(name, "integer", &other)),
        }
    }

    /// Read a string node
    fn get_string(&self, name: &str) -> Result<String, NodeAccessError> {
        match self.get(name)? {
            NodeValue::String(v) => Ok(v),
            other => Err(mismatch(name, "string", &other)),
        }
    }
}

fn mismatch(name: &str, expected: &'static str, actual: &NodeValue) -> NodeAccessError {
    NodeAccessError::TypeMismatch {
        node: name.to_string(),
        expected,
        actual: actual.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedNodes(HashMap<String, NodeValue>);

    impl NodeMap for FixedNodes {
        fn get(&self, name: &str) -> Result<NodeValue, NodeAccessError> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| NodeAccessError::NotFound(name.to_string()))
        }

        fn set(&mut self, name: &str, _value: NodeValue) -> Result<(), NodeAccessError> {
            Err(NodeAccessError::NotWritable(name.to_string()))
        }
    }

    #[test]
    fn test_typed_getters() {
        let mut nodes = HashMap::new();
        nodes.insert("Width".to_string(), NodeValue::Integer(1000));
        nodes.insert("TriggerMode".to_string(), NodeValue::entry("Off"));
        let nodes = FixedNodes(nodes);

        assert_eq!(nodes.get_integer("Width").unwrap(), 1000);
        assert_eq!(nodes.get_float("Width").unwrap(), 1000.0);
        assert_eq!(nodes.get_enum("TriggerMode").unwrap(), "Off");
        assert!(matches!(
            nodes.get_enum("Width"),
            Err(NodeAccessError::TypeMismatch { expected: "enumeration", .. })
        ));
        assert_eq!(
            nodes.get_string("DeviceSerialNumber"),
            Err(NodeAccessError::NotFound("DeviceSerialNumber".to_string()))
        );
    }
}
