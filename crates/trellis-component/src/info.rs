//! ComponentInfo - the derived, cacheable descriptor of a component.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::control::ControlInfo;
use crate::factory::ComponentType;
use crate::port::{PortDirection, PortType};

/// Descriptor for one port, embedded in [`ComponentInfo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Signal direction.
    pub direction: PortDirection,
    /// Capability tag.
    pub port_type: PortType,
    /// Free-form metadata attached by the component author.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub attributes: serde_json::Value,
}

/// Snapshot of a component's surface: type, controls, ports, children.
///
/// Derived on demand and cached by the component until its next structural
/// mutation; consumers must treat it as a point-in-time snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// The component's type identifier.
    pub component_type: ComponentType,
    /// Control descriptors by control id.
    pub controls: BTreeMap<String, ControlInfo>,
    /// Port descriptors by port id.
    pub ports: BTreeMap<String, PortInfo>,
    /// Child ids, sorted.
    pub children: Vec<String>,
    /// Free-form metadata attached by the component author.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub attributes: serde_json::Value,
}
