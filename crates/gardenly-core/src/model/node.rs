// ── State tree nodes ──
//
// A node's kind is fixed when it is created; afterwards only its value
// changes, and values live in the StateStore rather than here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::Address;

/// Structural role of a node in the tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeKind {
    /// Folder without a value (locations, abilities, `properties`).
    Group,
    /// Folder representing one cloud device.
    Device,
    /// Leaf holding a value.
    State,
    /// Boolean leaf whose local write fires an outbound command.
    Trigger,
}

/// Declared value type of a state.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Number,
    String,
    Object,
    Array,
    #[default]
    Mixed,
}

impl ValueType {
    /// Runtime type of a live JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Object(_) => Self::Object,
            Value::Array(_) => Self::Array,
            Value::Null => Self::Mixed,
        }
    }

    /// Default role for a state of this type.
    pub fn default_role(self) -> &'static str {
        match self {
            Self::Boolean => "indicator",
            Self::Number => "value",
            Self::String => "text",
            Self::Object | Self::Array | Self::Mixed => "state",
        }
    }
}

/// One addressable node of the state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub address: Address,
    pub kind: NodeKind,
    /// Human-readable name. For triggers this is the command or
    /// property name sent to the cloud.
    pub name: String,
    pub value_type: ValueType,
    pub role: String,
    pub readable: bool,
    pub writable: bool,
    pub unit: Option<String>,
    /// Allowed values, from the cloud's `supported_values`.
    pub states: Option<Vec<Value>>,
    /// Set on writable smart scalars: the cloud property a local write
    /// is sent to.
    pub smart_property: Option<String>,
    /// Value written once, when the node is created.
    pub initial: Option<Value>,
}

impl Node {
    fn folder(address: Address, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            address,
            kind,
            name: name.into(),
            value_type: ValueType::Mixed,
            role: String::new(),
            readable: false,
            writable: false,
            unit: None,
            states: None,
            smart_property: None,
            initial: None,
        }
    }

    pub fn group(address: Address, name: impl Into<String>) -> Self {
        Self::folder(address, NodeKind::Group, name)
    }

    pub fn device(address: Address, name: impl Into<String>) -> Self {
        Self::folder(address, NodeKind::Device, name)
    }

    /// Read-only state; chain [`writable`](Self::writable) to change that.
    pub fn state(
        address: Address,
        name: impl Into<String>,
        value_type: ValueType,
        role: impl Into<String>,
    ) -> Self {
        Self {
            address,
            kind: NodeKind::State,
            name: name.into(),
            value_type,
            role: role.into(),
            readable: true,
            writable: false,
            unit: None,
            states: None,
            smart_property: None,
            initial: None,
        }
    }

    /// Writable boolean button, initialized to `false`.
    pub fn trigger(address: Address, name: impl Into<String>) -> Self {
        Self {
            address,
            kind: NodeKind::Trigger,
            name: name.into(),
            value_type: ValueType::Boolean,
            role: "button".into(),
            readable: true,
            writable: true,
            unit: None,
            states: None,
            smart_property: None,
            initial: Some(Value::Bool(false)),
        }
    }

    #[must_use]
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: Option<String>) -> Self {
        self.unit = unit;
        self
    }

    #[must_use]
    pub fn with_states(mut self, states: Option<Vec<Value>>) -> Self {
        self.states = states;
        self
    }

    #[must_use]
    pub fn with_initial(mut self, initial: Option<Value>) -> Self {
        self.initial = initial;
        self
    }

    #[must_use]
    pub fn with_smart_property(mut self, property: impl Into<String>) -> Self {
        self.smart_property = Some(property.into());
        self
    }

    /// Whether the node carries a value (states and triggers).
    pub fn holds_value(&self) -> bool {
        matches!(self.kind, NodeKind::State | NodeKind::Trigger)
    }
}
