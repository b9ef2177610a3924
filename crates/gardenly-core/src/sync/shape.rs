// ── Datapoint shapes ──
//
// Decided once per sync from the descriptor entry and the live cloud
// value. Every later step (node layout, value pushes, outbound writes)
// matches on the shape instead of re-inspecting the entry.

use serde_json::{Map, Value};

use crate::address::PathCodec;
use crate::model::Datapoint;

#[derive(Debug, Clone, PartialEq)]
pub enum DatapointShape {
    /// One state built from the descriptor alone.
    Simple,
    /// Trigger plus `parameters.*`, sent as a POST command.
    Command,
    /// One state typed from the live value; writes go out as a PUT.
    SmartScalar {
        property: String,
        live: Option<Value>,
        supported_values: Option<Vec<Value>>,
    },
    /// `properties.*` group plus `smart_trigger`; sent as a PUT.
    SmartComposite {
        property: String,
        fields: Map<String, Value>,
    },
}

impl DatapointShape {
    pub fn is_smart(&self) -> bool {
        matches!(self, Self::SmartScalar { .. } | Self::SmartComposite { .. })
    }
}

/// Classify `datapoint` given its located cloud entity, if any.
pub fn classify(datapoint: &Datapoint, position: Option<&Value>, smart_mode: bool) -> DatapointShape {
    if datapoint.entry.command.is_some() {
        return DatapointShape::Command;
    }
    if !(datapoint.entry.smart && smart_mode) {
        return DatapointShape::Simple;
    }

    let property = position
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| datapoint.leaf_id())
        .to_owned();

    match position.map(PathCodec::leaf_value) {
        Some(Value::Object(fields)) => DatapointShape::SmartComposite {
            property,
            fields: fields.clone(),
        },
        live => DatapointShape::SmartScalar {
            property,
            live: live.filter(|v| !v.is_null()).cloned(),
            supported_values: position
                .and_then(|p| p.get("supported_values"))
                .and_then(Value::as_array)
                .cloned(),
        },
    }
}
