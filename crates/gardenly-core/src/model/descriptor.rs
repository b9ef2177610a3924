// ── Datapoint descriptor ──
//
// The externally supplied list of datapoints the bridge should mirror.
// Keys are flattened `location<sep>device<sep>property...` chains; the
// separator is validated once here so the rest of the engine works on
// parsed addresses only.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::{Address, PathCodec, TREE_DELIMITER};
use crate::error::CoreError;
use crate::model::ValueType;

/// Metadata for one datapoint, as written in the descriptor file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorEntry {
    pub location: String,
    pub device: String,
    /// Written through property-style PUTs; the live value decides
    /// between a scalar state and a composite group.
    #[serde(default)]
    pub smart: bool,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, alias = "writable")]
    pub writeable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Display name; resolved from the cloud document when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Present for simple commands (trigger + parameters).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,
}

/// A simple command: trigger name and the parameters bundled with it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Parameter names may contain `.` to build nested JSON.
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A validated descriptor entry with its parsed address.
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    pub key: String,
    /// `location.device.property...`, relative to the datapoint root.
    pub address: Address,
    pub entry: DescriptorEntry,
}

impl Datapoint {
    pub fn location_id(&self) -> &str {
        &self.entry.location
    }

    pub fn device_id(&self) -> &str {
        &self.entry.device
    }

    /// Segments below the device.
    pub fn property_path(&self) -> &[String] {
        self.address.segments().get(2..).unwrap_or_default()
    }

    /// The last segment: the cloud id of the property itself.
    pub fn leaf_id(&self) -> &str {
        self.address.last().unwrap_or_default()
    }

    pub fn command_name(&self) -> Option<String> {
        let spec = self.entry.command.as_ref()?;
        Some(
            spec.name
                .clone()
                .or_else(|| self.entry.name.clone())
                .unwrap_or_else(|| self.leaf_id().to_owned()),
        )
    }
}

/// Ordered, validated set of datapoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDescriptor {
    datapoints: Vec<Datapoint>,
}

impl ConfigDescriptor {
    /// Validate raw entries against the codec's separator.
    ///
    /// Every key must split into at least location, device and one
    /// property segment, agree with the entry's `location` / `device`,
    /// and contain no empty or tree-delimiter segments.
    pub fn new(codec: &PathCodec, entries: IndexMap<String, DescriptorEntry>) -> Result<Self, CoreError> {
        let mut datapoints = Vec::with_capacity(entries.len());

        for (key, entry) in entries {
            for (field, id) in [("location", &entry.location), ("device", &entry.device)] {
                if id.is_empty() {
                    return Err(CoreError::config(format!("datapoint '{key}': empty {field} id")));
                }
                codec.check_segment(id).map_err(|_| {
                    CoreError::config(format!(
                        "datapoint '{key}': {field} id '{id}' collides with separator '{}'",
                        codec.separator()
                    ))
                })?;
            }

            let address = codec.parse_key(&key);
            if address.len() < 3 {
                return Err(CoreError::config(format!(
                    "datapoint '{key}': expected location{sep}device{sep}property",
                    sep = codec.separator()
                )));
            }
            if let Some(bad) = address
                .segments()
                .iter()
                .find(|s| s.is_empty() || s.contains(TREE_DELIMITER))
            {
                return Err(CoreError::config(format!(
                    "datapoint '{key}': invalid segment '{bad}'"
                )));
            }
            if address.get(0) != Some(entry.location.as_str())
                || address.get(1) != Some(entry.device.as_str())
            {
                return Err(CoreError::config(format!(
                    "datapoint '{key}': key does not match location '{}' / device '{}'",
                    entry.location, entry.device
                )));
            }

            datapoints.push(Datapoint { key, address, entry });
        }

        Ok(Self { datapoints })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Datapoint> {
        self.datapoints.iter()
    }

    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    /// Distinct location ids, in descriptor order.
    pub fn locations(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for dp in &self.datapoints {
            if !seen.iter().any(|l| l == dp.location_id()) {
                seen.push(dp.location_id().to_owned());
            }
        }
        seen
    }

    /// Distinct `(location, device)` pairs, in descriptor order.
    pub fn devices(&self) -> Vec<(String, String)> {
        let mut seen: Vec<(String, String)> = Vec::new();
        for dp in &self.datapoints {
            if !seen
                .iter()
                .any(|(l, d)| l == dp.location_id() && d == dp.device_id())
            {
                seen.push((dp.location_id().to_owned(), dp.device_id().to_owned()));
            }
        }
        seen
    }

    pub fn for_location<'a>(&'a self, location_id: &'a str) -> impl Iterator<Item = &'a Datapoint> {
        self.datapoints
            .iter()
            .filter(move |dp| dp.location_id() == location_id)
    }
}
