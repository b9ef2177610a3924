// ── Location mirroring ──
//
// Locations change rarely (name, address, geo position) and are only
// refreshed every Nth poll. Each one becomes a group under
// `locations.<id>` with one read-only state per field.

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::address::{Address, TREE_DELIMITER, entity_id};
use crate::error::CoreError;
use crate::model::{Node, ValueType};
use crate::store::StateStore;

pub const LOCATION_ROOT: &str = "locations";

#[derive(Debug, Clone)]
pub struct LocationSync {
    root: Address,
}

impl Default for LocationSync {
    fn default() -> Self {
        Self {
            root: Address::from_segments([LOCATION_ROOT]),
        }
    }
}

impl LocationSync {
    pub fn root(&self) -> &Address {
        &self.root
    }

    /// Nodes and values for every location in a `GET /sg-1/locations`
    /// response.
    pub fn plan(&self, locations_doc: &Value) -> Vec<(Node, Option<Value>)> {
        let Some(locations) = locations_doc.get("locations").and_then(Value::as_array) else {
            warn!("locations document has no 'locations' array");
            return Vec::new();
        };

        let mut out = Vec::new();
        for location in locations {
            let Some(id) = entity_id(location) else {
                error!("location without id, skipping");
                continue;
            };
            if id.contains(TREE_DELIMITER) {
                error!(id, "location id not addressable, skipping");
                continue;
            }
            let Some(fields) = location.as_object() else {
                continue;
            };

            let base = self.root.child(id.as_str());
            let name = location
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(id.as_str());
            out.push((Node::group(base.clone(), name), None));

            for (field, value) in fields {
                if !addressable(field) {
                    continue;
                }
                let address = base.child(field.as_str());
                match value {
                    Value::Object(children) => {
                        out.push((Node::group(address.clone(), field.as_str()), None));
                        for (child, child_value) in children {
                            if addressable(child) {
                                out.push(field_state(address.child(child.as_str()), child, child_value));
                            }
                        }
                    }
                    _ => out.push(field_state(address, field, value)),
                }
            }
        }
        out
    }

    /// Create missing nodes and write every field as readback. A field
    /// that switched between object and scalar is rebuilt.
    pub async fn apply(&self, locations_doc: &Value, store: &dyn StateStore) -> Result<usize, CoreError> {
        let mut written = 0;
        for (node, value) in self.plan(locations_doc) {
            let address = node.address.clone();
            if let Some(existing) = store.get_node(&address).await {
                if existing.kind != node.kind {
                    debug!(%address, from = %existing.kind, to = %node.kind, "location field changed shape");
                    for child in store.list_addresses_under(&address).await.into_iter().rev() {
                        store.remove_node(&child).await?;
                    }
                    store.remove_node(&address).await?;
                }
            }
            store.ensure_node(node).await?;
            if let Some(value) = value {
                store.set_value(&address, value, true).await?;
                written += 1;
            }
        }
        Ok(written)
    }
}

fn addressable(field: &str) -> bool {
    !field.is_empty() && !field.contains(TREE_DELIMITER)
}

fn field_state(address: Address, field: &str, value: &Value) -> (Node, Option<Value>) {
    let value = match value {
        Value::Array(items) => Value::String(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Value::String(value.to_string()),
        other => other.clone(),
    };
    let value_type = ValueType::of(&value);
    let node = Node::state(address, field, value_type, role_for(field, value_type));
    (node, Some(value))
}

fn role_for(field: &str, value_type: ValueType) -> &'static str {
    match field {
        "authorized_at" => "date",
        "street" | "city" | "address" => "location",
        "latitude" => "value.gps.latitude",
        "longitude" => "value.gps.longitude",
        "sunrise" => "date.sunrise",
        "sunset" => "date.sunset",
        _ => match value_type {
            ValueType::String => "text",
            ValueType::Number => "value",
            _ => "state",
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    fn doc() -> Value {
        json!({
            "locations": [
                {
                    "id": "L1",
                    "name": "Backyard",
                    "authorized_at": "2017-04-12T10:00:00Z",
                    "devices": ["D1", "D2"],
                    "geo_position": { "latitude": 52.1, "longitude": 13.4, "city": "Berlin" },
                    "sunrise": "06:12"
                },
                { "name": "no id" }
            ]
        })
    }

    #[tokio::test]
    async fn mirrors_fields_with_roles() {
        let store = MemoryStore::new();
        let written = LocationSync::default().apply(&doc(), &store).await.unwrap();
        assert_eq!(written, 8);

        let get = |a: &str| a.parse::<Address>().unwrap();
        let group = store.get_node(&get("locations.L1")).await.unwrap();
        assert_eq!(group.name, "Backyard");

        assert_eq!(
            store.get_value(&get("locations.L1.devices")).await,
            Some(json!("D1,D2"))
        );
        let lat = store.get_node(&get("locations.L1.geo_position.latitude")).await.unwrap();
        assert_eq!(lat.role, "value.gps.latitude");
        assert!(!lat.writable);

        let city = store.get_node(&get("locations.L1.geo_position.city")).await.unwrap();
        assert_eq!(city.role, "location");
        assert_eq!(
            store.get_node(&get("locations.L1.authorized_at")).await.unwrap().role,
            "date"
        );
        assert_eq!(
            store.get_node(&get("locations.L1.name")).await.unwrap().role,
            "text"
        );
    }

    #[test]
    fn location_without_id_is_skipped() {
        let plan = LocationSync::default().plan(&doc());
        assert!(plan.iter().all(|(node, _)| node.address.get(1) == Some("L1")));
    }

    #[tokio::test]
    async fn field_switching_to_scalar_is_rebuilt() {
        let store = MemoryStore::new();
        let sync = LocationSync::default();
        sync.apply(&doc(), &store).await.unwrap();

        let flattened = json!({ "locations": [ { "id": "L1", "name": "Backyard", "geo_position": "unknown" } ] });
        sync.apply(&flattened, &store).await.unwrap();

        let get = |a: &str| a.parse::<Address>().unwrap();
        let node = store.get_node(&get("locations.L1.geo_position")).await.unwrap();
        assert_eq!(node.kind, crate::model::NodeKind::State);
        assert_eq!(store.get_value(&get("locations.L1.geo_position")).await, Some(json!("unknown")));
        assert!(store.get_node(&get("locations.L1.geo_position.city")).await.is_none());
    }

    #[test]
    fn tolerates_missing_array() {
        assert!(LocationSync::default().plan(&json!({})).is_empty());
    }
}
