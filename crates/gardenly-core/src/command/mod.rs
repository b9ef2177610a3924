// ── Outbound command reconstruction ──
//
// Turns a local trigger write into the HTTP call the cloud expects. The
// trigger and its parameters are related only by address: everything
// under `<parent>.parameters` (simple commands) or `<parent>.properties`
// (smart commands) is gathered into the payload. The builder reads the
// store and never modifies it.

pub mod dispatch;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};

use gardenly_api::{DEVICES_PATH, HttpMethod};

use crate::address::{Address, DecodedAddress, PathCodec};
use crate::error::CoreError;
use crate::model::Node;
use crate::store::StateStore;
use crate::sync::{DATAPOINT_ROOT, PARAMETERS, PROPERTIES};

pub use dispatch::{CommandDispatcher, DispatchOutcome};

const LOCATION_QUERY: &str = "locationId";

// ── OutboundRequest ──────────────────────────────────────────────────

/// A fully resolved cloud write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    /// Raw path segments below the base URL.
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub payload: Value,
}

impl OutboundRequest {
    /// Path and query relative to the base URL, unescaped.
    pub fn uri(&self) -> String {
        let mut uri = String::new();
        for segment in &self.segments {
            uri.push('/');
            uri.push_str(segment);
        }
        for (i, (k, v)) in self.query.iter().enumerate() {
            uri.push(if i == 0 { '?' } else { '&' });
            uri.push_str(k);
            uri.push('=');
            uri.push_str(v);
        }
        uri
    }
}

impl fmt::Display for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri())
    }
}

// ── CommandBuilder ───────────────────────────────────────────────────

/// Where a trigger sits: its decoded address and the group holding it.
struct TriggerContext {
    decoded: DecodedAddress,
    parent: Address,
}

#[derive(Clone)]
pub struct CommandBuilder {
    store: Arc<dyn StateStore>,
    codec: PathCodec,
    root: Address,
}

impl CommandBuilder {
    pub fn new(store: Arc<dyn StateStore>, codec: PathCodec) -> Self {
        Self {
            store,
            codec,
            root: Address::from_segments([DATAPOINT_ROOT]),
        }
    }

    /// POST `{name, parameters}` to the device resource.
    pub async fn build_simple_command(&self, trigger: &Address) -> Result<OutboundRequest, CoreError> {
        let ctx = self.context(trigger)?;
        let node = self.node(trigger).await?;
        let parameters = self.gather(trigger, &ctx.parent.child(PARAMETERS)).await?;

        let mut segments = device_segments(&ctx.decoded.device_id);
        segments.extend(between(&ctx.decoded, 1));

        Ok(OutboundRequest {
            method: HttpMethod::Post,
            segments,
            query: location_query(&ctx.decoded),
            payload: json!({ "name": node.name, "parameters": parameters }),
        })
    }

    /// PUT `{properties: {name, value: {...}}}` to the property resource.
    pub async fn build_smart_command(&self, trigger: &Address) -> Result<OutboundRequest, CoreError> {
        let ctx = self.context(trigger)?;
        let node = self.node(trigger).await?;
        let fields = self.gather(trigger, &ctx.parent.child(PROPERTIES)).await?;

        Ok(property_request(
            &ctx.decoded,
            2,
            &node.name,
            Value::Object(fields),
        ))
    }

    /// PUT a single smart scalar value to its property resource.
    pub async fn build_property_write(&self, address: &Address, value: Value) -> Result<OutboundRequest, CoreError> {
        let ctx = self.context(address)?;
        let node = self.node(address).await?;
        let Some(property) = node.smart_property.as_deref() else {
            return Err(CoreError::Internal(format!(
                "'{address}' is not a writable smart property"
            )));
        };
        Ok(property_request(&ctx.decoded, 1, property, value))
    }

    fn context(&self, address: &Address) -> Result<TriggerContext, CoreError> {
        let missing = || CoreError::MissingDeviceContext {
            address: address.to_string(),
        };
        let relative = address.strip_prefix(&self.root).ok_or_else(missing)?;
        let decoded = self.codec.decode(&relative).map_err(|_| missing())?;
        if decoded.property_path.is_empty() {
            return Err(missing());
        }
        let parent = address.parent().ok_or_else(missing)?;
        Ok(TriggerContext { decoded, parent })
    }

    async fn node(&self, address: &Address) -> Result<Node, CoreError> {
        self.store
            .get_node(address)
            .await
            .ok_or_else(|| CoreError::NodeNotFound {
                address: address.to_string(),
            })
    }

    /// Values of every state under `group`, nested by relative path.
    async fn gather(&self, trigger: &Address, group: &Address) -> Result<Map<String, Value>, CoreError> {
        let mut out = Map::new();
        let mut missing = Vec::new();

        for address in self.store.list_addresses_under(group).await {
            let Some(node) = self.store.get_node(&address).await else {
                continue;
            };
            if !node.holds_value() {
                continue;
            }
            let Some(relative) = address.strip_prefix(group) else {
                continue;
            };
            match self.store.get_value(&address).await {
                Some(value) => insert_nested(&mut out, relative.segments(), value),
                None => missing.push(relative.to_string()),
            }
        }

        if missing.is_empty() {
            Ok(out)
        } else {
            Err(CoreError::UnresolvedParameters {
                address: trigger.to_string(),
                missing,
            })
        }
    }
}

fn device_segments(device_id: &str) -> Vec<String> {
    DEVICES_PATH
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .chain(std::iter::once(device_id.to_owned()))
        .collect()
}

/// Property segments between the device and the last `skip_tail`.
fn between(decoded: &DecodedAddress, skip_tail: usize) -> Vec<String> {
    let path = &decoded.property_path;
    path[..path.len().saturating_sub(skip_tail)].to_vec()
}

fn location_query(decoded: &DecodedAddress) -> Vec<(String, String)> {
    vec![(LOCATION_QUERY.to_owned(), decoded.location_id.clone())]
}

fn property_request(decoded: &DecodedAddress, skip_tail: usize, name: &str, value: Value) -> OutboundRequest {
    let mut segments = device_segments(&decoded.device_id);
    segments.extend(between(decoded, skip_tail));
    segments.push(PROPERTIES.to_owned());
    segments.push(name.to_owned());

    OutboundRequest {
        method: HttpMethod::Put,
        segments,
        query: location_query(decoded),
        payload: json!({ "properties": { "name": name, "value": value } }),
    }
}

fn insert_nested(map: &mut Map<String, Value>, path: &[String], value: Value) {
    match path {
        [] => {}
        [leaf] => {
            map.insert(leaf.clone(), value);
        }
        [head, rest @ ..] => {
            let child = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(inner) = child {
                insert_nested(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::ValueType;
    use crate::store::MemoryStore;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    async fn store_with(nodes: Vec<(Node, Option<Value>)>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (node, value) in nodes {
            let address = node.address.clone();
            store.ensure_node(node).await.unwrap();
            if let Some(value) = value {
                store.set_value(&address, value, true).await.unwrap();
            }
        }
        store
    }

    fn param(a: &str, value_type: ValueType) -> Node {
        let address = addr(a);
        let name = address.last().unwrap().to_owned();
        Node::state(address, name, value_type, "value").writable(true)
    }

    #[tokio::test]
    async fn simple_command_reconstruction() {
        let store = store_with(vec![
            (Node::trigger(addr("datapoints.L1.D1.mow.trigger"), "mow"), None),
            (Node::group(addr("datapoints.L1.D1.mow.parameters"), "parameters"), None),
            (param("datapoints.L1.D1.mow.parameters.duration", ValueType::Number), Some(json!(60))),
        ])
        .await;
        let builder = CommandBuilder::new(store, PathCodec::default());

        let request = builder
            .build_simple_command(&addr("datapoints.L1.D1.mow.trigger"))
            .await
            .unwrap();

        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.payload, json!({ "name": "mow", "parameters": { "duration": 60 } }));
        assert_eq!(request.uri(), "/sg-1/devices/D1/mow?locationId=L1");
    }

    #[tokio::test]
    async fn nested_parameters_become_nested_objects() {
        let store = store_with(vec![
            (Node::trigger(addr("datapoints.L1.D1.abilities.watering.trigger"), "manual_override"), None),
            (Node::group(addr("datapoints.L1.D1.abilities.watering.parameters.schedule"), "schedule"), None),
            (
                param("datapoints.L1.D1.abilities.watering.parameters.schedule.start", ValueType::String),
                Some(json!("06:00")),
            ),
            (
                param("datapoints.L1.D1.abilities.watering.parameters.duration", ValueType::Number),
                Some(json!(15)),
            ),
        ])
        .await;
        let builder = CommandBuilder::new(store, PathCodec::default());

        let request = builder
            .build_simple_command(&addr("datapoints.L1.D1.abilities.watering.trigger"))
            .await
            .unwrap();
        assert_eq!(
            request.payload,
            json!({
                "name": "manual_override",
                "parameters": { "duration": 15, "schedule": { "start": "06:00" } }
            })
        );
        assert_eq!(request.segments, vec!["sg-1", "devices", "D1", "abilities", "watering"]);
    }

    #[tokio::test]
    async fn smart_command_targets_property_resource() {
        let store = store_with(vec![
            (Node::trigger(addr("datapoints.L1.D1.outlet.timer.smart_trigger"), "watering_timer_1"), None),
            (param("datapoints.L1.D1.outlet.timer.properties.duration", ValueType::Number), Some(json!(30))),
            (param("datapoints.L1.D1.outlet.timer.properties.name", ValueType::String), Some(json!("x"))),
        ])
        .await;
        let builder = CommandBuilder::new(store, PathCodec::default());

        let request = builder
            .build_smart_command(&addr("datapoints.L1.D1.outlet.timer.smart_trigger"))
            .await
            .unwrap();
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(
            request.payload,
            json!({ "properties": { "name": "watering_timer_1", "value": { "duration": 30, "name": "x" } } })
        );
        assert_eq!(
            request.uri(),
            "/sg-1/devices/D1/outlet/properties/watering_timer_1?locationId=L1"
        );
    }

    #[tokio::test]
    async fn property_write_for_smart_scalar() {
        let store = store_with(vec![(
            Node::state(addr("datapoints.L1.D1.outlet.mode"), "mode", ValueType::String, "text")
                .writable(true)
                .with_smart_property("mode"),
            Some(json!("auto")),
        )])
        .await;
        let builder = CommandBuilder::new(store, PathCodec::default());

        let request = builder
            .build_property_write(&addr("datapoints.L1.D1.outlet.mode"), json!("manual"))
            .await
            .unwrap();
        assert_eq!(request.to_string(), "PUT /sg-1/devices/D1/outlet/properties/mode?locationId=L1");
        assert_eq!(
            request.payload,
            json!({ "properties": { "name": "mode", "value": "manual" } })
        );
    }

    #[tokio::test]
    async fn unresolved_parameters_are_reported() {
        let store = store_with(vec![
            (Node::trigger(addr("datapoints.L1.D1.mow.trigger"), "mow"), None),
            (param("datapoints.L1.D1.mow.parameters.duration", ValueType::Number), None),
        ])
        .await;
        let builder = CommandBuilder::new(store, PathCodec::default());

        let err = builder
            .build_simple_command(&addr("datapoints.L1.D1.mow.trigger"))
            .await
            .unwrap_err();
        match err {
            CoreError::UnresolvedParameters { missing, .. } => assert_eq!(missing, vec!["duration"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_device_context() {
        let builder = CommandBuilder::new(Arc::new(MemoryStore::new()), PathCodec::default());
        for a in ["datapoints.L1.trigger", "locations.L1.D1.trigger", "datapoints.L1.D1"] {
            let err = builder.build_simple_command(&addr(a)).await.unwrap_err();
            assert!(matches!(err, CoreError::MissingDeviceContext { .. }), "{a}: {err}");
        }
    }

    #[test]
    fn insert_nested_overwrites_scalars_on_conflict() {
        let mut map = Map::new();
        insert_nested(&mut map, &["a".to_owned()], json!(1));
        insert_nested(&mut map, &["a".to_owned(), "b".to_owned()], json!(2));
        assert_eq!(Value::Object(map), json!({ "a": { "b": 2 } }));
    }
}
