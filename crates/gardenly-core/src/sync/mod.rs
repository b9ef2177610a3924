// ── Tree synchronization ──
//
// Reconciles the `datapoints.*` subtree with the descriptor and the
// latest cloud documents. `sync` only plans; `apply` and `apply_values`
// touch the store.

pub mod locations;
mod shape;

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::address::{Address, PathCodec, find_entity};
use crate::error::CoreError;
use crate::model::{ConfigDescriptor, Datapoint, Node, NodeKind, ValueType};
use crate::store::StateStore;

pub use locations::LocationSync;
pub use shape::{DatapointShape, classify};

/// Root of the datapoint subtree.
pub const DATAPOINT_ROOT: &str = "datapoints";

pub const TRIGGER: &str = "trigger";
pub const SMART_TRIGGER: &str = "smart_trigger";
pub const PARAMETERS: &str = "parameters";
pub const PROPERTIES: &str = "properties";

// ── CloudSnapshot ────────────────────────────────────────────────────

/// The cloud documents one poll works from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloudSnapshot {
    /// `GET /sg-1/locations` response.
    pub locations: Value,
    /// `GET /sg-1/devices` response per location id.
    pub devices: BTreeMap<String, Value>,
}

impl CloudSnapshot {
    pub fn devices_for(&self, location_id: &str) -> Option<&Value> {
        self.devices.get(location_id)
    }

    /// Name of the first entity with `id` across all documents, or the
    /// id itself.
    pub fn resolve_name(&self, id: &str) -> String {
        std::iter::once(&self.locations)
            .chain(self.devices.values())
            .find_map(|doc| {
                find_entity(doc, id)
                    .and_then(|entity| entity.get("name"))
                    .and_then(Value::as_str)
                    .filter(|name| !name.is_empty())
            })
            .map_or_else(|| id.to_owned(), str::to_owned)
    }

    /// Live entity for a datapoint, if its location was fetched and the
    /// id chain is present.
    pub fn position(&self, datapoint: &Datapoint) -> Option<&Value> {
        let doc = self.devices_for(datapoint.location_id())?;
        locate_datapoint(doc, datapoint)
    }
}

fn locate_datapoint<'a>(devices_doc: &'a Value, datapoint: &Datapoint) -> Option<&'a Value> {
    PathCodec::locate(devices_doc, &datapoint.address.segments()[1..])
}

// ── SyncPlan ─────────────────────────────────────────────────────────

/// Structural diff produced by [`TreeSync::sync`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Nodes missing from the previous tree, parents before children.
    pub to_create: Vec<Node>,
    /// Uncovered addresses, deepest first.
    pub to_remove: Vec<Address>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_remove.is_empty()
    }
}

/// Counts reported by [`TreeSync::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub created: usize,
    pub removed: usize,
}

// ── TreeSync ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TreeSync {
    root: Address,
    smart_mode: bool,
}

impl TreeSync {
    pub fn new(smart_mode: bool) -> Self {
        Self {
            root: Address::from_segments([DATAPOINT_ROOT]),
            smart_mode,
        }
    }

    pub fn root(&self) -> &Address {
        &self.root
    }

    pub fn smart_mode(&self) -> bool {
        self.smart_mode
    }

    /// Absolute tree address of a datapoint.
    pub fn address_of(&self, datapoint: &Datapoint) -> Address {
        self.root.join(&datapoint.address)
    }

    /// Addresses and kinds currently under the datapoint root, the
    /// `previous` input of [`sync`](Self::sync).
    pub async fn current_tree(&self, store: &dyn StateStore) -> BTreeMap<Address, NodeKind> {
        let mut tree = BTreeMap::new();
        for address in store.list_addresses_under(&self.root).await {
            if let Some(node) = store.get_node(&address).await {
                tree.insert(address, node.kind);
            }
        }
        tree
    }

    /// Plan the nodes to create and remove so the tree matches
    /// `descriptor`. `previous` maps the addresses currently under the
    /// datapoint root to their node kinds.
    ///
    /// A leaf whose shape is known from this snapshot is rebuilt when it
    /// changed: nodes whose kind differs are removed with their subtree
    /// and created again, nodes below the leaf that the new shape no
    /// longer has are removed.
    pub fn sync(
        &self,
        snapshot: &CloudSnapshot,
        previous: &BTreeMap<Address, NodeKind>,
        descriptor: &ConfigDescriptor,
    ) -> SyncPlan {
        let mut desired: IndexMap<Address, Node> = IndexMap::new();
        let mut covered: Vec<Address> = Vec::with_capacity(descriptor.len());
        // Leaves whose layout does not depend on a missing live value.
        let mut settled: Vec<Address> = Vec::with_capacity(descriptor.len());

        for datapoint in descriptor.iter() {
            let (location_id, device_id) = (datapoint.location_id(), datapoint.device_id());
            if location_id.is_empty() || device_id.is_empty() {
                error!(key = %datapoint.key, "datapoint without location or device id, skipping");
                continue;
            }

            let location = self.root.child(location_id);
            desired
                .entry(location.clone())
                .or_insert_with(|| Node::group(location.clone(), snapshot.resolve_name(location_id)));

            let device = location.child(device_id);
            desired
                .entry(device.clone())
                .or_insert_with(|| Node::device(device.clone(), snapshot.resolve_name(device_id)));

            let leaf = self.address_of(datapoint);
            // Intermediate groups between device and leaf.
            for depth in device.len() + 1..leaf.len() {
                let group = leaf.slice(0..depth);
                let id = group.last().unwrap_or_default().to_owned();
                desired
                    .entry(group.clone())
                    .or_insert_with(|| Node::group(group, snapshot.resolve_name(&id)));
            }

            let position = snapshot.position(datapoint);
            let shape = classify(datapoint, position, self.smart_mode);
            for node in Self::leaf_nodes(snapshot, datapoint, &leaf, &shape) {
                desired.entry(node.address.clone()).or_insert(node);
            }
            if !shape.is_smart() || position.is_some() {
                settled.push(leaf.clone());
            }
            covered.push(leaf);
        }

        let under_settled = |addr: &Address| settled.iter().any(|leaf| addr.starts_with(leaf));

        // Nodes whose kind changed, e.g. a smart leaf that went from an
        // object to a scalar.
        let replaced: Vec<Address> = desired
            .values()
            .filter(|node| under_settled(&node.address))
            .filter(|node| previous.get(&node.address).is_some_and(|kind| *kind != node.kind))
            .map(|node| node.address.clone())
            .collect();
        let is_replaced = |addr: &Address| replaced.iter().any(|r| addr.starts_with(r));

        let to_create: Vec<Node> = desired
            .values()
            .filter(|node| !previous.contains_key(&node.address) || is_replaced(&node.address))
            .cloned()
            .collect();

        let mut to_remove: Vec<Address> = previous
            .keys()
            .filter(|addr| addr.starts_with(&self.root) && **addr != self.root)
            .filter(|addr| {
                let uncovered = !covered
                    .iter()
                    .any(|entry| addr.starts_with(entry) || entry.starts_with(addr));
                let dropped = !desired.contains_key(*addr) && under_settled(*addr);
                uncovered || dropped || is_replaced(*addr)
            })
            .cloned()
            .collect();
        to_remove.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        if !replaced.is_empty() {
            debug!(replaced = replaced.len(), "datapoint shape changed, rebuilding");
        }

        debug!(
            create = to_create.len(),
            remove = to_remove.len(),
            "planned datapoint tree sync"
        );
        SyncPlan { to_create, to_remove }
    }

    /// Nodes for one datapoint's leaf, per its shape.
    #[allow(clippy::too_many_lines)]
    fn leaf_nodes(
        snapshot: &CloudSnapshot,
        datapoint: &Datapoint,
        leaf: &Address,
        shape: &DatapointShape,
    ) -> Vec<Node> {
        let entry = &datapoint.entry;
        let name = entry
            .name
            .clone()
            .unwrap_or_else(|| snapshot.resolve_name(datapoint.leaf_id()));

        match shape {
            DatapointShape::Simple => {
                let value_type = entry.value_type.unwrap_or_default();
                vec![
                    Node::state(leaf.clone(), name, value_type, role_for(entry.role.as_deref(), value_type))
                        .writable(entry.writeable)
                        .with_unit(entry.unit.clone()),
                ]
            }
            DatapointShape::SmartScalar {
                property,
                live,
                supported_values,
            } => {
                let value_type = entry
                    .value_type
                    .or_else(|| live.as_ref().map(ValueType::of))
                    .unwrap_or_default();
                let mut node = Node::state(leaf.clone(), name, value_type, role_for(entry.role.as_deref(), value_type))
                    .writable(entry.writeable)
                    .with_unit(entry.unit.clone())
                    .with_states(supported_values.clone());
                if entry.writeable {
                    node = node.with_smart_property(property.clone());
                }
                vec![node]
            }
            DatapointShape::SmartComposite { property, fields } => {
                let properties = leaf.child(PROPERTIES);
                let mut nodes = vec![
                    Node::group(leaf.clone(), name),
                    Node::group(properties.clone(), PROPERTIES),
                ];
                for (field, value) in fields {
                    if field.is_empty() || field.contains(crate::address::TREE_DELIMITER) {
                        warn!(key = %datapoint.key, field, "unaddressable composite field, skipping");
                        continue;
                    }
                    let value_type = ValueType::of(value);
                    nodes.push(
                        Node::state(properties.child(field), field.as_str(), value_type, value_type.default_role())
                            .writable(true),
                    );
                }
                nodes.push(Node::trigger(leaf.child(SMART_TRIGGER), property.as_str()));
                nodes
            }
            DatapointShape::Command => {
                let Some(command) = &entry.command else {
                    return Vec::new();
                };
                let command_name = datapoint.command_name().unwrap_or_else(|| name.clone());
                let parameters = leaf.child(PARAMETERS);
                let mut nodes = vec![
                    Node::group(leaf.clone(), name),
                    Node::trigger(leaf.child(TRIGGER), command_name),
                    Node::group(parameters.clone(), PARAMETERS),
                ];
                for (param, spec) in &command.parameters {
                    let Ok(relative) = param.parse::<Address>() else {
                        warn!(key = %datapoint.key, param, "malformed parameter name, skipping");
                        continue;
                    };
                    if relative.is_empty() {
                        continue;
                    }
                    // Nested parameter names get a group per level.
                    for depth in 1..relative.len() {
                        let group = parameters.join(&relative.slice(0..depth));
                        let label = group.last().unwrap_or_default().to_owned();
                        nodes.push(Node::group(group, label));
                    }
                    let value_type = spec
                        .value_type
                        .or_else(|| spec.default.as_ref().map(ValueType::of))
                        .unwrap_or_default();
                    let label = relative.last().unwrap_or_default().to_owned();
                    nodes.push(
                        Node::state(parameters.join(&relative), label, value_type, value_type.default_role())
                            .writable(true)
                            .with_unit(spec.unit.clone())
                            .with_initial(spec.default.clone()),
                    );
                }
                nodes
            }
        }
    }

    /// Remove, then create. Existing nodes are left alone.
    pub async fn apply(&self, plan: &SyncPlan, store: &dyn StateStore) -> Result<ApplyStats, CoreError> {
        let mut stats = ApplyStats::default();
        for address in &plan.to_remove {
            store.remove_node(address).await?;
            stats.removed += 1;
        }
        for node in &plan.to_create {
            if store.ensure_node(node.clone()).await? {
                stats.created += 1;
            }
        }
        Ok(stats)
    }

    /// Push live values for every datapoint of `location_id` into the
    /// store as readback. Missing ids are logged and skipped. Returns the
    /// number of values written.
    pub async fn apply_values(
        &self,
        location_id: &str,
        devices_doc: &Value,
        descriptor: &ConfigDescriptor,
        store: &dyn StateStore,
    ) -> usize {
        let mut written = 0;

        for datapoint in descriptor.for_location(location_id) {
            if datapoint.entry.command.is_some() {
                continue;
            }
            let Some(position) = locate_datapoint(devices_doc, datapoint) else {
                let err = CoreError::schema(format!("'{}' not present in device document", datapoint.key));
                warn!(location = location_id, error = %err, "skipping datapoint");
                continue;
            };

            let leaf = self.address_of(datapoint);
            let writes: Vec<(Address, Value)> = match classify(datapoint, Some(position), self.smart_mode) {
                DatapointShape::SmartComposite { fields, .. } => {
                    let properties = leaf.child(PROPERTIES);
                    fields
                        .into_iter()
                        .map(|(field, value)| (properties.child(field), value))
                        .collect()
                }
                _ => vec![(leaf, PathCodec::leaf_value(position).clone())],
            };

            for (address, value) in writes {
                match store.set_value(&address, value, true).await {
                    Ok(()) => written += 1,
                    Err(e) => warn!(%address, error = %e, "could not store datapoint value"),
                }
            }
        }

        written
    }
}

fn role_for(explicit: Option<&str>, value_type: ValueType) -> String {
    explicit
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| value_type.default_role())
        .to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::{DescriptorEntry, NodeKind};
    use crate::store::MemoryStore;

    fn descriptor(value: Value) -> ConfigDescriptor {
        let entries: IndexMap<String, DescriptorEntry> = serde_json::from_value(value).unwrap();
        ConfigDescriptor::new(&PathCodec::default(), entries).unwrap()
    }

    fn snapshot() -> CloudSnapshot {
        let mut devices = BTreeMap::new();
        devices.insert(
            "L1".to_owned(),
            json!({
                "devices": [
                    {
                        "id": "D1",
                        "name": "Water Control",
                        "abilities": [
                            {
                                "id": "outlet",
                                "name": "outlet",
                                "properties": [
                                    { "id": "valve_open", "name": "valve_open", "value": true },
                                    { "id": "timer", "name": "watering_timer_1", "value": { "duration": 30, "name": "x" } },
                                    { "id": "mode", "name": "mode", "value": "auto", "supported_values": ["auto", "manual"] }
                                ]
                            }
                        ]
                    }
                ]
            }),
        );
        CloudSnapshot {
            locations: json!({ "locations": [ { "id": "L1", "name": "Backyard" } ] }),
            devices,
        }
    }

    fn full_descriptor() -> ConfigDescriptor {
        descriptor(json!({
            "L1___D1___outlet___valve_open": { "location": "L1", "device": "D1", "type": "boolean", "role": "switch" },
            "L1___D1___outlet___timer": { "location": "L1", "device": "D1", "smart": true, "writeable": true },
            "L1___D1___outlet___mode": { "location": "L1", "device": "D1", "smart": true, "writeable": true },
            "L1___D1___mow": {
                "location": "L1", "device": "D1",
                "command": { "parameters": { "duration": { "type": "number", "default": 60 } } }
            }
        }))
    }

    async fn addresses(store: &MemoryStore) -> BTreeMap<Address, NodeKind> {
        TreeSync::new(true).current_tree(store).await
    }

    fn with_timer(value: Value) -> CloudSnapshot {
        let mut snap = snapshot();
        snap.devices.get_mut("L1").unwrap()["devices"][0]["abilities"][0]["properties"][1]["value"] = value;
        snap
    }

    /// Sync and apply one poll, including values.
    async fn poll(
        tree: &TreeSync,
        snap: &CloudSnapshot,
        descriptor: &ConfigDescriptor,
        store: &MemoryStore,
    ) -> SyncPlan {
        let plan = tree.sync(snap, &tree.current_tree(store).await, descriptor);
        tree.apply(&plan, store).await.unwrap();
        tree.apply_values("L1", snap.devices_for("L1").unwrap(), descriptor, store)
            .await;
        plan
    }

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn every_entry_exists_after_sync() {
        let store = MemoryStore::new();
        let tree = TreeSync::new(true);
        let descriptor = full_descriptor();

        let plan = tree.sync(&snapshot(), &BTreeMap::new(), &descriptor);
        tree.apply(&plan, &store).await.unwrap();

        let present = addresses(&store).await;
        for dp in descriptor.iter() {
            let leaf = tree.address_of(dp);
            assert!(present.keys().any(|a| a.starts_with(&leaf)), "missing {leaf}");
        }

        let location = store.get_node(&addr("datapoints.L1")).await.unwrap();
        assert_eq!(location.name, "Backyard");
        let device = store.get_node(&addr("datapoints.L1.D1")).await.unwrap();
        assert_eq!(device.kind, NodeKind::Device);
        assert_eq!(device.name, "Water Control");
    }

    #[tokio::test]
    async fn second_sync_is_a_no_op() {
        let store = MemoryStore::new();
        let tree = TreeSync::new(true);
        let descriptor = full_descriptor();

        let first = tree.sync(&snapshot(), &addresses(&store).await, &descriptor);
        assert!(!first.is_empty());
        tree.apply(&first, &store).await.unwrap();

        let second = tree.sync(&snapshot(), &addresses(&store).await, &descriptor);
        assert!(second.is_empty(), "{second:?}");
        assert_eq!(tree.apply(&second, &store).await.unwrap(), ApplyStats::default());
    }

    #[tokio::test]
    async fn dropped_entry_removes_only_its_subtree() {
        let store = MemoryStore::new();
        let tree = TreeSync::new(true);
        let plan = tree.sync(&snapshot(), &BTreeMap::new(), &full_descriptor());
        tree.apply(&plan, &store).await.unwrap();

        let smaller = descriptor(json!({
            "L1___D1___outlet___valve_open": { "location": "L1", "device": "D1", "type": "boolean" },
            "L1___D1___outlet___timer": { "location": "L1", "device": "D1", "smart": true, "writeable": true },
            "L1___D1___outlet___mode": { "location": "L1", "device": "D1", "smart": true, "writeable": true }
        }));
        let plan = tree.sync(&snapshot(), &addresses(&store).await, &smaller);

        assert!(plan.to_create.is_empty());
        assert_eq!(
            plan.to_remove,
            vec![
                addr("datapoints.L1.D1.mow.parameters.duration"),
                addr("datapoints.L1.D1.mow.parameters"),
                addr("datapoints.L1.D1.mow.trigger"),
                addr("datapoints.L1.D1.mow"),
            ]
        );
    }

    #[tokio::test]
    async fn smart_composite_builds_properties_group() {
        let tree = TreeSync::new(true);
        let plan = tree.sync(&snapshot(), &BTreeMap::new(), &full_descriptor());

        let under_timer: Vec<&Node> = plan
            .to_create
            .iter()
            .filter(|n| n.address.starts_with(&addr("datapoints.L1.D1.outlet.timer")))
            .collect();
        let kinds: Vec<(String, NodeKind)> = under_timer
            .iter()
            .map(|n| (n.address.to_string(), n.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("datapoints.L1.D1.outlet.timer".to_owned(), NodeKind::Group),
                ("datapoints.L1.D1.outlet.timer.properties".to_owned(), NodeKind::Group),
                ("datapoints.L1.D1.outlet.timer.properties.duration".to_owned(), NodeKind::State),
                ("datapoints.L1.D1.outlet.timer.properties.name".to_owned(), NodeKind::State),
                ("datapoints.L1.D1.outlet.timer.smart_trigger".to_owned(), NodeKind::Trigger),
            ]
        );
        let trigger = under_timer.last().unwrap();
        assert_eq!(trigger.name, "watering_timer_1");
        assert_eq!(trigger.value_type, ValueType::Boolean);
    }

    #[tokio::test]
    async fn smart_scalar_and_plain_states() {
        let tree = TreeSync::new(true);
        let plan = tree.sync(&snapshot(), &BTreeMap::new(), &full_descriptor());
        let find = |a: &str| plan.to_create.iter().find(|n| n.address == addr(a)).unwrap();

        let mode = find("datapoints.L1.D1.outlet.mode");
        assert_eq!(mode.value_type, ValueType::String);
        assert_eq!(mode.states, Some(vec![json!("auto"), json!("manual")]));
        assert_eq!(mode.smart_property.as_deref(), Some("mode"));

        let valve = find("datapoints.L1.D1.outlet.valve_open");
        assert_eq!(valve.kind, NodeKind::State);
        assert_eq!(valve.role, "switch");
        assert!(valve.smart_property.is_none());

        let param = find("datapoints.L1.D1.mow.parameters.duration");
        assert_eq!(param.initial, Some(json!(60)));
        assert_eq!(find("datapoints.L1.D1.mow.trigger").name, "mow");
    }

    #[tokio::test]
    async fn apply_values_pushes_readback_and_skips_missing() {
        let store = MemoryStore::new();
        let tree = TreeSync::new(true);
        let mut descriptor_json = json!({
            "L1___D1___outlet___valve_open": { "location": "L1", "device": "D1", "type": "boolean" },
            "L1___D1___outlet___timer": { "location": "L1", "device": "D1", "smart": true },
            "L1___D1___outlet___gone": { "location": "L1", "device": "D1" }
        });
        descriptor_json["L1___D9___x___y"] = json!({ "location": "L1", "device": "D9" });
        let descriptor = descriptor(descriptor_json);

        let snap = snapshot();
        let plan = tree.sync(&snap, &BTreeMap::new(), &descriptor);
        tree.apply(&plan, &store).await.unwrap();

        let written = tree
            .apply_values("L1", snap.devices_for("L1").unwrap(), &descriptor, &store)
            .await;
        assert_eq!(written, 3);
        assert_eq!(
            store.get_value(&addr("datapoints.L1.D1.outlet.valve_open")).await,
            Some(json!(true))
        );
        assert_eq!(
            store.get_value(&addr("datapoints.L1.D1.outlet.timer.properties.duration")).await,
            Some(json!(30))
        );
        assert_eq!(store.get_value(&addr("datapoints.L1.D1.outlet.gone")).await, None);
    }

    #[tokio::test]
    async fn composite_turning_scalar_is_rebuilt_as_state() {
        let store = MemoryStore::new();
        let tree = TreeSync::new(true);
        let descriptor = full_descriptor();
        poll(&tree, &snapshot(), &descriptor, &store).await;

        let plan = poll(&tree, &with_timer(json!(42)), &descriptor, &store).await;
        assert_eq!(
            plan.to_remove,
            vec![
                addr("datapoints.L1.D1.outlet.timer.properties.duration"),
                addr("datapoints.L1.D1.outlet.timer.properties.name"),
                addr("datapoints.L1.D1.outlet.timer.smart_trigger"),
                addr("datapoints.L1.D1.outlet.timer.properties"),
                addr("datapoints.L1.D1.outlet.timer"),
            ]
        );

        let timer = addr("datapoints.L1.D1.outlet.timer");
        let node = store.get_node(&timer).await.unwrap();
        assert_eq!(node.kind, NodeKind::State);
        assert_eq!(node.value_type, ValueType::Number);
        assert_eq!(store.get_value(&timer).await, Some(json!(42)));
        assert!(store.list_addresses_under(&timer).await.is_empty());

        // Settled after the rebuild.
        let again = tree.sync(&with_timer(json!(42)), &addresses(&store).await, &descriptor);
        assert!(again.is_empty(), "{again:?}");
    }

    #[tokio::test]
    async fn scalar_turning_composite_is_rebuilt_as_group() {
        let store = MemoryStore::new();
        let tree = TreeSync::new(true);
        let descriptor = full_descriptor();
        poll(&tree, &with_timer(json!(42)), &descriptor, &store).await;
        let timer = addr("datapoints.L1.D1.outlet.timer");
        assert_eq!(store.get_node(&timer).await.unwrap().kind, NodeKind::State);

        let plan = poll(&tree, &with_timer(json!({ "duration": 90 })), &descriptor, &store).await;
        assert_eq!(plan.to_remove, vec![timer.clone()]);

        assert_eq!(store.get_node(&timer).await.unwrap().kind, NodeKind::Group);
        assert_eq!(store.get_value(&timer).await, None);
        assert_eq!(
            store.list_addresses_under(&timer).await,
            vec![
                addr("datapoints.L1.D1.outlet.timer.properties"),
                addr("datapoints.L1.D1.outlet.timer.properties.duration"),
                addr("datapoints.L1.D1.outlet.timer.smart_trigger"),
            ]
        );
        assert_eq!(
            store.get_value(&addr("datapoints.L1.D1.outlet.timer.properties.duration")).await,
            Some(json!(90))
        );
    }

    #[tokio::test]
    async fn composite_field_set_follows_the_live_object() {
        let store = MemoryStore::new();
        let tree = TreeSync::new(true);
        let descriptor = full_descriptor();
        poll(&tree, &snapshot(), &descriptor, &store).await;

        let plan = poll(&tree, &with_timer(json!({ "duration": 30, "start": "06:00" })), &descriptor, &store).await;
        assert_eq!(plan.to_remove, vec![addr("datapoints.L1.D1.outlet.timer.properties.name")]);
        let created: Vec<String> = plan.to_create.iter().map(|n| n.address.to_string()).collect();
        assert_eq!(created, vec!["datapoints.L1.D1.outlet.timer.properties.start".to_owned()]);
    }

    #[tokio::test]
    async fn unfetched_location_keeps_its_smart_leaves() {
        let store = MemoryStore::new();
        let tree = TreeSync::new(true);
        let descriptor = full_descriptor();
        poll(&tree, &snapshot(), &descriptor, &store).await;

        // No device document for L1 this round.
        let failed = CloudSnapshot {
            locations: snapshot().locations,
            devices: BTreeMap::new(),
        };
        let plan = tree.sync(&failed, &addresses(&store).await, &descriptor);
        assert!(plan.to_remove.is_empty(), "{:?}", plan.to_remove);
        assert!(
            store
                .get_node(&addr("datapoints.L1.D1.outlet.timer.smart_trigger"))
                .await
                .is_some()
        );
    }

    #[test]
    fn device_missing_from_document_is_named_by_id() {
        let tree = TreeSync::new(true);
        let descriptor = descriptor(json!({
            "L1___D9___outlet___level": { "location": "L1", "device": "D9", "type": "number" },
            "L1___D9___outlet___mode": { "location": "L1", "device": "D9", "smart": true, "writeable": true }
        }));
        let plan = tree.sync(&snapshot(), &BTreeMap::new(), &descriptor);
        let find = |a: &str| plan.to_create.iter().find(|n| n.address == addr(a)).unwrap();

        let device = find("datapoints.L1.D9");
        assert_eq!(device.kind, NodeKind::Device);
        assert_eq!(device.name, "D9");
        assert_eq!(find("datapoints.L1.D9.outlet").name, "outlet");

        let level = find("datapoints.L1.D9.outlet.level");
        assert_eq!((level.kind, level.value_type), (NodeKind::State, ValueType::Number));

        // No live value, so a smart entry stays a scalar state.
        let mode = find("datapoints.L1.D9.outlet.mode");
        assert_eq!(mode.kind, NodeKind::State);
        assert_eq!(mode.smart_property.as_deref(), Some("mode"));
        assert!(
            !plan
                .to_create
                .iter()
                .any(|n| n.address.starts_with(&addr("datapoints.L1.D9.outlet.mode.properties")))
        );
    }

    #[test]
    fn duplicate_ids_resolve_to_the_first_name() {
        let mut snap = snapshot();
        snap.devices.insert(
            "L2".to_owned(),
            json!({ "devices": [ { "id": "D1", "name": "Second Copy", "abilities": [] } ] }),
        );
        assert_eq!(snap.resolve_name("D1"), "Water Control");
        assert_eq!(snap.resolve_name("unknown"), "unknown");
    }

    #[test]
    fn smart_mode_disabled_creates_flat_states() {
        let tree = TreeSync::new(false);
        let plan = tree.sync(&snapshot(), &BTreeMap::new(), &full_descriptor());
        let timer = plan
            .to_create
            .iter()
            .find(|n| n.address == addr("datapoints.L1.D1.outlet.timer"))
            .unwrap();
        assert_eq!(timer.kind, NodeKind::State);
        assert!(
            !plan
                .to_create
                .iter()
                .any(|n| n.address.last() == Some(SMART_TRIGGER))
        );
    }
}
