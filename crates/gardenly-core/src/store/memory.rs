// ── In-process state store ──
//
// DashMap-backed tree with a broadcast channel for local writes. Node
// creation goes through the entry API so racing creators see exactly
// one insert and every other caller gets a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use super::{AddressPattern, StateStore, WriteEvent, WriteStream};
use crate::address::Address;
use crate::error::CoreError;
use crate::model::Node;

const WRITE_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone)]
struct Slot {
    node: Node,
    value: Option<Value>,
    /// Whether the current value came from the cloud.
    readback: bool,
    updated_at: Option<DateTime<Utc>>,
}

/// A stored node together with its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub node: Node,
    pub value: Option<Value>,
    pub readback: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Lock-free in-memory [`StateStore`].
pub struct MemoryStore {
    slots: DashMap<Address, Slot>,
    writes: broadcast::Sender<WriteEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (writes, _) = broadcast::channel(WRITE_CHANNEL_SIZE);
        Self {
            slots: DashMap::new(),
            writes,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Sorted copy of every node and its value.
    pub fn snapshot(&self) -> Vec<StoredNode> {
        let mut nodes: Vec<StoredNode> = self
            .slots
            .iter()
            .map(|r| {
                let slot = r.value();
                StoredNode {
                    node: slot.node.clone(),
                    value: slot.value.clone(),
                    readback: slot.readback,
                    updated_at: slot.updated_at,
                }
            })
            .collect();
        nodes.sort_by(|a, b| a.node.address.cmp(&b.node.address));
        nodes
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn ensure_node(&self, node: Node) -> Result<bool, CoreError> {
        match self.slots.entry(node.address.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                trace!(address = %node.address, kind = %node.kind, "creating node");
                let value = node.initial.clone();
                let updated_at = value.is_some().then(Utc::now);
                vacant.insert(Slot {
                    node,
                    value,
                    readback: true,
                    updated_at,
                });
                Ok(true)
            }
        }
    }

    async fn remove_node(&self, address: &Address) -> Result<(), CoreError> {
        if self.slots.remove(address).is_some() {
            trace!(%address, "removed node");
        }
        Ok(())
    }

    async fn get_node(&self, address: &Address) -> Option<Node> {
        self.slots.get(address).map(|r| r.node.clone())
    }

    async fn get_value(&self, address: &Address) -> Option<Value> {
        self.slots.get(address).and_then(|r| r.value.clone())
    }

    async fn set_value(&self, address: &Address, value: Value, readback: bool) -> Result<(), CoreError> {
        {
            let mut slot = self
                .slots
                .get_mut(address)
                .ok_or_else(|| CoreError::NodeNotFound {
                    address: address.to_string(),
                })?;
            if !slot.node.holds_value() {
                return Err(CoreError::Internal(format!(
                    "'{address}' is a {} and holds no value",
                    slot.node.kind
                )));
            }
            slot.value = Some(value.clone());
            slot.readback = readback;
            slot.updated_at = Some(Utc::now());
        }

        if !readback {
            // No subscribers is fine.
            let _ = self.writes.send(WriteEvent {
                address: address.clone(),
                value,
            });
        }
        Ok(())
    }

    async fn list_addresses_under(&self, prefix: &Address) -> Vec<Address> {
        let mut addresses: Vec<Address> = self
            .slots
            .iter()
            .filter(|r| r.key().len() > prefix.len() && r.key().starts_with(prefix))
            .map(|r| r.key().clone())
            .collect();
        addresses.sort();
        addresses
    }

    fn on_write(&self, pattern: AddressPattern) -> WriteStream {
        WriteStream::new(pattern, self.writes.subscribe())
    }
}
