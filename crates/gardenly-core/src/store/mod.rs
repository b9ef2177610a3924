// ── State store abstraction ──
//
// The hierarchical key/value database the bridge mirrors into. TreeSync
// owns its structure, the store owns values, and local writes flow back
// out through `on_write` subscriptions.

mod memory;
mod pattern;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::address::Address;
use crate::error::CoreError;
use crate::model::Node;

pub use memory::{MemoryStore, StoredNode};
pub use pattern::AddressPattern;

/// A non-readback write observed on the store.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteEvent {
    pub address: Address,
    pub value: Value,
}

/// Hierarchical state database consumed by the sync engine.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create `node` unless a node already exists at its address.
    /// Returns whether it was created. Never fails on existing nodes.
    async fn ensure_node(&self, node: Node) -> Result<bool, CoreError>;

    /// Remove the node at `address`. Absent nodes are a no-op.
    async fn remove_node(&self, address: &Address) -> Result<(), CoreError>;

    async fn get_node(&self, address: &Address) -> Option<Node>;

    async fn get_value(&self, address: &Address) -> Option<Value>;

    /// Store a value. `readback` marks values coming from the cloud;
    /// only non-readback writes reach `on_write` subscribers. Fails for
    /// missing nodes and for groups and devices.
    async fn set_value(&self, address: &Address, value: Value, readback: bool) -> Result<(), CoreError>;

    /// Every address strictly below `prefix`, sorted.
    async fn list_addresses_under(&self, prefix: &Address) -> Vec<Address>;

    /// Subscribe to non-readback writes matching `pattern`.
    fn on_write(&self, pattern: AddressPattern) -> WriteStream;
}

// ── WriteStream ──────────────────────────────────────────────────────

/// Filtered subscription over the store's write channel.
pub struct WriteStream {
    pattern: AddressPattern,
    rx: broadcast::Receiver<WriteEvent>,
}

impl WriteStream {
    pub fn new(pattern: AddressPattern, rx: broadcast::Receiver<WriteEvent>) -> Self {
        Self { pattern, rx }
    }

    pub fn pattern(&self) -> &AddressPattern {
        &self.pattern
    }

    /// Next matching write, or `None` once the store is dropped.
    pub async fn next(&mut self) -> Option<WriteEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.pattern.matches(&event.address) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, pattern = %self.pattern, "write subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
