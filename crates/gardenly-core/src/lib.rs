//! Datapoint engine between `gardenly-api` and the local state tree.
//!
//! - **[`PathCodec`]** maps tree [`Address`]es to descriptor keys and to
//!   positions inside the schema-less cloud documents.
//! - **[`TreeSync`]** plans and applies the `datapoints.*` subtree from a
//!   [`ConfigDescriptor`] and the latest [`CloudSnapshot`];
//!   [`LocationSync`] mirrors `locations.*`.
//! - **[`CommandBuilder`]** rebuilds outbound requests from trigger writes;
//!   [`CommandDispatcher`] listens for them and sends.
//! - **[`PollLoop`]** owns the connect / poll / reconnect schedule.
//! - **[`StateStore`]** and **[`CloudApi`]** are the seams to the outside;
//!   [`MemoryStore`] is the in-process store.

pub mod address;
pub mod cloud;
pub mod command;
pub mod config;
pub mod error;
pub mod model;
pub mod poll;
pub mod session;
pub mod store;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use address::{Address, DEFAULT_SEPARATOR, DecodedAddress, PathCodec};
pub use cloud::CloudApi;
pub use command::{CommandBuilder, CommandDispatcher, DispatchOutcome, OutboundRequest};
pub use config::{BridgeConfig, MIN_POLL_INTERVAL, PollSettings, TlsVerification};
pub use error::CoreError;
pub use model::{
    CommandSpec, ConfigDescriptor, Datapoint, DescriptorEntry, Node, NodeKind, ParameterSpec,
    ValueType,
};
pub use poll::{PollContext, PollEvent, PollLoop, PollState, PollSummary};
pub use session::Session;
pub use store::{AddressPattern, MemoryStore, StateStore, StoredNode, WriteEvent, WriteStream};
pub use sync::{CloudSnapshot, DatapointShape, LocationSync, SyncPlan, TreeSync};
