// ── Domain model ──
//
// Tree nodes and the externally supplied datapoint descriptor.

mod descriptor;
mod node;

pub use descriptor::{CommandSpec, ConfigDescriptor, Datapoint, DescriptorEntry, ParameterSpec};
pub use node::{Node, NodeKind, ValueType};
