//! `gardenly sync`: one poll, then print the mirrored tree.

use serde::Serialize;
use tabled::Tabled;

use gardenly_core::StoredNode;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::{Bridge, Settings};

#[derive(Serialize)]
struct NodeView {
    address: String,
    kind: String,
    name: String,
    value: Option<serde_json::Value>,
    writable: bool,
}

impl From<StoredNode> for NodeView {
    fn from(stored: StoredNode) -> Self {
        Self {
            address: stored.node.address.to_string(),
            kind: stored.node.kind.to_string(),
            name: stored.node.name,
            value: stored.value,
            writable: stored.node.writable,
        }
    }
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "VALUE")]
    value: String,
    #[tabled(rename = "RW")]
    rw: &'static str,
}

pub async fn handle(settings: &Settings, global: &GlobalOpts) -> Result<(), CliError> {
    let descriptor = settings.descriptor()?;
    let bridge = Bridge::connect(settings)?;
    let poll = bridge.poll_loop(descriptor);

    let summary = poll.run_once().await?;
    if !global.quiet {
        eprintln!(
            "Poll done: {} created, {} removed, {} values written",
            summary.created, summary.removed, summary.values
        );
        for location in &summary.failed_locations {
            eprintln!("warning: devices of location {location} could not be fetched");
        }
    }

    let nodes: Vec<NodeView> = bridge.store.snapshot().into_iter().map(NodeView::from).collect();
    let rendered = output::render_list(
        &global.output,
        &nodes,
        |n| NodeRow {
            address: n.address.clone(),
            kind: n.kind.clone(),
            name: n.name.clone(),
            value: output::cell(n.value.as_ref()),
            rw: if n.writable { "rw" } else { "r" },
        },
        |n| n.address.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
