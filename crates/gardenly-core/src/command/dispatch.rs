// ── Command dispatch ──
//
// Background task subscribed to local writes under `datapoints.**`.
// Trigger writes become simple or smart commands, writes to smart
// scalars become property PUTs. Readback writes never get here.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{CommandBuilder, OutboundRequest};
use crate::address::Address;
use crate::cloud::CloudApi;
use crate::error::CoreError;
use crate::session::Session;
use crate::store::{AddressPattern, StateStore, WriteEvent, WriteStream};
use crate::sync::{DATAPOINT_ROOT, SMART_TRIGGER, TRIGGER};

const OUTCOME_CHANNEL_SIZE: usize = 32;

/// Result of one dispatched write, broadcast to observers.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub address: Address,
    pub request: Option<OutboundRequest>,
    /// `None` on success, the rendered error otherwise.
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    builder: CommandBuilder,
    store: Arc<dyn StateStore>,
    api: Arc<dyn CloudApi>,
    session: Arc<Session>,
    outcomes: broadcast::Sender<DispatchOutcome>,
}

impl CommandDispatcher {
    pub fn new(
        builder: CommandBuilder,
        store: Arc<dyn StateStore>,
        api: Arc<dyn CloudApi>,
        session: Arc<Session>,
    ) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_SIZE);
        Self {
            inner: Arc::new(DispatcherInner {
                builder,
                store,
                api,
                session,
                outcomes,
            }),
        }
    }

    pub fn outcomes(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.inner.outcomes.subscribe()
    }

    /// Subscribe and spawn the dispatch loop. The subscription is taken
    /// before returning, so writes made right after this call are seen.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let pattern = AddressPattern::under(&Address::from_segments([DATAPOINT_ROOT]));
        let stream = self.inner.store.on_write(pattern);
        let dispatcher = self.clone();
        tokio::spawn(dispatch_task(dispatcher, stream, cancel))
    }

    /// Route one write. Returns `Ok(None)` for writes that are not
    /// commands (e.g. parameter edits).
    pub async fn handle(&self, event: &WriteEvent) -> Result<Option<OutboundRequest>, CoreError> {
        let builder = &self.inner.builder;
        let fired = is_truthy(&event.value);

        let (request, reset) = match event.address.last() {
            Some(TRIGGER) if fired => (builder.build_simple_command(&event.address).await?, true),
            Some(SMART_TRIGGER) if fired => (builder.build_smart_command(&event.address).await?, true),
            Some(TRIGGER | SMART_TRIGGER) => return Ok(None),
            _ => {
                let is_property = self
                    .inner
                    .store
                    .get_node(&event.address)
                    .await
                    .is_some_and(|node| node.writable && node.smart_property.is_some());
                if !is_property {
                    return Ok(None);
                }
                let request = builder
                    .build_property_write(&event.address, event.value.clone())
                    .await?;
                (request, false)
            }
        };

        let token = self.inner.session.token()?;
        debug!(address = %event.address, request = %request, "sending command");
        self.inner.api.send(&request, &token).await?;
        info!(address = %event.address, request = %request, "command sent");

        // Acknowledge: triggers fall back to false once, properties keep
        // the written value.
        let ack = if reset { Value::Bool(false) } else { event.value.clone() };
        self.inner.store.set_value(&event.address, ack, true).await?;

        Ok(Some(request))
    }
}

async fn dispatch_task(dispatcher: CommandDispatcher, mut stream: WriteStream, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = stream.next() => {
                let Some(event) = event else { break };
                let outcome = match dispatcher.handle(&event).await {
                    Ok(None) => continue,
                    Ok(Some(request)) => DispatchOutcome {
                        address: event.address,
                        request: Some(request),
                        error: None,
                    },
                    Err(e) => {
                        error!(address = %event.address, error = %e, "command failed");
                        DispatchOutcome {
                            address: event.address,
                            request: None,
                            error: Some(e.to_string()),
                        }
                    }
                };
                let _ = dispatcher.inner.outcomes.send(outcome);
            }
        }
    }
    debug!("command dispatcher stopped");
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() > f64::EPSILON),
        Value::String(s) => matches!(s.as_str(), "true" | "1"),
        _ => false,
    }
}
