// ── Poll loop ──
//
// Owns the connect / poll / reconnect schedule. One driver task holds the
// timers; each poll runs on its own spawned task behind an in-flight
// flag, so a slow cloud drops ticks instead of stacking them. Results of
// polls started before a disconnect or shutdown are discarded by epoch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::address::Address;
use crate::cloud::CloudApi;
use crate::config::PollSettings;
use crate::error::CoreError;
use crate::model::{ConfigDescriptor, Node, ValueType};
use crate::session::Session;
use crate::store::StateStore;
use crate::sync::{CloudSnapshot, LocationSync, TreeSync};

const EVENT_CHANNEL_SIZE: usize = 64;

pub const INFO_CONNECTION: &str = "info.connection";
pub const INFO_LAST_ERROR: &str = "info.last_error";

// ── Observable state ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PollState {
    Disconnected,
    Connecting,
    Polling,
}

/// What one completed poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub locations_refreshed: bool,
    pub created: usize,
    pub removed: usize,
    pub values: usize,
    /// Locations whose device fetch failed without losing the connection.
    pub failed_locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Connected { user_id: String },
    Completed(PollSummary),
    /// A poll failed; connection losses are followed by `Disconnected`.
    Failed { error: String },
    /// A tick arrived while a poll was still running.
    TickDropped,
    Disconnected { reason: String },
    ReconnectScheduled { attempt: u32, delay: Duration },
}

/// Collaborators a poll loop drives.
#[derive(Clone)]
pub struct PollContext {
    pub api: Arc<dyn CloudApi>,
    pub session: Arc<Session>,
    pub store: Arc<dyn StateStore>,
    pub descriptor: Arc<ConfigDescriptor>,
    pub smart_mode: bool,
}

struct PollFailure {
    epoch: u64,
    error: CoreError,
}

/// Location refresh bookkeeping, owned by the loop.
#[derive(Default)]
struct Cycle {
    polls_since_refresh: u32,
    locations: Option<Value>,
}

// ── PollLoop ─────────────────────────────────────────────────────────

/// Cheaply cloneable handle on the polling schedule.
#[derive(Clone)]
pub struct PollLoop {
    inner: Arc<PollInner>,
}

struct PollInner {
    settings: PollSettings,
    ctx: PollContext,
    tree: TreeSync,
    location_sync: LocationSync,
    state: watch::Sender<PollState>,
    events: broadcast::Sender<PollEvent>,
    in_flight: AtomicBool,
    epoch: AtomicU64,
    cycle: Mutex<Cycle>,
    cancel: CancellationToken,
    poll_now: Notify,
    failures: mpsc::UnboundedSender<PollFailure>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<PollFailure>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl PollLoop {
    /// Create a stopped loop. `settings` has already passed the
    /// interval floor check.
    pub fn new(settings: PollSettings, ctx: PollContext) -> Self {
        let (state, _) = watch::channel(PollState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let tree = TreeSync::new(ctx.smart_mode);

        Self {
            inner: Arc::new(PollInner {
                settings,
                ctx,
                tree,
                location_sync: LocationSync::default(),
                state,
                events,
                in_flight: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                cycle: Mutex::new(Cycle::default()),
                cancel: CancellationToken::new(),
                poll_now: Notify::new(),
                failures,
                failures_rx: Mutex::new(Some(failures_rx)),
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> watch::Receiver<PollState> {
        self.inner.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<PollEvent> {
        self.inner.events.subscribe()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the driver: connect, poll immediately, then every
    /// interval. A second call is a no-op.
    pub async fn start(&self) -> Result<(), CoreError> {
        let Some(failures) = self.inner.failures_rx.lock().await.take() else {
            debug!("poll loop already started");
            return Ok(());
        };
        self.ensure_status_nodes().await?;

        let poll = self.clone();
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move { poll.drive(cancel, failures).await });
        *self.inner.driver.lock().await = Some(handle);
        info!(
            interval_secs = self.inner.settings.interval().as_secs(),
            locations = self.inner.ctx.descriptor.locations().len(),
            "poll loop started"
        );
        Ok(())
    }

    /// Run one poll now without touching the schedule.
    pub fn poll_now(&self) {
        self.inner.poll_now.notify_one();
    }

    /// Stop the interval and any pending reconnect. Polls still in
    /// flight are cancelled; late results are discarded.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);

        if let Some(handle) = self.inner.driver.lock().await.take() {
            let _ = handle.await;
        }
        self.set_state(PollState::Disconnected);
        self.write_status(false, None).await;
        info!("poll loop stopped");
    }

    /// Log in if needed and run a single poll inline. Used by one-shot
    /// commands; ignores the in-flight flag of a running driver.
    pub async fn run_once(&self) -> Result<PollSummary, CoreError> {
        self.ensure_status_nodes().await?;
        if !self.inner.ctx.session.is_active() {
            self.inner.ctx.session.login(self.inner.ctx.api.as_ref()).await?;
        }
        let epoch = self.epoch();
        self.poll_cycle(epoch)
            .await?
            .ok_or_else(|| CoreError::Internal("poll discarded after shutdown".into()))
    }

    // ── Driver ───────────────────────────────────────────────────────

    async fn drive(&self, cancel: CancellationToken, mut failures: mpsc::UnboundedReceiver<PollFailure>) {
        let mut attempt: u32 = 0;

        loop {
            self.set_state(PollState::Connecting);
            let session = &self.inner.ctx.session;
            let login = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = session.login(self.inner.ctx.api.as_ref()) => result,
            };

            let lost = match login {
                Ok(tokens) => {
                    attempt = 0;
                    self.set_state(PollState::Polling);
                    self.write_status(true, None).await;
                    let _ = self.inner.events.send(PollEvent::Connected {
                        user_id: tokens.user_id.clone(),
                    });
                    match self.run_polling(&cancel, &mut failures).await {
                        Some(error) => error,
                        None => break,
                    }
                }
                Err(error) => error,
            };
            self.connection_lost(&lost).await;

            attempt = attempt.saturating_add(1);
            let delay = self.inner.settings.reconnect_delay();
            info!(attempt, delay_secs = delay.as_secs(), "reconnect scheduled");
            let _ = self
                .inner
                .events
                .send(PollEvent::ReconnectScheduled { attempt, delay });

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        debug!("poll driver exited");
    }

    /// Tick until cancelled (`None`) or a poll of this connection loses
    /// it (`Some`).
    async fn run_polling(
        &self,
        cancel: &CancellationToken,
        failures: &mut mpsc::UnboundedReceiver<PollFailure>,
    ) -> Option<CoreError> {
        let epoch = self.epoch();
        // First tick fires immediately.
        let mut interval = tokio::time::interval(self.inner.settings.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                Some(failure) = failures.recv() => {
                    if failure.epoch == epoch {
                        return Some(failure.error);
                    }
                    debug!(stale = failure.epoch, "ignoring failure from an earlier connection");
                }
                _ = interval.tick() => self.spawn_poll(),
                () = self.inner.poll_now.notified() => self.spawn_poll(),
            }
        }
    }

    fn spawn_poll(&self) {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("poll still in flight, dropping tick");
            let _ = self.inner.events.send(PollEvent::TickDropped);
            return;
        }

        let poll = self.clone();
        let epoch = self.epoch();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = poll.poll_cycle(epoch) => Some(result),
            };
            poll.inner.in_flight.store(false, Ordering::Release);

            match result {
                None | Some(Ok(None)) => debug!(epoch, "poll result discarded"),
                Some(Ok(Some(summary))) => {
                    let _ = poll.inner.events.send(PollEvent::Completed(summary));
                }
                Some(Err(error)) => {
                    warn!(error = %error, "poll failed");
                    let _ = poll.inner.events.send(PollEvent::Failed {
                        error: error.to_string(),
                    });
                    if error.is_connection_loss() {
                        let _ = poll.inner.failures.send(PollFailure { epoch, error });
                    } else {
                        poll.write_error(&error).await;
                    }
                }
            }
        });
    }

    // ── One poll ─────────────────────────────────────────────────────

    fn is_stale(&self, epoch: u64) -> bool {
        self.epoch() != epoch
    }

    /// Fetch, sync and push values. `Ok(None)` means the results arrived
    /// after a disconnect or shutdown and were dropped.
    async fn poll_cycle(&self, epoch: u64) -> Result<Option<PollSummary>, CoreError> {
        let inner = &self.inner;
        let ctx = &inner.ctx;
        let store = ctx.store.as_ref();
        let tokens = ctx.session.tokens()?;

        // Locations: first poll, then every Nth.
        let mut cycle = inner.cycle.lock().await;
        let refresh = cycle.locations.is_none()
            || cycle.polls_since_refresh >= inner.settings.location_refresh_every();
        if refresh {
            let doc = ctx.api.list_locations(&tokens.token, &tokens.user_id).await?;
            if self.is_stale(epoch) {
                return Ok(None);
            }
            if let Err(e) = inner.location_sync.apply(&doc, store).await {
                warn!(error = %e, "could not mirror locations");
            }
            debug!("refreshed locations");
            cycle.locations = Some(doc);
            cycle.polls_since_refresh = 0;
        }
        cycle.polls_since_refresh += 1;
        let locations_doc = cycle.locations.clone().unwrap_or(Value::Null);
        drop(cycle);

        // Devices: all locations concurrently.
        let location_ids = ctx.descriptor.locations();
        let fetches = location_ids.iter().map(|id| {
            let token = &tokens.token;
            async move { (id.clone(), ctx.api.list_devices(token, id).await) }
        });
        let results = join_all(fetches).await;
        if self.is_stale(epoch) {
            return Ok(None);
        }

        let mut snapshot = CloudSnapshot {
            locations: locations_doc,
            devices: BTreeMap::new(),
        };
        let mut failed_locations = Vec::new();
        let mut lost: Option<CoreError> = None;
        for (id, result) in results {
            match result {
                Ok(doc) => {
                    snapshot.devices.insert(id, doc);
                }
                Err(e) => {
                    warn!(location = %id, error = %e, "device fetch failed");
                    failed_locations.push(id);
                    if lost.is_none() && e.is_connection_loss() {
                        lost = Some(e);
                    }
                }
            }
        }

        let previous = inner.tree.current_tree(store).await;
        let mut plan = inner.tree.sync(&snapshot, &previous, &ctx.descriptor);
        // No document, no shape: leave creation for those locations to
        // the next successful fetch.
        plan.to_create.retain(|node| {
            node.address
                .get(1)
                .is_none_or(|loc| !failed_locations.iter().any(|f| f == loc))
        });
        let stats = inner.tree.apply(&plan, store).await?;

        let mut values = 0;
        for (id, doc) in &snapshot.devices {
            values += inner.tree.apply_values(id, doc, &ctx.descriptor, store).await;
        }

        if let Some(error) = lost {
            return Err(error);
        }

        let summary = PollSummary {
            locations_refreshed: refresh,
            created: stats.created,
            removed: stats.removed,
            values,
            failed_locations,
        };
        debug!(?summary, "poll complete");
        Ok(Some(summary))
    }

    // ── Status ───────────────────────────────────────────────────────

    fn set_state(&self, state: PollState) {
        let _ = self.inner.state.send(state);
    }

    async fn connection_lost(&self, error: &CoreError) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.inner.ctx.session.clear();
        // The next session starts with a location refresh.
        *self.inner.cycle.lock().await = Cycle::default();
        self.set_state(PollState::Disconnected);

        match error {
            CoreError::Authentication { .. } | CoreError::Config { .. } => {
                error!(error = %error, "cloud connection failed");
            }
            _ => warn!(error = %error, "cloud connection lost"),
        }
        self.write_status(false, Some(error)).await;
        let _ = self.inner.events.send(PollEvent::Disconnected {
            reason: error.to_string(),
        });
    }

    async fn ensure_status_nodes(&self) -> Result<(), CoreError> {
        let store = &self.inner.ctx.store;
        let connection: Address = INFO_CONNECTION.parse()?;
        let last_error: Address = INFO_LAST_ERROR.parse()?;
        if let Some(info) = connection.parent() {
            store.ensure_node(Node::group(info, "info")).await?;
        }
        store
            .ensure_node(
                Node::state(connection, "connected", ValueType::Boolean, "indicator.connected")
                    .with_initial(Some(Value::Bool(false))),
            )
            .await?;
        store
            .ensure_node(
                Node::state(last_error, "last error", ValueType::String, "text")
                    .with_initial(Some(Value::String(String::new()))),
            )
            .await?;
        Ok(())
    }

    async fn write_status(&self, connected: bool, error: Option<&CoreError>) {
        let store = &self.inner.ctx.store;
        if let Ok(address) = INFO_CONNECTION.parse::<Address>() {
            if let Err(e) = store.set_value(&address, Value::Bool(connected), true).await {
                debug!(error = %e, "connection status not stored");
            }
        }
        if let Some(error) = error {
            self.write_error(error).await;
        }
    }

    async fn write_error(&self, error: &CoreError) {
        if let Ok(address) = INFO_LAST_ERROR.parse::<Address>() {
            let _ = self
                .inner
                .ctx
                .store
                .set_value(&address, Value::String(error.to_string()), true)
                .await;
        }
    }
}
