//! `gardenly run`: poll + dispatch until Ctrl-C.
//!
//! The tree lives in this process. Lines on stdin are the way in:
//! `ADDRESS=VALUE` writes a value as a local change, so trigger and smart
//! property writes reach the dispatcher, and `poll` runs an extra poll.
//! SIGUSR1 also runs an extra poll on unix.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gardenly_core::{Address, PollEvent, PollLoop, StateStore};

use crate::error::CliError;

use super::trigger::{parse_value, target_address};
use super::{Bridge, Settings};

/// One line of the stdin control channel.
#[derive(Debug, PartialEq)]
enum Control {
    Poll,
    Write(Address, Value),
}

fn parse_control(line: &str) -> Result<Option<Control>, CliError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if line == "poll" {
        return Ok(Some(Control::Poll));
    }
    let (address, raw) = line.split_once('=').ok_or_else(|| CliError::Validation {
        field: "stdin".into(),
        reason: format!("expected ADDRESS=VALUE or 'poll', got '{line}'"),
    })?;
    Ok(Some(Control::Write(
        target_address(address.trim())?,
        parse_value(raw.trim()),
    )))
}

async fn apply_control(control: Control, poll: &PollLoop, store: &dyn StateStore) {
    match control {
        Control::Poll => {
            info!("manual poll requested");
            poll.poll_now();
        }
        Control::Write(address, value) => match store.set_value(&address, value, false).await {
            Ok(()) => debug!(%address, "local write accepted"),
            Err(e) => warn!(%address, error = %e, "local write rejected"),
        },
    }
}

// ── Poll signal ──────────────────────────────────────────────────────

#[cfg(unix)]
struct PollSignal(tokio::signal::unix::Signal);

#[cfg(unix)]
impl PollSignal {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::user_defined1()).map(Self)
    }

    async fn recv(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

#[cfg(not(unix))]
struct PollSignal;

#[cfg(not(unix))]
impl PollSignal {
    #[allow(clippy::unnecessary_wraps)]
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    #[allow(clippy::unused_self)]
    async fn recv(&mut self) -> Option<()> {
        std::future::pending().await
    }
}

pub async fn handle(settings: &Settings) -> Result<(), CliError> {
    let descriptor = settings.descriptor()?;
    info!(datapoints = descriptor.len(), "descriptor loaded");

    let bridge = Bridge::connect(settings)?;
    let poll = bridge.poll_loop(descriptor);
    let dispatcher = bridge.dispatcher();

    let cancel = CancellationToken::new();
    let dispatch_task = dispatcher.spawn(cancel.child_token());
    let mut outcomes = dispatcher.outcomes();
    let mut events = poll.events();
    let mut signal = PollSignal::new()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    poll.start().await?;

    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            Some(()) = signal.recv() => {
                info!("SIGUSR1 received, polling now");
                poll.poll_now();
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_control(&line) {
                    Ok(Some(control)) => apply_control(control, &poll, bridge.store.as_ref()).await,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "ignoring control line"),
                },
                Ok(None) => {
                    debug!("stdin closed, control channel off");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "stdin unreadable, control channel off");
                    stdin_open = false;
                }
            },
            event = events.recv() => match event {
                Ok(event) => log_event(&poll, &event),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "poll event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            outcome = outcomes.recv() => match outcome {
                Ok(o) if o.is_success() => {
                    let request = o.request.map(|r| r.to_string()).unwrap_or_default();
                    info!(address = %o.address, %request, "command sent");
                }
                Ok(o) => warn!(address = %o.address, error = o.error.as_deref().unwrap_or_default(), "command failed"),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "dispatch outcome stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    poll.shutdown().await;
    cancel.cancel();
    let _ = dispatch_task.await;
    Ok(())
}

fn log_event(poll: &PollLoop, event: &PollEvent) {
    match event {
        PollEvent::Connected { user_id } => info!(%user_id, "connected"),
        PollEvent::Completed(summary) => info!(
            created = summary.created,
            removed = summary.removed,
            values = summary.values,
            failed = summary.failed_locations.len(),
            "poll completed"
        ),
        PollEvent::Failed { error } => warn!(%error, "poll failed"),
        PollEvent::TickDropped => warn!(
            interval_secs = poll.settings().interval().as_secs(),
            "previous poll still running, tick skipped"
        ),
        PollEvent::Disconnected { reason } => warn!(%reason, "disconnected"),
        PollEvent::ReconnectScheduled { attempt, delay } => {
            info!(attempt, delay_secs = delay.as_secs(), "reconnect scheduled");
        }
    }
}
