//! `gardenly trigger`: set command parameters, fire the trigger and wait
//! for the dispatcher to report back.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use gardenly_core::sync::{DATAPOINT_ROOT, PARAMETERS, PROPERTIES, SMART_TRIGGER, TRIGGER};
use gardenly_core::{Address, DispatchOutcome, StateStore};

use crate::cli::{GlobalOpts, TriggerArgs};
use crate::error::CliError;
use crate::output;

use super::{Bridge, Settings};

/// Parse a tree address, rooting it under `datapoints` if needed.
pub(super) fn target_address(raw: &str) -> Result<Address, CliError> {
    let address: Address = raw.parse()?;
    if address.get(0) == Some(DATAPOINT_ROOT) {
        Ok(address)
    } else {
        Ok(Address::from_segments([DATAPOINT_ROOT]).join(&address))
    }
}

/// JSON if it parses, plain text otherwise.
pub(super) fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// Resolve `name=value` pairs against the trigger's parameter group.
fn parameter_writes(target: &Address, params: &[String]) -> Result<Vec<(Address, Value)>, CliError> {
    if params.is_empty() {
        return Ok(Vec::new());
    }
    let group_name = match target.last() {
        Some(TRIGGER) => PARAMETERS,
        Some(SMART_TRIGGER) => PROPERTIES,
        _ => {
            return Err(CliError::Validation {
                field: "param".into(),
                reason: format!("'{target}' is not a command trigger"),
            });
        }
    };
    let Some(group) = target.parent().map(|p| p.child(group_name)) else {
        return Err(CliError::Validation {
            field: "address".into(),
            reason: format!("'{target}' has no parent"),
        });
    };

    params
        .iter()
        .map(|pair| {
            let (name, raw) = pair.split_once('=').ok_or_else(|| CliError::Validation {
                field: "param".into(),
                reason: format!("expected NAME=VALUE, got '{pair}'"),
            })?;
            let relative: Address = name.parse()?;
            Ok((group.join(&relative), parse_value(raw)))
        })
        .collect()
}

async fn wait_for(
    outcomes: &mut tokio::sync::broadcast::Receiver<DispatchOutcome>,
    target: &Address,
) -> Result<DispatchOutcome, CliError> {
    loop {
        match outcomes.recv().await {
            Ok(outcome) if &outcome.address == target => return Ok(outcome),
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => {
                return Err(CliError::Internal("dispatcher stopped".into()));
            }
        }
    }
}

pub async fn handle(settings: &Settings, args: TriggerArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let target = target_address(&args.address)?;
    let writes = parameter_writes(&target, &args.params)?;
    let value = args.value.as_deref().map_or(Value::Bool(true), parse_value);

    // One poll builds the tree and the session.
    let descriptor = settings.descriptor()?;
    let bridge = Bridge::connect(settings)?;
    bridge.poll_loop(descriptor).run_once().await?;

    let store = bridge.store.as_ref();
    for address in writes.iter().map(|(a, _)| a).chain([&target]) {
        if store.get_node(address).await.is_none() {
            return Err(CliError::NotFound {
                resource_type: "node".into(),
                identifier: address.to_string(),
                list_command: "sync".into(),
            });
        }
    }

    let dispatcher = bridge.dispatcher();
    let mut outcomes = dispatcher.outcomes();
    let cancel = CancellationToken::new();
    let task = dispatcher.spawn(cancel.clone());

    for (address, param) in writes {
        store.set_value(&address, param, false).await?;
    }
    store.set_value(&target, value, false).await?;

    let waited = tokio::time::timeout(Duration::from_secs(args.timeout), wait_for(&mut outcomes, &target)).await;
    cancel.cancel();
    let _ = task.await;

    let outcome = waited.map_err(|_| CliError::Timeout { seconds: args.timeout })??;
    if let Some(error) = outcome.error {
        return Err(CliError::CommandFailed {
            address: target.to_string(),
            message: error,
        });
    }

    let rendered = output::render_single(&global.output, &outcome.request, |r| {
        r.as_ref().map_or_else(String::new, |r| format!("Sent {r}"))
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
