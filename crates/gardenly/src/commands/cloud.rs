//! Raw cloud listings: `locations`, `devices`, `discover`.

use indexmap::IndexMap;
use serde_json::Value;
use tabled::Tabled;

use gardenly_core::address::entity_id;
use gardenly_core::{DescriptorEntry, ValueType};

use crate::cli::{DevicesArgs, DiscoverArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::{Bridge, Settings};

#[derive(Tabled)]
struct LocationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "DEVICES")]
    devices: usize,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "CATEGORY")]
    category: String,
    #[tabled(rename = "ABILITIES")]
    abilities: usize,
}

fn entries<'a>(doc: &'a Value, key: &str) -> &'a [Value] {
    doc.get(key)
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

fn text(entity: &Value, field: &str) -> String {
    output::cell(entity.get(field))
}

fn count(entity: &Value, field: &str) -> usize {
    entity.get(field).and_then(Value::as_array).map_or(0, Vec::len)
}

fn id_of(entity: &Value) -> String {
    entity_id(entity).unwrap_or_default()
}

async fn fetch_locations(bridge: &Bridge) -> Result<Value, CliError> {
    bridge.ensure_session().await?;
    let token = bridge.session.token()?;
    let user_id = bridge.session.user_id()?;
    Ok(bridge.api.list_locations(&token, &user_id).await?)
}

async fn fetch_devices(bridge: &Bridge, location_id: &str) -> Result<Value, CliError> {
    bridge.ensure_session().await?;
    let token = bridge.session.token()?;
    Ok(bridge.api.list_devices(&token, location_id).await?)
}

pub async fn locations(settings: &Settings, global: &GlobalOpts) -> Result<(), CliError> {
    let bridge = Bridge::connect(settings)?;
    let doc = fetch_locations(&bridge).await?;
    let items = entries(&doc, "locations");

    let rendered = output::render_list(
        &global.output,
        items,
        |l| LocationRow {
            id: id_of(l),
            name: text(l, "name"),
            devices: count(l, "devices"),
        },
        id_of,
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

pub async fn devices(settings: &Settings, args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let bridge = Bridge::connect(settings)?;
    let doc = fetch_devices(&bridge, &args.location).await?;
    let items = entries(&doc, "devices");

    let rendered = output::render_list(
        &global.output,
        items,
        |d| DeviceRow {
            id: id_of(d),
            name: text(d, "name"),
            category: text(d, "category"),
            abilities: count(d, "abilities"),
        },
        id_of,
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

/// Build descriptor entries for every ability property of every device
/// in one location's device document.
pub(crate) fn discover_location(
    settings: &Settings,
    location_id: &str,
    devices_doc: &Value,
) -> Result<IndexMap<String, DescriptorEntry>, CliError> {
    let codec = gardenly_config::codec(&settings.config)?;
    let mut found = IndexMap::new();

    for device in entries(devices_doc, "devices") {
        let Some(device_id) = entity_id(device) else {
            continue;
        };
        for ability in entries(device, "abilities") {
            let Some(ability_id) = entity_id(ability) else {
                continue;
            };
            for property in entries(ability, "properties") {
                let Some(property_id) = entity_id(property) else {
                    continue;
                };
                let address = match codec.encode(location_id, &device_id, &[&ability_id, &property_id]) {
                    Ok(address) => address,
                    Err(e) => {
                        tracing::warn!(device = %device_id, property = %property_id, error = %e, "skipping property");
                        continue;
                    }
                };
                let value = property.get("value").unwrap_or(&Value::Null);
                let entry = DescriptorEntry {
                    location: location_id.to_owned(),
                    device: device_id.clone(),
                    smart: false,
                    value_type: Some(ValueType::of(value)),
                    role: None,
                    writeable: property
                        .get("writeable")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    unit: property
                        .get("unit")
                        .and_then(Value::as_str)
                        .filter(|u| !u.is_empty())
                        .map(str::to_owned),
                    name: property.get("name").and_then(Value::as_str).map(str::to_owned),
                    command: None,
                };
                found.insert(codec.flatten(&address), entry);
            }
        }
    }
    Ok(found)
}

pub async fn discover(settings: &Settings, args: DiscoverArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let bridge = Bridge::connect(settings)?;

    let location_ids = if let Some(id) = args.location {
        vec![id]
    } else {
        let doc = fetch_locations(&bridge).await?;
        entries(&doc, "locations").iter().filter_map(entity_id).collect()
    };

    let mut descriptor = IndexMap::new();
    for location_id in &location_ids {
        let doc = fetch_devices(&bridge, location_id).await?;
        descriptor.extend(discover_location(settings, location_id, &doc)?);
    }

    if let Some(path) = args.write {
        gardenly_config::write_descriptor(&path, &descriptor)?;
        if !global.quiet {
            eprintln!("Wrote {} datapoints to {}", descriptor.len(), path.display());
        }
        return Ok(());
    }

    output::print_output(&serde_json::to_string_pretty(&descriptor)?, global.quiet);
    Ok(())
}
