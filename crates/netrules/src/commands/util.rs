//! Shared helpers for command handlers.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use netrules_core::model::{IpAddress, IpAddressId, Ipv4Cidr, Network, PortRange};
use netrules_core::{InventoryStore, MemoryStore};
use uuid::Uuid;

use crate::cli::PortSpan;
use crate::error::CliError;
use crate::output::Ui;

/// Parse repeatable `--*-cidr` values.
pub fn parse_cidrs(field: &str, values: &[String]) -> Result<Vec<Ipv4Cidr>, CliError> {
    values
        .iter()
        .map(|v| {
            v.parse::<Ipv4Cidr>().map_err(|e| CliError::Validation {
                field: field.into(),
                reason: format!("'{v}': {e}"),
            })
        })
        .collect()
}

/// Split an optional port span into the request's start/end fields.
pub fn port_bounds(span: Option<PortSpan>) -> (Option<u16>, Option<u16>) {
    span.map_or((None, None), |s| (Some(s.start), Some(s.end)))
}

/// `8000-8010`, `22`, or `-` for rules without ports.
pub fn format_ports(ports: Option<PortRange>) -> String {
    match ports {
        Some(p) if p.is_single() => p.start().to_string(),
        Some(p) => format!("{}-{}", p.start(), p.end()),
        None => "-".into(),
    }
}

pub fn ip_by_uuid(store: &MemoryStore, uuid: Uuid) -> Result<IpAddress, CliError> {
    store
        .ip_address_by_uuid(uuid)
        .ok_or_else(|| CliError::NotFound {
            entity_type: "IP address".into(),
            identifier: uuid.to_string(),
        })
}

pub fn network_by_uuid(store: &MemoryStore, uuid: Uuid) -> Result<Network, CliError> {
    store.network_by_uuid(uuid).ok_or_else(|| CliError::NotFound {
        entity_type: "Network".into(),
        identifier: uuid.to_string(),
    })
}

/// Public address of every IP row, for display.
pub fn ip_index(store: &MemoryStore) -> HashMap<IpAddressId, Ipv4Addr> {
    store
        .ip_addresses()
        .into_iter()
        .map(|ip| (ip.id, ip.address))
        .collect()
}

pub fn ip_label(store: &MemoryStore, id: Option<IpAddressId>) -> String {
    id.and_then(|id| store.ip_address(id))
        .map_or_else(|| "-".into(), |ip| ip.address.to_string())
}

/// Report the outcome of an `apply`. `false` means some router was
/// skipped under `--continue-on-error`.
pub fn report_apply(ui: &Ui, what: &str, applied: bool) {
    if applied {
        ui.success(&format!("{what} applied"));
    } else {
        ui.warning(&format!(
            "{what} applied with routers skipped; re-run once they are reachable"
        ));
    }
}
