//! Public IP address command handlers.

use netrules_core::InventoryStore;
use netrules_core::model::IpAddress;
use tabled::Tabled;

use crate::cli::{IpArgs, IpCommand};
use crate::error::CliError;
use crate::output::{self, Ui};
use crate::zone::Session;

use super::util;

#[derive(Tabled)]
struct IpRow {
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "VLAN")]
    vlan: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Network")]
    network: String,
    #[tabled(rename = "Flags")]
    flags: String,
}

fn flags(ip: &IpAddress) -> String {
    let mut flags = Vec::new();
    if ip.source_nat {
        flags.push("source-nat");
    }
    if ip.one_to_one_nat {
        flags.push("static-nat");
    }
    if ip.vpc_id.is_some() {
        flags.push("vpc");
    }
    if flags.is_empty() {
        "-".into()
    } else {
        flags.join(",")
    }
}

fn row(session: &Session, ip: &IpAddress) -> IpRow {
    let network = ip
        .associated_with_network
        .and_then(|id| session.store.network(id))
        .map_or_else(|| "-".into(), |n| n.name);
    IpRow {
        uuid: ip.uuid.to_string(),
        address: ip.address.to_string(),
        vlan: ip.vlan.tag.clone(),
        state: ip.state.to_string(),
        network,
        flags: flags(ip),
    }
}

fn detail(session: &Session, ip: &IpAddress) -> String {
    let row = row(session, ip);
    [
        format!("UUID:    {}", row.uuid),
        format!("Address: {}", row.address),
        format!("VLAN:    {}", row.vlan),
        format!("State:   {}", row.state),
        format!("Network: {}", row.network),
        format!("Flags:   {}", row.flags),
    ]
    .join("\n")
}

pub async fn handle(session: &Session, args: IpArgs, ui: &Ui) -> Result<(), CliError> {
    let manager = &session.manager;
    let caller = &session.caller;

    match args.command {
        IpCommand::List => {
            let mut addresses = session.store.ip_addresses();
            addresses.sort_by_key(|ip| ip.address);
            let out = output::render_list(
                ui.format,
                &addresses,
                |ip| row(session, ip),
                |ip| ip.address.to_string(),
            )?;
            ui.print(&out);
            Ok(())
        }

        IpCommand::Associate { ip, network } => {
            let address = manager.associate_ip_to_network(ip, network, caller).await?;
            ui.success(&format!("{} associated", address.address));
            let out = output::render_single(
                ui.format,
                &address,
                |ip| detail(session, ip),
                |ip| ip.address.to_string(),
            )?;
            ui.result(&out);
            Ok(())
        }

        IpCommand::Release { ip } => {
            let address = util::ip_by_uuid(&session.store, ip)?;
            manager.release_ip_address(ip, caller).await?;
            ui.success(&format!("{} released", address.address));
            Ok(())
        }

        IpCommand::Apply { network, apply } => {
            let applied = manager
                .apply_ip_associations(network, apply.continue_on_error, caller)
                .await?;
            util::report_apply(ui, "IP associations", applied);
            Ok(())
        }
    }
}
