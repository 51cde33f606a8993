//! Rule listing across every category.

use netrules_core::model::{NetworkRule, Purpose};
use tabled::Tabled;

use crate::cli::{PurposeArg, RulesArgs, RulesCommand};
use crate::error::CliError;
use crate::output::{self, Ui};
use crate::zone::Session;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Purpose")]
    purpose: String,
    #[tabled(rename = "Public IP")]
    ip: String,
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "Ports")]
    ports: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "State")]
    state: String,
}

impl RuleRow {
    fn new(rule: &NetworkRule, ip: String) -> Self {
        let base = rule.base();
        let target = match rule {
            NetworkRule::PortForwarding(pf) => format!(
                "{}:{}",
                pf.destination_ip,
                util::format_ports(Some(pf.destination_ports))
            ),
            NetworkRule::LoadBalancing(lb) => format!(
                "{} ({}, {} members)",
                lb.name,
                lb.algorithm,
                lb.live_destinations().count()
            ),
            NetworkRule::Firewall(r) if !r.source_cidrs.is_empty() => r
                .source_cidrs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
            NetworkRule::Firewall(_) | NetworkRule::StaticNat(_) | NetworkRule::Vpn(_) => {
                base.traffic_type.to_string()
            }
        };
        Self {
            uuid: base.uuid.to_string(),
            purpose: base.purpose.to_string(),
            ip,
            protocol: base.protocol.to_string(),
            ports: util::format_ports(base.ports),
            target,
            state: base.state.to_string(),
        }
    }
}

fn purpose(arg: PurposeArg) -> Purpose {
    match arg {
        PurposeArg::Firewall => Purpose::Firewall,
        PurposeArg::PortForwarding => Purpose::PortForwarding,
        PurposeArg::StaticNat => Purpose::StaticNat,
        PurposeArg::LoadBalancing => Purpose::LoadBalancing,
        PurposeArg::Vpn => Purpose::Vpn,
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(session: &Session, args: RulesArgs, ui: &Ui) -> Result<(), CliError> {
    match args.command {
        RulesCommand::List {
            ip,
            network,
            purpose: wanted,
        } => {
            let store = &session.store;
            let ip_id = ip.map(|uuid| util::ip_by_uuid(store, uuid)).transpose()?.map(|ip| ip.id);
            let network_id = network
                .map(|uuid| util::network_by_uuid(store, uuid))
                .transpose()?
                .map(|n| n.id);

            let mut rules: Vec<NetworkRule> = store
                .rules()
                .into_iter()
                .filter(|r| ip_id.is_none_or(|id| r.base().source_ip_address_id == Some(id)))
                .filter(|r| network_id.is_none_or(|n| r.base().network_id == n))
                .filter(|r| wanted.is_none_or(|p| r.purpose() == purpose(p)))
                .collect();
            rules.sort_by_key(|r| r.base().created);

            let addresses = util::ip_index(store);
            let out = output::render_list(
                ui.format,
                &rules,
                |r| {
                    let ip = r
                        .base()
                        .source_ip_address_id
                        .and_then(|id| addresses.get(&id))
                        .map_or_else(|| "-".into(), ToString::to_string);
                    RuleRow::new(r, ip)
                },
                |r| r.uuid().to_string(),
            )?;
            ui.print(&out);
            Ok(())
        }
    }
}
