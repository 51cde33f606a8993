//! Firewall rule command handlers.

use netrules_core::CreateFirewallRuleRequest;
use netrules_core::model::{FirewallRule, Ipv4Cidr, TrafficType};

use crate::cli::{FirewallArgs, FirewallCommand};
use crate::error::CliError;
use crate::output::{self, Ui};
use crate::zone::Session;

use super::util;

fn detail(session: &Session, rule: &FirewallRule) -> String {
    let cidrs = |list: &[Ipv4Cidr]| {
        if list.is_empty() {
            "-".to_owned()
        } else {
            list.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }
    };
    [
        format!("UUID:      {}", rule.uuid),
        format!("Direction: {}", rule.traffic_type),
        format!(
            "Public IP: {}",
            util::ip_label(&session.store, rule.source_ip_address_id)
        ),
        format!("Protocol:  {}", rule.protocol),
        format!("Ports:     {}", util::format_ports(rule.ports)),
        format!("Sources:   {}", cidrs(&rule.source_cidrs)),
        format!("Dests:     {}", cidrs(&rule.dest_cidrs)),
        format!("State:     {}", rule.state),
    ]
    .join("\n")
}

pub async fn handle(session: &Session, args: FirewallArgs, ui: &Ui) -> Result<(), CliError> {
    let manager = &session.manager;
    let caller = &session.caller;

    match args.command {
        FirewallCommand::Create {
            ip,
            network,
            protocol,
            port,
            source_cidrs,
            dest_cidrs,
            icmp_type,
            icmp_code,
            uuid,
        } => {
            // The arg group guarantees exactly one target.
            let traffic_type = if ip.is_some() {
                TrafficType::Ingress
            } else {
                TrafficType::Egress
            };
            let (port_start, port_end) = util::port_bounds(port);
            let request = CreateFirewallRuleRequest {
                uuid,
                traffic_type,
                ip_address: ip,
                network,
                protocol,
                port_start,
                port_end,
                source_cidrs: util::parse_cidrs("source-cidr", &source_cidrs)?,
                dest_cidrs: util::parse_cidrs("dest-cidr", &dest_cidrs)?,
                icmp_type,
                icmp_code,
            };
            let rule = manager.provision_firewall_rule(&request, caller).await?;
            ui.success(&format!("Firewall rule {} programmed", rule.uuid));
            let out = output::render_single(
                ui.format,
                &rule,
                |r| detail(session, r),
                |r| r.uuid.to_string(),
            )?;
            ui.result(&out);
            Ok(())
        }

        FirewallCommand::Revoke { rule } => {
            manager.revoke_firewall_rule(rule, caller).await?;
            ui.success(&format!("Firewall rule {rule} revoked"));
            Ok(())
        }

        FirewallCommand::Apply { ip, apply } => {
            let applied = manager
                .apply_firewall_rules(ip, apply.continue_on_error, caller)
                .await?;
            util::report_apply(ui, "Firewall rules", applied);
            Ok(())
        }

        FirewallCommand::ApplyEgress { network, apply } => {
            let applied = manager
                .apply_egress_firewall_rules(network, apply.continue_on_error, caller)
                .await?;
            util::report_apply(ui, "Egress firewall rules", applied);
            Ok(())
        }
    }
}
