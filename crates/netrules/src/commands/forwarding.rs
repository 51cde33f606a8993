//! Port forwarding and static NAT command handlers.

use netrules_core::model::{FirewallRule, IpAddress, PortForwardingRule};
use netrules_core::{CreatePortForwardingRequest, CreateStaticNatRuleRequest, EnableStaticNatRequest};

use crate::cli::{PortForwardArgs, PortForwardCommand, StaticNatArgs, StaticNatCommand};
use crate::error::CliError;
use crate::output::{self, Ui};
use crate::zone::Session;

use super::util;

// ── Detail views ────────────────────────────────────────────────────

fn forward_detail(session: &Session, pf: &PortForwardingRule) -> String {
    let rule = &pf.rule;
    [
        format!("UUID:      {}", rule.uuid),
        format!(
            "Public IP: {}",
            util::ip_label(&session.store, rule.source_ip_address_id)
        ),
        format!("Protocol:  {}", rule.protocol),
        format!(
            "Ports:     {} -> {}:{}",
            util::format_ports(rule.ports),
            pf.destination_ip,
            util::format_ports(Some(pf.destination_ports))
        ),
        format!("State:     {}", rule.state),
    ]
    .join("\n")
}

fn nat_rule_detail(session: &Session, rule: &FirewallRule) -> String {
    [
        format!("UUID:      {}", rule.uuid),
        format!(
            "Public IP: {}",
            util::ip_label(&session.store, rule.source_ip_address_id)
        ),
        format!("Protocol:  {}", rule.protocol),
        format!("Ports:     {}", util::format_ports(rule.ports)),
        format!("State:     {}", rule.state),
    ]
    .join("\n")
}

fn nat_detail(ip: &IpAddress) -> String {
    [
        format!("UUID:       {}", ip.uuid),
        format!("Public IP:  {}", ip.address),
        format!(
            "VM address: {}",
            ip.vm_ip.map_or_else(|| "-".into(), |a| a.to_string())
        ),
        format!("Static NAT: {}", ip.one_to_one_nat),
    ]
    .join("\n")
}

// ── Port forwarding ─────────────────────────────────────────────────

pub async fn handle_port_forward(
    session: &Session,
    args: PortForwardArgs,
    ui: &Ui,
) -> Result<(), CliError> {
    let manager = &session.manager;
    let caller = &session.caller;

    match args.command {
        PortForwardCommand::Create {
            ip,
            vm,
            network,
            vm_ip,
            protocol,
            public_port,
            private_port,
            source_cidrs,
            open_firewall,
            uuid,
        } => {
            let private_port = private_port.unwrap_or(public_port);
            let request = CreatePortForwardingRequest {
                uuid,
                ip_address: ip,
                network,
                vm,
                vm_ip,
                protocol,
                source_port_start: public_port.start,
                source_port_end: public_port.end,
                destination_port_start: private_port.start,
                destination_port_end: private_port.end,
                source_cidrs: util::parse_cidrs("source-cidr", &source_cidrs)?,
                open_firewall,
            };
            let pf = manager
                .provision_port_forwarding_rule(&request, caller)
                .await?;
            ui.success(&format!("Port forwarding rule {} programmed", pf.rule.uuid));
            let out = output::render_single(
                ui.format,
                &pf,
                |pf| forward_detail(session, pf),
                |pf| pf.rule.uuid.to_string(),
            )?;
            ui.result(&out);
            Ok(())
        }

        PortForwardCommand::Revoke { rule } => {
            manager.revoke_port_forwarding_rule(rule, caller).await?;
            ui.success(&format!("Port forwarding rule {rule} revoked"));
            Ok(())
        }

        PortForwardCommand::Apply { ip, apply } => {
            let applied = manager
                .apply_port_forwarding_rules(ip, apply.continue_on_error, caller)
                .await?;
            util::report_apply(ui, "Port forwarding rules", applied);
            Ok(())
        }
    }
}

// ── Static NAT ──────────────────────────────────────────────────────

pub async fn handle_static_nat(
    session: &Session,
    args: StaticNatArgs,
    ui: &Ui,
) -> Result<(), CliError> {
    let manager = &session.manager;
    let caller = &session.caller;

    match args.command {
        StaticNatCommand::Enable {
            ip,
            vm,
            network,
            vm_ip,
        } => {
            let request = EnableStaticNatRequest {
                ip_address: ip,
                vm,
                network,
                vm_ip,
            };
            let address = manager.enable_static_nat(&request, caller).await?;
            ui.success(&format!("Static NAT enabled on {}", address.address));
            let out = output::render_single(ui.format, &address, nat_detail, |ip| {
                ip.address.to_string()
            })?;
            ui.result(&out);
            Ok(())
        }

        StaticNatCommand::Disable { ip } => {
            manager.disable_static_nat(ip, caller).await?;
            ui.success(&format!("Static NAT disabled on {ip}"));
            Ok(())
        }

        StaticNatCommand::CreateRule {
            ip,
            protocol,
            port,
            open_firewall,
            uuid,
        } => {
            let (port_start, port_end) = util::port_bounds(port);
            let request = CreateStaticNatRuleRequest {
                uuid,
                ip_address: ip,
                protocol,
                port_start,
                port_end,
                open_firewall,
            };
            let rule = manager.provision_static_nat_rule(&request, caller).await?;
            ui.success(&format!("Static NAT rule {} programmed", rule.uuid));
            let out = output::render_single(
                ui.format,
                &rule,
                |r| nat_rule_detail(session, r),
                |r| r.uuid.to_string(),
            )?;
            ui.result(&out);
            Ok(())
        }

        StaticNatCommand::RevokeRule { rule } => {
            manager.revoke_static_nat_rule(rule, caller).await?;
            ui.success(&format!("Static NAT rule {rule} revoked"));
            Ok(())
        }

        StaticNatCommand::Apply { ip, apply } => {
            let applied = manager
                .apply_static_nat_rules(ip, apply.continue_on_error, caller)
                .await?;
            util::report_apply(ui, "Static NAT rules", applied);
            Ok(())
        }

        StaticNatCommand::ApplyNetwork { network, apply } => {
            let applied = manager
                .apply_static_nats_for_network(network, apply.continue_on_error, caller)
                .await?;
            util::report_apply(ui, "Static NAT mappings", applied);
            Ok(())
        }
    }
}
