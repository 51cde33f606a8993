//! Network ACL and private gateway command handlers.

use netrules_core::model::{AclAction, NetworkAclItem, PrivateGateway, TrafficType};
use netrules_core::{CreateAclItemRequest, CreatePrivateGatewayRequest, RuleStore};
use tabled::Tabled;

use crate::cli::{AclActionArg, AclArgs, AclCommand, GatewayArgs, GatewayCommand};
use crate::error::CliError;
use crate::output::{self, Ui};
use crate::zone::Session;

use super::util;

// ── ACL views ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct AclRow {
    #[tabled(rename = "#")]
    number: u32,
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Direction")]
    traffic_type: String,
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "Ports")]
    ports: String,
    #[tabled(rename = "CIDRs")]
    cidrs: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "State")]
    state: String,
}

impl From<&NetworkAclItem> for AclRow {
    fn from(item: &NetworkAclItem) -> Self {
        Self {
            number: item.number,
            uuid: item.uuid.to_string(),
            traffic_type: item.traffic_type.to_string(),
            protocol: item.protocol.to_string(),
            ports: util::format_ports(item.ports),
            cidrs: if item.cidrs.is_empty() {
                "any".into()
            } else {
                item.cidrs
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            },
            action: item.action.to_string(),
            state: item.state.to_string(),
        }
    }
}

fn acl_detail(item: &NetworkAclItem) -> String {
    let row = AclRow::from(item);
    [
        format!("UUID:      {}", row.uuid),
        format!("Number:    {}", row.number),
        format!("Direction: {}", row.traffic_type),
        format!("Protocol:  {}", row.protocol),
        format!("Ports:     {}", row.ports),
        format!("CIDRs:     {}", row.cidrs),
        format!("Action:    {}", row.action),
        format!("State:     {}", row.state),
    ]
    .join("\n")
}

// ── ACL handler ─────────────────────────────────────────────────────

pub async fn handle_acl(session: &Session, args: AclArgs, ui: &Ui) -> Result<(), CliError> {
    let manager = &session.manager;
    let caller = &session.caller;

    match args.command {
        AclCommand::List { network } => {
            let tier = util::network_by_uuid(&session.store, network)?;
            let mut items = session.store.list_acl_items(tier.id);
            items.sort_by_key(|i| i.number);
            let out = output::render_list(ui.format, &items, |i| AclRow::from(i), |i| i.uuid.to_string())?;
            ui.print(&out);
            Ok(())
        }

        AclCommand::Create {
            network,
            number,
            protocol,
            port,
            cidrs,
            action,
            egress,
            uuid,
        } => {
            let (port_start, port_end) = util::port_bounds(port);
            let request = CreateAclItemRequest {
                uuid,
                network,
                number,
                protocol,
                port_start,
                port_end,
                cidrs: util::parse_cidrs("cidr", &cidrs)?,
                action: match action {
                    AclActionArg::Allow => AclAction::Allow,
                    AclActionArg::Deny => AclAction::Deny,
                },
                traffic_type: if egress {
                    TrafficType::Egress
                } else {
                    TrafficType::Ingress
                },
            };
            let item = manager.provision_network_acl_item(&request, caller).await?;
            ui.success(&format!("ACL item {} programmed as #{}", item.uuid, item.number));
            let out = output::render_single(ui.format, &item, acl_detail, |i| i.uuid.to_string())?;
            ui.result(&out);
            Ok(())
        }

        AclCommand::Revoke { item } => {
            manager.revoke_network_acl_item(item, caller).await?;
            ui.success(&format!("ACL item {item} revoked"));
            Ok(())
        }

        AclCommand::Apply { network, apply } => {
            let applied = manager
                .apply_network_acls(network, apply.continue_on_error, caller)
                .await?;
            util::report_apply(ui, "Network ACL", applied);
            Ok(())
        }
    }
}

// ── Private gateways ────────────────────────────────────────────────

fn gateway_detail(gw: &PrivateGateway) -> String {
    [
        format!("UUID:       {}", gw.uuid),
        format!("Address:    {}/{}", gw.ip, gw.netmask),
        format!("Gateway:    {}", gw.gateway),
        format!("VLAN:       {}", gw.vlan_tag),
        format!("Source NAT: {}", gw.source_nat),
        format!("State:      {}", gw.state),
    ]
    .join("\n")
}

pub async fn handle_gateway(session: &Session, args: GatewayArgs, ui: &Ui) -> Result<(), CliError> {
    let manager = &session.manager;
    let caller = &session.caller;

    match args.command {
        GatewayCommand::Create {
            vpc,
            ip,
            gateway,
            netmask,
            vlan,
            source_nat,
            uuid,
        } => {
            let request = CreatePrivateGatewayRequest {
                uuid,
                vpc,
                ip,
                gateway,
                netmask,
                vlan_tag: vlan,
                source_nat,
            };
            let gw = manager.create_private_gateway(&request, caller).await?;
            ui.success(&format!("Private gateway {} ready on {}", gw.uuid, gw.vlan_tag));
            let out =
                output::render_single(ui.format, &gw, gateway_detail, |g| g.uuid.to_string())?;
            ui.result(&out);
            Ok(())
        }

        GatewayCommand::Delete { gateway } => {
            manager.delete_private_gateway(gateway, caller).await?;
            ui.success(&format!("Private gateway {gateway} deleted"));
            Ok(())
        }
    }
}
