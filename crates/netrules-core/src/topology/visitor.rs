// Per (topology, applier) programming routines.
//
// Most appliers build their commands and send them as one batch. NIC
// hot-plug, private gateways, and DHCP subnets also keep the router's NIC
// rows in step with what was plugged.

use netrules_api::command::{PlugNicCommand, SetSourceNatCommand, UnplugNicCommand};
use netrules_api::{CommandBody, OnError, RouterCommand, RoutingMetadata};
use tracing::{debug, warn};

use super::TopologyKind;
use crate::applier::{
    ApplyContext, DhcpSubNetRules, NicPlugInOutRules, PrivateGatewayRules, RuleApplier,
    generate_mac, ip_assoc_commands, is_releasing, nics_to_change,
};
use crate::error::CoreError;
use crate::model::{Nic, NicKind, NicOwner, VirtualRouter};

/// Program `router` with `applier` under topology `kind`. Returns
/// `false` when there was nothing to send.
pub(crate) async fn visit(
    kind: TopologyKind,
    applier: &RuleApplier,
    router: &VirtualRouter,
    ctx: &ApplyContext<'_>,
) -> Result<bool, CoreError> {
    let routing = ctx.routing(router, applier.network());
    match (kind, applier) {
        (_, RuleApplier::Firewall(a)) => ctx.send(router, a.create_commands(&routing)?).await,
        (_, RuleApplier::LoadBalancing(a)) => ctx.send(router, a.create_commands(&routing)?).await,
        (_, RuleApplier::StaticNat(a)) => ctx.send(router, a.create_commands(&routing)).await,
        (TopologyKind::Basic | TopologyKind::Advanced, RuleApplier::IpAssociation(a)) => {
            let nics = ctx.deps.inventory.nics_for(NicOwner::Router(router.id));
            ctx.send(router, a.create_commands(&routing, &nics)).await
        }
        (TopologyKind::Vpc, RuleApplier::NicPlugInOut(a)) => {
            plug_in_out(a, router, &routing, ctx).await
        }
        (TopologyKind::Vpc, RuleApplier::PrivateGateway(a)) => {
            private_gateway(a, router, &routing, ctx).await
        }
        (TopologyKind::Vpc, RuleApplier::NetworkAcls(a)) => {
            ctx.send(router, a.create_commands(&routing)).await
        }
        (_, RuleApplier::Vpn(a)) => ctx.send(router, a.create_commands(&routing)).await,
        (_, RuleApplier::DhcpEntry(a)) => ctx.send(router, a.create_commands(&routing)).await,
        (_, RuleApplier::PasswordToRouter(a)) => {
            ctx.send(router, a.create_commands(&routing)).await
        }
        (_, RuleApplier::DhcpSubNet(a)) => dhcp_subnet(a, router, &routing, ctx).await,
        (
            _,
            RuleApplier::IpAssociation(_)
            | RuleApplier::NicPlugInOut(_)
            | RuleApplier::PrivateGateway(_)
            | RuleApplier::NetworkAcls(_),
        ) => Err(CoreError::Unsupported {
            operation: applier.name().to_owned(),
            topology: kind.to_string(),
        }),
    }
}

fn command(routing: &RoutingMetadata, body: CommandBody) -> RouterCommand {
    RouterCommand::new(routing.clone(), body)
}

// ── VPC public NICs ─────────────────────────────────────────────────

/// Bring the router's public NICs in line with the address set, then
/// associate the addresses. NIC changes go out one at a time so that an
/// unplug reaches the router before a plug on the same VLAN. A failed
/// plug aborts the whole apply.
async fn plug_in_out(
    applier: &NicPlugInOutRules,
    router: &VirtualRouter,
    routing: &RoutingMetadata,
    ctx: &ApplyContext<'_>,
) -> Result<bool, CoreError> {
    let inventory = ctx.deps.inventory.as_ref();
    let owner = NicOwner::Router(router.id);
    let current = inventory.nics_for(owner);
    let changes = nics_to_change(applier.addresses(), &current);
    let mut sent = false;

    for (nic, address) in &changes.readdress {
        let moved = Nic {
            ip: *address,
            ..nic.clone()
        };
        if !inventory.update_nic(&moved)? {
            return Err(CoreError::Internal(format!(
                "public NIC of router {} on {} vanished",
                router.name, nic.vlan_tag
            )));
        }
        debug!(router = %router.name, vlan = %nic.vlan_tag, ip = %address, "re-addressed public NIC");
    }

    for (tag, leaving) in &changes.unplug {
        let Some(nic) = current
            .iter()
            .find(|n| n.kind == NicKind::Public && n.ip == leaving.address)
        else {
            continue;
        };
        let unplug = command(
            routing,
            CommandBody::UnplugNic(UnplugNicCommand {
                mac: nic.mac.clone(),
                vlan_tag: tag.clone(),
            }),
        );
        sent |= ctx.send(router, vec![unplug]).await?;
        inventory.remove_nic(nic.id);
        debug!(router = %router.name, vlan = %tag, "unplugged public NIC");
    }

    for (tag, first) in &changes.plug {
        let id = inventory.next_nic_id();
        let nic = Nic {
            id,
            owner,
            kind: NicKind::Public,
            network_id: None,
            ip: first.address,
            netmask: first.vlan.netmask,
            gateway: first.vlan.gateway,
            mac: generate_mac(id),
            vlan_tag: tag.clone(),
            is_default: false,
        };
        let plug = command(
            routing,
            CommandBody::PlugNic(PlugNicCommand {
                mac: nic.mac.clone(),
                vlan_tag: tag.clone(),
                ip: nic.ip,
                netmask: nic.netmask,
                gateway: nic.gateway,
            }),
        );
        inventory.persist_nic(nic)?;
        if let Err(e) = ctx.send(router, vec![plug]).await {
            inventory.remove_nic(id);
            warn!(router = %router.name, vlan = %tag, error = %e, "failed to plug public NIC");
            return Err(e);
        }
        sent = true;
        debug!(router = %router.name, vlan = %tag, "plugged public NIC");
    }

    let nics = inventory.nics_for(owner);
    let mut commands = ip_assoc_commands(routing, applier.addresses(), &nics, true, |ip| {
        !is_releasing(ip)
    });
    commands.extend(
        applier
            .addresses()
            .iter()
            .filter(|ip| ip.source_nat)
            .map(|ip| {
                command(
                    routing,
                    CommandBody::SetSourceNat(SetSourceNatCommand {
                        public_ip: ip.address,
                        vlan_tag: ip.vlan.tag.clone(),
                        add: !is_releasing(ip),
                    }),
                )
            }),
    );
    Ok(ctx.send(router, commands).await? || sent)
}

// ── VPC private gateways ────────────────────────────────────────────

async fn private_gateway(
    applier: &PrivateGatewayRules,
    router: &VirtualRouter,
    routing: &RoutingMetadata,
    ctx: &ApplyContext<'_>,
) -> Result<bool, CoreError> {
    let inventory = ctx.deps.inventory.as_ref();
    let existing = inventory
        .nics_for(NicOwner::Router(router.id))
        .into_iter()
        .find(|n| applier.owns(n));

    if !applier.is_create() {
        let Some(nic) = existing else {
            debug!(router = %router.name, "no private gateway NIC to remove");
            return Ok(false);
        };
        ctx.send(router, applier.teardown_commands(routing, &nic)).await?;
        inventory.remove_nic(nic.id);
        return Ok(true);
    }

    let nic = if let Some(nic) = existing {
        nic
    } else {
        let nic = applier.private_nic(router, inventory.next_nic_id());
        inventory.persist_nic(nic.clone())?;
        nic
    };
    match ctx.send(router, applier.setup_commands(routing, &nic)).await {
        Ok(sent) => Ok(sent),
        Err(e) => {
            warn!(
                router = %router.name,
                gateway = %applier.gateway().uuid,
                error = %e,
                "private gateway setup failed, tearing down"
            );
            let teardown = ApplyContext {
                deps: ctx.deps,
                on_error: OnError::Continue,
            };
            if let Err(cleanup) = teardown
                .send(router, applier.teardown_commands(routing, &nic))
                .await
            {
                warn!(router = %router.name, error = %cleanup, "private gateway teardown incomplete");
            }
            inventory.remove_nic(nic.id);
            Err(e)
        }
    }
}

// ── DHCP in secondary subnets ───────────────────────────────────────

async fn dhcp_subnet(
    applier: &DhcpSubNetRules,
    router: &VirtualRouter,
    routing: &RoutingMetadata,
    ctx: &ApplyContext<'_>,
) -> Result<bool, CoreError> {
    let inventory = ctx.deps.inventory.as_ref();
    let nics = inventory.nics_for(NicOwner::Router(router.id));
    let had_alias = applier.has_alias(&nics);
    let sent = ctx.send(router, applier.create_commands(routing, &nics)).await?;
    if !had_alias {
        inventory.persist_nic(applier.alias_nic(router, inventory.next_nic_id()))?;
        debug!(router = %router.name, alias = %applier.alias().address, "router alias recorded");
    }
    Ok(sent)
}
