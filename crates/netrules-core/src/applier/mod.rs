// ── Rule appliers ──
//
// One applier per rule category. An applier holds the data to program
// (rules, addresses, users) and knows how to turn it into router
// commands. `accept` does the last-mile data gathering for one router
// and hands over to the topology's visit routine, which sends the
// commands.
//
// The command builders (`create_commands`) are pure: no store access,
// no I/O.

mod dhcp;
mod firewall;
mod ip_association;
mod load_balancing;
mod network_acl;
mod nic_plug;
mod password;
mod private_gateway;
mod static_nat;
mod vpn;

use std::sync::Arc;

use netrules_api::{
    CommandBatch, OnError, RouterCommand, RouterTransport, RoutingMetadata, ZoneNetworkType,
    ensure_success,
};
use strum::IntoStaticStr;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{Network, PodId, VirtualRouter};
use crate::store::{AccessChecker, InventoryStore, IpAllocator, MemoryStore, OwnershipChecker, RuleStore};
use crate::topology::{self, TopologyKind};

pub use dhcp::{DhcpEntryRules, DhcpSubNetRules};
pub use firewall::FirewallRules;
pub use ip_association::{IpAssociationRules, ip_assoc_commands};
pub use load_balancing::LoadBalancingRules;
pub use network_acl::NetworkAclsRules;
pub use nic_plug::{NicChanges, NicPlugInOutRules, generate_mac, nics_to_change};
pub(crate) use nic_plug::is_releasing;
pub use password::PasswordToRouterRules;
pub use private_gateway::PrivateGatewayRules;
pub use static_nat::{StaticNat, StaticNatRules};
pub use vpn::VpnRules;

// ── Dependencies ────────────────────────────────────────────────────

/// Every collaborator the manager and the appliers use.
#[derive(Clone)]
pub struct Dependencies {
    pub rules: Arc<dyn RuleStore>,
    pub inventory: Arc<dyn InventoryStore>,
    pub transport: Arc<dyn RouterTransport>,
    pub ip_allocator: Arc<dyn IpAllocator>,
    pub access: Arc<dyn AccessChecker>,
}

impl Dependencies {
    /// Wire a `MemoryStore` in as store and allocator, with ownership-based
    /// access checks.
    pub fn in_memory(store: Arc<MemoryStore>, transport: Arc<dyn RouterTransport>) -> Self {
        Self {
            rules: store.clone(),
            inventory: store.clone(),
            ip_allocator: store,
            transport,
            access: Arc::new(OwnershipChecker),
        }
    }
}

// ── Apply context ───────────────────────────────────────────────────

/// What a visit routine needs to reach a router.
pub struct ApplyContext<'a> {
    pub deps: &'a Dependencies,
    pub on_error: OnError,
}

impl<'a> ApplyContext<'a> {
    pub fn new(deps: &'a Dependencies) -> Self {
        Self {
            deps,
            on_error: OnError::Stop,
        }
    }

    /// Addressing annotations for commands to `router`. VPC-wide appliers
    /// have no guest network and route as an advanced zone.
    pub fn routing(&self, router: &VirtualRouter, network: Option<&Network>) -> RoutingMetadata {
        let guest_ip = network.and_then(|n| {
            self.deps
                .inventory
                .router_nic_in_network(router.id, n.id)
                .map(|nic| nic.ip)
        });
        RoutingMetadata {
            router_name: router.name.clone(),
            router_control_ip: router.control_ip,
            router_guest_ip: guest_ip,
            zone_network_type: network.map_or(ZoneNetworkType::Advanced, |n| n.zone_type),
        }
    }

    /// Deliver `commands` to `router` as one batch. Returns `false` when
    /// there was nothing to send.
    pub async fn send(
        &self,
        router: &VirtualRouter,
        commands: Vec<RouterCommand>,
    ) -> Result<bool, CoreError> {
        if commands.is_empty() {
            return Ok(false);
        }
        let endpoint = router.endpoint();
        let batch = CommandBatch::new(commands, self.on_error);
        debug!(
            router = %router.name,
            commands = batch.commands.len(),
            first = batch.commands.first().map(RouterCommand::kind),
            "sending batch"
        );
        let answers = self.deps.transport.send(&endpoint, &batch).await?;
        ensure_success(&endpoint, &batch, &answers)?;
        Ok(true)
    }
}

// ── The applier union ───────────────────────────────────────────────

#[derive(Debug, Clone, IntoStaticStr)]
pub enum RuleApplier {
    Firewall(FirewallRules),
    LoadBalancing(LoadBalancingRules),
    IpAssociation(IpAssociationRules),
    StaticNat(StaticNatRules),
    NicPlugInOut(NicPlugInOutRules),
    PrivateGateway(PrivateGatewayRules),
    NetworkAcls(NetworkAclsRules),
    Vpn(VpnRules),
    DhcpEntry(DhcpEntryRules),
    PasswordToRouter(PasswordToRouterRules),
    DhcpSubNet(DhcpSubNetRules),
}

impl RuleApplier {
    /// Variant name for logs and errors.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Guest network the applier targets; `None` for VPC-wide appliers.
    pub fn network(&self) -> Option<&Network> {
        match self {
            Self::Firewall(a) => Some(a.network()),
            Self::LoadBalancing(a) => Some(a.network()),
            Self::IpAssociation(a) => Some(a.network()),
            Self::StaticNat(a) => Some(a.network()),
            Self::NicPlugInOut(a) => Some(a.network()),
            Self::NetworkAcls(a) => Some(a.network()),
            Self::Vpn(a) => Some(a.network()),
            Self::DhcpEntry(a) => Some(a.network()),
            Self::PasswordToRouter(a) => Some(a.network()),
            Self::DhcpSubNet(a) => Some(a.network()),
            Self::PrivateGateway(_) => None,
        }
    }

    /// Pod of the VM a per-VM applier serves. Basic zones only program the
    /// routers in that pod.
    pub fn pod(&self) -> Option<PodId> {
        match self {
            Self::DhcpEntry(a) => a.vm().pod_id,
            Self::PasswordToRouter(a) => a.vm().pod_id,
            Self::DhcpSubNet(a) => a.vm().pod_id,
            _ => None,
        }
    }

    /// Gather current data for `router`, then let the topology program it.
    pub async fn accept(
        &mut self,
        topology: TopologyKind,
        router: &VirtualRouter,
        ctx: &ApplyContext<'_>,
    ) -> Result<bool, CoreError> {
        self.prepare(ctx)?;
        topology::visit(topology, self, router, ctx).await
    }

    fn prepare(&mut self, ctx: &ApplyContext<'_>) -> Result<(), CoreError> {
        match self {
            Self::Firewall(a) => a.resolve_addresses(ctx.deps.inventory.as_ref()),
            Self::LoadBalancing(a) => a.reload(ctx.deps.rules.as_ref(), ctx.deps.inventory.as_ref()),
            Self::StaticNat(a) => {
                a.reload(ctx.deps.inventory.as_ref());
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
