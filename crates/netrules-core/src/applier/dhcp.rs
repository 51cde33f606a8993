// DHCP entries for guest VMs.
//
// On shared networks with several subnets the router first needs an
// alias address in the VM's subnet before it can answer DHCP there;
// `DhcpSubNetRules` carries that alias along with the entry.

use netrules_api::command::{CreateIpAliasCommand, DhcpEntryCommand, IpAliasTo};
use netrules_api::{CommandBody, RouterCommand, RoutingMetadata};

use super::nic_plug::generate_mac;
use crate::model::{IpAddress, Network, Nic, NicId, NicKind, NicOwner, VirtualMachine, VirtualRouter};

fn entry(network: &Network, vm: &VirtualMachine, nic: &Nic) -> CommandBody {
    CommandBody::DhcpEntry(DhcpEntryCommand {
        vm_mac: nic.mac.clone(),
        vm_ip: nic.ip,
        vm_name: vm.name.clone(),
        default_router: nic.is_default.then_some(network.gateway),
        default_nic: nic.is_default,
    })
}

// ── Plain entry ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DhcpEntryRules {
    network: Network,
    vm: VirtualMachine,
    nic: Nic,
}

impl DhcpEntryRules {
    pub fn new(network: Network, vm: VirtualMachine, nic: Nic) -> Self {
        Self { network, vm, nic }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn vm(&self) -> &VirtualMachine {
        &self.vm
    }

    pub fn nic(&self) -> &Nic {
        &self.nic
    }

    pub fn create_commands(&self, routing: &RoutingMetadata) -> Vec<RouterCommand> {
        vec![RouterCommand::new(
            routing.clone(),
            entry(&self.network, &self.vm, &self.nic),
        )]
    }
}

// ── Entry in a secondary subnet ─────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DhcpSubNetRules {
    network: Network,
    vm: VirtualMachine,
    nic: Nic,
    alias: IpAddress,
}

impl DhcpSubNetRules {
    /// `alias` is the address the router takes in the VM's subnet.
    pub fn new(network: Network, vm: VirtualMachine, nic: Nic, alias: IpAddress) -> Self {
        Self {
            network,
            vm,
            nic,
            alias,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn vm(&self) -> &VirtualMachine {
        &self.vm
    }

    pub fn alias(&self) -> &IpAddress {
        &self.alias
    }

    /// Whether `router` already holds an alias in the VM's subnet.
    pub fn has_alias(&self, router_nics: &[Nic]) -> bool {
        let Some(subnet) = self.nic.subnet() else {
            return false;
        };
        router_nics
            .iter()
            .any(|n| n.kind == NicKind::Alias && subnet.contains(n.ip))
    }

    /// The alias NIC row recorded for `router` once the alias is up.
    pub fn alias_nic(&self, router: &VirtualRouter, id: NicId) -> Nic {
        Nic {
            id,
            owner: NicOwner::Router(router.id),
            kind: NicKind::Alias,
            network_id: Some(self.network.id),
            ip: self.alias.address,
            netmask: self.nic.netmask,
            gateway: self.nic.gateway,
            mac: generate_mac(id),
            vlan_tag: self.network.vlan_tag.clone(),
            is_default: false,
        }
    }

    /// Alias first (unless the router has one), then the entry.
    pub fn create_commands(
        &self,
        routing: &RoutingMetadata,
        router_nics: &[Nic],
    ) -> Vec<RouterCommand> {
        let mut bodies = Vec::with_capacity(2);
        if !self.has_alias(router_nics) {
            let alias_count = router_nics.iter().filter(|n| n.kind == NicKind::Alias).count();
            bodies.push(CommandBody::CreateIpAlias(CreateIpAliasCommand {
                aliases: vec![IpAliasTo {
                    alias_ip: self.alias.address,
                    netmask: self.nic.netmask,
                    alias_count: u32::try_from(alias_count + 1).unwrap_or(u32::MAX),
                }],
            }));
        }
        bodies.push(entry(&self.network, &self.vm, &self.nic));
        bodies
            .into_iter()
            .map(|b| RouterCommand::new(routing.clone(), b))
            .collect()
    }
}
