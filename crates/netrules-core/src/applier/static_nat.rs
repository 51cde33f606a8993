// Whole-IP static NAT mappings for a network.
//
// Like load balancing, the router receives every mapping of the network
// on each apply. The changes handed to the applier (typically one
// mapping being enabled or disabled) are overlaid on the mappings read
// from the store.

use std::net::Ipv4Addr;

use netrules_api::command::{SetStaticNatRulesCommand, StaticNatRuleTo};
use netrules_api::{CommandBody, RouterCommand, RoutingMetadata};
use serde::{Deserialize, Serialize};

use crate::model::{IpAddress, IpAddressId, IpState, Network, VmId};
use crate::store::InventoryStore;

/// One public IP to VM mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticNat {
    pub ip_id: IpAddressId,
    pub public_ip: Ipv4Addr,
    pub vm_id: VmId,
    pub vm_ip: Ipv4Addr,
    pub revoked: bool,
}

impl StaticNat {
    /// The mapping an address currently holds, if any.
    pub fn of(ip: &IpAddress) -> Option<Self> {
        if !ip.one_to_one_nat {
            return None;
        }
        Some(Self {
            ip_id: ip.id,
            public_ip: ip.address,
            vm_id: ip.associated_with_vm?,
            vm_ip: ip.vm_ip?,
            revoked: false,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StaticNatRules {
    network: Network,
    changes: Vec<StaticNat>,
    entries: Vec<StaticNat>,
}

impl StaticNatRules {
    pub fn new(network: Network, changes: Vec<StaticNat>) -> Self {
        let entries = changes.clone();
        Self {
            network,
            changes,
            entries,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Mappings sent by the last `accept`, ordered by public address.
    pub fn entries(&self) -> &[StaticNat] {
        &self.entries
    }

    pub(crate) fn reload(&mut self, inventory: &dyn InventoryStore) {
        let mut entries: Vec<StaticNat> = inventory
            .ip_addresses_for_network(self.network.id)
            .iter()
            .filter(|ip| ip.state != IpState::Releasing)
            .filter(|ip| !self.changes.iter().any(|c| c.ip_id == ip.id))
            .filter_map(StaticNat::of)
            .collect();
        entries.extend(self.changes.iter().cloned());
        entries.sort_by_key(|e| e.public_ip);
        self.entries = entries;
    }

    pub fn create_commands(&self, routing: &RoutingMetadata) -> Vec<RouterCommand> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let rules = self
            .entries
            .iter()
            .map(|e| StaticNatRuleTo {
                id: None,
                src_ip: e.public_ip,
                dst_ip: e.vm_ip,
                protocol: None,
                port_range: None,
                revoked: e.revoked,
            })
            .collect();
        vec![RouterCommand::new(
            routing.clone(),
            CommandBody::SetStaticNatRules(SetStaticNatRulesCommand { rules }),
        )]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::NetworkId;
    use crate::store::MemoryStore;
    use crate::testing;

    fn nat_ip(id: u64, last: u8, vm: u64) -> IpAddress {
        let mut ip = testing::public_ip(id, [203, 0, 113, last]);
        ip.associated_with_network = Some(NetworkId(1));
        ip.one_to_one_nat = true;
        ip.associated_with_vm = Some(VmId(vm));
        ip.vm_ip = Some(Ipv4Addr::new(10, 1, 1, last));
        ip
    }

    #[test]
    fn full_set_is_resent_with_changes_overlaid() {
        let store = MemoryStore::new();
        store.insert_ip_address(nat_ip(1, 9, 1)).unwrap();
        store.insert_ip_address(nat_ip(2, 7, 2)).unwrap();
        let mut releasing = nat_ip(3, 8, 3);
        releasing.state = IpState::Releasing;
        store.insert_ip_address(releasing).unwrap();

        let mut disabled = StaticNat::of(&nat_ip(1, 9, 1)).unwrap();
        disabled.revoked = true;
        let mut applier = StaticNatRules::new(testing::network(1), vec![disabled]);
        applier.reload(&store);

        let entries = applier.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].public_ip, Ipv4Addr::new(203, 0, 113, 7));
        assert!(!entries[0].revoked);
        assert_eq!(entries[1].public_ip, Ipv4Addr::new(203, 0, 113, 9));
        assert!(entries[1].revoked);

        let first = applier.create_commands(&testing::routing());
        applier.reload(&store);
        assert_eq!(applier.create_commands(&testing::routing()), first);
    }

    #[test]
    fn mapping_requires_vm_and_guest_address() {
        let mut ip = nat_ip(1, 9, 1);
        assert!(StaticNat::of(&ip).is_some());
        ip.vm_ip = None;
        assert!(StaticNat::of(&ip).is_none());
    }
}
