// Public NIC hot-plug for VPC routers.
//
// A VPC router carries one public NIC per public VLAN it holds addresses
// on. Before associating addresses, the router's NICs are brought in
// line: NICs for VLANs that lost their last address are unplugged, NICs
// for new VLANs are plugged. When the only address of a VLAN is swapped
// for another one, the existing NIC is re-addressed in place instead.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::model::{IpAddress, IpState, Network, Nic, NicId, NicKind};

#[derive(Debug, Clone)]
pub struct NicPlugInOutRules {
    network: Network,
    addresses: Vec<IpAddress>,
}

impl NicPlugInOutRules {
    pub fn new(network: Network, addresses: Vec<IpAddress>) -> Self {
        Self { network, addresses }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn addresses(&self) -> &[IpAddress] {
        &self.addresses
    }
}

/// NIC work for one router, keyed by VLAN tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NicChanges {
    /// VLANs that need a new NIC, with the address that brings it up.
    pub plug: BTreeMap<String, IpAddress>,
    /// VLANs whose NIC must go, with the address it carried.
    pub unplug: BTreeMap<String, IpAddress>,
    /// Existing NICs to keep, moved to a new address.
    pub readdress: Vec<(Nic, Ipv4Addr)>,
}

impl NicChanges {
    pub fn is_empty(&self) -> bool {
        self.plug.is_empty() && self.unplug.is_empty() && self.readdress.is_empty()
    }
}

/// An address is on its way out when it is releasing or no longer
/// allocated to its VPC.
pub(crate) fn is_releasing(ip: &IpAddress) -> bool {
    ip.state == IpState::Releasing || !ip.is_allocated_to_vpc()
}

fn is_wanted(ip: &IpAddress) -> bool {
    !is_releasing(ip) && matches!(ip.state, IpState::Allocated | IpState::Allocating)
}

/// Partition `addresses` into NICs to plug, unplug, and re-address on a
/// router currently holding `router_nics`.
pub fn nics_to_change(addresses: &[IpAddress], router_nics: &[Nic]) -> NicChanges {
    let public: Vec<&Nic> = router_nics
        .iter()
        .filter(|n| n.kind == NicKind::Public)
        .collect();
    let mut changes = NicChanges::default();

    for ip in addresses.iter().filter(|ip| is_releasing(ip)) {
        if public.iter().any(|n| n.ip == ip.address) {
            changes.unplug.insert(ip.vlan.tag.clone(), ip.clone());
        }
    }

    for ip in addresses.iter().filter(|ip| is_wanted(ip)) {
        let tag = &ip.vlan.tag;
        let has_nic = public.iter().any(|n| &n.vlan_tag == tag);
        if !has_nic && !changes.plug.contains_key(tag) {
            changes.plug.insert(tag.clone(), ip.clone());
            continue;
        }
        if let Some(leaving) = changes.unplug.remove(tag) {
            if let Some(nic) = public.iter().find(|n| n.ip == leaving.address) {
                changes.readdress.push(((*nic).clone(), ip.address));
            }
        }
    }
    changes
}

/// Locally administered MAC derived from the NIC id.
pub fn generate_mac(id: NicId) -> String {
    let b = id.0.to_be_bytes();
    format!("02:00:{:02x}:{:02x}:{:02x}:{:02x}", b[4], b[5], b[6], b[7])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{NetworkId, VpcId};
    use crate::testing;

    fn vpc_ip(id: u64, last: u8, vlan: &str) -> IpAddress {
        let mut ip = testing::public_ip(id, [203, 0, 113, last]);
        ip.vpc_id = Some(VpcId(1));
        ip.associated_with_network = Some(NetworkId(1));
        ip.vlan.tag = vlan.into();
        ip
    }

    #[test]
    fn new_vlan_is_plugged_once() {
        let a = vpc_ip(1, 5, "vlan://20");
        let b = vpc_ip(2, 6, "vlan://20");
        let changes = nics_to_change(&[a.clone(), b], &[]);
        assert_eq!(changes.plug.len(), 1);
        assert_eq!(changes.plug["vlan://20"].address, a.address);
        assert!(changes.unplug.is_empty());
    }

    #[test]
    fn last_address_leaving_unplugs_the_nic() {
        let mut ip = vpc_ip(1, 5, "vlan://20");
        let nic = testing::public_nic(1, &ip);
        ip.state = IpState::Releasing;
        let changes = nics_to_change(&[ip], &[nic]);
        assert!(changes.plug.is_empty());
        assert_eq!(changes.unplug.len(), 1);
    }

    #[test]
    fn unassociated_vpc_address_counts_as_releasing() {
        let mut ip = vpc_ip(1, 5, "vlan://20");
        let nic = testing::public_nic(1, &ip);
        ip.associated_with_network = None;
        let changes = nics_to_change(&[ip], &[nic]);
        assert_eq!(changes.unplug.len(), 1);
    }

    #[test]
    fn swap_on_same_vlan_readdresses_the_nic() {
        let mut old = vpc_ip(1, 5, "vlan://20");
        let nic = testing::public_nic(1, &old);
        old.state = IpState::Releasing;
        let new = vpc_ip(2, 6, "vlan://20");

        let changes = nics_to_change(&[old, new.clone()], &[nic.clone()]);
        assert!(changes.plug.is_empty());
        assert!(changes.unplug.is_empty());
        assert_eq!(changes.readdress, vec![(nic, new.address)]);
    }

    #[test]
    fn existing_nic_needs_nothing() {
        let ip = vpc_ip(1, 5, "vlan://20");
        let nic = testing::public_nic(1, &ip);
        assert!(nics_to_change(&[ip], &[nic]).is_empty());
    }

    #[test]
    fn mac_is_locally_administered() {
        assert_eq!(generate_mac(NicId(0x0102)), "02:00:00:00:01:02");
    }
}
