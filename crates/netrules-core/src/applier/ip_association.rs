// Public IP association for non-VPC routers.

use std::collections::BTreeMap;

use netrules_api::command::{IpAddressTo, IpAssocCommand};
use netrules_api::{CommandBody, RouterCommand, RoutingMetadata};

use crate::model::{IpAddress, IpState, Network, Nic, NicKind};

#[derive(Debug, Clone)]
pub struct IpAssociationRules {
    network: Network,
    addresses: Vec<IpAddress>,
}

impl IpAssociationRules {
    pub fn new(network: Network, addresses: Vec<IpAddress>) -> Self {
        Self { network, addresses }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn addresses(&self) -> &[IpAddress] {
        &self.addresses
    }

    /// One `IpAssoc` per public VLAN. Releasing addresses are removed.
    pub fn create_commands(&self, routing: &RoutingMetadata, router_nics: &[Nic]) -> Vec<RouterCommand> {
        ip_assoc_commands(routing, &self.addresses, router_nics, false, |ip| {
            ip.state != IpState::Releasing
        })
    }
}

/// Group `addresses` by VLAN and build one `IpAssoc` per group, lowest
/// VLAN tag first. The first address of each group is flagged as the
/// VLAN's first IP. With `require_nic`, groups whose VLAN has no public
/// NIC on the router are skipped.
pub fn ip_assoc_commands(
    routing: &RoutingMetadata,
    addresses: &[IpAddress],
    router_nics: &[Nic],
    require_nic: bool,
    add: impl Fn(&IpAddress) -> bool,
) -> Vec<RouterCommand> {
    let mut by_vlan: BTreeMap<&str, Vec<&IpAddress>> = BTreeMap::new();
    for ip in addresses {
        by_vlan.entry(ip.vlan.tag.as_str()).or_default().push(ip);
    }

    let mut commands = Vec::with_capacity(by_vlan.len());
    for (tag, mut ips) in by_vlan {
        let nic_mac = router_nics
            .iter()
            .find(|n| n.kind == NicKind::Public && n.vlan_tag == tag)
            .map(|n| n.mac.clone());
        if require_nic && nic_mac.is_none() {
            continue;
        }
        ips.sort_by_key(|ip| ip.address);
        let ips = ips
            .into_iter()
            .enumerate()
            .map(|(i, ip)| IpAddressTo {
                public_ip: ip.address,
                add: add(ip),
                source_nat: ip.source_nat,
                one_to_one_nat: ip.one_to_one_nat,
                first_ip: i == 0,
                vlan_tag: ip.vlan.tag.clone(),
                vlan_gateway: ip.vlan.gateway,
                vlan_netmask: ip.vlan.netmask,
                nic_mac: nic_mac.clone(),
            })
            .collect();
        commands.push(RouterCommand::new(
            routing.clone(),
            CommandBody::IpAssoc(IpAssocCommand { ips }),
        ));
    }
    commands
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::testing;

    #[test]
    fn one_command_per_vlan_with_first_ip_flag() {
        let mut a = testing::public_ip(1, [203, 0, 113, 6]);
        let b = testing::public_ip(2, [203, 0, 113, 5]);
        let mut c = testing::public_ip(3, [198, 51, 100, 5]);
        c.vlan.tag = "vlan://30".into();
        a.state = IpState::Releasing;

        let applier = IpAssociationRules::new(testing::network(1), vec![a, b, c]);
        let commands = applier.create_commands(&testing::routing(), &[]);
        assert_eq!(commands.len(), 2);

        let CommandBody::IpAssoc(first) = &commands[0].body else {
            panic!("unexpected command {:?}", commands[0].kind());
        };
        assert_eq!(first.ips.len(), 2);
        assert_eq!(first.ips[0].public_ip, Ipv4Addr::new(203, 0, 113, 5));
        assert!(first.ips[0].first_ip && first.ips[0].add);
        assert!(!first.ips[1].first_ip && !first.ips[1].add);

        let CommandBody::IpAssoc(second) = &commands[1].body else {
            panic!("unexpected command {:?}", commands[1].kind());
        };
        assert_eq!(second.ips[0].vlan_tag, "vlan://30");
    }

    #[test]
    fn required_nic_filters_groups() {
        let ip = testing::public_ip(1, [203, 0, 113, 5]);
        let commands =
            ip_assoc_commands(&testing::routing(), &[ip.clone()], &[], true, |_| true);
        assert!(commands.is_empty());

        let nic = testing::public_nic(1, &ip);
        let commands = ip_assoc_commands(&testing::routing(), &[ip], &[nic.clone()], true, |_| true);
        let CommandBody::IpAssoc(cmd) = &commands[0].body else {
            panic!("unexpected command {:?}", commands[0].kind());
        };
        assert_eq!(cmd.ips[0].nic_mac.as_deref(), Some(nic.mac.as_str()));
    }
}
