// Shared fixtures for unit tests.

use std::net::Ipv4Addr;

use chrono::Utc;
use netrules_api::{RoutingMetadata, ZoneNetworkType};
use uuid::Uuid;

use crate::applier::generate_mac;
use crate::model::{
    Account, AccountId, AccountRole, DomainId, GatewayState, GuestType, IpAddress, IpAddressId,
    IpState, Network, NetworkId, Nic, NicId, NicKind, NicOwner, PrivateGateway, PrivateGatewayId,
    RedundantRole, RouterId, RouterState, VirtualMachine, VirtualRouter, Vlan, VmId, VmState, VpcId,
};

/// Isolated advanced-zone network 10.1.1.0/24 owned by account 1.
pub(crate) fn network(id: u64) -> Network {
    Network {
        id: NetworkId(id),
        uuid: Uuid::new_v4(),
        name: format!("net-{id}"),
        zone_type: ZoneNetworkType::Advanced,
        guest_type: GuestType::Isolated,
        vpc_id: None,
        account_id: AccountId(1),
        domain_id: DomainId(1),
        cidr: "10.1.1.0/24".parse().unwrap(),
        gateway: Ipv4Addr::new(10, 1, 1, 1),
        vlan_tag: "vlan://100".into(),
    }
}

/// Allocated public address on `vlan://20`, not yet associated.
pub(crate) fn public_ip(id: u64, octets: [u8; 4]) -> IpAddress {
    IpAddress {
        id: IpAddressId(id),
        uuid: Uuid::new_v4(),
        address: Ipv4Addr::from(octets),
        state: IpState::Allocated,
        vlan: Vlan {
            tag: "vlan://20".into(),
            gateway: Ipv4Addr::new(203, 0, 113, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        },
        source_nat: false,
        one_to_one_nat: false,
        associated_with_network: None,
        associated_with_vm: None,
        vm_ip: None,
        vpc_id: None,
        account_id: Some(AccountId(1)),
        domain_id: Some(DomainId(1)),
        allocated: Some(Utc::now()),
        version: 0,
    }
}

/// Public NIC of router `router_id` carrying `ip`.
pub(crate) fn public_nic(router_id: u64, ip: &IpAddress) -> Nic {
    let id = NicId(1000 + ip.id.0);
    Nic {
        id,
        owner: NicOwner::Router(RouterId(router_id)),
        kind: NicKind::Public,
        network_id: None,
        ip: ip.address,
        netmask: ip.vlan.netmask,
        gateway: ip.vlan.gateway,
        mac: generate_mac(id),
        vlan_tag: ip.vlan.tag.clone(),
        is_default: false,
    }
}

/// Default guest NIC of VM `vm_id` in `network`.
pub(crate) fn vm_nic(vm_id: u64, network: &Network, octets: [u8; 4]) -> Nic {
    let id = NicId(2000 + vm_id);
    Nic {
        id,
        owner: NicOwner::Vm(VmId(vm_id)),
        kind: NicKind::Guest,
        network_id: Some(network.id),
        ip: Ipv4Addr::from(octets),
        netmask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: network.gateway,
        mac: generate_mac(id),
        vlan_tag: network.vlan_tag.clone(),
        is_default: true,
    }
}

pub(crate) fn vm(id: u64) -> VirtualMachine {
    VirtualMachine {
        id: VmId(id),
        uuid: Uuid::new_v4(),
        name: format!("vm-{id}"),
        state: VmState::Running,
        account_id: AccountId(1),
        domain_id: DomainId(1),
        pod_id: None,
    }
}

/// Running router serving network 1.
pub(crate) fn router(id: u64, role: RedundantRole) -> VirtualRouter {
    VirtualRouter {
        id: RouterId(id),
        uuid: Uuid::new_v4(),
        name: format!("r-{id}-VM"),
        control_ip: Ipv4Addr::new(169, 254, 0, u8::try_from(id).unwrap()),
        state: RouterState::Running,
        role,
        pod_id: None,
        vpc_id: None,
        network_ids: vec![NetworkId(1)],
    }
}

pub(crate) fn account(id: u64, role: AccountRole) -> Account {
    Account {
        id: AccountId(id),
        uuid: Uuid::new_v4(),
        name: format!("acct-{id}"),
        domain_id: DomainId(1),
        role,
    }
}

pub(crate) fn private_gateway(source_nat: bool) -> PrivateGateway {
    PrivateGateway {
        id: PrivateGatewayId(1),
        uuid: Uuid::new_v4(),
        vpc_id: VpcId(1),
        ip: Ipv4Addr::new(172, 16, 0, 2),
        gateway: Ipv4Addr::new(172, 16, 0, 1),
        netmask: Ipv4Addr::new(255, 255, 255, 0),
        vlan_tag: "vlan://300".into(),
        source_nat,
        state: GatewayState::Creating,
    }
}

pub(crate) fn routing() -> RoutingMetadata {
    RoutingMetadata {
        router_name: "r-1-VM".into(),
        router_control_ip: Ipv4Addr::new(169, 254, 0, 1),
        router_guest_ip: None,
        zone_network_type: ZoneNetworkType::Advanced,
    }
}
