#![allow(clippy::unwrap_used)]

// Property tests for the conflict detector and port range parsing.

use std::net::Ipv4Addr;

use chrono::Utc;
use netrules_core::detect_conflict;
use netrules_core::model::{
    AccountId, DomainId, FirewallRule, IpAddressId, NetworkId, NetworkRule, PortForwardingRule,
    PortRange, Protocol, Purpose, RuleId, RuleState, TrafficType, VmId,
};
use proptest::prelude::*;
use uuid::Uuid;

fn base(id: u64, purpose: Purpose, protocol: Protocol, ports: PortRange) -> FirewallRule {
    FirewallRule {
        id: RuleId(id),
        uuid: Uuid::new_v4(),
        source_ip_address_id: Some(IpAddressId(1)),
        ports: Some(ports),
        protocol,
        purpose,
        traffic_type: TrafficType::Ingress,
        state: RuleState::Active,
        network_id: NetworkId(1),
        account_id: AccountId(1),
        domain_id: DomainId(1),
        created: Utc::now(),
        source_cidrs: Vec::new(),
        dest_cidrs: Vec::new(),
        icmp_type: None,
        icmp_code: None,
        related: None,
    }
}

fn protocol() -> impl Strategy<Value = Protocol> {
    prop_oneof![
        Just(Protocol::Tcp),
        Just(Protocol::Udp),
        Just(Protocol::Icmp),
        Just(Protocol::All),
    ]
}

fn ports() -> impl Strategy<Value = PortRange> {
    (1u16..2000, 0u16..50).prop_map(|(start, len)| PortRange::new(start, start + len).unwrap())
}

/// Any rule kind that can sit on a public IP.
fn rule(id: u64) -> impl Strategy<Value = NetworkRule> {
    let kind = 0u8..4;
    (kind, protocol(), ports(), 10u8..12).prop_map(move |(kind, protocol, ports, octet)| {
        match kind {
            0 => NetworkRule::Firewall(base(id, Purpose::Firewall, protocol, ports)),
            1 => NetworkRule::StaticNat(base(id, Purpose::StaticNat, protocol, ports)),
            2 => NetworkRule::Vpn(base(id, Purpose::Vpn, protocol, ports)),
            _ => {
                let protocol = if protocol.has_ports() { protocol } else { Protocol::Tcp };
                NetworkRule::PortForwarding(PortForwardingRule {
                    rule: base(id, Purpose::PortForwarding, protocol, ports),
                    vm_id: VmId(u64::from(octet)),
                    destination_ip: Ipv4Addr::new(192, 168, 1, octet),
                    destination_ports: ports,
                })
            }
        }
    })
}

proptest! {
    #[test]
    fn conflict_detection_is_symmetric(a in rule(1), b in rule(2)) {
        let ab = detect_conflict(&a, std::slice::from_ref(&b)).is_err();
        let ba = detect_conflict(&b, std::slice::from_ref(&a)).is_err();
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn overlapping_forwards_always_conflict(
        start in 1u16..60000,
        len in 0u16..100,
        shift in 0u16..100,
    ) {
        let first = PortRange::new(start, start + len).unwrap();
        let second_start = start + shift.min(len);
        let second = PortRange::new(second_start, second_start + len).unwrap();
        let a = NetworkRule::PortForwarding(PortForwardingRule {
            rule: base(1, Purpose::PortForwarding, Protocol::Tcp, first),
            vm_id: VmId(1),
            destination_ip: Ipv4Addr::new(192, 168, 1, 10),
            destination_ports: first,
        });
        let b = NetworkRule::PortForwarding(PortForwardingRule {
            rule: base(2, Purpose::PortForwarding, Protocol::Tcp, second),
            vm_id: VmId(2),
            destination_ip: Ipv4Addr::new(192, 168, 1, 11),
            destination_ports: second,
        });
        prop_assert!(detect_conflict(&b, &[a]).is_err());
    }

    #[test]
    fn revoked_rules_never_conflict(a in rule(1), b in rule(2)) {
        let mut b = b;
        b.base_mut().state = RuleState::Revoke;
        prop_assert!(detect_conflict(&a, &[b]).is_ok());
    }

    #[test]
    fn port_ranges_keep_start_before_end(start: u16, end: u16) {
        match PortRange::new(start, end) {
            Ok(range) => {
                prop_assert!(range.start() <= range.end());
                prop_assert_eq!(range.span(), end - start);
            }
            Err(_) => prop_assert!(start > end),
        }
    }
}
