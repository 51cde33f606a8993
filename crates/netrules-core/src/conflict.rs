// ── Conflict detection ──
//
// Decides whether a new rule may coexist with the rules already claiming
// the same public IP (or, for egress firewall rules, the same network).
// The checks are symmetric: swapping the new and the existing rule never
// changes the verdict.

use tracing::debug;

use crate::error::CoreError;
use crate::model::{FirewallRule, NetworkRule, Protocol, Purpose};

/// Fail with `NetworkRuleConflict` if `new` is incompatible with any rule
/// in `existing`. Revoked rules and `new` itself are ignored.
pub fn detect_conflict(new: &NetworkRule, existing: &[NetworkRule]) -> Result<(), CoreError> {
    for rule in existing {
        if rule.id() == new.id() || rule.base().is_revoked() {
            continue;
        }
        if let Some(reason) = conflict_between(new, rule) {
            debug!(new = %new.uuid(), existing = %rule.uuid(), %reason, "rule conflict");
            return Err(CoreError::conflict(format!(
                "rule {} conflicts with rule {}: {reason}",
                new.uuid(),
                rule.uuid()
            )));
        }
    }
    Ok(())
}

/// Why `a` and `b` cannot coexist, or `None` when they can.
pub fn conflict_between(a: &NetworkRule, b: &NetworkRule) -> Option<String> {
    let (x, y) = (a.base(), b.base());

    if !same_scope(x, y) {
        return None;
    }
    if x.network_id != y.network_id {
        return Some("the rules are for different networks".into());
    }

    let x_fw = x.purpose == Purpose::Firewall;
    let y_fw = y.purpose == Purpose::Firewall;
    if x_fw != y_fw {
        // Filtering and translation rules never compete for ports.
        return None;
    }
    if x_fw {
        return firewall_conflict(a, b);
    }

    let x_nat = x.purpose == Purpose::StaticNat;
    let y_nat = y.purpose == Purpose::StaticNat;
    if x_nat != y_nat {
        return Some("static NAT claims the whole IP address".into());
    }

    if !protocols_clash(x.protocol, y.protocol) {
        return None;
    }
    let (xp, yp) = (x.effective_ports(), y.effective_ports());
    if !xp.overlaps(&yp) {
        return None;
    }
    if a.is_identical(b) {
        return None;
    }
    Some(format!(
        "{} ports {xp} overlap {} ports {yp}",
        x.protocol, y.protocol
    ))
}

/// Rules compete only on the same public IP, or for network-scoped
/// (egress) rules, on the same network.
fn same_scope(x: &FirewallRule, y: &FirewallRule) -> bool {
    match (x.source_ip_address_id, y.source_ip_address_id) {
        (Some(a), Some(b)) => a == b,
        (None, None) => x.network_id == y.network_id,
        _ => false,
    }
}

/// `all` and ICMP take every port, so they clash with any protocol.
fn protocols_clash(a: Protocol, b: Protocol) -> bool {
    a == b || matches!(a, Protocol::All | Protocol::Icmp) || matches!(b, Protocol::All | Protocol::Icmp)
}

fn firewall_conflict(a: &NetworkRule, b: &NetworkRule) -> Option<String> {
    let (x, y) = (a.base(), b.base());
    if x.traffic_type != y.traffic_type {
        return None;
    }
    let shared_cidr = x
        .effective_source_cidrs()
        .iter()
        .any(|c| y.effective_source_cidrs().iter().any(|d| c.intersects(d)));
    if !shared_cidr {
        return None;
    }

    let clash = match (x.protocol, y.protocol) {
        (Protocol::Icmp, Protocol::Icmp) => {
            icmp_matches(x.icmp_type, y.icmp_type) && icmp_matches(x.icmp_code, y.icmp_code)
        }
        (p, q) if p == q => x.effective_ports().overlaps(&y.effective_ports()),
        (Protocol::All, _) | (_, Protocol::All) => true,
        _ => false,
    };
    if !clash || a.is_identical(b) {
        return None;
    }
    Some(format!(
        "{} firewall rule overlaps an existing {} rule for the same source",
        x.protocol, y.protocol
    ))
}

/// ICMP type and code `-1` (or absent) match every value.
fn icmp_matches(a: Option<i32>, b: Option<i32>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) if a >= 0 && b >= 0 => a == b,
        _ => true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::net::Ipv4Addr;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::model::{
        AccountId, DomainId, IpAddressId, Ipv4Cidr, NetworkId, PortForwardingRule, PortRange,
        RuleId, RuleState, TrafficType, VmId,
    };

    pub(crate) fn base(id: u64, purpose: Purpose, protocol: Protocol, ports: &str) -> FirewallRule {
        FirewallRule {
            id: RuleId(id),
            uuid: Uuid::new_v4(),
            source_ip_address_id: Some(IpAddressId(1)),
            ports: protocol.has_ports().then(|| ports.parse().unwrap()),
            protocol,
            purpose,
            traffic_type: TrafficType::Ingress,
            state: RuleState::Active,
            network_id: NetworkId(1),
            account_id: AccountId(1),
            domain_id: DomainId(1),
            created: Utc::now(),
            source_cidrs: vec![],
            dest_cidrs: vec![],
            icmp_type: None,
            icmp_code: None,
            related: None,
        }
    }

    fn pf(id: u64, ports: &str, dest: [u8; 4]) -> NetworkRule {
        NetworkRule::PortForwarding(PortForwardingRule {
            rule: base(id, Purpose::PortForwarding, Protocol::Tcp, ports),
            vm_id: VmId(u64::from(dest[3])),
            destination_ip: Ipv4Addr::from(dest),
            destination_ports: ports.parse().unwrap(),
        })
    }

    fn fw(id: u64, protocol: Protocol, ports: &str, cidr: &str) -> NetworkRule {
        let mut rule = base(id, Purpose::Firewall, protocol, ports);
        rule.source_cidrs = vec![cidr.parse::<Ipv4Cidr>().unwrap()];
        NetworkRule::Firewall(rule)
    }

    #[test]
    fn overlapping_pf_to_different_vms_conflicts() {
        let existing = vec![pf(1, "22", [192, 168, 1, 10])];
        let new = pf(2, "22", [192, 168, 1, 11]);
        let err = detect_conflict(&new, &existing).unwrap_err();
        assert!(matches!(err, CoreError::NetworkRuleConflict { .. }));
    }

    #[test]
    fn identical_resubmission_is_not_a_conflict() {
        let existing = vec![pf(1, "22", [192, 168, 1, 10])];
        let new = pf(2, "22", [192, 168, 1, 10]);
        assert!(detect_conflict(&new, &existing).is_ok());
    }

    #[test]
    fn disjoint_ranges_coexist() {
        let existing = vec![pf(1, "20-30", [192, 168, 1, 10])];
        assert!(detect_conflict(&pf(2, "31-40", [192, 168, 1, 11]), &existing).is_ok());
        assert!(detect_conflict(&pf(3, "30-40", [192, 168, 1, 11]), &existing).is_err());
    }

    #[test]
    fn revoked_and_self_are_ignored() {
        let mut revoked = pf(1, "22", [192, 168, 1, 10]);
        revoked.base_mut().state = RuleState::Revoke;
        let new = pf(2, "22", [192, 168, 1, 11]);
        assert!(detect_conflict(&new, &[revoked, new.clone()]).is_ok());
    }

    #[test]
    fn static_nat_claims_the_whole_ip() {
        let nat = NetworkRule::StaticNat(base(1, Purpose::StaticNat, Protocol::Tcp, "80"));
        let new = pf(2, "22", [192, 168, 1, 11]);
        assert!(detect_conflict(&new, std::slice::from_ref(&nat)).is_err());
        assert!(detect_conflict(&nat, &[new]).is_err());
    }

    #[test]
    fn firewall_rules_do_not_compete_with_nat_rules() {
        let existing = vec![pf(1, "22", [192, 168, 1, 10])];
        let new = fw(2, Protocol::Tcp, "22", "0.0.0.0/0");
        assert!(detect_conflict(&new, &existing).is_ok());
    }

    #[test]
    fn firewall_rules_with_disjoint_sources_coexist() {
        let existing = vec![fw(1, Protocol::Tcp, "22", "10.0.0.0/8")];
        assert!(detect_conflict(&fw(2, Protocol::Tcp, "22", "192.168.0.0/16"), &existing).is_ok());
        assert!(detect_conflict(&fw(3, Protocol::Tcp, "22", "10.1.0.0/16"), &existing).is_err());
    }

    #[test]
    fn icmp_firewall_rules_compare_type_and_code() {
        let mut echo = base(1, Purpose::Firewall, Protocol::Icmp, "");
        echo.icmp_type = Some(8);
        echo.icmp_code = Some(0);
        let mut unreachable = base(2, Purpose::Firewall, Protocol::Icmp, "");
        unreachable.icmp_type = Some(3);
        unreachable.icmp_code = Some(0);
        let existing = vec![NetworkRule::Firewall(echo)];
        assert!(detect_conflict(&NetworkRule::Firewall(unreachable), &existing).is_ok());

        let any = base(3, Purpose::Firewall, Protocol::Icmp, "");
        assert!(detect_conflict(&NetworkRule::Firewall(any), &existing).is_err());
    }

    #[test]
    fn same_ip_on_another_network_conflicts() {
        let existing = vec![pf(1, "22", [192, 168, 1, 10])];
        let mut new = pf(2, "2222", [192, 168, 1, 10]);
        new.base_mut().network_id = NetworkId(9);
        assert!(detect_conflict(&new, &existing).is_err());
    }

    #[test]
    fn different_ips_never_conflict() {
        let existing = vec![pf(1, "22", [192, 168, 1, 10])];
        let mut new = pf(2, "22", [192, 168, 1, 11]);
        new.base_mut().source_ip_address_id = Some(IpAddressId(2));
        assert!(detect_conflict(&new, &existing).is_ok());
    }

    #[test]
    fn port_less_protocols_take_every_port() {
        let all = NetworkRule::PortForwarding(PortForwardingRule {
            rule: base(1, Purpose::PortForwarding, Protocol::All, ""),
            vm_id: VmId(1),
            destination_ip: Ipv4Addr::new(192, 168, 1, 10),
            destination_ports: PortRange::ALL,
        });
        assert!(detect_conflict(&pf(2, "443", [192, 168, 1, 11]), &[all]).is_err());
    }
}
