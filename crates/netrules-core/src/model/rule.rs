// ── Rule entity model ──
//
// `FirewallRule` is the base row every rule category shares. Categories
// that carry more data wrap it; `NetworkRule` is the closed union the
// store persists.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::cidr::Ipv4Cidr;
use super::ids::{AccountId, DomainId, IpAddressId, NetworkId, RuleId, VmId};
use super::load_balancer::LoadBalancingRule;
use crate::error::CoreError;

// ── Enumerations ────────────────────────────────────────────────────

/// Transport protocol a rule matches. Parsed case-insensitively and
/// always rendered lower-case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    All,
}

impl Protocol {
    /// Only TCP and UDP rules carry port ranges.
    pub fn has_ports(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Purpose {
    Firewall,
    PortForwarding,
    StaticNat,
    LoadBalancing,
    Vpn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TrafficType {
    Ingress,
    Egress,
}

/// Rule lifecycle: `Staged -> Add -> Active`, then `Revoke` and removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuleState {
    /// Persisted, not yet checked for conflicts.
    Staged,
    /// Accepted and waiting to be programmed.
    Add,
    /// Programmed on every reachable router.
    Active,
    /// Waiting for a successful apply to be removed.
    Revoke,
}

impl RuleState {
    /// States that take part in an apply (everything past `Staged`).
    pub fn needs_programming(self) -> bool {
        !matches!(self, Self::Staged)
    }
}

// ── Port ranges ─────────────────────────────────────────────────────

/// Inclusive port range, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPortRange")]
pub struct PortRange {
    start: u16,
    end: u16,
}

#[derive(Deserialize)]
struct RawPortRange {
    start: u16,
    end: u16,
}

impl TryFrom<RawPortRange> for PortRange {
    type Error = CoreError;

    fn try_from(raw: RawPortRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl PortRange {
    /// Every port. Used as the effective range of port-less protocols.
    pub const ALL: Self = Self {
        start: 0,
        end: u16::MAX,
    };

    pub fn new(start: u16, end: u16) -> Result<Self, CoreError> {
        if start > end {
            return Err(CoreError::invalid(format!(
                "start port {start} can't be bigger than end port {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    /// `end - start`; zero for a single port.
    pub fn span(&self) -> u16 {
        self.end - self.start
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.start.max(other.start) <= self.end.min(other.end)
    }

    pub fn to_wire(self) -> [u16; 2] {
        [self.start, self.end]
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for PortRange {
    type Err = CoreError;

    /// Accepts `22` or `8000-8100`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| CoreError::invalid(format!("{s} is not a valid port range")))
        };
        match s.split_once('-') {
            Some((start, end)) => Self::new(parse(start)?, parse(end)?),
            None => Ok(Self::single(parse(s)?)),
        }
    }
}

// ── Base rule ───────────────────────────────────────────────────────

/// Fields shared by every rule category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: RuleId,
    /// External identifier; what users and error messages see.
    pub uuid: Uuid,
    /// Public IP the rule applies to. `None` for egress rules, which are
    /// scoped to the network.
    pub source_ip_address_id: Option<IpAddressId>,
    /// `None` for protocols without ports.
    pub ports: Option<PortRange>,
    pub protocol: Protocol,
    pub purpose: Purpose,
    pub traffic_type: TrafficType,
    pub state: RuleState,
    pub network_id: NetworkId,
    pub account_id: AccountId,
    pub domain_id: DomainId,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_cidrs: Vec<Ipv4Cidr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dest_cidrs: Vec<Ipv4Cidr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_code: Option<i32>,
    /// Parent rule for rules created alongside another one (the firewall
    /// rule opened for a port forwarding rule). Revoked with the parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<RuleId>,
}

impl FirewallRule {
    /// Port range used for overlap checks: the rule's own range for TCP
    /// and UDP, every port otherwise.
    pub fn effective_ports(&self) -> PortRange {
        match self.ports {
            Some(ports) if self.protocol.has_ports() => ports,
            _ => PortRange::ALL,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.state == RuleState::Revoke
    }

    /// Source CIDRs with the empty list read as "anywhere".
    pub fn effective_source_cidrs(&self) -> Vec<Ipv4Cidr> {
        if self.source_cidrs.is_empty() {
            vec![Ipv4Cidr::any()]
        } else {
            self.source_cidrs.clone()
        }
    }

    /// Same match criteria, ignoring identity and lifecycle fields.
    pub fn same_match(&self, other: &Self) -> bool {
        self.source_ip_address_id == other.source_ip_address_id
            && self.network_id == other.network_id
            && self.purpose == other.purpose
            && self.protocol == other.protocol
            && self.effective_ports() == other.effective_ports()
            && self.traffic_type == other.traffic_type
            && self.source_cidrs == other.source_cidrs
            && self.dest_cidrs == other.dest_cidrs
            && self.icmp_type == other.icmp_type
            && self.icmp_code == other.icmp_code
    }
}

// ── Port forwarding ─────────────────────────────────────────────────

/// Forwards `rule.ports` on the public IP to `destination_ports` on a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardingRule {
    pub rule: FirewallRule,
    pub vm_id: VmId,
    pub destination_ip: Ipv4Addr,
    pub destination_ports: PortRange,
}

impl PortForwardingRule {
    /// Source range; port forwarding rules always have one.
    pub fn source_ports(&self) -> PortRange {
        self.rule.effective_ports()
    }
}

// ── Union ───────────────────────────────────────────────────────────

/// Any persisted rule. The variant always agrees with `rule.purpose`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkRule {
    Firewall(FirewallRule),
    PortForwarding(PortForwardingRule),
    /// Port-scoped static NAT; the destination is the IP's static NAT VM.
    StaticNat(FirewallRule),
    LoadBalancing(LoadBalancingRule),
    /// Ports reserved by a remote-access VPN on its public IP.
    Vpn(FirewallRule),
}

impl NetworkRule {
    pub fn base(&self) -> &FirewallRule {
        match self {
            Self::Firewall(r) | Self::StaticNat(r) | Self::Vpn(r) => r,
            Self::PortForwarding(pf) => &pf.rule,
            Self::LoadBalancing(lb) => &lb.rule,
        }
    }

    pub fn base_mut(&mut self) -> &mut FirewallRule {
        match self {
            Self::Firewall(r) | Self::StaticNat(r) | Self::Vpn(r) => r,
            Self::PortForwarding(pf) => &mut pf.rule,
            Self::LoadBalancing(lb) => &mut lb.rule,
        }
    }

    pub fn id(&self) -> RuleId {
        self.base().id
    }

    pub fn uuid(&self) -> Uuid {
        self.base().uuid
    }

    pub fn state(&self) -> RuleState {
        self.base().state
    }

    pub fn purpose(&self) -> Purpose {
        self.base().purpose
    }

    /// The purpose the variant implies.
    pub fn variant_purpose(&self) -> Purpose {
        match self {
            Self::Firewall(_) => Purpose::Firewall,
            Self::PortForwarding(_) => Purpose::PortForwarding,
            Self::StaticNat(_) => Purpose::StaticNat,
            Self::LoadBalancing(_) => Purpose::LoadBalancing,
            Self::Vpn(_) => Purpose::Vpn,
        }
    }

    pub fn as_port_forwarding(&self) -> Option<&PortForwardingRule> {
        match self {
            Self::PortForwarding(pf) => Some(pf),
            _ => None,
        }
    }

    pub fn as_load_balancing(&self) -> Option<&LoadBalancingRule> {
        match self {
            Self::LoadBalancing(lb) => Some(lb),
            _ => None,
        }
    }

    /// Same rule resubmitted: identical match criteria and, for port
    /// forwarding, the same destination.
    pub fn is_identical(&self, other: &Self) -> bool {
        if !self.base().same_match(other.base()) {
            return false;
        }
        match (self, other) {
            (Self::PortForwarding(a), Self::PortForwarding(b)) => {
                a.vm_id == b.vm_id
                    && a.destination_ip == b.destination_ip
                    && a.destination_ports == b.destination_ports
            }
            (Self::LoadBalancing(a), Self::LoadBalancing(b)) => {
                a.name == b.name && a.private_port == b.private_port && a.algorithm == b.algorithm
            }
            _ => true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parses_any_case_and_renders_lowercase() {
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::Icmp.to_string(), "icmp");
        assert!("gre".parse::<Protocol>().is_err());
    }

    #[test]
    fn port_range_parsing() {
        assert_eq!("22".parse::<PortRange>().unwrap(), PortRange::single(22));
        let range: PortRange = "8000-8100".parse().unwrap();
        assert_eq!((range.start(), range.end(), range.span()), (8000, 8100, 100));
        assert!("90-80".parse::<PortRange>().is_err());
        assert!("x".parse::<PortRange>().is_err());
    }

    #[test]
    fn port_range_rejects_inverted_bounds_on_deserialize() {
        let err = serde_json::from_str::<PortRange>(r#"{"start":9,"end":1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn overlap_is_inclusive() {
        let a = PortRange::new(20, 30).unwrap();
        assert!(a.overlaps(&PortRange::single(30)));
        assert!(a.overlaps(&PortRange::new(25, 40).unwrap()));
        assert!(!a.overlaps(&PortRange::single(31)));
    }
}
