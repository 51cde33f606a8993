// ── Router command wire types ──
//
// Declarative "desired state" descriptors understood by the router agent.
// Every command replaces the router's configuration for its category; the
// agent never receives deltas. Rule entries flagged `revoked` are removed
// by the agent, everything else is (re)installed.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use uuid::Uuid;

/// Zone deployment mode as seen by the router agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneNetworkType {
    Basic,
    Advanced,
}

/// Addressing annotations attached to every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingMetadata {
    pub router_name: String,
    pub router_control_ip: Ipv4Addr,
    /// The router's own address inside the guest network, when it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router_guest_ip: Option<Ipv4Addr>,
    pub zone_network_type: ZoneNetworkType,
}

/// A single command addressed to one router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterCommand {
    pub routing: RoutingMetadata,
    #[serde(flatten)]
    pub body: CommandBody,
}

impl RouterCommand {
    pub fn new(routing: RoutingMetadata, body: CommandBody) -> Self {
        Self { routing, body }
    }

    /// Variant name, used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        (&self.body).into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandBody {
    IpAssoc(IpAssocCommand),
    SetSourceNat(SetSourceNatCommand),
    PlugNic(PlugNicCommand),
    UnplugNic(UnplugNicCommand),
    SetFirewallRules(SetFirewallRulesCommand),
    SetPortForwardingRules(SetPortForwardingRulesCommand),
    SetStaticNatRules(SetStaticNatRulesCommand),
    SetNetworkAcl(SetNetworkAclCommand),
    LoadBalancerConfig(LoadBalancerConfigCommand),
    SavePassword(SavePasswordCommand),
    VpnUsersCfg(VpnUsersCfgCommand),
    DhcpEntry(DhcpEntryCommand),
    CreateIpAlias(CreateIpAliasCommand),
}

// ── IP association ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAssocCommand {
    pub ips: Vec<IpAddressTo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct IpAddressTo {
    pub public_ip: Ipv4Addr,
    /// `false` removes the address from the router.
    pub add: bool,
    pub source_nat: bool,
    pub one_to_one_nat: bool,
    /// First address on its VLAN; the agent brings the interface up for it.
    pub first_ip: bool,
    pub vlan_tag: String,
    pub vlan_gateway: Ipv4Addr,
    pub vlan_netmask: Ipv4Addr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic_mac: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSourceNatCommand {
    pub public_ip: Ipv4Addr,
    pub vlan_tag: String,
    pub add: bool,
}

// ── NIC hot-plug ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugNicCommand {
    pub mac: String,
    pub vlan_tag: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnplugNicCommand {
    pub mac: String,
    pub vlan_tag: String,
}

// ── Filtering and NAT ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFirewallRulesCommand {
    pub traffic_type: String,
    pub rules: Vec<FirewallRuleTo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRuleTo {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<Ipv4Addr>,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_port_range: Option<[u16; 2]>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_cidrs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dest_cidrs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmp_code: Option<i32>,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPortForwardingRulesCommand {
    pub rules: Vec<PortForwardingRuleTo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardingRuleTo {
    pub id: Uuid,
    pub src_ip: Ipv4Addr,
    pub protocol: String,
    pub src_port_range: [u16; 2],
    pub dst_ip: Ipv4Addr,
    pub dst_port_range: [u16; 2],
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_cidrs: Vec<String>,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStaticNatRulesCommand {
    pub rules: Vec<StaticNatRuleTo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticNatRuleTo {
    /// Present for port-scoped static NAT rules, absent for whole-IP mappings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_range: Option<[u16; 2]>,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetNetworkAclCommand {
    pub guest_vlan_tag: String,
    pub guest_cidr: String,
    /// Sorted by `number`, lowest first.
    pub items: Vec<NetworkAclItemTo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAclItemTo {
    pub id: Uuid,
    pub number: u32,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_range: Option<[u16; 2]>,
    pub cidrs: Vec<String>,
    pub action: String,
    pub traffic_type: String,
    pub revoked: bool,
}

// ── Load balancing ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerConfigCommand {
    pub rules: Vec<LoadBalancerTo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerTo {
    pub id: Uuid,
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub protocol: String,
    pub algorithm: String,
    pub revoked: bool,
    pub destinations: Vec<LbDestinationTo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stickiness: Vec<StickinessPolicyTo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub health_checks: Vec<HealthCheckPolicyTo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_cert: Option<SslCertTo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbDestinationTo {
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
    pub weight: u32,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickinessPolicyTo {
    pub method: String,
    pub params: BTreeMap<String, String>,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckPolicyTo {
    pub ping_path: String,
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslCertTo {
    pub certificate: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

// ── VM services ────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePasswordCommand {
    pub vm_ip: Ipv4Addr,
    pub vm_name: String,
    pub password: String,
}

impl std::fmt::Debug for SavePasswordCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavePasswordCommand")
            .field("vm_ip", &self.vm_ip)
            .field("vm_name", &self.vm_name)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnUsersCfgCommand {
    pub users: Vec<VpnUserTo>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnUserTo {
    pub username: String,
    pub password: String,
    /// `false` removes the user.
    pub add: bool,
}

impl std::fmt::Debug for VpnUserTo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VpnUserTo")
            .field("username", &self.username)
            .field("add", &self.add)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpEntryCommand {
    pub vm_mac: String,
    pub vm_ip: Ipv4Addr,
    pub vm_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_router: Option<Ipv4Addr>,
    pub default_nic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIpAliasCommand {
    pub aliases: Vec<IpAliasTo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAliasTo {
    pub alias_ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub alias_count: u32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn routing() -> RoutingMetadata {
        RoutingMetadata {
            router_name: "r-10-VM".into(),
            router_control_ip: Ipv4Addr::new(169, 254, 0, 10),
            router_guest_ip: Some(Ipv4Addr::new(10, 1, 1, 1)),
            zone_network_type: ZoneNetworkType::Advanced,
        }
    }

    #[test]
    fn command_serializes_with_type_tag_beside_routing() {
        let cmd = RouterCommand::new(
            routing(),
            CommandBody::SetSourceNat(SetSourceNatCommand {
                public_ip: Ipv4Addr::new(203, 0, 113, 5),
                vlan_tag: "vlan://100".into(),
                add: true,
            }),
        );
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["type"], json!("set_source_nat"));
        assert_eq!(value["routing"]["router_name"], json!("r-10-VM"));
        assert_eq!(value["public_ip"], json!("203.0.113.5"));

        let back: RouterCommand = serde_json::from_value(value).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn kind_is_variant_name() {
        let cmd = RouterCommand::new(
            routing(),
            CommandBody::SetPortForwardingRules(SetPortForwardingRulesCommand { rules: vec![] }),
        );
        assert_eq!(cmd.kind(), "SetPortForwardingRules");
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let cmd = SavePasswordCommand {
            vm_ip: Ipv4Addr::new(10, 1, 1, 20),
            vm_name: "web-1".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{cmd:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }
}
