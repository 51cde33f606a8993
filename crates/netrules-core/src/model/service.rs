// ── VPC and router service entities ──
//
// Network ACL items, remote-access VPN users, and VPC private gateways.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::cidr::Ipv4Cidr;
use super::ids::{AccountId, AclItemId, DomainId, NetworkId, PrivateGatewayId, VpcId, VpnUserId};
use super::rule::{PortRange, Protocol, RuleState, TrafficType};

// ── Network ACLs ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AclAction {
    Allow,
    Deny,
}

/// One entry of a VPC tier's ACL. Items are evaluated by ascending `number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAclItem {
    pub id: AclItemId,
    pub uuid: Uuid,
    pub network_id: NetworkId,
    pub number: u32,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortRange>,
    #[serde(default)]
    pub cidrs: Vec<Ipv4Cidr>,
    pub action: AclAction,
    pub traffic_type: TrafficType,
    pub state: RuleState,
}

// ── Remote-access VPN ───────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnUser {
    pub id: VpnUserId,
    pub uuid: Uuid,
    pub account_id: AccountId,
    pub domain_id: DomainId,
    pub username: String,
    pub password: String,
    pub state: RuleState,
}

impl std::fmt::Debug for VpnUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VpnUser")
            .field("uuid", &self.uuid)
            .field("username", &self.username)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ── Private gateways ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GatewayState {
    Creating,
    Ready,
    Deleting,
}

/// A VPC's uplink into a private VLAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateGateway {
    pub id: PrivateGatewayId,
    pub uuid: Uuid,
    pub vpc_id: VpcId,
    /// The VPC router's address on the private VLAN.
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub vlan_tag: String,
    /// Translate VPC traffic leaving through this gateway.
    #[serde(default)]
    pub source_nat: bool,
    pub state: GatewayState,
}
