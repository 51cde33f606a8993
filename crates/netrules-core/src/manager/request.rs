// ── Typed manager requests ──
//
// Resources are referenced by UUID. `uuid` fields are optional
// idempotency tokens: a resubmitted request with the same token and the
// same content returns the existing rule.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{
    AclAction, HealthCheckPolicy, Ipv4Cidr, LbAlgorithm, SslCert, StickinessPolicy, TrafficType,
};

// ── Port forwarding ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePortForwardingRequest {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub ip_address: Uuid,
    /// Guest network; defaults to the one the IP is associated with. A
    /// VPC address not yet serving a tier is associated with it.
    #[serde(default)]
    pub network: Option<Uuid>,
    pub vm: Uuid,
    /// Defaults to the VM's address in the network.
    #[serde(default)]
    pub vm_ip: Option<Ipv4Addr>,
    pub protocol: String,
    pub source_port_start: u16,
    pub source_port_end: u16,
    pub destination_port_start: u16,
    pub destination_port_end: u16,
    #[serde(default)]
    pub source_cidrs: Vec<Ipv4Cidr>,
    /// Also create an ingress firewall rule for the source ports.
    #[serde(default)]
    pub open_firewall: bool,
}

// ── Static NAT ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnableStaticNatRequest {
    pub ip_address: Uuid,
    pub vm: Uuid,
    #[serde(default)]
    pub network: Option<Uuid>,
    #[serde(default)]
    pub vm_ip: Option<Ipv4Addr>,
}

/// Port-scoped rule on an address with static NAT enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStaticNatRuleRequest {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub ip_address: Uuid,
    pub protocol: String,
    #[serde(default)]
    pub port_start: Option<u16>,
    #[serde(default)]
    pub port_end: Option<u16>,
    #[serde(default)]
    pub open_firewall: bool,
}

// ── Firewall ───────────────────────────────────────────────────────

/// Ingress rules name an `ip_address`, egress rules a `network`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFirewallRuleRequest {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub traffic_type: TrafficType,
    #[serde(default)]
    pub ip_address: Option<Uuid>,
    #[serde(default)]
    pub network: Option<Uuid>,
    pub protocol: String,
    #[serde(default)]
    pub port_start: Option<u16>,
    #[serde(default)]
    pub port_end: Option<u16>,
    #[serde(default)]
    pub source_cidrs: Vec<Ipv4Cidr>,
    #[serde(default)]
    pub dest_cidrs: Vec<Ipv4Cidr>,
    #[serde(default)]
    pub icmp_type: Option<i32>,
    #[serde(default)]
    pub icmp_code: Option<i32>,
}

// ── Load balancing ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLoadBalancerRequest {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub name: String,
    pub ip_address: Uuid,
    #[serde(default)]
    pub network: Option<Uuid>,
    pub protocol: String,
    pub public_port: u16,
    pub private_port: u16,
    /// Defaults to the configured algorithm.
    #[serde(default)]
    pub algorithm: Option<LbAlgorithm>,
    #[serde(default)]
    pub stickiness: Vec<StickinessPolicy>,
    #[serde(default)]
    pub health_checks: Vec<HealthCheckPolicy>,
    #[serde(default)]
    pub ssl_cert: Option<SslCert>,
}

// ── VPC ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrivateGatewayRequest {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub vpc: Uuid,
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub vlan_tag: String,
    #[serde(default)]
    pub source_nat: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAclItemRequest {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub network: Uuid,
    /// Evaluation position; defaults to one past the highest number in use.
    #[serde(default)]
    pub number: Option<u32>,
    pub protocol: String,
    #[serde(default)]
    pub port_start: Option<u16>,
    #[serde(default)]
    pub port_end: Option<u16>,
    #[serde(default)]
    pub cidrs: Vec<Ipv4Cidr>,
    pub action: AclAction,
    pub traffic_type: TrafficType,
}

// ── Router services ────────────────────────────────────────────────

/// Remote-access VPN user, served by the routers of `network`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AddVpnUserRequest {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub network: Uuid,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AddVpnUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddVpnUserRequest")
            .field("network", &self.network)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
