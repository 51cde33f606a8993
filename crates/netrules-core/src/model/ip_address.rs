// ── Public IP addresses ──
//
// The principal shared mutable resource. NAT and association flags are
// only written through `InventoryStore::update_ip_address`, which checks
// `version`.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use super::ids::{AccountId, DomainId, IpAddressId, NetworkId, VmId, VpcId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IpState {
    Allocating,
    Allocated,
    Releasing,
    Free,
}

/// Public VLAN an address belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vlan {
    /// Broadcast URI, e.g. `vlan://20`.
    pub tag: String,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct IpAddress {
    pub id: IpAddressId,
    pub uuid: Uuid,
    pub address: Ipv4Addr,
    pub state: IpState,
    pub vlan: Vlan,
    #[serde(default)]
    pub source_nat: bool,
    #[serde(default)]
    pub one_to_one_nat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_with_network: Option<NetworkId>,
    /// VM the address is statically NATed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_with_vm: Option<VmId>,
    /// Guest address of `associated_with_vm` that receives the traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_ip: Option<Ipv4Addr>,
    /// VPC that owns the address, for VPC public IPs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<VpcId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<DomainId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by every update.
    #[serde(default)]
    pub version: u64,
}

impl IpAddress {
    /// Ready to carry rules.
    pub fn is_ready(&self) -> bool {
        self.state == IpState::Allocated
    }

    /// A VPC address counts as allocated to its VPC once it serves a tier
    /// or is the VPC's source NAT address.
    pub fn is_allocated_to_vpc(&self) -> bool {
        self.vpc_id.is_some() && (self.source_nat || self.associated_with_network.is_some())
    }
}
