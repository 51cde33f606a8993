// ── Inventory: networks, routers, NICs, VMs, accounts ──
//
// Owned by the surrounding platform; the rules layer reads them and
// mutates only NIC rows (hot-plug on VPC routers).

use std::net::Ipv4Addr;

use netrules_api::{RouterEndpoint, ZoneNetworkType};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use super::cidr::Ipv4Cidr;
use super::ids::{AccountId, DomainId, NetworkId, NicId, PodId, RouterId, VmId, VpcId};

// ── Accounts ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountRole {
    User,
    DomainAdmin,
    Admin,
}

/// The caller of a manager operation, or the owner of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub uuid: Uuid,
    pub name: String,
    pub domain_id: DomainId,
    pub role: AccountRole,
}

// ── Networks ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GuestType {
    Isolated,
    Shared,
}

/// A guest network. Networks with a `vpc_id` are VPC tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub uuid: Uuid,
    pub name: String,
    pub zone_type: ZoneNetworkType,
    pub guest_type: GuestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<VpcId>,
    pub account_id: AccountId,
    pub domain_id: DomainId,
    pub cidr: Ipv4Cidr,
    pub gateway: Ipv4Addr,
    /// Broadcast URI of the guest VLAN, e.g. `vlan://100`.
    pub vlan_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpc {
    pub id: VpcId,
    pub uuid: Uuid,
    pub name: String,
    pub cidr: Ipv4Cidr,
    pub account_id: AccountId,
    pub domain_id: DomainId,
}

// ── Routers ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RouterState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Migrating,
    Error,
    Unknown,
}

/// Role of a router within a redundant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RedundantRole {
    Standalone,
    Primary,
    Backup,
}

/// A virtual router appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualRouter {
    pub id: RouterId,
    pub uuid: Uuid,
    pub name: String,
    pub control_ip: Ipv4Addr,
    pub state: RouterState,
    pub role: RedundantRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_id: Option<PodId>,
    /// Set for VPC routers, which serve every tier of the VPC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<VpcId>,
    /// Guest networks served by a non-VPC router.
    #[serde(default)]
    pub network_ids: Vec<NetworkId>,
}

impl VirtualRouter {
    pub fn endpoint(&self) -> RouterEndpoint {
        RouterEndpoint {
            name: self.name.clone(),
            control_ip: self.control_ip,
        }
    }

    pub fn is_redundant(&self) -> bool {
        self.role != RedundantRole::Standalone
    }
}

// ── NICs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NicKind {
    Guest,
    Public,
    Private,
    /// Secondary address a router holds in another subnet of a shared
    /// network, for DHCP.
    Alias,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum NicOwner {
    Vm(VmId),
    Router(RouterId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nic {
    pub id: NicId,
    pub owner: NicOwner,
    pub kind: NicKind,
    /// Guest network for guest NICs; `None` for public and private NICs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<NetworkId>,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac: String,
    pub vlan_tag: String,
    #[serde(default)]
    pub is_default: bool,
}

impl Nic {
    /// Subnet the NIC's address lives in.
    pub fn subnet(&self) -> Option<Ipv4Cidr> {
        Ipv4Cidr::from_netmask(self.ip, self.netmask).ok()
    }
}

// ── Virtual machines ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VmState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Destroyed,
    Expunging,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub id: VmId,
    pub uuid: Uuid,
    pub name: String,
    pub state: VmState,
    pub account_id: AccountId,
    pub domain_id: DomainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_id: Option<PodId>,
}

impl VirtualMachine {
    pub fn is_destroyed(&self) -> bool {
        matches!(self.state, VmState::Destroyed | VmState::Expunging)
    }
}
