// ── Zone snapshots ──
//
// A serializable image of everything `MemoryStore` holds. The CLI reads
// and writes these as YAML or JSON.

use serde::{Deserialize, Serialize};

use crate::model::{
    Account, IpAddress, Network, NetworkAclItem, NetworkRule, Nic, PrivateGateway, VirtualMachine,
    VirtualRouter, Vpc, VpnUser,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneSnapshot {
    pub accounts: Vec<Account>,
    pub networks: Vec<Network>,
    pub vpcs: Vec<Vpc>,
    pub routers: Vec<VirtualRouter>,
    pub vms: Vec<VirtualMachine>,
    pub nics: Vec<Nic>,
    pub ip_addresses: Vec<IpAddress>,
    pub rules: Vec<NetworkRule>,
    pub acl_items: Vec<NetworkAclItem>,
    pub vpn_users: Vec<VpnUser>,
    pub private_gateways: Vec<PrivateGateway>,
}
