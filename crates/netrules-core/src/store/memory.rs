// ── In-memory store ──
//
// Implements every storage and allocation contract over `Table`s. Loaded
// from and saved to `ZoneSnapshot`s.

use std::net::Ipv4Addr;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::snapshot::ZoneSnapshot;
use super::table::Table;
use super::{InventoryStore, IpAllocator, RuleStore};
use crate::error::CoreError;
use crate::model::{
    Account, AccountId, AclItemId, IpAddress, IpAddressId, IpState, Ipv4Cidr, Network,
    NetworkAclItem, NetworkId, NetworkRule, Nic, NicId, NicOwner, PrivateGateway,
    PrivateGatewayId, RouterId, RuleId, RuleState, VirtualMachine, VirtualRouter, VmId, Vpc,
    VpcId, VpnUser, VpnUserId,
};

/// Thread-safe in-memory implementation of `RuleStore`, `InventoryStore`,
/// and `IpAllocator`.
pub struct MemoryStore {
    accounts: Table<AccountId, Account>,
    networks: Table<NetworkId, Network>,
    vpcs: Table<VpcId, Vpc>,
    routers: Table<RouterId, VirtualRouter>,
    vms: Table<VmId, VirtualMachine>,
    nics: Table<NicId, Nic>,
    ips: Table<IpAddressId, IpAddress>,
    rules: Table<RuleId, NetworkRule>,
    acl_items: Table<AclItemId, NetworkAclItem>,
    vpn_users: Table<VpnUserId, VpnUser>,
    gateways: Table<PrivateGatewayId, PrivateGateway>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn duplicate(entity: &str, uuid: Uuid) -> CoreError {
    CoreError::Internal(format!("{entity} {uuid} already exists"))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            accounts: Table::new(),
            networks: Table::new(),
            vpcs: Table::new(),
            routers: Table::new(),
            vms: Table::new(),
            nics: Table::new(),
            ips: Table::new(),
            rules: Table::new(),
            acl_items: Table::new(),
            vpn_users: Table::new(),
            gateways: Table::new(),
        }
    }

    /// Build a store holding everything in `snapshot`.
    pub fn from_snapshot(snapshot: ZoneSnapshot) -> Result<Self, CoreError> {
        let store = Self::new();
        for account in snapshot.accounts {
            store.insert_account(account)?;
        }
        for vpc in snapshot.vpcs {
            store.insert_vpc(vpc)?;
        }
        for network in snapshot.networks {
            store.insert_network(network)?;
        }
        for router in snapshot.routers {
            store.insert_router(router)?;
        }
        for vm in snapshot.vms {
            store.insert_vm(vm)?;
        }
        for nic in snapshot.nics {
            store.persist_nic(nic)?;
        }
        for ip in snapshot.ip_addresses {
            store.insert_ip_address(ip)?;
        }
        for rule in snapshot.rules {
            store.persist_rule(rule)?;
        }
        for item in snapshot.acl_items {
            store.persist_acl_item(item)?;
        }
        for user in snapshot.vpn_users {
            store.persist_vpn_user(user)?;
        }
        for gateway in snapshot.private_gateways {
            store.persist_private_gateway(gateway)?;
        }
        debug!(
            rules = store.rules.values().len(),
            ips = store.ips.values().len(),
            "loaded zone snapshot"
        );
        Ok(store)
    }

    /// Image of the current contents, every list in id order.
    pub fn to_snapshot(&self) -> ZoneSnapshot {
        ZoneSnapshot {
            accounts: self.accounts.values(),
            networks: self.networks.values(),
            vpcs: self.vpcs.values(),
            routers: self.routers.values(),
            vms: self.vms.values(),
            nics: self.nics.values(),
            ip_addresses: self.ips.values(),
            rules: self.rules.values(),
            acl_items: self.acl_items.values(),
            vpn_users: self.vpn_users.values(),
            private_gateways: self.gateways.values(),
        }
    }

    // ── Seeding ──────────────────────────────────────────────────────

    pub fn insert_account(&self, account: Account) -> Result<(), CoreError> {
        let uuid = account.uuid;
        self.accounts
            .insert_new(account.id, account)
            .then_some(())
            .ok_or_else(|| duplicate("account", uuid))
    }

    pub fn insert_vpc(&self, vpc: Vpc) -> Result<(), CoreError> {
        let uuid = vpc.uuid;
        self.vpcs
            .insert_new(vpc.id, vpc)
            .then_some(())
            .ok_or_else(|| duplicate("VPC", uuid))
    }

    pub fn insert_network(&self, network: Network) -> Result<(), CoreError> {
        let uuid = network.uuid;
        self.networks
            .insert_new(network.id, network)
            .then_some(())
            .ok_or_else(|| duplicate("network", uuid))
    }

    pub fn insert_router(&self, router: VirtualRouter) -> Result<(), CoreError> {
        let uuid = router.uuid;
        self.routers
            .insert_new(router.id, router)
            .then_some(())
            .ok_or_else(|| duplicate("router", uuid))
    }

    pub fn insert_vm(&self, vm: VirtualMachine) -> Result<(), CoreError> {
        let uuid = vm.uuid;
        self.vms
            .insert_new(vm.id, vm)
            .then_some(())
            .ok_or_else(|| duplicate("VM", uuid))
    }

    pub fn insert_ip_address(&self, ip: IpAddress) -> Result<(), CoreError> {
        let uuid = ip.uuid;
        self.ips
            .insert_new(ip.id, ip)
            .then_some(())
            .ok_or_else(|| duplicate("IP address", uuid))
    }

    /// Replace a router row, e.g. after a state change reported by the
    /// platform.
    pub fn update_router(&self, router: VirtualRouter) -> bool {
        let id = router.id;
        self.routers.update(id, |r| *r = router).is_some()
    }

    pub fn routers(&self) -> Vec<VirtualRouter> {
        self.routers.values()
    }

    pub fn rules(&self) -> Vec<NetworkRule> {
        self.rules.values()
    }

    pub fn ip_addresses(&self) -> Vec<IpAddress> {
        self.ips.values()
    }

    fn bump_ip(
        &self,
        id: IpAddressId,
        f: impl FnOnce(&mut IpAddress) -> Result<(), CoreError>,
    ) -> Result<IpAddress, CoreError> {
        self.ips
            .update(id, |ip| {
                f(ip)?;
                ip.version += 1;
                Ok(ip.clone())
            })
            .ok_or_else(|| CoreError::not_found("IP address", "requested address"))?
    }
}

// ── RuleStore ────────────────────────────────────────────────────────

impl RuleStore for MemoryStore {
    fn next_rule_id(&self) -> RuleId {
        self.rules.next_id()
    }

    fn find_rule(&self, id: RuleId) -> Option<NetworkRule> {
        self.rules.get(id)
    }

    fn find_rule_by_uuid(&self, uuid: Uuid) -> Option<NetworkRule> {
        self.rules.find(|r| r.uuid() == uuid)
    }

    fn persist_rule(&self, rule: NetworkRule) -> Result<(), CoreError> {
        if rule.variant_purpose() != rule.purpose() {
            return Err(CoreError::Internal(format!(
                "rule {} is stored as {} but has purpose {}",
                rule.uuid(),
                rule.variant_purpose(),
                rule.purpose()
            )));
        }
        let uuid = rule.uuid();
        if self.find_rule_by_uuid(uuid).is_some() {
            return Err(duplicate("rule", uuid));
        }
        self.rules
            .insert_new(rule.id(), rule)
            .then_some(())
            .ok_or_else(|| duplicate("rule", uuid))
    }

    fn update_rule(&self, rule: &NetworkRule) -> Result<bool, CoreError> {
        let Some(stored) = self.rules.get(rule.id()) else {
            return Ok(false);
        };
        if stored.variant_purpose() != rule.variant_purpose() || stored.purpose() != rule.purpose() {
            return Err(CoreError::Internal(format!(
                "rule {} cannot change purpose",
                rule.uuid()
            )));
        }
        Ok(self.rules.update(rule.id(), |r| *r = rule.clone()).is_some())
    }

    fn set_rule_state(&self, id: RuleId, state: RuleState) -> bool {
        self.rules
            .update(id, |r| r.base_mut().state = state)
            .is_some()
    }

    fn remove_rule(&self, id: RuleId) -> Option<NetworkRule> {
        self.rules.remove(id)
    }

    fn list_by_ip(&self, ip: IpAddressId) -> Vec<NetworkRule> {
        self.rules
            .filter(|r| r.base().source_ip_address_id == Some(ip))
    }

    fn list_by_network(&self, network: NetworkId) -> Vec<NetworkRule> {
        self.rules.filter(|r| r.base().network_id == network)
    }

    fn list_related(&self, parent: RuleId) -> Vec<NetworkRule> {
        self.rules.filter(|r| r.base().related == Some(parent))
    }

    fn list_port_forwarding_by_vm(&self, vm: VmId) -> Vec<NetworkRule> {
        self.rules
            .filter(|r| r.as_port_forwarding().is_some_and(|pf| pf.vm_id == vm))
    }

    // ── ACL items ──

    fn next_acl_item_id(&self) -> AclItemId {
        self.acl_items.next_id()
    }

    fn persist_acl_item(&self, item: NetworkAclItem) -> Result<(), CoreError> {
        let uuid = item.uuid;
        let taken = self
            .acl_items
            .find(|i| i.network_id == item.network_id && i.number == item.number)
            .is_some();
        if taken {
            return Err(CoreError::invalid(format!(
                "ACL item number {} is already used in this network",
                item.number
            )));
        }
        self.acl_items
            .insert_new(item.id, item)
            .then_some(())
            .ok_or_else(|| duplicate("ACL item", uuid))
    }

    fn find_acl_item_by_uuid(&self, uuid: Uuid) -> Option<NetworkAclItem> {
        self.acl_items.find(|i| i.uuid == uuid)
    }

    fn set_acl_item_state(&self, id: AclItemId, state: RuleState) -> bool {
        self.acl_items.update(id, |i| i.state = state).is_some()
    }

    fn remove_acl_item(&self, id: AclItemId) -> Option<NetworkAclItem> {
        self.acl_items.remove(id)
    }

    fn list_acl_items(&self, network: NetworkId) -> Vec<NetworkAclItem> {
        let mut items = self.acl_items.filter(|i| i.network_id == network);
        items.sort_by_key(|i| i.number);
        items
    }

    // ── VPN users ──

    fn next_vpn_user_id(&self) -> VpnUserId {
        self.vpn_users.next_id()
    }

    fn persist_vpn_user(&self, user: VpnUser) -> Result<(), CoreError> {
        let uuid = user.uuid;
        self.vpn_users
            .insert_new(user.id, user)
            .then_some(())
            .ok_or_else(|| duplicate("VPN user", uuid))
    }

    fn find_vpn_user_by_uuid(&self, uuid: Uuid) -> Option<VpnUser> {
        self.vpn_users.find(|u| u.uuid == uuid)
    }

    fn set_vpn_user_state(&self, id: VpnUserId, state: RuleState) -> bool {
        self.vpn_users.update(id, |u| u.state = state).is_some()
    }

    fn remove_vpn_user(&self, id: VpnUserId) -> Option<VpnUser> {
        self.vpn_users.remove(id)
    }

    fn list_vpn_users(&self, account: AccountId) -> Vec<VpnUser> {
        self.vpn_users.filter(|u| u.account_id == account)
    }
}

// ── InventoryStore ───────────────────────────────────────────────────

impl InventoryStore for MemoryStore {
    fn account(&self, id: AccountId) -> Option<Account> {
        self.accounts.get(id)
    }

    fn account_by_name(&self, name: &str) -> Option<Account> {
        self.accounts.find(|a| a.name == name)
    }

    fn ip_address(&self, id: IpAddressId) -> Option<IpAddress> {
        self.ips.get(id)
    }

    fn ip_address_by_uuid(&self, uuid: Uuid) -> Option<IpAddress> {
        self.ips.find(|ip| ip.uuid == uuid)
    }

    fn ip_address_by_addr(&self, address: Ipv4Addr) -> Option<IpAddress> {
        self.ips.find(|ip| ip.address == address)
    }

    fn ip_addresses_for_network(&self, network: NetworkId) -> Vec<IpAddress> {
        self.ips
            .filter(|ip| ip.associated_with_network == Some(network))
    }

    fn ip_addresses_for_vpc(&self, vpc: VpcId) -> Vec<IpAddress> {
        self.ips.filter(|ip| ip.vpc_id == Some(vpc))
    }

    fn ip_addresses_for_vm(&self, vm: VmId) -> Vec<IpAddress> {
        self.ips
            .filter(|ip| ip.one_to_one_nat && ip.associated_with_vm == Some(vm))
    }

    fn update_ip_address(&self, ip: &IpAddress) -> Result<IpAddress, CoreError> {
        self.bump_ip(ip.id, |stored| {
            if stored.version != ip.version {
                return Err(CoreError::Internal(format!(
                    "IP address {} was modified concurrently",
                    ip.address
                )));
            }
            *stored = ip.clone();
            Ok(())
        })
    }

    fn network(&self, id: NetworkId) -> Option<Network> {
        self.networks.get(id)
    }

    fn network_by_uuid(&self, uuid: Uuid) -> Option<Network> {
        self.networks.find(|n| n.uuid == uuid)
    }

    fn networks_in_vpc(&self, vpc: VpcId) -> Vec<Network> {
        self.networks.filter(|n| n.vpc_id == Some(vpc))
    }

    fn vpc(&self, id: VpcId) -> Option<Vpc> {
        self.vpcs.get(id)
    }

    fn vpc_by_uuid(&self, uuid: Uuid) -> Option<Vpc> {
        self.vpcs.find(|v| v.uuid == uuid)
    }

    fn vm(&self, id: VmId) -> Option<VirtualMachine> {
        self.vms.get(id)
    }

    fn vm_by_uuid(&self, uuid: Uuid) -> Option<VirtualMachine> {
        self.vms.find(|vm| vm.uuid == uuid)
    }

    fn routers_for_network(&self, network: &Network) -> Vec<VirtualRouter> {
        match network.vpc_id {
            Some(vpc) => self.routers_for_vpc(vpc),
            None => self
                .routers
                .filter(|r| r.network_ids.contains(&network.id)),
        }
    }

    fn routers_for_vpc(&self, vpc: VpcId) -> Vec<VirtualRouter> {
        self.routers.filter(|r| r.vpc_id == Some(vpc))
    }

    fn nics_for(&self, owner: NicOwner) -> Vec<Nic> {
        self.nics.filter(|n| n.owner == owner)
    }

    fn next_nic_id(&self) -> NicId {
        self.nics.next_id()
    }

    fn persist_nic(&self, nic: Nic) -> Result<(), CoreError> {
        let mac = nic.mac.clone();
        self.nics
            .insert_new(nic.id, nic)
            .then_some(())
            .ok_or_else(|| CoreError::Internal(format!("NIC {mac} already exists")))
    }

    fn update_nic(&self, nic: &Nic) -> Result<bool, CoreError> {
        Ok(self.nics.update(nic.id, |n| *n = nic.clone()).is_some())
    }

    fn remove_nic(&self, id: NicId) -> Option<Nic> {
        self.nics.remove(id)
    }

    fn private_gateway(&self, id: PrivateGatewayId) -> Option<PrivateGateway> {
        self.gateways.get(id)
    }

    fn private_gateway_by_uuid(&self, uuid: Uuid) -> Option<PrivateGateway> {
        self.gateways.find(|g| g.uuid == uuid)
    }

    fn next_private_gateway_id(&self) -> PrivateGatewayId {
        self.gateways.next_id()
    }

    fn persist_private_gateway(&self, gateway: PrivateGateway) -> Result<(), CoreError> {
        let uuid = gateway.uuid;
        self.gateways
            .insert_new(gateway.id, gateway)
            .then_some(())
            .ok_or_else(|| duplicate("private gateway", uuid))
    }

    fn update_private_gateway(&self, gateway: &PrivateGateway) -> Result<bool, CoreError> {
        Ok(self
            .gateways
            .update(gateway.id, |g| *g = gateway.clone())
            .is_some())
    }

    fn remove_private_gateway(&self, id: PrivateGatewayId) -> Option<PrivateGateway> {
        self.gateways.remove(id)
    }
}

// ── IpAllocator ──────────────────────────────────────────────────────

impl IpAllocator for MemoryStore {
    fn assign_public_ip_from_vlans(
        &self,
        network: &Network,
        vlan_tag: Option<&str>,
        subnet: Option<Ipv4Cidr>,
    ) -> Result<IpAddress, CoreError> {
        let candidate = self
            .ips
            .find(|ip| {
                ip.state == IpState::Free
                    && vlan_tag.is_none_or(|t| ip.vlan.tag == t)
                    && subnet.is_none_or(|s| s.contains(ip.address))
            })
            .ok_or_else(|| {
                let pool = match subnet {
                    Some(subnet) => format!("subnet {subnet}"),
                    None => format!("public VLAN {}", vlan_tag.unwrap_or("pool")),
                };
                CoreError::unavailable(pool, "no free addresses")
            })?;

        let assigned = self.bump_ip(candidate.id, |ip| {
            if ip.state != IpState::Free {
                return Err(CoreError::Internal(format!(
                    "IP address {} was allocated concurrently",
                    ip.address
                )));
            }
            ip.state = IpState::Allocated;
            ip.associated_with_network = Some(network.id);
            ip.account_id = Some(network.account_id);
            ip.domain_id = Some(network.domain_id);
            ip.allocated = Some(Utc::now());
            Ok(())
        })?;
        debug!(ip = %assigned.address, network = %network.uuid, "assigned address");
        Ok(assigned)
    }

    fn associate_ip_to_guest_network(
        &self,
        id: IpAddressId,
        network: NetworkId,
    ) -> Result<IpAddress, CoreError> {
        self.bump_ip(id, |ip| {
            match ip.associated_with_network {
                Some(current) if current != network => {
                    return Err(CoreError::invalid(format!(
                        "IP address {} is already associated with another network",
                        ip.address
                    )));
                }
                _ => {}
            }
            if ip.state != IpState::Allocated {
                return Err(CoreError::invalid(format!(
                    "IP address {} is not allocated",
                    ip.address
                )));
            }
            ip.associated_with_network = Some(network);
            Ok(())
        })
    }

    fn unassign_ip_from_vpc_network(
        &self,
        id: IpAddressId,
        network: NetworkId,
    ) -> Result<(), CoreError> {
        self.bump_ip(id, |ip| {
            if ip.associated_with_network == Some(network) {
                ip.associated_with_network = None;
            }
            Ok(())
        })
        .map(|_| ())
    }

    fn release_ip(&self, id: IpAddressId) -> Result<(), CoreError> {
        self.bump_ip(id, |ip| {
            ip.state = IpState::Free;
            ip.source_nat = false;
            ip.one_to_one_nat = false;
            ip.associated_with_network = None;
            ip.associated_with_vm = None;
            ip.vm_ip = None;
            ip.account_id = None;
            ip.domain_id = None;
            ip.allocated = None;
            Ok(())
        })
        .map(|_| ())
    }
}
