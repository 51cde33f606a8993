// ── Collaborator contracts ──
//
// Persistence, IP allocation, and access checking are owned by the
// surrounding platform. The manager and the appliers only talk to these
// traits; `MemoryStore` implements the storage and allocation side for
// tests, dry runs, and the CLI's snapshot files.

mod memory;
mod snapshot;
mod table;

use std::net::Ipv4Addr;

use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{
    Account, AccountId, AccountRole, AclItemId, IpAddress, IpAddressId, Ipv4Cidr, Network,
    NetworkAclItem,
    NetworkId, NetworkRule, Nic, NicId, NicOwner, PrivateGateway, PrivateGatewayId, Purpose,
    RouterId, RuleId, RuleState, VirtualMachine, VirtualRouter, VmId, Vpc, VpcId, VpnUser,
    VpnUserId,
};

pub use memory::MemoryStore;
pub use snapshot::ZoneSnapshot;

// ── Rules ───────────────────────────────────────────────────────────

/// Rule rows of every category, plus ACL items and VPN users.
///
/// Listing methods return rows in ascending id order so that command
/// payloads built from them are deterministic.
pub trait RuleStore: Send + Sync {
    fn next_rule_id(&self) -> RuleId;

    fn find_rule(&self, id: RuleId) -> Option<NetworkRule>;

    fn find_rule_by_uuid(&self, uuid: Uuid) -> Option<NetworkRule>;

    /// Insert a new row. Fails if the id or UUID is taken or the variant
    /// disagrees with the rule's purpose.
    fn persist_rule(&self, rule: NetworkRule) -> Result<(), CoreError>;

    /// Replace an existing row. Returns `false` if the row is gone.
    fn update_rule(&self, rule: &NetworkRule) -> Result<bool, CoreError>;

    /// Returns `false` if the row is gone.
    fn set_rule_state(&self, id: RuleId, state: RuleState) -> bool;

    fn remove_rule(&self, id: RuleId) -> Option<NetworkRule>;

    /// Every rule on a public IP, any state.
    fn list_by_ip(&self, ip: IpAddressId) -> Vec<NetworkRule>;

    /// Every rule on a network, any state.
    fn list_by_network(&self, network: NetworkId) -> Vec<NetworkRule>;

    /// Rules created alongside `parent` (`related == parent`).
    fn list_related(&self, parent: RuleId) -> Vec<NetworkRule>;

    fn list_by_ip_and_not_revoked(&self, ip: IpAddressId) -> Vec<NetworkRule> {
        self.list_by_ip(ip)
            .into_iter()
            .filter(|r| r.state() != RuleState::Revoke)
            .collect()
    }

    fn list_by_ip_and_purpose(&self, ip: IpAddressId, purpose: Purpose) -> Vec<NetworkRule> {
        self.list_by_ip(ip)
            .into_iter()
            .filter(|r| r.purpose() == purpose)
            .collect()
    }

    fn list_by_ip_and_purpose_and_not_revoked(
        &self,
        ip: IpAddressId,
        purpose: Purpose,
    ) -> Vec<NetworkRule> {
        self.list_by_ip_and_purpose(ip, purpose)
            .into_iter()
            .filter(|r| r.state() != RuleState::Revoke)
            .collect()
    }

    fn list_by_network_and_purpose(
        &self,
        network: NetworkId,
        purpose: Purpose,
    ) -> Vec<NetworkRule> {
        self.list_by_network(network)
            .into_iter()
            .filter(|r| r.purpose() == purpose)
            .collect()
    }

    fn list_by_network_and_not_revoked(&self, network: NetworkId) -> Vec<NetworkRule> {
        self.list_by_network(network)
            .into_iter()
            .filter(|r| r.state() != RuleState::Revoke)
            .collect()
    }

    /// Port forwarding rules whose destination is `vm`, any state.
    fn list_port_forwarding_by_vm(&self, vm: VmId) -> Vec<NetworkRule>;

    // ── Network ACL items ──

    fn next_acl_item_id(&self) -> AclItemId;
    fn persist_acl_item(&self, item: NetworkAclItem) -> Result<(), CoreError>;
    fn find_acl_item_by_uuid(&self, uuid: Uuid) -> Option<NetworkAclItem>;
    fn set_acl_item_state(&self, id: AclItemId, state: RuleState) -> bool;
    fn remove_acl_item(&self, id: AclItemId) -> Option<NetworkAclItem>;
    /// Items of a tier ordered by `number`.
    fn list_acl_items(&self, network: NetworkId) -> Vec<NetworkAclItem>;

    // ── VPN users ──

    fn next_vpn_user_id(&self) -> VpnUserId;
    fn persist_vpn_user(&self, user: VpnUser) -> Result<(), CoreError>;
    fn find_vpn_user_by_uuid(&self, uuid: Uuid) -> Option<VpnUser>;
    fn set_vpn_user_state(&self, id: VpnUserId, state: RuleState) -> bool;
    fn remove_vpn_user(&self, id: VpnUserId) -> Option<VpnUser>;
    fn list_vpn_users(&self, account: AccountId) -> Vec<VpnUser>;
}

// ── Inventory ───────────────────────────────────────────────────────

/// Networks, routers, VMs, NICs, and public IPs.
pub trait InventoryStore: Send + Sync {
    fn account(&self, id: AccountId) -> Option<Account>;
    fn account_by_name(&self, name: &str) -> Option<Account>;

    fn ip_address(&self, id: IpAddressId) -> Option<IpAddress>;
    fn ip_address_by_uuid(&self, uuid: Uuid) -> Option<IpAddress>;
    fn ip_address_by_addr(&self, address: Ipv4Addr) -> Option<IpAddress>;
    fn ip_addresses_for_network(&self, network: NetworkId) -> Vec<IpAddress>;
    fn ip_addresses_for_vpc(&self, vpc: VpcId) -> Vec<IpAddress>;
    /// Addresses statically NATed to `vm`.
    fn ip_addresses_for_vm(&self, vm: VmId) -> Vec<IpAddress>;

    /// Write back NAT and association flags. `ip.version` must match the
    /// stored row; the stored version is then bumped and the new row
    /// returned. A mismatch fails with `Internal`.
    fn update_ip_address(&self, ip: &IpAddress) -> Result<IpAddress, CoreError>;

    fn network(&self, id: NetworkId) -> Option<Network>;
    fn network_by_uuid(&self, uuid: Uuid) -> Option<Network>;
    fn networks_in_vpc(&self, vpc: VpcId) -> Vec<Network>;
    fn vpc(&self, id: VpcId) -> Option<Vpc>;
    fn vpc_by_uuid(&self, uuid: Uuid) -> Option<Vpc>;

    fn vm(&self, id: VmId) -> Option<VirtualMachine>;
    fn vm_by_uuid(&self, uuid: Uuid) -> Option<VirtualMachine>;

    /// Routers serving a guest network: the network's own routers, or the
    /// VPC routers for a tier.
    fn routers_for_network(&self, network: &Network) -> Vec<VirtualRouter>;
    fn routers_for_vpc(&self, vpc: VpcId) -> Vec<VirtualRouter>;

    fn nics_for(&self, owner: NicOwner) -> Vec<Nic>;
    fn next_nic_id(&self) -> NicId;
    fn persist_nic(&self, nic: Nic) -> Result<(), CoreError>;
    fn update_nic(&self, nic: &Nic) -> Result<bool, CoreError>;
    fn remove_nic(&self, id: NicId) -> Option<Nic>;

    fn private_gateway(&self, id: PrivateGatewayId) -> Option<PrivateGateway>;
    fn private_gateway_by_uuid(&self, uuid: Uuid) -> Option<PrivateGateway>;
    fn next_private_gateway_id(&self) -> PrivateGatewayId;
    fn persist_private_gateway(&self, gateway: PrivateGateway) -> Result<(), CoreError>;
    fn update_private_gateway(&self, gateway: &PrivateGateway) -> Result<bool, CoreError>;
    fn remove_private_gateway(&self, id: PrivateGatewayId) -> Option<PrivateGateway>;

    /// A VM's NIC in a guest network.
    fn vm_nic_in_network(&self, vm: VmId, network: NetworkId) -> Option<Nic> {
        self.nics_for(NicOwner::Vm(vm))
            .into_iter()
            .find(|n| n.network_id == Some(network))
    }

    /// A router's guest NIC in a network.
    fn router_nic_in_network(&self, router: RouterId, network: NetworkId) -> Option<Nic> {
        self.nics_for(NicOwner::Router(router))
            .into_iter()
            .find(|n| n.network_id == Some(network))
    }
}

// ── IP allocation ───────────────────────────────────────────────────

/// Allocates and associates addresses.
pub trait IpAllocator: Send + Sync {
    /// Take a free address on the given VLAN (any VLAN when `None`),
    /// inside `subnet` when one is given, and mark it `Allocated` to
    /// `network`.
    fn assign_public_ip_from_vlans(
        &self,
        network: &Network,
        vlan_tag: Option<&str>,
        subnet: Option<Ipv4Cidr>,
    ) -> Result<IpAddress, CoreError>;

    /// Associate an allocated address with a guest network.
    fn associate_ip_to_guest_network(
        &self,
        ip: IpAddressId,
        network: NetworkId,
    ) -> Result<IpAddress, CoreError>;

    /// Undo `associate_ip_to_guest_network` for a VPC address.
    fn unassign_ip_from_vpc_network(
        &self,
        ip: IpAddressId,
        network: NetworkId,
    ) -> Result<(), CoreError>;

    /// Return an address to the free pool.
    fn release_ip(&self, ip: IpAddressId) -> Result<(), CoreError>;
}

// ── Access control ──────────────────────────────────────────────────

/// What a caller wants to touch.
#[derive(Debug, Clone, Copy)]
pub enum AccessTarget<'a> {
    IpAddress(&'a IpAddress),
    Network(&'a Network),
    Vm(&'a VirtualMachine),
    Rule(&'a NetworkRule),
    Vpc(&'a Vpc),
}

pub trait AccessChecker: Send + Sync {
    /// Fails with `PermissionDenied` when `caller` may not operate on
    /// `target`.
    fn check_access(&self, caller: &Account, target: AccessTarget<'_>) -> Result<(), CoreError>;
}

/// Admins pass, domain admins pass within their domain, users must own
/// the resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipChecker;

impl AccessChecker for OwnershipChecker {
    fn check_access(&self, caller: &Account, target: AccessTarget<'_>) -> Result<(), CoreError> {
        let (owner, domain, label) = match target {
            AccessTarget::IpAddress(ip) => {
                (ip.account_id, ip.domain_id, format!("IP address {}", ip.address))
            }
            AccessTarget::Network(n) => {
                (Some(n.account_id), Some(n.domain_id), format!("network {}", n.uuid))
            }
            AccessTarget::Vm(vm) => {
                (Some(vm.account_id), Some(vm.domain_id), format!("VM {}", vm.uuid))
            }
            AccessTarget::Rule(rule) => (
                Some(rule.base().account_id),
                Some(rule.base().domain_id),
                format!("rule {}", rule.uuid()),
            ),
            AccessTarget::Vpc(vpc) => {
                (Some(vpc.account_id), Some(vpc.domain_id), format!("VPC {}", vpc.uuid))
            }
        };

        let allowed = match caller.role {
            AccountRole::Admin => true,
            AccountRole::DomainAdmin => domain == Some(caller.domain_id),
            AccountRole::User => owner == Some(caller.id),
        };
        if allowed {
            Ok(())
        } else {
            Err(CoreError::denied(format!(
                "account {} cannot access {label}",
                caller.name
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::model::{DomainId, VmState};

    fn account(id: u64, domain: u64, role: AccountRole) -> Account {
        Account {
            id: AccountId(id),
            uuid: Uuid::new_v4(),
            name: format!("acct-{id}"),
            domain_id: DomainId(domain),
            role,
        }
    }

    fn vm(owner: u64, domain: u64) -> VirtualMachine {
        VirtualMachine {
            id: VmId(1),
            uuid: Uuid::new_v4(),
            name: "web-1".into(),
            state: VmState::Running,
            account_id: AccountId(owner),
            domain_id: DomainId(domain),
            pod_id: None,
        }
    }

    #[test]
    fn owner_passes_stranger_is_denied() {
        let vm = vm(5, 1);
        let checker = OwnershipChecker;
        assert!(checker.check_access(&account(5, 1, AccountRole::User), AccessTarget::Vm(&vm)).is_ok());
        let err = checker
            .check_access(&account(6, 1, AccountRole::User), AccessTarget::Vm(&vm))
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
        assert!(err.to_string().contains(&vm.uuid.to_string()));
    }

    #[test]
    fn domain_admin_is_scoped_to_domain() {
        let vm = vm(5, 1);
        let checker = OwnershipChecker;
        assert!(
            checker
                .check_access(&account(9, 1, AccountRole::DomainAdmin), AccessTarget::Vm(&vm))
                .is_ok()
        );
        assert!(
            checker
                .check_access(&account(9, 2, AccountRole::DomainAdmin), AccessTarget::Vm(&vm))
                .is_err()
        );
        assert!(
            checker
                .check_access(&account(1, 2, AccountRole::Admin), AccessTarget::Vm(&vm))
                .is_ok()
        );
    }
}
