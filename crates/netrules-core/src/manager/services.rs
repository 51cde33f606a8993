// Router services: remote-access VPN users, DHCP entries and VM passwords.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AddVpnUserRequest, Compensation, LockKey, RulesManager, UndoStep};
use crate::applier::{DhcpEntryRules, DhcpSubNetRules, PasswordToRouterRules, RuleApplier, VpnRules};
use crate::error::CoreError;
use crate::model::{
    Account, IpAddress, Network, Nic, NicKind, NicOwner, RuleState, VirtualMachine, VpnUser,
};
use crate::store::AccessTarget;

const USERNAME_MAX: usize = 64;
const PASSWORD_MAX: usize = 32;

/// Starts with an alphanumeric, then alphanumerics and `extra`, at least
/// three characters in total.
fn check_credential(value: &str, what: &str, extra: &str, max: usize) -> Result<(), CoreError> {
    let mut chars = value.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || extra.contains(c))
        && (3..=max).contains(&value.len());
    if valid {
        Ok(())
    } else {
        Err(CoreError::invalid(format!(
            "{what} must be 3 to {max} characters of letters, digits and {extra}"
        )))
    }
}

impl RulesManager {
    // ── VPN users ────────────────────────────────────────────────────

    /// Add a VPN user to the account owning `network` and push the
    /// account's user list to its routers. On a failed apply the user is
    /// forgotten.
    pub async fn add_vpn_user(
        &self,
        request: &AddVpnUserRequest,
        caller: &Account,
    ) -> Result<VpnUser, CoreError> {
        check_credential(&request.username, "username", "@._-", USERNAME_MAX)?;
        check_credential(&request.password, "password", "@+=._-", PASSWORD_MAX)?;
        let network = self.network_by_uuid(request.network)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;

        let existing = self.rules().list_vpn_users(network.account_id);
        if let Some(user) = existing
            .iter()
            .find(|u| u.username == request.username && u.state != RuleState::Revoke)
        {
            return if request.uuid == Some(user.uuid) && user.password == request.password {
                Ok(user.clone())
            } else {
                Err(CoreError::invalid(format!(
                    "VPN user {} already exists",
                    request.username
                )))
            };
        }

        let user = VpnUser {
            id: self.rules().next_vpn_user_id(),
            uuid: request.uuid.unwrap_or_else(Uuid::new_v4),
            account_id: network.account_id,
            domain_id: network.domain_id,
            username: request.username.clone(),
            password: request.password.clone(),
            state: RuleState::Add,
        };
        self.rules().persist_vpn_user(user.clone())?;
        if let Err(e) = self.apply_vpn_users_locked(&network, false).await {
            warn!(user = %user.username, error = %e, "apply failed, removing VPN user");
            self.rules().remove_vpn_user(user.id);
            return Err(e);
        }
        info!(user = %user.username, network = %network.uuid, "VPN user added");
        Ok(VpnUser {
            state: RuleState::Active,
            ..user
        })
    }

    /// Remove a VPN user from the routers of `network`. On a failed apply
    /// the user stays in `Revoke`.
    pub async fn remove_vpn_user(
        &self,
        network: Uuid,
        user: Uuid,
        caller: &Account,
    ) -> Result<(), CoreError> {
        let network = self.network_by_uuid(network)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        let current = self
            .rules()
            .find_vpn_user_by_uuid(user)
            .filter(|u| u.account_id == network.account_id)
            .ok_or_else(|| CoreError::not_found("VPN user", user))?;
        self.rules().set_vpn_user_state(current.id, RuleState::Revoke);
        self.apply_vpn_users_locked(&network, false).await?;
        Ok(())
    }

    /// Resend the VPN users of the account owning `network`.
    pub async fn apply_vpn_users(
        &self,
        network: Uuid,
        continue_on_error: bool,
        caller: &Account,
    ) -> Result<bool, CoreError> {
        let network = self.network_by_uuid(network)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        self.apply_vpn_users_locked(&network, continue_on_error)
            .await
    }

    async fn apply_vpn_users_locked(
        &self,
        network: &Network,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        let applier = VpnRules::new(
            network.clone(),
            self.rules().list_vpn_users(network.account_id),
        );
        let sent = applier.users().to_vec();
        if sent.is_empty() {
            debug!(network = %network.uuid, "no VPN users to apply");
            return Ok(true);
        }
        if !self
            .dispatch(network, RuleApplier::Vpn(applier), continue_on_error)
            .await?
        {
            return Ok(false);
        }
        for user in sent {
            match user.state {
                RuleState::Add => {
                    self.rules().set_vpn_user_state(user.id, RuleState::Active);
                }
                RuleState::Revoke => {
                    self.rules().remove_vpn_user(user.id);
                    info!(user = %user.username, "VPN user removed");
                }
                RuleState::Staged | RuleState::Active => {}
            }
        }
        Ok(true)
    }

    // ── DHCP and passwords ───────────────────────────────────────────

    fn vm_nic(&self, vm: &VirtualMachine, network: &Network) -> Result<Nic, CoreError> {
        self.inventory()
            .vm_nic_in_network(vm.id, network.id)
            .ok_or_else(|| {
                CoreError::invalid(format!(
                    "VM {} has no NIC in network {}",
                    vm.uuid, network.uuid
                ))
            })
    }

    /// Program the DHCP lease of a VM's NIC. A NIC outside the network's
    /// primary CIDR sits in a secondary subnet; the routers then get an
    /// alias address in that subnet first, allocated on demand and
    /// released again if the apply fails.
    pub async fn add_dhcp_entry(
        &self,
        vm: Uuid,
        network: Uuid,
        caller: &Account,
    ) -> Result<bool, CoreError> {
        let vm = self.usable_vm(vm, caller)?;
        let network = self.network_by_uuid(network)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        let nic = self.vm_nic(&vm, &network)?;

        if network.cidr.contains(nic.ip) {
            let applier = RuleApplier::DhcpEntry(DhcpEntryRules::new(network.clone(), vm, nic));
            return self.dispatch(&network, applier, false).await;
        }

        let mut compensation = Compensation::new();
        let alias = match self.router_alias(&network, &nic) {
            Some(alias) => alias,
            None => self.allocate_alias(&network, &nic, &mut compensation)?,
        };
        debug!(vm = %vm.uuid, alias = %alias.address, "DHCP in secondary subnet");
        let applier = RuleApplier::DhcpSubNet(DhcpSubNetRules::new(network.clone(), vm, nic, alias));
        match self.dispatch(&network, applier, false).await {
            Ok(sent) => {
                compensation.commit();
                Ok(sent)
            }
            Err(e) => {
                warn!(network = %network.uuid, error = %e, "DHCP subnet setup failed");
                self.rollback_quietly(compensation);
                Err(e)
            }
        }
    }

    /// Address a router of the network already holds in the NIC's subnet.
    fn router_alias(&self, network: &Network, nic: &Nic) -> Option<IpAddress> {
        let subnet = nic.subnet()?;
        self.inventory()
            .routers_for_network(network)
            .iter()
            .flat_map(|r| self.inventory().nics_for(NicOwner::Router(r.id)))
            .find(|n| n.kind == NicKind::Alias && subnet.contains(n.ip))
            .and_then(|n| self.inventory().ip_address_by_addr(n.ip))
    }

    fn allocate_alias(
        &self,
        network: &Network,
        nic: &Nic,
        compensation: &mut Compensation,
    ) -> Result<IpAddress, CoreError> {
        let subnet = nic.subnet().ok_or_else(|| {
            CoreError::invalid(format!("NIC {} has an invalid netmask", nic.ip))
        })?;
        let alias = self
            .inner
            .deps
            .ip_allocator
            .assign_public_ip_from_vlans(network, Some(&nic.vlan_tag), Some(subnet))?;
        compensation.push(UndoStep::ReleaseIp(alias.id));
        info!(alias = %alias.address, network = %network.uuid, "allocated router alias");
        Ok(alias)
    }

    /// Hand a VM's new password to the routers' password server.
    pub async fn save_password(
        &self,
        vm: Uuid,
        network: Uuid,
        password: &str,
        caller: &Account,
    ) -> Result<bool, CoreError> {
        if password.is_empty() {
            return Err(CoreError::invalid("password cannot be empty"));
        }
        let vm = self.usable_vm(vm, caller)?;
        let network = self.network_by_uuid(network)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        let nic = self.vm_nic(&vm, &network)?;
        let applier = RuleApplier::PasswordToRouter(PasswordToRouterRules::new(
            network.clone(),
            vm,
            nic,
            password.to_owned(),
        ));
        self.dispatch(&network, applier, false).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use netrules_api::{CommandBody, FailureMode, RecordingTransport};

    use super::*;
    use crate::applier::Dependencies;
    use crate::config::ManagerConfig;
    use crate::model::{
        AccountId, AccountRole, IpAddressId, IpState, NicId, RedundantRole, RouterId,
    };
    use crate::store::{InventoryStore, MemoryStore, RuleStore};
    use crate::testing;

    struct Fixture {
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
        manager: RulesManager,
        network: Network,
        vm: VirtualMachine,
        owner: Account,
    }

    fn fixture(vm_octets: [u8; 4]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let network = testing::network(1);
        let vm = testing::vm(7);
        store.insert_network(network.clone()).unwrap();
        store.insert_router(testing::router(1, RedundantRole::Standalone)).unwrap();
        store.insert_vm(vm.clone()).unwrap();
        let mut nic = testing::vm_nic(7, &network, vm_octets);
        nic.netmask = Ipv4Addr::new(255, 255, 255, 0);
        store.persist_nic(nic).unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let manager = RulesManager::new(
            Dependencies::in_memory(store.clone(), transport.clone()),
            ManagerConfig::default(),
        );
        Fixture {
            store,
            transport,
            manager,
            network,
            vm,
            owner: testing::account(1, AccountRole::User),
        }
    }

    fn vpn_request(network: &Network, username: &str) -> AddVpnUserRequest {
        AddVpnUserRequest {
            uuid: None,
            network: network.uuid,
            username: username.into(),
            password: "s3cret-pass".into(),
        }
    }

    #[tokio::test]
    async fn vpn_user_lifecycle() {
        let f = fixture([10, 1, 1, 20]);
        let user = f
            .manager
            .add_vpn_user(&vpn_request(&f.network, "alice"), &f.owner)
            .await
            .unwrap();
        assert_eq!(user.state, RuleState::Active);

        let err = f
            .manager
            .add_vpn_user(&vpn_request(&f.network, "alice"), &f.owner)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        f.manager
            .remove_vpn_user(f.network.uuid, user.uuid, &f.owner)
            .await
            .unwrap();
        assert!(f.store.list_vpn_users(f.network.account_id).is_empty());

        let sent = f.transport.sent();
        let CommandBody::VpnUsersCfg(cfg) = &sent.last().unwrap().1.commands[0].body else {
            panic!("expected VpnUsersCfg");
        };
        assert_eq!(cfg.users.len(), 1);
        assert!(!cfg.users[0].add);
    }

    #[tokio::test]
    async fn failed_vpn_apply_forgets_user() {
        let f = fixture([10, 1, 1, 20]);
        f.transport
            .fail_router(Ipv4Addr::new(169, 254, 0, 1), FailureMode::Unreachable);
        f.manager
            .add_vpn_user(&vpn_request(&f.network, "bob"), &f.owner)
            .await
            .unwrap_err();
        assert!(f.store.list_vpn_users(f.network.account_id).is_empty());
    }

    #[test]
    fn credentials_are_checked() {
        assert!(check_credential("alice", "username", "@._-", USERNAME_MAX).is_ok());
        assert!(check_credential("al", "username", "@._-", USERNAME_MAX).is_err());
        assert!(check_credential("_alice", "username", "@._-", USERNAME_MAX).is_err());
        assert!(check_credential("al ice", "username", "@._-", USERNAME_MAX).is_err());
    }

    #[tokio::test]
    async fn dhcp_entry_in_primary_subnet() {
        let f = fixture([10, 1, 1, 20]);
        assert!(f
            .manager
            .add_dhcp_entry(f.vm.uuid, f.network.uuid, &f.owner)
            .await
            .unwrap());
        let kinds: Vec<&str> = f
            .transport
            .sent()
            .iter()
            .flat_map(|(_, b)| b.commands.iter().map(|c| c.kind()))
            .collect();
        assert_eq!(kinds, ["DhcpEntry"]);
    }

    fn alias_candidate(store: &MemoryStore, network: &Network) {
        let mut alias = testing::public_ip(50, [10, 1, 2, 2]);
        alias.state = IpState::Free;
        alias.account_id = None;
        alias.domain_id = None;
        alias.allocated = None;
        alias.vlan.tag = network.vlan_tag.clone();
        store.insert_ip_address(alias).unwrap();
    }

    #[tokio::test]
    async fn secondary_subnet_allocates_alias_once() {
        let f = fixture([10, 1, 2, 20]);
        alias_candidate(&f.store, &f.network);

        f.manager
            .add_dhcp_entry(f.vm.uuid, f.network.uuid, &f.owner)
            .await
            .unwrap();
        let alias = f.store.ip_address(IpAddressId(50)).unwrap();
        assert_eq!(alias.state, IpState::Allocated);
        let router_nics = f.store.nics_for(NicOwner::Router(RouterId(1)));
        assert!(router_nics.iter().any(|n| n.kind == NicKind::Alias));

        let kinds: Vec<&str> = f
            .transport
            .take_sent()
            .iter()
            .flat_map(|(_, b)| b.commands.iter().map(|c| c.kind()))
            .collect();
        assert_eq!(kinds, ["CreateIpAlias", "DhcpEntry"]);

        f.manager
            .add_dhcp_entry(f.vm.uuid, f.network.uuid, &f.owner)
            .await
            .unwrap();
        let kinds: Vec<&str> = f
            .transport
            .sent()
            .iter()
            .flat_map(|(_, b)| b.commands.iter().map(|c| c.kind()))
            .collect();
        assert_eq!(kinds, ["DhcpEntry"]);
    }

    #[tokio::test]
    async fn alias_skips_free_addresses_outside_the_subnet() {
        let f = fixture([10, 1, 2, 20]);
        let mut elsewhere = testing::public_ip(49, [10, 1, 3, 2]);
        elsewhere.state = IpState::Free;
        elsewhere.account_id = None;
        elsewhere.domain_id = None;
        elsewhere.allocated = None;
        elsewhere.vlan.tag = f.network.vlan_tag.clone();
        f.store.insert_ip_address(elsewhere).unwrap();
        alias_candidate(&f.store, &f.network);

        f.manager
            .add_dhcp_entry(f.vm.uuid, f.network.uuid, &f.owner)
            .await
            .unwrap();
        assert_eq!(
            f.store.ip_address(IpAddressId(49)).unwrap().state,
            IpState::Free
        );
        assert_eq!(
            f.store.ip_address(IpAddressId(50)).unwrap().state,
            IpState::Allocated
        );
    }

    #[tokio::test]
    async fn dhcp_entry_needs_access_to_the_network() {
        let f = fixture([10, 1, 1, 20]);
        let mut foreign = testing::network(2);
        foreign.account_id = AccountId(2);
        f.store.insert_network(foreign.clone()).unwrap();
        let mut nic = testing::vm_nic(7, &foreign, [10, 1, 1, 30]);
        nic.id = NicId(3007);
        f.store.persist_nic(nic).unwrap();

        let err = f
            .manager
            .add_dhcp_entry(f.vm.uuid, foreign.uuid, &f.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_alias_setup_releases_address() {
        let f = fixture([10, 1, 2, 20]);
        alias_candidate(&f.store, &f.network);
        f.transport.reject_command("CreateIpAlias");

        f.manager
            .add_dhcp_entry(f.vm.uuid, f.network.uuid, &f.owner)
            .await
            .unwrap_err();
        assert_eq!(
            f.store.ip_address(IpAddressId(50)).unwrap().state,
            IpState::Free
        );
        assert!(f.store.nics_for(NicOwner::Router(RouterId(1))).is_empty());
    }

    #[tokio::test]
    async fn password_reaches_router() {
        let f = fixture([10, 1, 1, 20]);
        f.manager
            .save_password(f.vm.uuid, f.network.uuid, "n3w-pass", &f.owner)
            .await
            .unwrap();
        let sent = f.transport.sent();
        let CommandBody::SavePassword(cmd) = &sent[0].1.commands[0].body else {
            panic!("expected SavePassword");
        };
        assert_eq!(cmd.vm_ip, Ipv4Addr::new(10, 1, 1, 20));
        assert_eq!(cmd.password, "n3w-pass");
    }
}
