// VPC operations: private gateways and tier network ACLs.

use tracing::{info, warn};
use uuid::Uuid;

use super::{CreateAclItemRequest, CreatePrivateGatewayRequest, LockKey, RulesManager, optional_ports, parse_protocol};
use crate::applier::{NetworkAclsRules, PrivateGatewayRules, RuleApplier};
use crate::error::CoreError;
use crate::model::{
    Account, GatewayState, Ipv4Cidr, Network, NetworkAclItem, NicOwner, PrivateGateway, Protocol,
    RuleState, Vpc,
};
use crate::store::AccessTarget;
use crate::topology::{NetworkTopology, TopologyKind};

impl RulesManager {
    fn vpc_by_uuid(&self, uuid: Uuid) -> Result<Vpc, CoreError> {
        self.inventory()
            .vpc_by_uuid(uuid)
            .ok_or_else(|| CoreError::not_found("VPC", uuid))
    }

    // ── Private gateways ─────────────────────────────────────────────

    /// Attach a VPC to a private VLAN. When the routers cannot be set up
    /// the gateway is torn down and forgotten.
    pub async fn create_private_gateway(
        &self,
        request: &CreatePrivateGatewayRequest,
        caller: &Account,
    ) -> Result<PrivateGateway, CoreError> {
        let vpc = self.vpc_by_uuid(request.vpc)?;
        self.check_access(caller, AccessTarget::Vpc(&vpc))?;
        let subnet = Ipv4Cidr::from_netmask(request.ip, request.netmask)?;
        if !subnet.contains(request.gateway) {
            return Err(CoreError::invalid(format!(
                "gateway {} is outside {subnet}",
                request.gateway
            )));
        }
        if request.gateway == request.ip {
            return Err(CoreError::invalid(format!(
                "gateway {} cannot be the VPC router address",
                request.gateway
            )));
        }
        if request.vlan_tag.trim().is_empty() {
            return Err(CoreError::invalid("private gateway needs a VLAN"));
        }

        let _guard = self.lock([LockKey::Vpc(vpc.id)]).await;
        let uuid = request.uuid.unwrap_or_else(Uuid::new_v4);
        if let Some(existing) = self.inventory().private_gateway_by_uuid(uuid) {
            return if existing.vpc_id == vpc.id
                && existing.ip == request.ip
                && existing.vlan_tag == request.vlan_tag
            {
                Ok(existing)
            } else {
                Err(CoreError::invalid(format!(
                    "private gateway {uuid} already exists with different parameters"
                )))
            };
        }

        let gateway = PrivateGateway {
            id: self.inventory().next_private_gateway_id(),
            uuid,
            vpc_id: vpc.id,
            ip: request.ip,
            gateway: request.gateway,
            netmask: request.netmask,
            vlan_tag: request.vlan_tag.trim().to_owned(),
            source_nat: request.source_nat,
            state: GatewayState::Creating,
        };
        self.inventory().persist_private_gateway(gateway.clone())?;

        let applier = RuleApplier::PrivateGateway(PrivateGatewayRules::create(gateway.clone()));
        if let Err(e) = self.dispatch_vpc(vpc.id, applier).await {
            warn!(gateway = %gateway.uuid, error = %e, "private gateway setup failed");
            self.teardown_private_gateway(&gateway).await;
            self.inventory().remove_private_gateway(gateway.id);
            return Err(e);
        }
        let ready = PrivateGateway {
            state: GatewayState::Ready,
            ..gateway
        };
        self.inventory().update_private_gateway(&ready)?;
        info!(gateway = %ready.uuid, vpc = %vpc.uuid, vlan = %ready.vlan_tag, "private gateway ready");
        Ok(ready)
    }

    /// Remove `gateway` from every VPC router, one router at a time, and
    /// drop the NIC rows left for it. Failures are logged and skipped.
    async fn teardown_private_gateway(&self, gateway: &PrivateGateway) {
        let topology = NetworkTopology::new(TopologyKind::Vpc, self.config().clone());
        let rules = PrivateGatewayRules::destroy(gateway.clone());
        for router in self.inventory().routers_for_vpc(gateway.vpc_id) {
            let applier = RuleApplier::PrivateGateway(rules.clone());
            if let Err(e) = self.run(&topology, vec![router.clone()], applier, true).await {
                warn!(
                    router = %router.name,
                    gateway = %gateway.uuid,
                    error = %e,
                    "private gateway teardown failed"
                );
            }
            for nic in self.inventory().nics_for(NicOwner::Router(router.id)) {
                if rules.owns(&nic) {
                    self.inventory().remove_nic(nic.id);
                }
            }
        }
    }

    /// Detach a private gateway. On a failed teardown it stays `Ready`.
    pub async fn delete_private_gateway(
        &self,
        gateway: Uuid,
        caller: &Account,
    ) -> Result<(), CoreError> {
        let current = self
            .inventory()
            .private_gateway_by_uuid(gateway)
            .ok_or_else(|| CoreError::not_found("Private gateway", gateway))?;
        let vpc = self
            .inventory()
            .vpc(current.vpc_id)
            .ok_or_else(|| CoreError::Internal(format!("VPC of gateway {gateway} is missing")))?;
        self.check_access(caller, AccessTarget::Vpc(&vpc))?;
        let _guard = self.lock([LockKey::Vpc(vpc.id)]).await;

        let deleting = PrivateGateway {
            state: GatewayState::Deleting,
            ..current
        };
        self.inventory().update_private_gateway(&deleting)?;
        let applier = RuleApplier::PrivateGateway(PrivateGatewayRules::destroy(deleting.clone()));
        if let Err(e) = self.dispatch_vpc(vpc.id, applier).await {
            warn!(gateway = %gateway, error = %e, "private gateway teardown failed");
            self.inventory().update_private_gateway(&PrivateGateway {
                state: GatewayState::Ready,
                ..deleting
            })?;
            return Err(e);
        }
        self.inventory().remove_private_gateway(deleting.id);
        info!(%gateway, "private gateway removed");
        Ok(())
    }

    // ── Network ACLs ─────────────────────────────────────────────────

    fn vpc_tier(&self, network: Uuid, caller: &Account) -> Result<Network, CoreError> {
        let network = self.network_by_uuid(network)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        if network.vpc_id.is_none() {
            return Err(CoreError::invalid(format!(
                "network {} is not a VPC tier",
                network.uuid
            )));
        }
        Ok(network)
    }

    /// Add an item to a tier's ACL in `Add` state.
    pub async fn create_network_acl_item(
        &self,
        request: &CreateAclItemRequest,
        caller: &Account,
    ) -> Result<NetworkAclItem, CoreError> {
        let network = self.vpc_tier(request.network, caller)?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        self.create_network_acl_item_locked(request, &network)
    }

    fn create_network_acl_item_locked(
        &self,
        request: &CreateAclItemRequest,
        network: &Network,
    ) -> Result<NetworkAclItem, CoreError> {
        let protocol = parse_protocol(
            &request.protocol,
            &[Protocol::Tcp, Protocol::Udp, Protocol::Icmp, Protocol::All],
            "network ACLs",
        )?;
        let ports = optional_ports(request.port_start, request.port_end)?;
        if ports.is_some() && !protocol.has_ports() {
            return Err(CoreError::invalid(format!(
                "ports cannot be given for protocol {protocol}"
            )));
        }

        let items = self.rules().list_acl_items(network.id);
        let live = || items.iter().filter(|i| i.state != RuleState::Revoke);
        let number = match request.number {
            Some(0) => return Err(CoreError::invalid("ACL item numbers start at 1")),
            Some(n) => {
                if let Some(taken) = live().find(|i| i.number == n) {
                    return Err(CoreError::invalid(format!(
                        "ACL number {n} is already used by item {}",
                        taken.uuid
                    )));
                }
                n
            }
            None => live().map(|i| i.number).max().unwrap_or(0) + 1,
        };

        let item = NetworkAclItem {
            id: self.rules().next_acl_item_id(),
            uuid: request.uuid.unwrap_or_else(Uuid::new_v4),
            network_id: network.id,
            number,
            protocol,
            ports,
            cidrs: request.cidrs.clone(),
            action: request.action,
            traffic_type: request.traffic_type,
            state: RuleState::Add,
        };
        self.rules().persist_acl_item(item.clone())?;
        info!(item = %item.uuid, network = %network.uuid, number, "ACL item accepted");
        Ok(item)
    }

    /// Create an ACL item and program the tier; a failed apply removes it.
    pub async fn provision_network_acl_item(
        &self,
        request: &CreateAclItemRequest,
        caller: &Account,
    ) -> Result<NetworkAclItem, CoreError> {
        let network = self.vpc_tier(request.network, caller)?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        let item = self.create_network_acl_item_locked(request, &network)?;
        if let Err(e) = self.apply_network_acls_locked(&network, false).await {
            warn!(item = %item.uuid, error = %e, "apply failed, removing ACL item");
            self.rules().remove_acl_item(item.id);
            return Err(e);
        }
        self.rules()
            .find_acl_item_by_uuid(item.uuid)
            .ok_or_else(|| CoreError::Internal(format!("ACL item {} disappeared", item.uuid)))
    }

    /// Remove an ACL item from the routers, then from the store. On a
    /// failed apply it stays in `Revoke`.
    pub async fn revoke_network_acl_item(
        &self,
        item: Uuid,
        caller: &Account,
    ) -> Result<(), CoreError> {
        let current = self
            .rules()
            .find_acl_item_by_uuid(item)
            .ok_or_else(|| CoreError::not_found("ACL item", item))?;
        let network = self.network(current.network_id)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        self.rules().set_acl_item_state(current.id, RuleState::Revoke);
        self.apply_network_acls_locked(&network, false).await?;
        Ok(())
    }

    pub async fn apply_network_acls(
        &self,
        network: Uuid,
        continue_on_error: bool,
        caller: &Account,
    ) -> Result<bool, CoreError> {
        let network = self.vpc_tier(network, caller)?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        self.apply_network_acls_locked(&network, continue_on_error)
            .await
    }

    async fn apply_network_acls_locked(
        &self,
        network: &Network,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        let items = self.rules().list_acl_items(network.id);
        let applier = NetworkAclsRules::new(network.clone(), items);
        let sent = applier.items().to_vec();
        if !self
            .dispatch(network, RuleApplier::NetworkAcls(applier), continue_on_error)
            .await?
        {
            return Ok(false);
        }
        for item in sent {
            match item.state {
                RuleState::Add => {
                    self.rules().set_acl_item_state(item.id, RuleState::Active);
                }
                RuleState::Revoke => {
                    self.rules().remove_acl_item(item.id);
                }
                RuleState::Staged | RuleState::Active => {}
            }
        }
        Ok(true)
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
        AccountId, AccountRole, AclAction, DomainId, NicOwner, RedundantRole, RouterId,
        TrafficType, VpcId,
    };
    use crate::store::{InventoryStore, MemoryStore, RuleStore};
    use crate::testing;

    fn setup() -> (Arc<MemoryStore>, Arc<RecordingTransport>, RulesManager, Vpc, Network) {
        setup_with(&[RedundantRole::Standalone])
    }

    /// A VPC with one tier and a router per role, ids counting from 1.
    fn setup_with(
        roles: &[RedundantRole],
    ) -> (Arc<MemoryStore>, Arc<RecordingTransport>, RulesManager, Vpc, Network) {
        let store = Arc::new(MemoryStore::new());
        let vpc = Vpc {
            id: VpcId(1),
            uuid: Uuid::new_v4(),
            name: "vpc-1".into(),
            cidr: "10.0.0.0/16".parse().unwrap(),
            account_id: AccountId(1),
            domain_id: DomainId(1),
        };
        let mut tier = testing::network(1);
        tier.vpc_id = Some(vpc.id);
        store.insert_vpc(vpc.clone()).unwrap();
        store.insert_network(tier.clone()).unwrap();
        for (id, role) in (1..).zip(roles) {
            let mut router = testing::router(id, *role);
            router.vpc_id = Some(vpc.id);
            store.insert_router(router).unwrap();
        }
        let transport = Arc::new(RecordingTransport::new());
        let manager = RulesManager::new(
            Dependencies::in_memory(store.clone(), transport.clone()),
            ManagerConfig::default(),
        );
        (store, transport, manager, vpc, tier)
    }

    fn gateway_request(vpc: &Vpc) -> CreatePrivateGatewayRequest {
        CreatePrivateGatewayRequest {
            uuid: None,
            vpc: vpc.uuid,
            ip: Ipv4Addr::new(172, 16, 0, 2),
            gateway: Ipv4Addr::new(172, 16, 0, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            vlan_tag: "vlan://300".into(),
            source_nat: true,
        }
    }

    #[tokio::test]
    async fn private_gateway_lifecycle() {
        let (store, _, manager, vpc, _) = setup();
        let owner = testing::account(1, AccountRole::User);
        let gateway = manager
            .create_private_gateway(&gateway_request(&vpc), &owner)
            .await
            .unwrap();
        assert_eq!(gateway.state, GatewayState::Ready);
        assert_eq!(store.nics_for(NicOwner::Router(RouterId(1))).len(), 1);

        manager.delete_private_gateway(gateway.uuid, &owner).await.unwrap();
        assert!(store.private_gateway_by_uuid(gateway.uuid).is_none());
        assert!(store.nics_for(NicOwner::Router(RouterId(1))).is_empty());
    }

    #[tokio::test]
    async fn failed_gateway_setup_leaves_nothing() {
        let (store, transport, manager, vpc, _) = setup();
        transport.reject_command("SetSourceNat");
        let owner = testing::account(1, AccountRole::User);
        let err = manager
            .create_private_gateway(&gateway_request(&vpc), &owner)
            .await
            .unwrap_err();
        assert!(err.is_resource_unavailable());
        assert!(store.nics_for(NicOwner::Router(RouterId(1))).is_empty());
        assert!(store.to_snapshot().private_gateways.is_empty());
    }

    #[tokio::test]
    async fn failed_gateway_setup_tears_down_every_router() {
        let (store, transport, manager, vpc, _) =
            setup_with(&[RedundantRole::Backup, RedundantRole::Primary]);
        let primary = testing::router(2, RedundantRole::Primary);
        transport.fail_router(primary.control_ip, FailureMode::Reject);
        let owner = testing::account(1, AccountRole::User);

        manager
            .create_private_gateway(&gateway_request(&vpc), &owner)
            .await
            .unwrap_err();

        for id in [1, 2] {
            assert!(store.nics_for(NicOwner::Router(RouterId(id))).is_empty());
        }
        assert!(store.to_snapshot().private_gateways.is_empty());

        let backup = testing::router(1, RedundantRole::Backup);
        let kinds: Vec<&str> = transport
            .sent()
            .iter()
            .filter(|(endpoint, _)| endpoint.control_ip == backup.control_ip)
            .flat_map(|(_, batch)| batch.commands.iter().map(|c| c.kind()))
            .collect();
        assert_eq!(kinds.first(), Some(&"PlugNic"));
        assert_eq!(kinds.last(), Some(&"UnplugNic"));
    }

    #[tokio::test]
    async fn gateway_outside_subnet_is_rejected() {
        let (_, _, manager, vpc, _) = setup();
        let mut request = gateway_request(&vpc);
        request.gateway = Ipv4Addr::new(192, 168, 0, 1);
        let owner = testing::account(1, AccountRole::User);
        let err = manager.create_private_gateway(&request, &owner).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameterValue { .. }));
    }

    fn acl_request(tier: &Network, number: Option<u32>) -> CreateAclItemRequest {
        CreateAclItemRequest {
            uuid: None,
            network: tier.uuid,
            number,
            protocol: "tcp".into(),
            port_start: Some(443),
            port_end: None,
            cidrs: vec!["0.0.0.0/0".parse().unwrap()],
            action: AclAction::Allow,
            traffic_type: TrafficType::Ingress,
        }
    }

    #[tokio::test]
    async fn acl_items_are_numbered_and_ordered() {
        let (store, transport, manager, _, tier) = setup();
        let owner = testing::account(1, AccountRole::User);
        manager
            .provision_network_acl_item(&acl_request(&tier, Some(10)), &owner)
            .await
            .unwrap();
        let second = manager
            .provision_network_acl_item(&acl_request(&tier, None), &owner)
            .await
            .unwrap();
        assert_eq!(second.number, 11);
        assert_eq!(second.state, RuleState::Active);

        let err = manager
            .create_network_acl_item(&acl_request(&tier, Some(10)), &owner)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameterValue { .. }));

        let sent = transport.sent();
        let CommandBody::SetNetworkAcl(acl) = &sent.last().unwrap().1.commands[0].body else {
            panic!("expected SetNetworkAcl");
        };
        let numbers: Vec<u32> = acl.items.iter().map(|i| i.number).collect();
        assert_eq!(numbers, [10, 11]);

        manager.revoke_network_acl_item(second.uuid, &owner).await.unwrap();
        assert_eq!(store.list_acl_items(tier.id).len(), 1);
    }

    #[tokio::test]
    async fn failed_acl_apply_removes_item() {
        let (store, transport, manager, _, tier) = setup();
        transport.fail_router(Ipv4Addr::new(169, 254, 0, 1), FailureMode::Unreachable);
        let owner = testing::account(1, AccountRole::User);
        manager
            .provision_network_acl_item(&acl_request(&tier, None), &owner)
            .await
            .unwrap_err();
        assert!(store.list_acl_items(tier.id).is_empty());
    }

    #[tokio::test]
    async fn acls_need_a_vpc_tier() {
        let store = Arc::new(MemoryStore::new());
        let network = testing::network(1);
        store.insert_network(network.clone()).unwrap();
        let manager = RulesManager::new(
            Dependencies::in_memory(store, Arc::new(RecordingTransport::new())),
            ManagerConfig::default(),
        );
        let owner = testing::account(1, AccountRole::User);
        let err = manager
            .create_network_acl_item(&acl_request(&network, None), &owner)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a VPC tier"));
    }
}
