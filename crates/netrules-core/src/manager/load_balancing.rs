// Load balancer operations. Routers always receive the complete balancer
// configuration of a network, so every change resends the network's set.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    CreateLoadBalancerRequest, CreatedRule, LockKey, RulesManager, UndoStep, parse_protocol,
};
use crate::applier::{LoadBalancingRules, RuleApplier};
use crate::error::CoreError;
use crate::model::{
    Account, IpAddressId, LbDestination, LoadBalancingRule, Network, NetworkId, NetworkRule,
    PortRange, Protocol, Purpose, RuleState, TrafficType,
};
use crate::store::AccessTarget;

const DEFAULT_WEIGHT: u32 = 1;

impl RulesManager {
    pub async fn create_load_balancer_rule(
        &self,
        request: &CreateLoadBalancerRequest,
        caller: &Account,
    ) -> Result<CreatedRule<LoadBalancingRule>, CoreError> {
        let keys = self.load_balancer_request_keys(request)?;
        let _guard = self.lock(keys).await;
        self.create_load_balancer_locked(request, caller)
    }

    fn load_balancer_request_keys(
        &self,
        request: &CreateLoadBalancerRequest,
    ) -> Result<[LockKey; 2], CoreError> {
        let ip = self.ip_by_uuid(request.ip_address)?;
        let (network, _) = self.rule_network(&ip, request.network)?;
        Ok([LockKey::Network(network.id), LockKey::Ip(ip.id)])
    }

    fn create_load_balancer_locked(
        &self,
        request: &CreateLoadBalancerRequest,
        caller: &Account,
    ) -> Result<CreatedRule<LoadBalancingRule>, CoreError> {
        let protocol = parse_protocol(
            &request.protocol,
            &[Protocol::Tcp, Protocol::Udp],
            "load balancing",
        )?;
        if request.name.trim().is_empty() {
            return Err(CoreError::invalid("load balancer name cannot be empty"));
        }
        if request.public_port == 0 || request.private_port == 0 {
            return Err(CoreError::invalid("load balancer ports must be non-zero"));
        }
        let ip = self.usable_ip(request.ip_address, caller)?;
        if ip.one_to_one_nat {
            return Err(CoreError::invalid(format!(
                "IP address {} has static NAT enabled",
                ip.address
            )));
        }
        let (network, associate) = self.rule_network(&ip, request.network)?;
        let algorithm = request
            .algorithm
            .unwrap_or(self.config().lb_default_algorithm);

        self.with_compensation(|compensation| {
            let ip = if associate {
                self.associate_on_demand(&ip, &network, compensation)?
            } else {
                ip
            };
            let candidate = NetworkRule::LoadBalancing(LoadBalancingRule {
                rule: self.new_rule_base(
                    request.uuid,
                    Some(&ip),
                    &network,
                    Purpose::LoadBalancing,
                    TrafficType::Ingress,
                    protocol,
                    Some(PortRange::single(request.public_port)),
                ),
                name: request.name.trim().to_owned(),
                algorithm,
                private_port: request.private_port,
                destinations: Vec::new(),
                stickiness: request.stickiness.clone(),
                health_checks: request.health_checks.clone(),
                ssl_cert: request.ssl_cert.clone(),
            });
            let scope = self.rules().list_by_ip(ip.id);
            if let Some(NetworkRule::LoadBalancing(existing)) =
                self.existing_rule(&candidate, &scope)?
            {
                info!(rule = %existing.rule.uuid, "load balancer rule already exists");
                return Ok(existing);
            }
            match self.stage_rule(candidate, &scope, compensation)? {
                NetworkRule::LoadBalancing(rule) => Ok(rule),
                _ => Err(CoreError::Internal("staged rule changed kind".into())),
            }
        })
    }

    /// Create a load balancer rule and program it; a failed apply undoes it.
    pub async fn provision_load_balancer_rule(
        &self,
        request: &CreateLoadBalancerRequest,
        caller: &Account,
    ) -> Result<LoadBalancingRule, CoreError> {
        let keys = self.load_balancer_request_keys(request)?;
        let _guard = self.lock(keys).await;
        let CreatedRule { rule, compensation } =
            self.create_load_balancer_locked(request, caller)?;
        let network = self.network(rule.rule.network_id)?;
        if let Err(e) = self.apply_load_balancers_locked(&network, false).await {
            warn!(rule = %rule.rule.uuid, error = %e, "apply failed, rolling back");
            self.rollback_apply(compensation).await;
            return Err(e);
        }
        compensation.commit();
        self.load_balancer(rule.rule.id)
    }

    fn load_balancer(&self, id: crate::model::RuleId) -> Result<LoadBalancingRule, CoreError> {
        match self.rules().find_rule(id) {
            Some(NetworkRule::LoadBalancing(lb)) => Ok(lb),
            _ => Err(CoreError::Internal(
                "load balancer rule disappeared during the operation".into(),
            )),
        }
    }

    /// Look up a load balancer rule the caller may change, and the locks
    /// covering it.
    fn load_balancer_for(
        &self,
        uuid: Uuid,
        caller: &Account,
    ) -> Result<(LoadBalancingRule, [LockKey; 2]), CoreError> {
        let rule = self.rule_by_uuid(uuid)?;
        self.check_access(caller, AccessTarget::Rule(&rule))?;
        let NetworkRule::LoadBalancing(lb) = rule else {
            return Err(CoreError::invalid(format!(
                "rule {uuid} is not a load balancer rule"
            )));
        };
        let ip: IpAddressId = lb
            .rule
            .source_ip_address_id
            .ok_or_else(|| CoreError::Internal(format!("load balancer {uuid} has no address")))?;
        let network: NetworkId = lb.rule.network_id;
        Ok((lb, [LockKey::Network(network), LockKey::Ip(ip)]))
    }

    /// Add VMs behind a load balancer. A failed apply drops them again.
    pub async fn assign_to_load_balancer(
        &self,
        rule: Uuid,
        vms: &[Uuid],
        caller: &Account,
    ) -> Result<LoadBalancingRule, CoreError> {
        let (_, keys) = self.load_balancer_for(rule, caller)?;
        let _guard = self.lock(keys).await;
        let (mut lb, _) = self.load_balancer_for(rule, caller)?;
        if lb.rule.state == RuleState::Revoke {
            return Err(CoreError::invalid(format!(
                "load balancer {rule} is being removed"
            )));
        }
        let network = self.network(lb.rule.network_id)?;

        let mut added = Vec::new();
        for uuid in vms {
            let vm = self.usable_vm(*uuid, caller)?;
            let nic = self
                .inventory()
                .vm_nic_in_network(vm.id, network.id)
                .ok_or_else(|| {
                    CoreError::invalid(format!(
                        "VM {} has no NIC in network {}",
                        vm.uuid, network.uuid
                    ))
                })?;
            if lb.live_destinations().any(|d| d.vm_id == vm.id) || added.contains(&vm.id) {
                debug!(vm = %vm.uuid, "already behind load balancer");
                continue;
            }
            lb.destinations.retain(|d| d.vm_id != vm.id);
            lb.destinations.push(LbDestination {
                vm_id: vm.id,
                ip: nic.ip,
                port: lb.private_port,
                weight: DEFAULT_WEIGHT,
                state: RuleState::Add,
            });
            added.push(vm.id);
        }
        if added.is_empty() {
            return Ok(lb);
        }

        let mut compensation = super::Compensation::new();
        self.rules()
            .update_rule(&NetworkRule::LoadBalancing(lb.clone()))?;
        compensation.push(UndoStep::RemoveLbDestinations {
            rule: lb.rule.id,
            vms: added,
        });
        if let Err(e) = self.apply_load_balancers_locked(&network, false).await {
            warn!(rule = %rule, error = %e, "apply failed, removing new destinations");
            self.rollback_quietly(compensation);
            return Err(e);
        }
        compensation.commit();
        self.load_balancer(lb.rule.id)
    }

    /// Take VMs out of a load balancer. On a failed apply the destinations
    /// stay marked for removal.
    pub async fn remove_from_load_balancer(
        &self,
        rule: Uuid,
        vms: &[Uuid],
        caller: &Account,
    ) -> Result<LoadBalancingRule, CoreError> {
        let (_, keys) = self.load_balancer_for(rule, caller)?;
        let _guard = self.lock(keys).await;
        let (mut lb, _) = self.load_balancer_for(rule, caller)?;

        let mut changed = false;
        for uuid in vms {
            let vm = self.vm_by_uuid(*uuid)?;
            let Some(destination) = lb.destinations.iter_mut().find(|d| d.vm_id == vm.id) else {
                return Err(CoreError::invalid(format!(
                    "VM {} is not behind load balancer {rule}",
                    vm.uuid
                )));
            };
            if destination.state != RuleState::Revoke {
                destination.state = RuleState::Revoke;
                changed = true;
            }
        }
        if !changed {
            return Ok(lb);
        }
        self.rules()
            .update_rule(&NetworkRule::LoadBalancing(lb.clone()))?;
        let network = self.network(lb.rule.network_id)?;
        self.apply_load_balancers_locked(&network, false).await?;
        self.load_balancer(lb.rule.id)
    }

    /// Revoke a load balancer rule with all its destinations.
    pub async fn delete_load_balancer_rule(
        &self,
        rule: Uuid,
        caller: &Account,
    ) -> Result<(), CoreError> {
        let (_, keys) = self.load_balancer_for(rule, caller)?;
        let _guard = self.lock(keys).await;
        let (lb, _) = self.load_balancer_for(rule, caller)?;
        if !self.mark_revoked(&NetworkRule::LoadBalancing(lb.clone())) {
            info!(%rule, "staged load balancer removed");
            return Ok(());
        }
        let network = self.network(lb.rule.network_id)?;
        self.apply_load_balancers_locked(&network, false).await?;
        Ok(())
    }

    /// Resend the balancer configuration of a network.
    pub async fn apply_load_balancer_rules(
        &self,
        network: Uuid,
        continue_on_error: bool,
        caller: &Account,
    ) -> Result<bool, CoreError> {
        let network = self.network_by_uuid(network)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        self.apply_load_balancers_locked(&network, continue_on_error)
            .await
    }

    async fn apply_load_balancers_locked(
        &self,
        network: &Network,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        let rules: Vec<NetworkRule> = self
            .rules()
            .list_by_network_and_purpose(network.id, Purpose::LoadBalancing)
            .into_iter()
            .filter(|r| r.state().needs_programming())
            .collect();
        if network.vpc_id.is_some() {
            let mut pending: Vec<IpAddressId> = rules
                .iter()
                .filter(|r| r.state() == RuleState::Add)
                .filter_map(|r| r.base().source_ip_address_id)
                .collect();
            pending.sort_unstable();
            pending.dedup();
            for id in pending {
                if !self.plug_vpc_address(&self.ip(id)?, continue_on_error).await? {
                    return Ok(false);
                }
            }
        }
        let applier = RuleApplier::LoadBalancing(LoadBalancingRules::new(network.clone()));
        if !self.dispatch(network, applier, continue_on_error).await? {
            return Ok(false);
        }
        self.settle_load_balancers(&rules)?;
        Ok(true)
    }

    /// After a successful apply: removed destinations are dropped, new
    /// ones become `Active`, and the rules follow the usual reconcile.
    fn settle_load_balancers(&self, applied: &[NetworkRule]) -> Result<(), CoreError> {
        for rule in applied {
            let Some(lb) = rule.as_load_balancing() else {
                continue;
            };
            if lb.rule.state != RuleState::Revoke {
                let mut settled = lb.clone();
                settled
                    .destinations
                    .retain(|d| d.state != RuleState::Revoke);
                for destination in &mut settled.destinations {
                    destination.state = RuleState::Active;
                }
                if settled != *lb {
                    self.rules()
                        .update_rule(&NetworkRule::LoadBalancing(settled))?;
                }
            }
            self.reconcile(std::slice::from_ref(rule));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use netrules_api::{CommandBody, FailureMode, RecordingTransport};

    use super::*;
    use crate::applier::Dependencies;
    use crate::config::ManagerConfig;
    use crate::model::{AccountRole, IpAddress, LbAlgorithm, RedundantRole, VirtualMachine};
    use crate::store::{InventoryStore, MemoryStore, RuleStore};
    use crate::testing;

    struct Fixture {
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
        manager: RulesManager,
        ip: IpAddress,
        vms: Vec<VirtualMachine>,
        owner: Account,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let network = testing::network(1);
        let mut ip = testing::public_ip(1, [203, 0, 113, 7]);
        ip.associated_with_network = Some(network.id);
        store.insert_network(network.clone()).unwrap();
        store.insert_ip_address(ip.clone()).unwrap();
        let vms: Vec<_> = (1..=2).map(testing::vm).collect();
        for (vm, host) in vms.iter().zip([10, 11]) {
            store.insert_vm(vm.clone()).unwrap();
            store
                .persist_nic(testing::vm_nic(vm.id.0, &network, [10, 1, 1, host]))
                .unwrap();
        }
        store
            .insert_router(testing::router(1, RedundantRole::Standalone))
            .unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let manager = RulesManager::new(
            Dependencies::in_memory(store.clone(), transport.clone()),
            ManagerConfig {
                lb_default_algorithm: LbAlgorithm::LeastConn,
                ..ManagerConfig::default()
            },
        );
        Fixture {
            store,
            transport,
            manager,
            ip,
            vms,
            owner: testing::account(1, AccountRole::User),
        }
    }

    fn request(f: &Fixture) -> CreateLoadBalancerRequest {
        CreateLoadBalancerRequest {
            uuid: None,
            name: "web".into(),
            ip_address: f.ip.uuid,
            network: None,
            protocol: "tcp".into(),
            public_port: 80,
            private_port: 8080,
            algorithm: None,
            stickiness: Vec::new(),
            health_checks: Vec::new(),
            ssl_cert: None,
        }
    }

    #[tokio::test]
    async fn default_algorithm_comes_from_config() {
        let f = fixture();
        let lb = f
            .manager
            .provision_load_balancer_rule(&request(&f), &f.owner)
            .await
            .unwrap();
        assert_eq!(lb.algorithm, LbAlgorithm::LeastConn);
        assert_eq!(lb.rule.state, RuleState::Active);
    }

    #[tokio::test]
    async fn destinations_follow_the_lifecycle() {
        let f = fixture();
        let lb = f
            .manager
            .provision_load_balancer_rule(&request(&f), &f.owner)
            .await
            .unwrap();
        let vms: Vec<Uuid> = f.vms.iter().map(|vm| vm.uuid).collect();

        let lb = f
            .manager
            .assign_to_load_balancer(lb.rule.uuid, &vms, &f.owner)
            .await
            .unwrap();
        assert_eq!(lb.destinations.len(), 2);
        assert!(lb.destinations.iter().all(|d| d.state == RuleState::Active));

        let lb = f
            .manager
            .remove_from_load_balancer(lb.rule.uuid, &vms[..1], &f.owner)
            .await
            .unwrap();
        assert_eq!(lb.destinations.len(), 1);
        assert_eq!(lb.destinations[0].vm_id, f.vms[1].id);

        let sent = f.transport.sent();
        let CommandBody::LoadBalancerConfig(last) = &sent.last().unwrap().1.commands[0].body else {
            panic!("expected load balancer config");
        };
        assert_eq!(last.rules.len(), 1);
    }

    #[tokio::test]
    async fn failed_assign_drops_new_destinations() {
        let f = fixture();
        let lb = f
            .manager
            .provision_load_balancer_rule(&request(&f), &f.owner)
            .await
            .unwrap();
        let router = testing::router(1, RedundantRole::Standalone);
        f.transport.fail_router(router.control_ip, FailureMode::Reject);
        let err = f
            .manager
            .assign_to_load_balancer(lb.rule.uuid, &[f.vms[0].uuid], &f.owner)
            .await
            .unwrap_err();
        assert!(err.is_resource_unavailable());
        let stored = f.store.find_rule(lb.rule.id).unwrap();
        assert!(stored.as_load_balancing().unwrap().destinations.is_empty());
    }

    #[tokio::test]
    async fn static_nat_address_is_refused() {
        let f = fixture();
        let mut ip = f.store.ip_address(f.ip.id).unwrap();
        ip.one_to_one_nat = true;
        f.store.update_ip_address(&ip).unwrap();
        let err = f
            .manager
            .create_load_balancer_rule(&request(&f), &f.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameterValue { .. }));
    }

    #[tokio::test]
    async fn delete_removes_rule() {
        let f = fixture();
        let lb = f
            .manager
            .provision_load_balancer_rule(&request(&f), &f.owner)
            .await
            .unwrap();
        f.manager
            .delete_load_balancer_rule(lb.rule.uuid, &f.owner)
            .await
            .unwrap();
        assert!(f.store.find_rule(lb.rule.id).is_none());
    }
}
