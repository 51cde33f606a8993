// ── Rules manager ──
//
// Orchestrates the rule lifecycle end to end: validate, persist as
// `Staged`, veto conflicts, mark `Add`, dispatch to the routers, then
// reconcile (`Add -> Active`, `Revoke -> removed`). Create operations
// return a `Compensation`; provisioning operations roll it back when
// the apply fails.
//
// Operations are grouped by rule category in the submodules. Public
// operations take the resource locks and delegate to `*_locked`
// variants, which may call each other freely.

mod compensation;
mod event;
mod firewall;
mod ip_address;
mod load_balancing;
mod lock;
mod port_forwarding;
mod request;
mod services;
mod static_nat;
mod vpc;

use std::sync::Arc;

use chrono::Utc;
use netrules_api::OnError;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::applier::{ApplyContext, Dependencies, FirewallRules, RuleApplier};
use crate::config::ManagerConfig;
use crate::conflict::detect_conflict;
use crate::error::CoreError;
use crate::model::{
    Account, FirewallRule, IpAddress, IpAddressId, Network, NetworkId, NetworkRule, Protocol,
    Purpose, RuleState, TrafficType, VirtualMachine, VpcId,
};
use crate::store::{AccessTarget, InventoryStore, RuleStore};
use crate::topology::{NetworkTopology, TopologyKind};

pub use compensation::{Compensation, CreatedRule, UndoStep};
pub use event::RuleEvent;
pub use lock::{LockGuard, LockKey, ResourceLocks};
pub use request::{
    AddVpnUserRequest, CreateAclItemRequest, CreateFirewallRuleRequest, CreateLoadBalancerRequest,
    CreatePortForwardingRequest, CreatePrivateGatewayRequest, CreateStaticNatRuleRequest,
    EnableStaticNatRequest,
};

const EVENT_CHANNEL_SIZE: usize = 256;

// ── RulesManager ─────────────────────────────────────────────────────

/// Entry point for rule operations.
///
/// Cheaply cloneable; clones share locks and the event channel.
#[derive(Clone)]
pub struct RulesManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    deps: Dependencies,
    config: ManagerConfig,
    locks: ResourceLocks,
    event_tx: broadcast::Sender<RuleEvent>,
}

impl RulesManager {
    pub fn new(deps: Dependencies, config: ManagerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(ManagerInner {
                deps,
                config,
                locks: ResourceLocks::new(),
                event_tx,
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn deps(&self) -> &Dependencies {
        &self.inner.deps
    }

    /// Subscribe to rule events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RuleEvent> {
        self.inner.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: RuleEvent) {
        // No subscribers is fine.
        let _ = self.inner.event_tx.send(event);
    }

    fn rules(&self) -> &dyn RuleStore {
        self.inner.deps.rules.as_ref()
    }

    fn inventory(&self) -> &dyn InventoryStore {
        self.inner.deps.inventory.as_ref()
    }

    async fn lock(&self, keys: impl IntoIterator<Item = LockKey>) -> LockGuard {
        self.inner.locks.acquire_many(keys).await
    }

    // ── Lookups ──────────────────────────────────────────────────────

    fn ip_by_uuid(&self, uuid: Uuid) -> Result<IpAddress, CoreError> {
        self.inventory()
            .ip_address_by_uuid(uuid)
            .ok_or_else(|| CoreError::not_found("IP address", uuid))
    }

    /// An address referenced by another row. Missing means the store is
    /// inconsistent.
    fn ip(&self, id: IpAddressId) -> Result<IpAddress, CoreError> {
        self.inventory()
            .ip_address(id)
            .ok_or_else(|| CoreError::Internal("referenced IP address is missing".into()))
    }

    fn network_by_uuid(&self, uuid: Uuid) -> Result<Network, CoreError> {
        self.inventory()
            .network_by_uuid(uuid)
            .ok_or_else(|| CoreError::not_found("Network", uuid))
    }

    fn network(&self, id: NetworkId) -> Result<Network, CoreError> {
        self.inventory()
            .network(id)
            .ok_or_else(|| CoreError::Internal("referenced network is missing".into()))
    }

    fn vm_by_uuid(&self, uuid: Uuid) -> Result<VirtualMachine, CoreError> {
        self.inventory()
            .vm_by_uuid(uuid)
            .ok_or_else(|| CoreError::not_found("VM", uuid))
    }

    fn rule_by_uuid(&self, uuid: Uuid) -> Result<NetworkRule, CoreError> {
        self.rules()
            .find_rule_by_uuid(uuid)
            .ok_or_else(|| CoreError::not_found("Rule", uuid))
    }

    fn check_access(&self, caller: &Account, target: AccessTarget<'_>) -> Result<(), CoreError> {
        self.inner.deps.access.check_access(caller, target)
    }

    // ── Validation helpers ───────────────────────────────────────────

    /// An address that can carry rules: present, allocated, owned by the
    /// caller.
    fn usable_ip(&self, uuid: Uuid, caller: &Account) -> Result<IpAddress, CoreError> {
        let ip = self.ip_by_uuid(uuid)?;
        self.check_access(caller, AccessTarget::IpAddress(&ip))?;
        if !ip.is_ready() {
            return Err(CoreError::invalid(format!(
                "IP address {} is not ready (state {})",
                ip.address, ip.state
            )));
        }
        Ok(ip)
    }

    /// A live VM the caller may use.
    fn usable_vm(&self, uuid: Uuid, caller: &Account) -> Result<VirtualMachine, CoreError> {
        let vm = self.vm_by_uuid(uuid)?;
        self.check_access(caller, AccessTarget::Vm(&vm))?;
        if vm.is_destroyed() {
            return Err(CoreError::invalid(format!("VM {} is destroyed", vm.uuid)));
        }
        Ok(vm)
    }

    /// Guest network a rule on `ip` lands in, and whether `ip` must first
    /// be associated with it (VPC addresses not yet serving a tier).
    fn rule_network(
        &self,
        ip: &IpAddress,
        requested: Option<Uuid>,
    ) -> Result<(Network, bool), CoreError> {
        match (ip.associated_with_network, requested) {
            (Some(current), None) => Ok((self.network(current)?, false)),
            (Some(current), Some(uuid)) => {
                let network = self.network_by_uuid(uuid)?;
                if network.id == current {
                    Ok((network, false))
                } else {
                    Err(CoreError::invalid(format!(
                        "IP address {} is associated with another network than {}",
                        ip.address, network.uuid
                    )))
                }
            }
            (None, Some(uuid)) => {
                let network = self.network_by_uuid(uuid)?;
                match (ip.vpc_id, network.vpc_id) {
                    (Some(owner), Some(tier_vpc)) if owner == tier_vpc => Ok((network, true)),
                    _ => Err(CoreError::invalid(format!(
                        "IP address {} cannot be used in network {}",
                        ip.address, network.uuid
                    ))),
                }
            }
            (None, None) => Err(CoreError::invalid(format!(
                "IP address {} is not associated with any network",
                ip.address
            ))),
        }
    }

    /// Associate a VPC address with a tier and record the undo step.
    fn associate_on_demand(
        &self,
        ip: &IpAddress,
        network: &Network,
        compensation: &mut Compensation,
    ) -> Result<IpAddress, CoreError> {
        let associated = self
            .inner
            .deps
            .ip_allocator
            .associate_ip_to_guest_network(ip.id, network.id)?;
        compensation.push(UndoStep::UnassignIp {
            ip: ip.id,
            network: network.id,
        });
        info!(ip = %ip.address, network = %network.uuid, "associated VPC address with tier");
        Ok(associated)
    }

    /// Plug a tier-associated VPC address onto the VPC routers ahead of
    /// its first rules. An address with active rules is already plugged.
    /// Returns `Ok(false)` when a failure was tolerated.
    async fn plug_vpc_address(
        &self,
        ip: &IpAddress,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        let (Some(_), Some(network)) = (ip.vpc_id, ip.associated_with_network) else {
            return Ok(true);
        };
        let rules = self.rules().list_by_ip(ip.id);
        let first_rules = rules.iter().any(|r| r.state() == RuleState::Add)
            && !rules.iter().any(|r| r.state() == RuleState::Active);
        if !first_rules {
            return Ok(true);
        }
        let network = self.network(network)?;
        debug!(ip = %ip.address, network = %network.uuid, "plugging VPC address");
        self.apply_ip_associations_locked(&network, continue_on_error)
            .await
    }

    // ── Rule staging ─────────────────────────────────────────────────

    /// The rule `candidate` resubmits, if any. A reused idempotency token
    /// with different content is rejected.
    fn existing_rule(
        &self,
        candidate: &NetworkRule,
        scope: &[NetworkRule],
    ) -> Result<Option<NetworkRule>, CoreError> {
        if let Some(existing) = self.rules().find_rule_by_uuid(candidate.uuid()) {
            return if existing.state() != RuleState::Revoke && existing.is_identical(candidate) {
                Ok(Some(existing))
            } else {
                Err(CoreError::invalid(format!(
                    "rule {} already exists with different parameters",
                    candidate.uuid()
                )))
            };
        }
        Ok(scope
            .iter()
            .find(|r| r.state() != RuleState::Revoke && r.is_identical(candidate))
            .cloned())
    }

    /// Persist `rule` as `Staged`, run the conflict detector against
    /// `scope`, and mark it `Add`. A vetoed rule is deleted again.
    fn stage_rule(
        &self,
        rule: NetworkRule,
        scope: &[NetworkRule],
        compensation: &mut Compensation,
    ) -> Result<NetworkRule, CoreError> {
        let id = rule.id();
        self.rules().persist_rule(rule.clone())?;
        if let Err(e) = detect_conflict(&rule, scope) {
            self.rules().remove_rule(id);
            debug!(rule = %rule.uuid(), error = %e, "staged rule vetoed");
            return Err(e);
        }
        compensation.push(UndoStep::RemoveRule(id));
        if !self.rules().set_rule_state(id, RuleState::Add) {
            return Err(CoreError::Internal(format!(
                "rule {} disappeared while staging",
                rule.uuid()
            )));
        }
        let mut rule = rule;
        rule.base_mut().state = RuleState::Add;
        info!(rule = %rule.uuid(), purpose = %rule.purpose(), "rule accepted");
        Ok(rule)
    }

    /// Base fields for a new rule on `network`, owned like `ip` (or the
    /// network when the address has no owner).
    #[allow(clippy::too_many_arguments)]
    fn new_rule_base(
        &self,
        uuid: Option<Uuid>,
        ip: Option<&IpAddress>,
        network: &Network,
        purpose: Purpose,
        traffic_type: TrafficType,
        protocol: Protocol,
        ports: Option<crate::model::PortRange>,
    ) -> FirewallRule {
        FirewallRule {
            id: self.rules().next_rule_id(),
            uuid: uuid.unwrap_or_else(Uuid::new_v4),
            source_ip_address_id: ip.map(|ip| ip.id),
            ports: ports.filter(|_| protocol.has_ports()),
            protocol,
            purpose,
            traffic_type,
            state: RuleState::Staged,
            network_id: network.id,
            account_id: ip.and_then(|ip| ip.account_id).unwrap_or(network.account_id),
            domain_id: ip.and_then(|ip| ip.domain_id).unwrap_or(network.domain_id),
            created: Utc::now(),
            source_cidrs: Vec::new(),
            dest_cidrs: Vec::new(),
            icmp_type: None,
            icmp_code: None,
            related: None,
        }
    }

    /// Create the ingress firewall rule that opens `parent`'s ports.
    fn open_firewall_for(
        &self,
        parent: &FirewallRule,
        ip: &IpAddress,
        network: &Network,
        compensation: &mut Compensation,
    ) -> Result<(), CoreError> {
        let mut base = self.new_rule_base(
            None,
            Some(ip),
            network,
            Purpose::Firewall,
            TrafficType::Ingress,
            parent.protocol,
            parent.ports,
        );
        base.source_cidrs.clone_from(&parent.source_cidrs);
        base.related = Some(parent.id);
        let candidate = NetworkRule::Firewall(base);

        let scope = self.rules().list_by_ip(ip.id);
        if self.existing_rule(&candidate, &scope)?.is_some() {
            debug!(rule = %parent.uuid, "firewall already open for rule");
            return Ok(());
        }
        self.stage_rule(candidate, &scope, compensation)?;
        Ok(())
    }

    /// Mark `rule` and the rules created alongside it for removal.
    /// `Staged` rows are deleted at once. Returns `false` when nothing is
    /// left to deprogram.
    fn mark_revoked(&self, rule: &NetworkRule) -> bool {
        let mut family = self.rules().list_related(rule.id());
        family.push(rule.clone());
        let mut needs_apply = false;
        for member in &family {
            if member.state() == RuleState::Staged {
                self.rules().remove_rule(member.id());
            } else {
                self.rules().set_rule_state(member.id(), RuleState::Revoke);
                needs_apply = true;
            }
        }
        debug!(rule = %rule.uuid(), related = family.len() - 1, "rule marked for revoke");
        needs_apply
    }

    /// Record a successful apply of `applied`.
    fn reconcile(&self, applied: &[NetworkRule]) {
        for rule in applied {
            match rule.state() {
                RuleState::Add => {
                    if self.rules().set_rule_state(rule.id(), RuleState::Active) {
                        info!(rule = %rule.uuid(), purpose = %rule.purpose(), "rule active");
                        self.emit(RuleEvent::rule_activated(rule.uuid(), rule.purpose()));
                    }
                }
                RuleState::Revoke => {
                    if self.rules().remove_rule(rule.id()).is_some() {
                        info!(rule = %rule.uuid(), purpose = %rule.purpose(), "rule removed");
                        self.emit(RuleEvent::rule_removed(rule.uuid(), rule.purpose()));
                    }
                }
                RuleState::Staged | RuleState::Active => {}
            }
        }
    }

    /// Revoke an IP or egress rule and reprogram its scope. On a failed
    /// apply the rule stays in `Revoke`.
    async fn revoke_rule(
        &self,
        uuid: Uuid,
        purpose: Purpose,
        caller: &Account,
    ) -> Result<(), CoreError> {
        let rule = self.rule_by_uuid(uuid)?;
        if rule.purpose() != purpose {
            return Err(CoreError::invalid(format!("rule {uuid} is not a {purpose} rule")));
        }
        self.check_access(caller, AccessTarget::Rule(&rule))?;
        let key = match rule.base().source_ip_address_id {
            Some(ip) => LockKey::Ip(ip),
            None => LockKey::Network(rule.base().network_id),
        };
        let _guard = self.lock([key]).await;

        let rule = self.rule_by_uuid(uuid)?;
        if !self.mark_revoked(&rule) {
            info!(rule = %uuid, "staged rule removed");
            return Ok(());
        }
        match rule.base().source_ip_address_id {
            Some(ip) => {
                let ip = self.ip(ip)?;
                self.apply_ip_rules(&ip, Purpose::Firewall, false).await?;
                if purpose != Purpose::Firewall {
                    self.apply_ip_rules(&ip, purpose, false).await?;
                }
            }
            None => {
                let network = self.network(rule.base().network_id)?;
                self.apply_egress_locked(&network, false).await?;
            }
        }
        Ok(())
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Program the routers of `network`. Returns `Ok(false)` when a
    /// router failure was tolerated under `continue_on_error`.
    async fn dispatch(
        &self,
        network: &Network,
        applier: RuleApplier,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        let topology = NetworkTopology::for_network(network, self.inner.config.clone());
        let routers = self.inventory().routers_for_network(network);
        self.run(&topology, routers, applier, continue_on_error).await
    }

    /// Program the routers of a VPC.
    async fn dispatch_vpc(&self, vpc: VpcId, applier: RuleApplier) -> Result<bool, CoreError> {
        let topology = NetworkTopology::new(TopologyKind::Vpc, self.inner.config.clone());
        let routers = self.inventory().routers_for_vpc(vpc);
        self.run(&topology, routers, applier, false).await
    }

    async fn run(
        &self,
        topology: &NetworkTopology,
        routers: Vec<crate::model::VirtualRouter>,
        mut applier: RuleApplier,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        let ctx = ApplyContext {
            deps: &self.inner.deps,
            on_error: if continue_on_error {
                OnError::Continue
            } else {
                OnError::Stop
            },
        };
        match topology.apply_rules(&ctx, routers, &mut applier).await {
            Ok(_) => Ok(true),
            Err(e) if continue_on_error && e.is_resource_unavailable() => {
                warn!(applier = applier.name(), error = %e, "apply failed, continuing");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Send every programmable rule of `purpose` on `ip` and reconcile.
    async fn apply_ip_rules(
        &self,
        ip: &IpAddress,
        purpose: Purpose,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        let rules: Vec<NetworkRule> = self
            .rules()
            .list_by_ip_and_purpose(ip.id, purpose)
            .into_iter()
            .filter(|r| r.state().needs_programming())
            .collect();
        let Some(first) = rules.first() else {
            debug!(ip = %ip.address, %purpose, "no rules to apply");
            return Ok(true);
        };
        let network = self.network(first.base().network_id)?;
        let applier =
            RuleApplier::Firewall(FirewallRules::new(network.clone(), purpose, rules.clone())?);
        if !self.dispatch(&network, applier, continue_on_error).await? {
            return Ok(false);
        }
        self.reconcile(&rules);
        Ok(true)
    }

    // ── Rollback ─────────────────────────────────────────────────────

    /// Undo a create operation. Every step is attempted, newest first;
    /// the first failure is returned.
    pub fn rollback(&self, compensation: Compensation) -> Result<(), CoreError> {
        let mut first_error = None;
        for step in compensation.into_reversed() {
            if let Err(e) = self.undo(step) {
                warn!(error = %e, "rollback step failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Roll back after a failure that is reported instead.
    /// Undo a create whose apply failed. Tiers that had a VPC address
    /// associated by the create get their public NICs brought back in line.
    async fn rollback_apply(&self, compensation: Compensation) {
        let tiers: Vec<NetworkId> = compensation
            .steps()
            .iter()
            .filter_map(|step| match step {
                UndoStep::UnassignIp { network, .. } => Some(*network),
                _ => None,
            })
            .collect();
        self.rollback_quietly(compensation);
        for tier in tiers {
            let Ok(network) = self.network(tier) else {
                continue;
            };
            if let Err(e) = self.apply_ip_associations_locked(&network, true).await {
                warn!(network = %network.uuid, error = %e, "public NICs not reconciled after rollback");
            }
        }
    }

    fn rollback_quietly(&self, compensation: Compensation) {
        if compensation.is_empty() {
            return;
        }
        if self.rollback(compensation).is_ok() {
            debug!("rolled back partial changes");
        }
    }

    fn undo(&self, step: UndoStep) -> Result<(), CoreError> {
        match step {
            UndoStep::RemoveRule(id) => {
                for related in self.rules().list_related(id) {
                    self.rules().remove_rule(related.id());
                }
                if let Some(rule) = self.rules().remove_rule(id) {
                    debug!(rule = %rule.uuid(), "rule rolled back");
                }
                Ok(())
            }
            UndoStep::UnassignIp { ip, network } => self
                .inner
                .deps
                .ip_allocator
                .unassign_ip_from_vpc_network(ip, network),
            UndoStep::RestoreIp(snapshot) => {
                let current = self.ip(snapshot.id)?;
                let restored = IpAddress {
                    version: current.version,
                    ..*snapshot
                };
                self.inventory().update_ip_address(&restored).map(|_| ())
            }
            UndoStep::RemoveLbDestinations { rule, vms } => {
                let Some(NetworkRule::LoadBalancing(mut lb)) = self.rules().find_rule(rule) else {
                    return Ok(());
                };
                lb.destinations.retain(|d| !vms.contains(&d.vm_id));
                self.rules()
                    .update_rule(&NetworkRule::LoadBalancing(lb))
                    .map(|_| ())
            }
            UndoStep::ReleaseIp(ip) => self.inner.deps.ip_allocator.release_ip(ip),
        }
    }

    /// Run `build`; if it fails, undo whatever it recorded.
    fn with_compensation<T>(
        &self,
        build: impl FnOnce(&mut Compensation) -> Result<T, CoreError>,
    ) -> Result<CreatedRule<T>, CoreError> {
        let mut compensation = Compensation::new();
        match build(&mut compensation) {
            Ok(rule) => Ok(CreatedRule { rule, compensation }),
            Err(e) => {
                self.rollback_quietly(compensation);
                Err(e)
            }
        }
    }
}

/// Parse a user-supplied protocol and check it against `allowed`.
fn parse_protocol(raw: &str, allowed: &[Protocol], what: &str) -> Result<Protocol, CoreError> {
    let protocol: Protocol = raw
        .trim()
        .parse()
        .map_err(|_| CoreError::invalid(format!("unknown protocol {raw}")))?;
    if allowed.contains(&protocol) {
        Ok(protocol)
    } else {
        Err(CoreError::invalid(format!(
            "protocol {protocol} is not supported for {what}"
        )))
    }
}

/// Port range from optional bounds. A missing end means a single port; no
/// bounds means every port.
fn optional_ports(
    start: Option<u16>,
    end: Option<u16>,
) -> Result<Option<crate::model::PortRange>, CoreError> {
    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), end) => crate::model::PortRange::new(start, end.unwrap_or(start)).map(Some),
        (None, Some(_)) => Err(CoreError::invalid("end port given without a start port")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parsing_is_case_insensitive_and_scoped() {
        assert_eq!(
            parse_protocol("TCP", &[Protocol::Tcp, Protocol::Udp], "port forwarding").unwrap(),
            Protocol::Tcp
        );
        let err = parse_protocol("icmp", &[Protocol::Tcp], "port forwarding").unwrap_err();
        assert!(err.to_string().contains("not supported"));
        assert!(parse_protocol("gre", &[Protocol::Tcp], "x").is_err());
    }

    #[test]
    fn optional_port_bounds() {
        assert_eq!(optional_ports(None, None).unwrap(), None);
        assert_eq!(
            optional_ports(Some(80), None).unwrap(),
            Some(crate::model::PortRange::single(80))
        );
        assert!(optional_ports(Some(90), Some(80)).is_err());
        assert!(optional_ports(None, Some(80)).is_err());
    }
}
