// ── Topology dispatch ──
//
// Decides which routers of a network receive an applier's commands, in
// what order, and which router failures are tolerated. The per-pair
// programming routines live in `visitor`.
//
// Ordering within a redundant set is fixed: routers are ranked by role
// (see `RedundantOrder`) and then by row id.

mod visitor;

use std::fmt;

use tracing::{debug, info, warn};

use crate::applier::{ApplyContext, RuleApplier};
use crate::config::{ManagerConfig, RedundantOrder};
use crate::error::CoreError;
use crate::model::{Network, RedundantRole, RouterState, VirtualRouter};

pub(crate) use visitor::visit;

/// Zone deployment mode of a guest network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyKind {
    /// Flat zone, one router per pod.
    Basic,
    /// Isolated guest networks behind their own router (or redundant pair).
    Advanced,
    /// VPC tiers behind the VPC's routers.
    Vpc,
}

impl TopologyKind {
    pub fn for_network(network: &Network) -> Self {
        if network.vpc_id.is_some() {
            Self::Vpc
        } else if network.zone_type == netrules_api::ZoneNetworkType::Basic {
            Self::Basic
        } else {
            Self::Advanced
        }
    }

    /// Whether this topology has a routine for `applier`.
    pub fn supports(self, applier: &RuleApplier) -> bool {
        match applier {
            RuleApplier::IpAssociation(_) => self != Self::Vpc,
            RuleApplier::NicPlugInOut(_)
            | RuleApplier::PrivateGateway(_)
            | RuleApplier::NetworkAcls(_) => self == Self::Vpc,
            _ => true,
        }
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
            Self::Vpc => "vpc",
        })
    }
}

/// Outcome of one dispatch, by router name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Routers that were programmed (or had nothing to program).
    pub applied: Vec<String>,
    /// Routers skipped because they are stopped or not connected.
    pub skipped: Vec<String>,
    /// Redundant routers that did not answer.
    pub unreachable: Vec<String>,
}

// ── Dispatcher ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NetworkTopology {
    kind: TopologyKind,
    config: ManagerConfig,
}

impl NetworkTopology {
    pub fn new(kind: TopologyKind, config: ManagerConfig) -> Self {
        Self { kind, config }
    }

    pub fn for_network(network: &Network, config: ManagerConfig) -> Self {
        Self::new(TopologyKind::for_network(network), config)
    }

    pub fn kind(&self) -> TopologyKind {
        self.kind
    }

    fn rank(&self, role: RedundantRole) -> u8 {
        match (self.config.redundant_order, role) {
            (_, RedundantRole::Standalone) => 1,
            (RedundantOrder::BackupFirst, RedundantRole::Backup)
            | (RedundantOrder::PrimaryFirst, RedundantRole::Primary) => 0,
            (RedundantOrder::BackupFirst, RedundantRole::Primary)
            | (RedundantOrder::PrimaryFirst, RedundantRole::Backup) => 2,
        }
    }

    /// Sort routers into dispatch order.
    pub fn order_routers(&self, routers: &mut [VirtualRouter]) {
        routers.sort_by_key(|r| (self.rank(r.role), r.id));
    }

    /// Program every eligible router in `routers` with `applier`.
    ///
    /// Stopped routers are skipped; they are programmed in full when they
    /// start. A router in a transitional state fails the dispatch when
    /// `fail_when_disconnected` is set. An unreachable router aborts the
    /// dispatch unless it belongs to a redundant set and another member
    /// was programmed.
    pub async fn apply_rules(
        &self,
        ctx: &ApplyContext<'_>,
        mut routers: Vec<VirtualRouter>,
        applier: &mut RuleApplier,
    ) -> Result<DispatchReport, CoreError> {
        if !self.kind.supports(applier) {
            return Err(CoreError::Unsupported {
                operation: applier.name().to_owned(),
                topology: self.kind.to_string(),
            });
        }

        if self.kind == TopologyKind::Basic {
            if let Some(pod) = applier.pod() {
                routers.retain(|r| r.pod_id == Some(pod));
            }
        }

        let mut report = DispatchReport::default();
        if routers.is_empty() {
            debug!(applier = applier.name(), "no router to program");
            return Ok(report);
        }
        self.order_routers(&mut routers);

        for router in &routers {
            match router.state {
                RouterState::Running => {}
                RouterState::Stopped | RouterState::Stopping => {
                    debug!(router = %router.name, state = %router.state, "skipping stopped router");
                    report.skipped.push(router.name.clone());
                    continue;
                }
                state if self.config.fail_when_disconnected => {
                    return Err(CoreError::unavailable(
                        format!("router {}", router.name),
                        format!("router is {state}"),
                    ));
                }
                state => {
                    warn!(router = %router.name, %state, "skipping disconnected router");
                    report.skipped.push(router.name.clone());
                    continue;
                }
            }

            match applier.accept(self.kind, router, ctx).await {
                Ok(sent) => {
                    debug!(router = %router.name, applier = applier.name(), sent, "router programmed");
                    report.applied.push(router.name.clone());
                }
                Err(e) if e.is_unreachable() && router.is_redundant() => {
                    warn!(router = %router.name, error = %e, "redundant router unreachable");
                    report.unreachable.push(router.name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        if report.applied.is_empty() && !report.unreachable.is_empty() {
            return Err(CoreError::ResourceUnavailable {
                resource: format!("routers {}", report.unreachable.join(", ")),
                reason: "no router of the redundant set answered".into(),
                unreachable: true,
            });
        }
        info!(
            applier = applier.name(),
            topology = %self.kind,
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            "dispatch complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use netrules_api::{FailureMode, RecordingTransport};

    use super::*;
    use crate::applier::{Dependencies, FirewallRules, NetworkAclsRules};
    use crate::model::{Purpose, RouterId};
    use crate::store::MemoryStore;
    use crate::testing;

    fn setup() -> (Arc<RecordingTransport>, Dependencies) {
        let transport = Arc::new(RecordingTransport::new());
        let deps = Dependencies::in_memory(Arc::new(MemoryStore::new()), transport.clone());
        (transport, deps)
    }

    fn empty_firewall() -> RuleApplier {
        RuleApplier::Firewall(FirewallRules::new(testing::network(1), Purpose::Firewall, vec![]).unwrap())
    }

    fn acl_applier() -> RuleApplier {
        RuleApplier::NetworkAcls(NetworkAclsRules::new(testing::network(1), vec![]))
    }

    #[test]
    fn backup_first_is_the_default_order() {
        let topology = NetworkTopology::new(TopologyKind::Advanced, ManagerConfig::default());
        let mut routers = vec![
            testing::router(3, RedundantRole::Primary),
            testing::router(2, RedundantRole::Backup),
            testing::router(1, RedundantRole::Backup),
        ];
        topology.order_routers(&mut routers);
        let ids: Vec<_> = routers.iter().map(|r| r.id).collect();
        assert_eq!(ids, [RouterId(1), RouterId(2), RouterId(3)]);

        let config = ManagerConfig {
            redundant_order: RedundantOrder::PrimaryFirst,
            ..ManagerConfig::default()
        };
        NetworkTopology::new(TopologyKind::Advanced, config).order_routers(&mut routers);
        assert_eq!(routers[0].id, RouterId(3));
    }

    #[test]
    fn support_matrix() {
        assert!(!TopologyKind::Advanced.supports(&acl_applier()));
        assert!(TopologyKind::Vpc.supports(&acl_applier()));
        assert!(TopologyKind::Basic.supports(&empty_firewall()));
    }

    #[tokio::test]
    async fn unsupported_pair_fails_before_contacting_routers() {
        let (transport, deps) = setup();
        let topology = NetworkTopology::new(TopologyKind::Advanced, ManagerConfig::default());
        let err = topology
            .apply_rules(
                &ApplyContext::new(&deps),
                vec![testing::router(1, RedundantRole::Standalone)],
                &mut acl_applier(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unsupported { .. }));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn stopped_routers_are_skipped_and_transitional_ones_fail_when_configured() {
        let (_transport, deps) = setup();
        let mut stopped = testing::router(1, RedundantRole::Standalone);
        stopped.state = RouterState::Stopped;
        let mut starting = testing::router(2, RedundantRole::Standalone);
        starting.state = RouterState::Starting;

        let lenient = NetworkTopology::new(TopologyKind::Advanced, ManagerConfig::default());
        let report = lenient
            .apply_rules(
                &ApplyContext::new(&deps),
                vec![stopped.clone(), starting.clone()],
                &mut empty_firewall(),
            )
            .await
            .unwrap();
        assert_eq!(report.skipped.len(), 2);

        let strict = NetworkTopology::new(
            TopologyKind::Advanced,
            ManagerConfig {
                fail_when_disconnected: true,
                ..ManagerConfig::default()
            },
        );
        let err = strict
            .apply_rules(&ApplyContext::new(&deps), vec![stopped, starting], &mut empty_firewall())
            .await
            .unwrap_err();
        assert!(err.is_resource_unavailable());
    }

    #[tokio::test]
    async fn one_unreachable_member_of_a_redundant_pair_is_tolerated() {
        let (transport, deps) = setup();
        let backup = testing::router(1, RedundantRole::Backup);
        let primary = testing::router(2, RedundantRole::Primary);
        transport.fail_router(backup.control_ip, FailureMode::Unreachable);

        let network = testing::network(1);
        let rules = vec![crate::model::NetworkRule::Firewall(crate::conflict::tests::base(
            1,
            Purpose::Firewall,
            crate::model::Protocol::Tcp,
            "22",
        ))];
        let store_ip = testing::public_ip(1, [203, 0, 113, 5]);
        let store = MemoryStore::new();
        store.insert_ip_address(store_ip).unwrap();
        let deps = Dependencies {
            rules: Arc::new(MemoryStore::new()),
            inventory: Arc::new(store),
            ..deps
        };
        let mut applier =
            RuleApplier::Firewall(FirewallRules::new(network, Purpose::Firewall, rules).unwrap());

        let topology = NetworkTopology::new(TopologyKind::Advanced, ManagerConfig::default());
        let report = topology
            .apply_rules(&ApplyContext::new(&deps), vec![primary.clone(), backup.clone()], &mut applier)
            .await
            .unwrap();
        assert_eq!(report.applied, [primary.name.clone()]);
        assert_eq!(report.unreachable, [backup.name.clone()]);

        transport.fail_router(primary.control_ip, FailureMode::Unreachable);
        let err = topology
            .apply_rules(&ApplyContext::new(&deps), vec![primary, backup], &mut applier)
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn unreachable_standalone_router_aborts() {
        let (transport, deps) = setup();
        let router = testing::router(1, RedundantRole::Standalone);
        transport.fail_router(router.control_ip, FailureMode::Unreachable);
        let mut applier = RuleApplier::NetworkAcls(NetworkAclsRules::new(testing::network(1), vec![]));
        let topology = NetworkTopology::new(TopologyKind::Vpc, ManagerConfig::default());
        let err = topology
            .apply_rules(&ApplyContext::new(&deps), vec![router], &mut applier)
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }
}
