// ── Manager configuration ──
//
// Built by netrules-config (or directly by embedders). Core never reads
// configuration files itself.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::model::LbAlgorithm;

/// Order in which the routers of a redundant set receive commands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RedundantOrder {
    /// Backup routers first, so the serving router changes last.
    #[default]
    BackupFirst,
    PrimaryFirst,
}

/// Tunables for `RulesManager`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Fail an apply when a router is neither running nor stopped
    /// (starting, migrating, error). When `false` such routers are skipped.
    pub fail_when_disconnected: bool,
    pub redundant_order: RedundantOrder,
    /// Algorithm used when a load balancer rule is created without one.
    pub lb_default_algorithm: LbAlgorithm,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            fail_when_disconnected: false,
            redundant_order: RedundantOrder::default(),
            lb_default_algorithm: LbAlgorithm::RoundRobin,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redundant_order_parses_kebab_case() {
        assert_eq!(
            "primary-first".parse::<RedundantOrder>().unwrap(),
            RedundantOrder::PrimaryFirst
        );
        assert_eq!(RedundantOrder::BackupFirst.to_string(), "backup-first");
    }
}
