// ── Load balancing domain types ──

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::ids::VmId;
use super::rule::{FirewallRule, RuleState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LbAlgorithm {
    Source,
    RoundRobin,
    LeastConn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum StickinessMethod {
    LbCookie,
    AppCookie,
    SourceBased,
}

/// A VM endpoint behind the virtual IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbDestination {
    pub vm_id: VmId,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub weight: u32,
    /// `Add`, `Active`, or `Revoke`; follows the rule lifecycle.
    pub state: RuleState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickinessPolicy {
    pub uuid: Uuid,
    pub method: StickinessMethod,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckPolicy {
    pub uuid: Uuid,
    pub ping_path: String,
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    #[serde(default)]
    pub revoked: bool,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslCert {
    pub uuid: Uuid,
    pub certificate: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

impl std::fmt::Debug for SslCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SslCert")
            .field("uuid", &self.uuid)
            .field("key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// A virtual IP:port balanced over a set of VM destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancingRule {
    pub rule: FirewallRule,
    pub name: String,
    pub algorithm: LbAlgorithm,
    /// Port the destinations listen on.
    pub private_port: u16,
    #[serde(default)]
    pub destinations: Vec<LbDestination>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stickiness: Vec<StickinessPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub health_checks: Vec<HealthCheckPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_cert: Option<SslCert>,
}

impl LoadBalancingRule {
    pub fn public_port(&self) -> u16 {
        self.rule.effective_ports().start()
    }

    /// Destinations still wanted on the router.
    pub fn live_destinations(&self) -> impl Iterator<Item = &LbDestination> {
        self.destinations
            .iter()
            .filter(|d| d.state != RuleState::Revoke)
    }
}
