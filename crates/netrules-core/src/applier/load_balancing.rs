// Load balancer configuration for a network.
//
// Routers take the complete balancer configuration, so the rule set is
// re-read from the store every time the applier is accepted.

use std::collections::BTreeMap;

use netrules_api::command::{
    HealthCheckPolicyTo, LbDestinationTo, LoadBalancerConfigCommand, LoadBalancerTo, SslCertTo,
    StickinessPolicyTo,
};
use netrules_api::{CommandBody, RouterCommand, RoutingMetadata};

use crate::error::CoreError;
use crate::model::{IpAddressId, LoadBalancingRule, Network, Purpose, RuleState};
use crate::store::{InventoryStore, RuleStore};

#[derive(Debug, Clone)]
pub struct LoadBalancingRules {
    network: Network,
    rules: Vec<LoadBalancingRule>,
    addresses: BTreeMap<IpAddressId, std::net::Ipv4Addr>,
}

impl LoadBalancingRules {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            rules: Vec::new(),
            addresses: BTreeMap::new(),
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Rules sent by the last `accept`.
    pub fn rules(&self) -> &[LoadBalancingRule] {
        &self.rules
    }

    /// Load every programmable load balancer rule of the network.
    pub(crate) fn reload(
        &mut self,
        rules: &dyn RuleStore,
        inventory: &dyn InventoryStore,
    ) -> Result<(), CoreError> {
        self.rules = rules
            .list_by_network_and_purpose(self.network.id, Purpose::LoadBalancing)
            .into_iter()
            .filter(|r| r.state().needs_programming())
            .filter_map(|r| r.as_load_balancing().cloned())
            .collect();

        self.addresses.clear();
        for lb in &self.rules {
            let Some(ip_id) = lb.rule.source_ip_address_id else {
                return Err(CoreError::Internal(format!(
                    "load balancer rule {} has no address",
                    lb.rule.uuid
                )));
            };
            let ip = inventory.ip_address(ip_id).ok_or_else(|| {
                CoreError::Internal(format!(
                    "load balancer rule {} references a missing IP address",
                    lb.rule.uuid
                ))
            })?;
            self.addresses.insert(ip_id, ip.address);
        }
        Ok(())
    }

    pub fn create_commands(&self, routing: &RoutingMetadata) -> Result<Vec<RouterCommand>, CoreError> {
        if self.rules.is_empty() {
            return Ok(Vec::new());
        }
        let mut rules = Vec::with_capacity(self.rules.len());
        for lb in &self.rules {
            let src_ip = lb
                .rule
                .source_ip_address_id
                .and_then(|id| self.addresses.get(&id).copied())
                .ok_or_else(|| {
                    CoreError::Internal(format!(
                        "address of load balancer rule {} was not resolved",
                        lb.rule.uuid
                    ))
                })?;
            let revoked = lb.rule.state == RuleState::Revoke;
            rules.push(LoadBalancerTo {
                id: lb.rule.uuid,
                src_ip,
                src_port: lb.public_port(),
                protocol: lb.rule.protocol.to_string(),
                algorithm: lb.algorithm.to_string(),
                revoked,
                destinations: lb
                    .destinations
                    .iter()
                    .map(|d| LbDestinationTo {
                        dst_ip: d.ip,
                        dst_port: d.port,
                        weight: d.weight,
                        revoked: revoked || d.state == RuleState::Revoke,
                    })
                    .collect(),
                stickiness: lb
                    .stickiness
                    .iter()
                    .map(|s| StickinessPolicyTo {
                        method: s.method.to_string(),
                        params: s.params.clone(),
                        revoked: revoked || s.revoked,
                    })
                    .collect(),
                health_checks: lb
                    .health_checks
                    .iter()
                    .map(|h| HealthCheckPolicyTo {
                        ping_path: h.ping_path.clone(),
                        interval_secs: h.interval_secs,
                        timeout_secs: h.timeout_secs,
                        healthy_threshold: h.healthy_threshold,
                        unhealthy_threshold: h.unhealthy_threshold,
                        revoked: revoked || h.revoked,
                    })
                    .collect(),
                ssl_cert: lb.ssl_cert.as_ref().map(|c| SslCertTo {
                    certificate: c.certificate.clone(),
                    key: c.key.clone(),
                    chain: c.chain.clone(),
                }),
            });
        }
        Ok(vec![RouterCommand::new(
            routing.clone(),
            CommandBody::LoadBalancerConfig(LoadBalancerConfigCommand { rules }),
        )])
    }
}
