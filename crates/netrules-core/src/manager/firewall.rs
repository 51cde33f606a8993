// Firewall operations: ingress rules on a public IP, egress rules on a
// guest network. VPC tiers are filtered by network ACLs instead.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    CreateFirewallRuleRequest, CreatedRule, LockKey, RulesManager, optional_ports, parse_protocol,
};
use crate::applier::{FirewallRules, RuleApplier};
use crate::error::CoreError;
use crate::model::{
    Account, FirewallRule, Network, NetworkRule, Protocol, Purpose, TrafficType,
};
use crate::store::AccessTarget;

impl RulesManager {
    fn firewall_lock_key(&self, request: &CreateFirewallRuleRequest) -> Result<LockKey, CoreError> {
        match (request.traffic_type, request.ip_address, request.network) {
            (TrafficType::Ingress, Some(ip), _) => Ok(LockKey::Ip(self.ip_by_uuid(ip)?.id)),
            (TrafficType::Egress, None, Some(network)) => {
                Ok(LockKey::Network(self.network_by_uuid(network)?.id))
            }
            (TrafficType::Ingress, None, _) => {
                Err(CoreError::invalid("ingress firewall rules need an IP address"))
            }
            (TrafficType::Egress, Some(_), _) => Err(CoreError::invalid(
                "egress firewall rules apply to a network, not an IP address",
            )),
            (TrafficType::Egress, None, None) => {
                Err(CoreError::invalid("egress firewall rules need a network"))
            }
        }
    }

    pub async fn create_firewall_rule(
        &self,
        request: &CreateFirewallRuleRequest,
        caller: &Account,
    ) -> Result<CreatedRule<FirewallRule>, CoreError> {
        let key = self.firewall_lock_key(request)?;
        let _guard = self.lock([key]).await;
        self.create_firewall_rule_locked(request, caller)
    }

    fn create_firewall_rule_locked(
        &self,
        request: &CreateFirewallRuleRequest,
        caller: &Account,
    ) -> Result<CreatedRule<FirewallRule>, CoreError> {
        let protocol = parse_protocol(
            &request.protocol,
            &[Protocol::Tcp, Protocol::Udp, Protocol::Icmp, Protocol::All],
            "firewall rules",
        )?;
        let ports = optional_ports(request.port_start, request.port_end)?;
        if ports.is_some() && !protocol.has_ports() {
            return Err(CoreError::invalid(format!(
                "ports cannot be given for protocol {protocol}"
            )));
        }
        if protocol != Protocol::Icmp && (request.icmp_type.is_some() || request.icmp_code.is_some())
        {
            return Err(CoreError::invalid(
                "ICMP type and code can only be given for protocol icmp",
            ));
        }

        let (ip, network) = match request.traffic_type {
            TrafficType::Ingress => {
                let uuid = request
                    .ip_address
                    .ok_or_else(|| CoreError::invalid("ingress firewall rules need an IP address"))?;
                let ip = self.usable_ip(uuid, caller)?;
                let (network, associate) = self.rule_network(&ip, request.network)?;
                if associate {
                    return Err(CoreError::invalid(format!(
                        "IP address {} is not associated with network {}",
                        ip.address, network.uuid
                    )));
                }
                (Some(ip), network)
            }
            TrafficType::Egress => {
                let uuid = request
                    .network
                    .ok_or_else(|| CoreError::invalid("egress firewall rules need a network"))?;
                let network = self.network_by_uuid(uuid)?;
                self.check_access(caller, AccessTarget::Network(&network))?;
                (None, network)
            }
        };
        if network.vpc_id.is_some() {
            return Err(CoreError::invalid(format!(
                "network {} is a VPC tier; use network ACLs",
                network.uuid
            )));
        }

        self.with_compensation(|compensation| {
            let mut base = self.new_rule_base(
                request.uuid,
                ip.as_ref(),
                &network,
                Purpose::Firewall,
                request.traffic_type,
                protocol,
                ports,
            );
            base.source_cidrs.clone_from(&request.source_cidrs);
            base.dest_cidrs.clone_from(&request.dest_cidrs);
            base.icmp_type = request.icmp_type;
            base.icmp_code = request.icmp_code;
            let candidate = NetworkRule::Firewall(base);

            let scope = match &ip {
                Some(ip) => self.rules().list_by_ip(ip.id),
                None => self.rules().list_by_network(network.id),
            };
            if let Some(NetworkRule::Firewall(existing)) = self.existing_rule(&candidate, &scope)? {
                info!(rule = %existing.uuid, "firewall rule already exists");
                return Ok(existing);
            }
            match self.stage_rule(candidate, &scope, compensation)? {
                NetworkRule::Firewall(rule) => Ok(rule),
                _ => Err(CoreError::Internal("staged rule changed kind".into())),
            }
        })
    }

    /// Program the ingress firewall rules of an IP.
    pub async fn apply_firewall_rules(
        &self,
        ip_address: Uuid,
        continue_on_error: bool,
        caller: &Account,
    ) -> Result<bool, CoreError> {
        let ip = self.ip_by_uuid(ip_address)?;
        self.check_access(caller, AccessTarget::IpAddress(&ip))?;
        let _guard = self.lock([LockKey::Ip(ip.id)]).await;
        let ip = self.ip(ip.id)?;
        self.apply_ip_rules(&ip, Purpose::Firewall, continue_on_error)
            .await
    }

    /// Program the egress firewall rules of a guest network.
    pub async fn apply_egress_firewall_rules(
        &self,
        network: Uuid,
        continue_on_error: bool,
        caller: &Account,
    ) -> Result<bool, CoreError> {
        let network = self.network_by_uuid(network)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        self.apply_egress_locked(&network, continue_on_error).await
    }

    pub(super) async fn apply_egress_locked(
        &self,
        network: &Network,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        let rules: Vec<NetworkRule> = self
            .rules()
            .list_by_network_and_purpose(network.id, Purpose::Firewall)
            .into_iter()
            .filter(|r| r.base().traffic_type == TrafficType::Egress && r.state().needs_programming())
            .collect();
        if rules.is_empty() {
            debug!(network = %network.uuid, "no egress rules to apply");
            return Ok(true);
        }
        let applier = RuleApplier::Firewall(FirewallRules::new(
            network.clone(),
            Purpose::Firewall,
            rules.clone(),
        )?);
        if !self.dispatch(network, applier, continue_on_error).await? {
            return Ok(false);
        }
        self.reconcile(&rules);
        Ok(true)
    }

    /// Create a firewall rule and program it; a failed apply undoes it.
    pub async fn provision_firewall_rule(
        &self,
        request: &CreateFirewallRuleRequest,
        caller: &Account,
    ) -> Result<FirewallRule, CoreError> {
        let key = self.firewall_lock_key(request)?;
        let _guard = self.lock([key]).await;
        let CreatedRule { rule, compensation } = self.create_firewall_rule_locked(request, caller)?;

        let applied = match rule.source_ip_address_id {
            Some(ip) => {
                let ip = self.ip(ip)?;
                self.apply_ip_rules(&ip, Purpose::Firewall, false).await
            }
            None => {
                let network = self.network(rule.network_id)?;
                self.apply_egress_locked(&network, false).await
            }
        };
        if let Err(e) = applied {
            warn!(rule = %rule.uuid, error = %e, "apply failed, rolling back");
            self.rollback_quietly(compensation);
            return Err(e);
        }
        compensation.commit();
        self.rules()
            .find_rule(rule.id)
            .map(|r| r.base().clone())
            .ok_or_else(|| CoreError::Internal(format!("rule {} disappeared after apply", rule.uuid)))
    }

    pub async fn revoke_firewall_rule(&self, rule: Uuid, caller: &Account) -> Result<(), CoreError> {
        self.revoke_rule(rule, Purpose::Firewall, caller).await
    }
}
