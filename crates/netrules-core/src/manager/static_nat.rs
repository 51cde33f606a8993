// Static NAT: whole-IP one-to-one mappings and the port-scoped rules
// layered on them.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Compensation, CreateStaticNatRuleRequest, CreatedRule, EnableStaticNatRequest, LockKey,
    RuleEvent, RulesManager, UndoStep, optional_ports, parse_protocol,
};
use crate::applier::{RuleApplier, StaticNat, StaticNatRules};
use crate::error::CoreError;
use crate::model::{
    Account, FirewallRule, IpAddress, IpAddressId, Network, NetworkRule, Protocol, Purpose,
    RuleState, TrafficType,
};
use crate::store::AccessTarget;

impl RulesManager {
    // ── Whole-IP mappings ────────────────────────────────────────────

    /// Map a public address onto a VM. Re-pointing an address at another
    /// VM requires disabling the current mapping first.
    pub async fn enable_static_nat(
        &self,
        request: &EnableStaticNatRequest,
        caller: &Account,
    ) -> Result<IpAddress, CoreError> {
        let ip = self.ip_by_uuid(request.ip_address)?;
        let (network, _) = self.rule_network(&ip, request.network)?;
        let _guard = self
            .lock([LockKey::Network(network.id), LockKey::Ip(ip.id)])
            .await;
        self.enable_static_nat_locked(request, caller).await
    }

    async fn enable_static_nat_locked(
        &self,
        request: &EnableStaticNatRequest,
        caller: &Account,
    ) -> Result<IpAddress, CoreError> {
        let ip = self.usable_ip(request.ip_address, caller)?;
        if ip.source_nat {
            return Err(CoreError::invalid(format!(
                "IP address {} is a source NAT address and cannot be used for static NAT",
                ip.address
            )));
        }
        let (network, associate) = self.rule_network(&ip, request.network)?;
        let vm = self.usable_vm(request.vm, caller)?;
        let nic = self
            .inventory()
            .vm_nic_in_network(vm.id, network.id)
            .ok_or_else(|| {
                CoreError::invalid(format!("VM {} has no NIC in network {}", vm.uuid, network.uuid))
            })?;
        let vm_ip = request.vm_ip.unwrap_or(nic.ip);
        if vm_ip != nic.ip {
            return Err(CoreError::invalid(format!(
                "{vm_ip} is not the address of VM {} in network {}",
                vm.uuid, network.uuid
            )));
        }

        if ip.one_to_one_nat {
            return if ip.associated_with_vm == Some(vm.id) && ip.vm_ip == Some(vm_ip) {
                debug!(ip = %ip.address, vm = %vm.uuid, "static NAT already enabled");
                Ok(ip)
            } else {
                Err(CoreError::invalid(format!(
                    "IP address {} is already statically NATed to another VM; disable it first",
                    ip.address
                )))
            };
        }
        if let Some(rule) = self
            .rules()
            .list_by_ip_and_not_revoked(ip.id)
            .into_iter()
            .find(|r| matches!(r.purpose(), Purpose::PortForwarding | Purpose::LoadBalancing))
        {
            return Err(CoreError::conflict(format!(
                "IP address {} carries {} rule {}",
                ip.address,
                rule.purpose(),
                rule.uuid()
            )));
        }
        if let Some(other) = self
            .inventory()
            .ip_addresses_for_vm(vm.id)
            .into_iter()
            .find(|o| o.id != ip.id && o.associated_with_network == Some(network.id))
        {
            return Err(CoreError::invalid(format!(
                "VM {} already has static NAT address {} in network {}",
                vm.uuid, other.address, network.uuid
            )));
        }

        let mut compensation = Compensation::new();
        let mapped = match self.map_address(&ip, &network, associate, vm.id, vm_ip, &mut compensation)
        {
            Ok(mapped) => mapped,
            Err(e) => {
                self.rollback_quietly(compensation);
                return Err(e);
            }
        };

        if associate {
            if let Err(e) = self.apply_ip_associations_locked(&network, false).await {
                warn!(ip = %mapped.address, error = %e, "VPC address plug failed, rolling back");
                self.rollback_apply(compensation).await;
                return Err(e);
            }
        }

        let change = StaticNat {
            ip_id: mapped.id,
            public_ip: mapped.address,
            vm_id: vm.id,
            vm_ip,
            revoked: false,
        };
        let applier = RuleApplier::StaticNat(StaticNatRules::new(network.clone(), vec![change]));
        if let Err(e) = self.dispatch(&network, applier, false).await {
            warn!(ip = %mapped.address, error = %e, "static NAT apply failed, rolling back");
            self.rollback_apply(compensation).await;
            return Err(e);
        }
        compensation.commit();

        info!(ip = %mapped.address, vm = %vm.uuid, "static NAT enabled");
        self.emit(RuleEvent::StaticNatEnabled {
            ip: mapped.address,
            vm: vm.uuid,
            at: chrono::Utc::now(),
        });
        Ok(mapped)
    }

    /// Set the NAT flags on `ip`, recording how to put them back.
    fn map_address(
        &self,
        ip: &IpAddress,
        network: &Network,
        associate: bool,
        vm: crate::model::VmId,
        vm_ip: std::net::Ipv4Addr,
        compensation: &mut Compensation,
    ) -> Result<IpAddress, CoreError> {
        let current = if associate {
            self.associate_on_demand(ip, network, compensation)?
        } else {
            ip.clone()
        };
        compensation.push(UndoStep::RestoreIp(Box::new(current.clone())));
        let mut mapped = current;
        mapped.one_to_one_nat = true;
        mapped.associated_with_vm = Some(vm);
        mapped.vm_ip = Some(vm_ip);
        self.inventory().update_ip_address(&mapped)
    }

    /// Remove the mapping of a public address and the static NAT rules on it.
    pub async fn disable_static_nat(
        &self,
        ip_address: Uuid,
        caller: &Account,
    ) -> Result<(), CoreError> {
        let ip = self.ip_by_uuid(ip_address)?;
        self.check_access(caller, AccessTarget::IpAddress(&ip))?;
        if !ip.one_to_one_nat {
            return Err(CoreError::invalid(format!(
                "static NAT is not enabled on IP address {}",
                ip.address
            )));
        }
        self.disable_static_nat_for(&ip, false).await?;
        Ok(())
    }

    /// Returns `false` when a router failure was tolerated and the mapping
    /// is left in place for a retry.
    pub(super) async fn disable_static_nat_for(
        &self,
        ip: &IpAddress,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        let Some(network_id) = ip.associated_with_network else {
            return Err(CoreError::Internal(format!(
                "statically NATed address {} has no network",
                ip.address
            )));
        };
        let _guard = self
            .lock([LockKey::Network(network_id), LockKey::Ip(ip.id)])
            .await;
        let ip = self.ip(ip.id)?;
        let Some(mut change) = StaticNat::of(&ip) else {
            return Ok(true);
        };
        let network = self.network(network_id)?;

        for rule in self.rules().list_by_ip_and_purpose(ip.id, Purpose::StaticNat) {
            if rule.state() != RuleState::Revoke {
                self.mark_revoked(&rule);
            }
        }
        let mut success = self
            .apply_ip_rules(&ip, Purpose::Firewall, continue_on_error)
            .await?;
        success &= self
            .apply_ip_rules(&ip, Purpose::StaticNat, continue_on_error)
            .await?;

        change.revoked = true;
        let applier = RuleApplier::StaticNat(StaticNatRules::new(network.clone(), vec![change]));
        if !self.dispatch(&network, applier, continue_on_error).await? {
            return Ok(false);
        }

        let mut cleared = ip.clone();
        cleared.one_to_one_nat = false;
        cleared.associated_with_vm = None;
        cleared.vm_ip = None;
        let cleared = self.inventory().update_ip_address(&cleared)?;
        if cleared.vpc_id.is_some()
            && !cleared.source_nat
            && self.rules().list_by_ip(cleared.id).is_empty()
        {
            self.inner
                .deps
                .ip_allocator
                .unassign_ip_from_vpc_network(cleared.id, network.id)?;
        }

        info!(ip = %ip.address, "static NAT disabled");
        self.emit(RuleEvent::StaticNatDisabled {
            ip: ip.address,
            at: chrono::Utc::now(),
        });
        Ok(success)
    }

    /// Resend every mapping of a network.
    pub async fn apply_static_nats_for_network(
        &self,
        network: Uuid,
        continue_on_error: bool,
        caller: &Account,
    ) -> Result<bool, CoreError> {
        let network = self.network_by_uuid(network)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        let applier = RuleApplier::StaticNat(StaticNatRules::new(network.clone(), Vec::new()));
        self.dispatch(&network, applier, continue_on_error).await
    }

    // ── Port-scoped rules ────────────────────────────────────────────

    pub async fn create_static_nat_rule(
        &self,
        request: &CreateStaticNatRuleRequest,
        caller: &Account,
    ) -> Result<CreatedRule<FirewallRule>, CoreError> {
        let ip = self.ip_by_uuid(request.ip_address)?;
        let _guard = self.lock([LockKey::Ip(ip.id)]).await;
        self.create_static_nat_rule_locked(request, caller)
    }

    fn create_static_nat_rule_locked(
        &self,
        request: &CreateStaticNatRuleRequest,
        caller: &Account,
    ) -> Result<CreatedRule<FirewallRule>, CoreError> {
        let protocol = parse_protocol(
            &request.protocol,
            &[Protocol::Tcp, Protocol::Udp],
            "static NAT rules",
        )?;
        let ports = optional_ports(request.port_start, request.port_end)?
            .ok_or_else(|| CoreError::invalid("static NAT rules need a start port"))?;
        let ip = self.usable_ip(request.ip_address, caller)?;
        if ip.source_nat || !ip.one_to_one_nat {
            return Err(CoreError::invalid(format!(
                "static NAT is not enabled on IP address {}",
                ip.address
            )));
        }
        let (network, _) = self.rule_network(&ip, None)?;

        self.with_compensation(|compensation| {
            let candidate = NetworkRule::StaticNat(self.new_rule_base(
                request.uuid,
                Some(&ip),
                &network,
                Purpose::StaticNat,
                TrafficType::Ingress,
                protocol,
                Some(ports),
            ));
            let scope = self.rules().list_by_ip(ip.id);
            if let Some(NetworkRule::StaticNat(existing)) = self.existing_rule(&candidate, &scope)? {
                info!(rule = %existing.uuid, "static NAT rule already exists");
                return Ok(existing);
            }
            let NetworkRule::StaticNat(rule) = self.stage_rule(candidate, &scope, compensation)?
            else {
                return Err(CoreError::Internal("staged rule changed kind".into()));
            };
            if request.open_firewall && network.vpc_id.is_none() {
                self.open_firewall_for(&rule, &ip, &network, compensation)?;
            }
            Ok(rule)
        })
    }

    /// Program the static NAT rules of an IP with their firewall rules.
    pub async fn apply_static_nat_rules(
        &self,
        ip_address: Uuid,
        continue_on_error: bool,
        caller: &Account,
    ) -> Result<bool, CoreError> {
        let ip = self.ip_by_uuid(ip_address)?;
        self.check_access(caller, AccessTarget::IpAddress(&ip))?;
        let _guard = self.lock([LockKey::Ip(ip.id)]).await;
        self.apply_static_nat_rules_locked(ip.id, continue_on_error)
            .await
    }

    async fn apply_static_nat_rules_locked(
        &self,
        ip: IpAddressId,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        let ip = self.ip(ip)?;
        let firewall = self
            .apply_ip_rules(&ip, Purpose::Firewall, continue_on_error)
            .await?;
        let nat = self
            .apply_ip_rules(&ip, Purpose::StaticNat, continue_on_error)
            .await?;
        Ok(firewall && nat)
    }

    /// Create a static NAT rule and program it; a failed apply undoes it.
    pub async fn provision_static_nat_rule(
        &self,
        request: &CreateStaticNatRuleRequest,
        caller: &Account,
    ) -> Result<FirewallRule, CoreError> {
        let ip = self.ip_by_uuid(request.ip_address)?;
        let _guard = self.lock([LockKey::Ip(ip.id)]).await;
        let CreatedRule { rule, compensation } =
            self.create_static_nat_rule_locked(request, caller)?;
        if let Err(e) = self.apply_static_nat_rules_locked(ip.id, false).await {
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

    pub async fn revoke_static_nat_rule(&self, rule: Uuid, caller: &Account) -> Result<(), CoreError> {
        self.revoke_rule(rule, Purpose::StaticNat, caller).await
    }
}
