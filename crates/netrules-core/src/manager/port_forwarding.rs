// Port forwarding operations.

use std::collections::BTreeMap;

use tracing::{info, warn};
use uuid::Uuid;

use super::{CreatePortForwardingRequest, CreatedRule, LockKey, RulesManager, parse_protocol};
use crate::error::CoreError;
use crate::model::{
    Account, IpAddress, IpAddressId, NetworkRule, PortForwardingRule, PortRange, Protocol,
    Purpose, RuleState, TrafficType,
};
use crate::store::AccessTarget;

/// Check the source/destination range pairing. Equal spans are always
/// required; non-single ranges must also line up port for port.
fn check_port_ranges(source: PortRange, destination: PortRange) -> Result<(), CoreError> {
    if source.span() != destination.span() {
        return Err(CoreError::invalid(format!(
            "source port range {source} and destination port range {destination} differ in size"
        )));
    }
    if !source.is_single() && source != destination {
        return Err(CoreError::invalid(format!(
            "port range {source} must map onto the same destination ports, got {destination}"
        )));
    }
    Ok(())
}

impl RulesManager {
    /// Validate and persist a port forwarding rule in `Add` state.
    pub async fn create_port_forwarding_rule(
        &self,
        request: &CreatePortForwardingRequest,
        caller: &Account,
    ) -> Result<CreatedRule<PortForwardingRule>, CoreError> {
        let keys = self.port_forwarding_request_keys(request)?;
        let _guard = self.lock(keys).await;
        self.create_port_forwarding_locked(request, caller)
    }

    /// The address, plus the tier it is about to be associated with.
    fn port_forwarding_request_keys(
        &self,
        request: &CreatePortForwardingRequest,
    ) -> Result<Vec<LockKey>, CoreError> {
        let ip = self.ip_by_uuid(request.ip_address)?;
        let tier = request
            .network
            .filter(|_| ip.associated_with_network.is_none())
            .map(|uuid| self.network_by_uuid(uuid))
            .transpose()?;
        let mut keys = vec![LockKey::Ip(ip.id)];
        keys.extend(tier.map(|network| LockKey::Network(network.id)));
        Ok(keys)
    }

    fn create_port_forwarding_locked(
        &self,
        request: &CreatePortForwardingRequest,
        caller: &Account,
    ) -> Result<CreatedRule<PortForwardingRule>, CoreError> {
        let protocol = parse_protocol(
            &request.protocol,
            &[Protocol::Tcp, Protocol::Udp],
            "port forwarding",
        )?;
        if [
            request.source_port_start,
            request.source_port_end,
            request.destination_port_start,
            request.destination_port_end,
        ]
        .contains(&0)
        {
            return Err(CoreError::invalid("port forwarding ports must be non-zero"));
        }
        let source = PortRange::new(request.source_port_start, request.source_port_end)?;
        let destination =
            PortRange::new(request.destination_port_start, request.destination_port_end)?;
        check_port_ranges(source, destination)?;

        let ip = self.usable_ip(request.ip_address, caller)?;
        if ip.one_to_one_nat {
            return Err(CoreError::invalid(format!(
                "IP address {} has static NAT enabled",
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
        let destination_ip = request.vm_ip.unwrap_or(nic.ip);
        if destination_ip != nic.ip {
            return Err(CoreError::invalid(format!(
                "{destination_ip} is not the address of VM {} in network {}",
                vm.uuid, network.uuid
            )));
        }

        self.with_compensation(|compensation| {
            let ip = if associate {
                self.associate_on_demand(&ip, &network, compensation)?
            } else {
                ip
            };
            let mut base = self.new_rule_base(
                request.uuid,
                Some(&ip),
                &network,
                Purpose::PortForwarding,
                TrafficType::Ingress,
                protocol,
                Some(source),
            );
            base.source_cidrs.clone_from(&request.source_cidrs);
            let candidate = NetworkRule::PortForwarding(PortForwardingRule {
                rule: base,
                vm_id: vm.id,
                destination_ip,
                destination_ports: destination,
            });

            let scope = self.rules().list_by_ip(ip.id);
            if let Some(NetworkRule::PortForwarding(existing)) =
                self.existing_rule(&candidate, &scope)?
            {
                info!(rule = %existing.rule.uuid, "port forwarding rule already exists");
                return Ok(existing);
            }

            let staged = self.stage_rule(candidate, &scope, compensation)?;
            let NetworkRule::PortForwarding(rule) = staged else {
                return Err(CoreError::Internal("staged rule changed kind".into()));
            };
            if request.open_firewall && network.vpc_id.is_none() {
                self.open_firewall_for(&rule.rule, &ip, &network, compensation)?;
            }
            Ok(rule)
        })
    }

    /// Program every port forwarding rule of an IP, with the ingress
    /// firewall rules it needs, then reconcile their states.
    pub async fn apply_port_forwarding_rules(
        &self,
        ip_address: Uuid,
        continue_on_error: bool,
        caller: &Account,
    ) -> Result<bool, CoreError> {
        let ip = self.ip_by_uuid(ip_address)?;
        self.check_access(caller, AccessTarget::IpAddress(&ip))?;
        let _guard = self.lock([LockKey::Ip(ip.id)]).await;
        let ip = self.ip(ip.id)?;
        self.apply_port_forwarding_locked(&ip, continue_on_error).await
    }

    async fn apply_port_forwarding_locked(
        &self,
        ip: &IpAddress,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        if !self.plug_vpc_address(ip, continue_on_error).await? {
            return Ok(false);
        }
        let firewall = self
            .apply_ip_rules(ip, Purpose::Firewall, continue_on_error)
            .await?;
        let forwarding = self
            .apply_ip_rules(ip, Purpose::PortForwarding, continue_on_error)
            .await?;
        Ok(firewall && forwarding)
    }

    /// Create a port forwarding rule and program it. A failed apply
    /// undoes the create.
    pub async fn provision_port_forwarding_rule(
        &self,
        request: &CreatePortForwardingRequest,
        caller: &Account,
    ) -> Result<PortForwardingRule, CoreError> {
        let ip = self.ip_by_uuid(request.ip_address)?;
        let keys = self.port_forwarding_request_keys(request)?;
        let _guard = self.lock(keys).await;
        let CreatedRule { rule, compensation } =
            self.create_port_forwarding_locked(request, caller)?;
        let ip = self.ip(ip.id)?;
        if let Err(e) = self.apply_port_forwarding_locked(&ip, false).await {
            warn!(rule = %rule.rule.uuid, error = %e, "apply failed, rolling back");
            self.rollback_apply(compensation).await;
            return Err(e);
        }
        compensation.commit();
        match self.rules().find_rule(rule.rule.id) {
            Some(NetworkRule::PortForwarding(current)) => Ok(current),
            _ => Err(CoreError::Internal(format!(
                "rule {} disappeared after apply",
                rule.rule.uuid
            ))),
        }
    }

    /// Revoke a port forwarding rule and the firewall rule opened for it.
    /// On a failed apply the rule stays in `Revoke`.
    pub async fn revoke_port_forwarding_rule(
        &self,
        rule: Uuid,
        caller: &Account,
    ) -> Result<(), CoreError> {
        self.revoke_rule(rule, Purpose::PortForwarding, caller).await
    }

    /// Revoke every port forwarding rule pointing at a VM and disable its
    /// static NAT. Router failures are tolerated; returns `false` when
    /// some rules are left in `Revoke`.
    pub async fn revoke_rules_for_vm(&self, vm: Uuid, caller: &Account) -> Result<bool, CoreError> {
        let vm = self.vm_by_uuid(vm)?;
        self.check_access(caller, AccessTarget::Vm(&vm))?;

        let mut by_ip: BTreeMap<IpAddressId, Vec<NetworkRule>> = BTreeMap::new();
        for rule in self.rules().list_port_forwarding_by_vm(vm.id) {
            if let Some(ip) = rule.base().source_ip_address_id {
                by_ip.entry(ip).or_default().push(rule);
            }
        }

        let mut success = true;
        for (ip_id, rules) in by_ip {
            let _guard = self.lock([LockKey::Ip(ip_id)]).await;
            let mut needs_apply = false;
            for rule in &rules {
                needs_apply |= rule.state() == RuleState::Revoke || self.mark_revoked(rule);
            }
            if needs_apply {
                let ip = self.ip(ip_id)?;
                success &= self.apply_port_forwarding_locked(&ip, true).await?;
            }
        }

        for ip in self.inventory().ip_addresses_for_vm(vm.id) {
            success &= self.disable_static_nat_for(&ip, true).await?;
        }

        info!(vm = %vm.uuid, success, "revoked rules for VM");
        Ok(success)
    }
}
