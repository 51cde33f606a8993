// Firewall, port forwarding, and port-scoped static NAT rules.
//
// Sends exactly the rules it was given. Callers pass the full set for
// the IP or network when the router needs it.

use std::collections::BTreeMap;

use netrules_api::command::{
    FirewallRuleTo, PortForwardingRuleTo, SetFirewallRulesCommand, SetPortForwardingRulesCommand,
    SetStaticNatRulesCommand, StaticNatRuleTo,
};
use netrules_api::{CommandBody, RouterCommand, RoutingMetadata};

use crate::error::CoreError;
use crate::model::{
    FirewallRule, IpAddress, IpAddressId, Network, NetworkRule, Purpose, RuleState, TrafficType,
};
use crate::store::InventoryStore;

#[derive(Debug, Clone)]
pub struct FirewallRules {
    network: Network,
    purpose: Purpose,
    rules: Vec<NetworkRule>,
    addresses: BTreeMap<IpAddressId, IpAddress>,
}

impl FirewallRules {
    /// `purpose` must be `Firewall`, `PortForwarding`, or `StaticNat`, and
    /// every rule must have it.
    pub fn new(network: Network, purpose: Purpose, rules: Vec<NetworkRule>) -> Result<Self, CoreError> {
        if !matches!(
            purpose,
            Purpose::Firewall | Purpose::PortForwarding | Purpose::StaticNat
        ) {
            return Err(CoreError::Internal(format!(
                "firewall applier cannot program {purpose} rules"
            )));
        }
        if let Some(stray) = rules.iter().find(|r| r.purpose() != purpose) {
            return Err(CoreError::Internal(format!(
                "rule {} has purpose {}, expected {purpose}",
                stray.uuid(),
                stray.purpose()
            )));
        }
        Ok(Self {
            network,
            purpose,
            rules,
            addresses: BTreeMap::new(),
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    pub fn rules(&self) -> &[NetworkRule] {
        &self.rules
    }

    pub(crate) fn resolve_addresses(&mut self, inventory: &dyn InventoryStore) -> Result<(), CoreError> {
        for rule in &self.rules {
            let Some(ip_id) = rule.base().source_ip_address_id else {
                continue;
            };
            if self.addresses.contains_key(&ip_id) {
                continue;
            }
            let ip = inventory.ip_address(ip_id).ok_or_else(|| {
                CoreError::Internal(format!(
                    "rule {} references a missing IP address",
                    rule.uuid()
                ))
            })?;
            self.addresses.insert(ip_id, ip);
        }
        Ok(())
    }

    fn address_of(&self, rule: &FirewallRule) -> Result<Option<&IpAddress>, CoreError> {
        match rule.source_ip_address_id {
            None => Ok(None),
            Some(id) => self.addresses.get(&id).map(Some).ok_or_else(|| {
                CoreError::Internal(format!("address of rule {} was not resolved", rule.uuid))
            }),
        }
    }

    /// Build the router commands for the rule set.
    pub fn create_commands(&self, routing: &RoutingMetadata) -> Result<Vec<RouterCommand>, CoreError> {
        if self.rules.is_empty() {
            return Ok(Vec::new());
        }
        let body = match self.purpose {
            Purpose::Firewall => self.firewall_body()?,
            Purpose::PortForwarding => self.port_forwarding_body()?,
            _ => self.static_nat_body()?,
        };
        Ok(vec![RouterCommand::new(routing.clone(), body)])
    }

    fn firewall_body(&self) -> Result<CommandBody, CoreError> {
        let traffic_type = self
            .rules
            .first()
            .map_or(TrafficType::Ingress, |r| r.base().traffic_type);
        let mut rules = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let base = rule.base();
            rules.push(FirewallRuleTo {
                id: base.uuid,
                src_ip: self.address_of(base)?.map(|ip| ip.address),
                protocol: base.protocol.to_string(),
                src_port_range: base
                    .ports
                    .filter(|_| base.protocol.has_ports())
                    .map(|p| p.to_wire()),
                source_cidrs: base.source_cidrs.iter().map(ToString::to_string).collect(),
                dest_cidrs: base.dest_cidrs.iter().map(ToString::to_string).collect(),
                icmp_type: base.icmp_type,
                icmp_code: base.icmp_code,
                revoked: base.state == RuleState::Revoke,
            });
        }
        Ok(CommandBody::SetFirewallRules(SetFirewallRulesCommand {
            traffic_type: traffic_type.to_string(),
            rules,
        }))
    }

    fn port_forwarding_body(&self) -> Result<CommandBody, CoreError> {
        let mut rules = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let Some(pf) = rule.as_port_forwarding() else {
                return Err(CoreError::Internal(format!(
                    "rule {} is not a port forwarding rule",
                    rule.uuid()
                )));
            };
            let ip = self.address_of(&pf.rule)?.ok_or_else(|| {
                CoreError::Internal(format!("port forwarding rule {} has no address", pf.rule.uuid))
            })?;
            rules.push(PortForwardingRuleTo {
                id: pf.rule.uuid,
                src_ip: ip.address,
                protocol: pf.rule.protocol.to_string(),
                src_port_range: pf.source_ports().to_wire(),
                dst_ip: pf.destination_ip,
                dst_port_range: pf.destination_ports.to_wire(),
                source_cidrs: pf.rule.source_cidrs.iter().map(ToString::to_string).collect(),
                revoked: pf.rule.state == RuleState::Revoke,
            });
        }
        Ok(CommandBody::SetPortForwardingRules(
            SetPortForwardingRulesCommand { rules },
        ))
    }

    fn static_nat_body(&self) -> Result<CommandBody, CoreError> {
        let mut rules = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let base = rule.base();
            let ip = self.address_of(base)?.ok_or_else(|| {
                CoreError::Internal(format!("static NAT rule {} has no address", base.uuid))
            })?;
            let dst_ip = ip.vm_ip.ok_or_else(|| {
                CoreError::invalid(format!(
                    "IP address {} is not static NAT enabled",
                    ip.address
                ))
            })?;
            rules.push(StaticNatRuleTo {
                id: Some(base.uuid),
                src_ip: ip.address,
                dst_ip,
                protocol: Some(base.protocol.to_string()),
                port_range: base
                    .ports
                    .filter(|_| base.protocol.has_ports())
                    .map(|p| p.to_wire()),
                revoked: base.state == RuleState::Revoke,
            });
        }
        Ok(CommandBody::SetStaticNatRules(SetStaticNatRulesCommand { rules }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use netrules_api::ZoneNetworkType;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::conflict::tests::base;
    use crate::model::{PortForwardingRule, Protocol, VmId};
    use crate::testing;

    fn routing() -> RoutingMetadata {
        RoutingMetadata {
            router_name: "r-1-VM".into(),
            router_control_ip: Ipv4Addr::new(169, 254, 0, 1),
            router_guest_ip: Some(Ipv4Addr::new(10, 1, 1, 1)),
            zone_network_type: ZoneNetworkType::Advanced,
        }
    }

    fn resolved(applier: &mut FirewallRules) {
        let ip = testing::public_ip(1, [203, 0, 113, 5]);
        applier.addresses.insert(ip.id, ip);
    }

    #[test]
    fn port_forwarding_payload_carries_revoked_flag() {
        let mut revoked = base(2, Purpose::PortForwarding, Protocol::Tcp, "80");
        revoked.state = RuleState::Revoke;
        let rules = vec![
            NetworkRule::PortForwarding(PortForwardingRule {
                rule: base(1, Purpose::PortForwarding, Protocol::Tcp, "22"),
                vm_id: VmId(1),
                destination_ip: Ipv4Addr::new(10, 1, 1, 10),
                destination_ports: "22".parse().unwrap(),
            }),
            NetworkRule::PortForwarding(PortForwardingRule {
                rule: revoked,
                vm_id: VmId(1),
                destination_ip: Ipv4Addr::new(10, 1, 1, 10),
                destination_ports: "8080".parse().unwrap(),
            }),
        ];
        let mut applier =
            FirewallRules::new(testing::network(1), Purpose::PortForwarding, rules).unwrap();
        resolved(&mut applier);

        let commands = applier.create_commands(&routing()).unwrap();
        assert_eq!(commands.len(), 1);
        let CommandBody::SetPortForwardingRules(cmd) = &commands[0].body else {
            panic!("unexpected command {:?}", commands[0].kind());
        };
        assert_eq!(cmd.rules.len(), 2);
        assert_eq!(cmd.rules[0].src_ip, Ipv4Addr::new(203, 0, 113, 5));
        assert_eq!(cmd.rules[0].dst_port_range, [22, 22]);
        assert!(!cmd.rules[0].revoked);
        assert_eq!(cmd.rules[1].dst_port_range, [8080, 8080]);
        assert!(cmd.rules[1].revoked);
    }

    #[test]
    fn firewall_payload_omits_ports_for_icmp() {
        let mut icmp = base(1, Purpose::Firewall, Protocol::Icmp, "");
        icmp.icmp_type = Some(8);
        let mut applier = FirewallRules::new(
            testing::network(1),
            Purpose::Firewall,
            vec![NetworkRule::Firewall(icmp)],
        )
        .unwrap();
        resolved(&mut applier);

        let commands = applier.create_commands(&routing()).unwrap();
        let CommandBody::SetFirewallRules(cmd) = &commands[0].body else {
            panic!("unexpected command {:?}", commands[0].kind());
        };
        assert_eq!(cmd.traffic_type, "ingress");
        assert_eq!(cmd.rules[0].protocol, "icmp");
        assert_eq!(cmd.rules[0].src_port_range, None);
        assert_eq!(cmd.rules[0].icmp_type, Some(8));
    }

    #[test]
    fn mixed_purposes_are_rejected() {
        let rules = vec![NetworkRule::Firewall(base(1, Purpose::Firewall, Protocol::Tcp, "22"))];
        assert!(FirewallRules::new(testing::network(1), Purpose::PortForwarding, rules).is_err());
        assert!(FirewallRules::new(testing::network(1), Purpose::LoadBalancing, vec![]).is_err());
    }

    #[test]
    fn empty_rule_set_sends_nothing() {
        let applier = FirewallRules::new(testing::network(1), Purpose::Firewall, vec![]).unwrap();
        assert!(applier.create_commands(&routing()).unwrap().is_empty());
    }
}
