// Network ACL of a VPC tier. The full item list is sent, lowest number
// first.

use netrules_api::command::{NetworkAclItemTo, SetNetworkAclCommand};
use netrules_api::{CommandBody, RouterCommand, RoutingMetadata};

use crate::model::{Network, NetworkAclItem, RuleState};

#[derive(Debug, Clone)]
pub struct NetworkAclsRules {
    network: Network,
    items: Vec<NetworkAclItem>,
}

impl NetworkAclsRules {
    pub fn new(network: Network, mut items: Vec<NetworkAclItem>) -> Self {
        items.retain(|i| i.state.needs_programming());
        items.sort_by_key(|i| i.number);
        Self { network, items }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn items(&self) -> &[NetworkAclItem] {
        &self.items
    }

    pub fn create_commands(&self, routing: &RoutingMetadata) -> Vec<RouterCommand> {
        let items = self
            .items
            .iter()
            .map(|i| NetworkAclItemTo {
                id: i.uuid,
                number: i.number,
                protocol: i.protocol.to_string(),
                port_range: i.ports.filter(|_| i.protocol.has_ports()).map(|p| p.to_wire()),
                cidrs: i.cidrs.iter().map(ToString::to_string).collect(),
                action: i.action.to_string(),
                traffic_type: i.traffic_type.to_string(),
                revoked: i.state == RuleState::Revoke,
            })
            .collect();
        vec![RouterCommand::new(
            routing.clone(),
            CommandBody::SetNetworkAcl(SetNetworkAclCommand {
                guest_vlan_tag: self.network.vlan_tag.clone(),
                guest_cidr: self.network.cidr.to_string(),
                items,
            }),
        )]
    }
}
