// VPC private gateways.
//
// Creating a gateway attaches a NIC on the private VLAN to each VPC
// router and configures the gateway address on it (and source NAT, when
// enabled). If that fails the NIC is torn down again before the error is
// returned.

use netrules_api::command::{
    IpAddressTo, IpAssocCommand, PlugNicCommand, SetSourceNatCommand, UnplugNicCommand,
};
use netrules_api::{CommandBody, RouterCommand, RoutingMetadata};

use super::nic_plug::generate_mac;
use crate::model::{Nic, NicId, NicKind, NicOwner, PrivateGateway, VirtualRouter};

#[derive(Debug, Clone)]
pub struct PrivateGatewayRules {
    gateway: PrivateGateway,
    create: bool,
}

impl PrivateGatewayRules {
    /// Attach the gateway to the VPC routers.
    pub fn create(gateway: PrivateGateway) -> Self {
        Self {
            gateway,
            create: true,
        }
    }

    /// Detach the gateway from the VPC routers.
    pub fn destroy(gateway: PrivateGateway) -> Self {
        Self {
            gateway,
            create: false,
        }
    }

    pub fn gateway(&self) -> &PrivateGateway {
        &self.gateway
    }

    pub fn is_create(&self) -> bool {
        self.create
    }

    /// The NIC row `router` gets for this gateway.
    pub fn private_nic(&self, router: &VirtualRouter, id: NicId) -> Nic {
        Nic {
            id,
            owner: NicOwner::Router(router.id),
            kind: NicKind::Private,
            network_id: None,
            ip: self.gateway.ip,
            netmask: self.gateway.netmask,
            gateway: self.gateway.gateway,
            mac: generate_mac(id),
            vlan_tag: self.gateway.vlan_tag.clone(),
            is_default: false,
        }
    }

    /// Whether `nic` is this gateway's NIC.
    pub fn owns(&self, nic: &Nic) -> bool {
        nic.kind == NicKind::Private && nic.vlan_tag == self.gateway.vlan_tag && nic.ip == self.gateway.ip
    }

    fn address(&self, nic: &Nic, add: bool) -> CommandBody {
        CommandBody::IpAssoc(IpAssocCommand {
            ips: vec![IpAddressTo {
                public_ip: self.gateway.ip,
                add,
                source_nat: self.gateway.source_nat,
                one_to_one_nat: false,
                first_ip: true,
                vlan_tag: self.gateway.vlan_tag.clone(),
                vlan_gateway: self.gateway.gateway,
                vlan_netmask: self.gateway.netmask,
                nic_mac: Some(nic.mac.clone()),
            }],
        })
    }

    fn source_nat(&self, add: bool) -> Option<CommandBody> {
        self.gateway.source_nat.then(|| {
            CommandBody::SetSourceNat(SetSourceNatCommand {
                public_ip: self.gateway.ip,
                vlan_tag: self.gateway.vlan_tag.clone(),
                add,
            })
        })
    }

    /// Plug the NIC, configure the address, then source NAT.
    pub fn setup_commands(&self, routing: &RoutingMetadata, nic: &Nic) -> Vec<RouterCommand> {
        let mut bodies = vec![
            CommandBody::PlugNic(PlugNicCommand {
                mac: nic.mac.clone(),
                vlan_tag: nic.vlan_tag.clone(),
                ip: nic.ip,
                netmask: nic.netmask,
                gateway: nic.gateway,
            }),
            self.address(nic, true),
        ];
        bodies.extend(self.source_nat(true));
        bodies
            .into_iter()
            .map(|b| RouterCommand::new(routing.clone(), b))
            .collect()
    }

    /// Reverse of `setup_commands`.
    pub fn teardown_commands(&self, routing: &RoutingMetadata, nic: &Nic) -> Vec<RouterCommand> {
        let mut bodies: Vec<CommandBody> = self.source_nat(false).into_iter().collect();
        bodies.push(self.address(nic, false));
        bodies.push(CommandBody::UnplugNic(UnplugNicCommand {
            mac: nic.mac.clone(),
            vlan_tag: nic.vlan_tag.clone(),
        }));
        bodies
            .into_iter()
            .map(|b| RouterCommand::new(routing.clone(), b))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn setup_plugs_before_configuring() {
        let rules = PrivateGatewayRules::create(testing::private_gateway(true));
        let router = testing::router(1, crate::model::RedundantRole::Standalone);
        let nic = rules.private_nic(&router, NicId(40));
        assert!(rules.owns(&nic));

        let kinds: Vec<_> = rules
            .setup_commands(&testing::routing(), &nic)
            .iter()
            .map(RouterCommand::kind)
            .collect();
        assert_eq!(kinds, ["PlugNic", "IpAssoc", "SetSourceNat"]);

        let kinds: Vec<_> = rules
            .teardown_commands(&testing::routing(), &nic)
            .iter()
            .map(RouterCommand::kind)
            .collect();
        assert_eq!(kinds, ["SetSourceNat", "IpAssoc", "UnplugNic"]);
    }

    #[test]
    fn source_nat_is_optional() {
        let rules = PrivateGatewayRules::create(testing::private_gateway(false));
        let router = testing::router(1, crate::model::RedundantRole::Standalone);
        let nic = rules.private_nic(&router, NicId(40));
        assert_eq!(rules.setup_commands(&testing::routing(), &nic).len(), 2);
    }
}
