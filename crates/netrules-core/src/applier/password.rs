// Hands a VM's new password to the router's password server.

use netrules_api::command::SavePasswordCommand;
use netrules_api::{CommandBody, RouterCommand, RoutingMetadata};

use crate::model::{Network, Nic, VirtualMachine};

#[derive(Clone)]
pub struct PasswordToRouterRules {
    network: Network,
    vm: VirtualMachine,
    nic: Nic,
    password: String,
}

impl std::fmt::Debug for PasswordToRouterRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordToRouterRules")
            .field("network", &self.network.uuid)
            .field("vm", &self.vm.uuid)
            .finish_non_exhaustive()
    }
}

impl PasswordToRouterRules {
    pub fn new(network: Network, vm: VirtualMachine, nic: Nic, password: String) -> Self {
        Self {
            network,
            vm,
            nic,
            password,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn vm(&self) -> &VirtualMachine {
        &self.vm
    }

    pub fn create_commands(&self, routing: &RoutingMetadata) -> Vec<RouterCommand> {
        vec![RouterCommand::new(
            routing.clone(),
            CommandBody::SavePassword(SavePasswordCommand {
                vm_ip: self.nic.ip,
                vm_name: self.vm.name.clone(),
                password: self.password.clone(),
            }),
        )]
    }
}
