// Remote-access VPN users of an account.

use netrules_api::command::{VpnUserTo, VpnUsersCfgCommand};
use netrules_api::{CommandBody, RouterCommand, RoutingMetadata};

use crate::model::{Network, RuleState, VpnUser};

#[derive(Debug, Clone)]
pub struct VpnRules {
    network: Network,
    users: Vec<VpnUser>,
}

impl VpnRules {
    pub fn new(network: Network, mut users: Vec<VpnUser>) -> Self {
        users.retain(|u| u.state.needs_programming());
        Self { network, users }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn users(&self) -> &[VpnUser] {
        &self.users
    }

    pub fn create_commands(&self, routing: &RoutingMetadata) -> Vec<RouterCommand> {
        if self.users.is_empty() {
            return Vec::new();
        }
        let users = self
            .users
            .iter()
            .map(|u| VpnUserTo {
                username: u.username.clone(),
                password: u.password.clone(),
                add: u.state != RuleState::Revoke,
            })
            .collect();
        vec![RouterCommand::new(
            routing.clone(),
            CommandBody::VpnUsersCfg(VpnUsersCfgCommand { users }),
        )]
    }
}
