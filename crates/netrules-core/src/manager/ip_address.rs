// Public IP association and release.

use tracing::{info, warn};
use uuid::Uuid;

use super::{Compensation, LockKey, RulesManager, UndoStep};
use crate::applier::{IpAssociationRules, NicPlugInOutRules, RuleApplier};
use crate::error::CoreError;
use crate::model::{Account, IpAddress, IpState, Network};
use crate::store::AccessTarget;

impl RulesManager {
    /// Associate an allocated address with a guest network and program the
    /// network's routers. A failed apply undoes the association.
    pub async fn associate_ip_to_network(
        &self,
        ip_address: Uuid,
        network: Uuid,
        caller: &Account,
    ) -> Result<IpAddress, CoreError> {
        let ip = self.usable_ip(ip_address, caller)?;
        let network = self.network_by_uuid(network)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        let _guard = self
            .lock([LockKey::Network(network.id), LockKey::Ip(ip.id)])
            .await;

        let ip = self.ip(ip.id)?;
        match ip.associated_with_network {
            Some(current) if current == network.id => return Ok(ip),
            Some(_) => {
                return Err(CoreError::invalid(format!(
                    "IP address {} is associated with another network",
                    ip.address
                )));
            }
            None => {}
        }
        if ip.vpc_id.is_some() && ip.vpc_id != network.vpc_id {
            return Err(CoreError::invalid(format!(
                "IP address {} belongs to another VPC than network {}",
                ip.address, network.uuid
            )));
        }

        let mut compensation = Compensation::new();
        let associated = self
            .inner
            .deps
            .ip_allocator
            .associate_ip_to_guest_network(ip.id, network.id)?;
        compensation.push(if ip.vpc_id.is_some() {
            UndoStep::UnassignIp {
                ip: ip.id,
                network: network.id,
            }
        } else {
            UndoStep::RestoreIp(Box::new(ip.clone()))
        });

        if let Err(e) = self.apply_ip_associations_locked(&network, false).await {
            warn!(ip = %ip.address, error = %e, "association failed, rolling back");
            self.rollback_quietly(compensation);
            return Err(e);
        }
        compensation.commit();
        info!(ip = %associated.address, network = %network.uuid, "address associated");
        self.ip(ip.id)
    }

    /// Deprogram an address from its routers and return it to the pool.
    /// The address must carry no rules and no NAT.
    pub async fn release_ip_address(
        &self,
        ip_address: Uuid,
        caller: &Account,
    ) -> Result<(), CoreError> {
        let ip = self.ip_by_uuid(ip_address)?;
        self.check_access(caller, AccessTarget::IpAddress(&ip))?;
        let mut keys = vec![LockKey::Ip(ip.id)];
        keys.extend(ip.associated_with_network.map(LockKey::Network));
        let _guard = self.lock(keys).await;

        let ip = self.ip(ip.id)?;
        if ip.source_nat {
            return Err(CoreError::invalid(format!(
                "IP address {} is a source NAT address",
                ip.address
            )));
        }
        if ip.one_to_one_nat {
            return Err(CoreError::invalid(format!(
                "disable static NAT on IP address {} first",
                ip.address
            )));
        }
        if let Some(rule) = self.rules().list_by_ip(ip.id).first() {
            return Err(CoreError::invalid(format!(
                "IP address {} still carries rule {}",
                ip.address,
                rule.uuid()
            )));
        }

        if let Some(network_id) = ip.associated_with_network {
            let network = self.network(network_id)?;
            let mut releasing = ip.clone();
            releasing.state = IpState::Releasing;
            let releasing = self.inventory().update_ip_address(&releasing)?;
            if let Err(e) = self.apply_ip_associations_locked(&network, false).await {
                warn!(ip = %ip.address, error = %e, "release failed, keeping address");
                let mut kept = releasing;
                kept.state = IpState::Allocated;
                self.inventory().update_ip_address(&kept)?;
                return Err(e);
            }
        }
        self.inner.deps.ip_allocator.release_ip(ip.id)?;
        info!(ip = %ip.address, "address released");
        Ok(())
    }

    /// Resend the public addresses of a network to its routers.
    pub async fn apply_ip_associations(
        &self,
        network: Uuid,
        continue_on_error: bool,
        caller: &Account,
    ) -> Result<bool, CoreError> {
        let network = self.network_by_uuid(network)?;
        self.check_access(caller, AccessTarget::Network(&network))?;
        let _guard = self.lock([LockKey::Network(network.id)]).await;
        self.apply_ip_associations_locked(&network, continue_on_error)
            .await
    }

    pub(super) async fn apply_ip_associations_locked(
        &self,
        network: &Network,
        continue_on_error: bool,
    ) -> Result<bool, CoreError> {
        let applier = match network.vpc_id {
            Some(vpc) => {
                let addresses = self
                    .inventory()
                    .ip_addresses_for_vpc(vpc)
                    .into_iter()
                    .filter(|ip| ip.state != IpState::Free)
                    .collect();
                RuleApplier::NicPlugInOut(NicPlugInOutRules::new(network.clone(), addresses))
            }
            None => {
                let addresses = self
                    .inventory()
                    .ip_addresses_for_network(network.id)
                    .into_iter()
                    .filter(|ip| ip.state != IpState::Free)
                    .collect();
                RuleApplier::IpAssociation(IpAssociationRules::new(network.clone(), addresses))
            }
        };
        self.dispatch(network, applier, continue_on_error).await
    }
}
