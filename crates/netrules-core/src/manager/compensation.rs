// ── Compensating actions ──
//
// A create operation records what it changed as undo steps. The caller
// either commits the compensation once the rule is applied, or hands it
// to `RulesManager::rollback` on the error branch. Steps run in reverse.

use crate::model::{IpAddress, IpAddressId, NetworkId, RuleId, VmId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoStep {
    /// Delete a rule row and the rows created alongside it.
    RemoveRule(RuleId),
    /// Undo an on-demand VPC tier association.
    UnassignIp { ip: IpAddressId, network: NetworkId },
    /// Put NAT and association flags back as they were.
    RestoreIp(Box<IpAddress>),
    /// Drop load balancer destinations added by the operation.
    RemoveLbDestinations { rule: RuleId, vms: Vec<VmId> },
    /// Return an address allocated by the operation.
    ReleaseIp(IpAddressId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use = "roll the compensation back or commit it"]
pub struct Compensation {
    steps: Vec<UndoStep>,
}

impl Compensation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: UndoStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[UndoStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Accept the changes; nothing will be undone.
    pub fn commit(self) {}

    pub(crate) fn into_reversed(self) -> impl Iterator<Item = UndoStep> {
        self.steps.into_iter().rev()
    }
}

/// A freshly created rule together with the means to undo its creation.
#[derive(Debug, Clone)]
#[must_use = "roll the compensation back or commit it"]
pub struct CreatedRule<T> {
    pub rule: T,
    pub compensation: Compensation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_undo_in_reverse() {
        let mut compensation = Compensation::new();
        compensation.push(UndoStep::UnassignIp {
            ip: IpAddressId(1),
            network: NetworkId(2),
        });
        compensation.push(UndoStep::RemoveRule(RuleId(3)));
        let order: Vec<_> = compensation.into_reversed().collect();
        assert_eq!(order[0], UndoStep::RemoveRule(RuleId(3)));
    }
}
