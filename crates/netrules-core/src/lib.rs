//! Network rule control plane for virtual-router appliances.
//!
//! Takes user-facing network constructs (port forwarding, static NAT,
//! firewall and load-balancing rules, network ACLs, VPN users, DHCP
//! entries) through their lifecycle and programs them onto the routers
//! that enforce them:
//!
//! - **[`RulesManager`]**: validates a request, persists the rule as
//!   `Staged`, vetoes conflicts with existing rules, dispatches the
//!   desired state to the routers and reconciles the outcome
//!   (`Add -> Active`, `Revoke -> removed`). Failed creates are undone
//!   through a [`Compensation`].
//!
//! - **[`RuleApplier`]**: one variant per rule category. Each holds the
//!   data to program and builds the router commands for it.
//!
//! - **[`NetworkTopology`]**: Basic, Advanced or VPC dispatch. Picks the
//!   routers to program, in which order, and which applier/topology pairs
//!   are supported.
//!
//! - **Collaborators** ([`store`]): rule persistence, inventory, IP
//!   allocation and access checks as traits, with [`MemoryStore`] as the
//!   in-process implementation.

pub mod applier;
pub mod config;
pub mod conflict;
pub mod error;
pub mod manager;
pub mod model;
pub mod store;
pub mod topology;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use applier::{Dependencies, RuleApplier};
pub use config::{ManagerConfig, RedundantOrder};
pub use conflict::detect_conflict;
pub use error::CoreError;
pub use manager::{
    AddVpnUserRequest, Compensation, CreateAclItemRequest, CreateFirewallRuleRequest,
    CreateLoadBalancerRequest, CreatePortForwardingRequest, CreatePrivateGatewayRequest,
    CreateStaticNatRuleRequest, CreatedRule, EnableStaticNatRequest, LockKey, RuleEvent,
    RulesManager, UndoStep,
};
pub use store::{
    AccessChecker, AccessTarget, InventoryStore, IpAllocator, MemoryStore, OwnershipChecker,
    RuleStore, ZoneSnapshot,
};
pub use topology::{NetworkTopology, TopologyKind};
