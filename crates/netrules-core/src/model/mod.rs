// ── Domain model ──
//
// Rules, the inventory they reference, and identifiers.

mod cidr;
mod ids;
mod ip_address;
mod load_balancer;
mod network;
mod rule;
mod service;

pub use cidr::Ipv4Cidr;
pub use ids::{
    AccountId, AclItemId, DomainId, IpAddressId, NetworkId, NicId, PodId, PrivateGatewayId,
    RouterId, RuleId, VmId, VpcId, VpnUserId,
};
pub use ip_address::{IpAddress, IpState, Vlan};
pub use load_balancer::{
    HealthCheckPolicy, LbAlgorithm, LbDestination, LoadBalancingRule, SslCert, StickinessMethod,
    StickinessPolicy,
};
pub use network::{
    Account, AccountRole, GuestType, Network, Nic, NicKind, NicOwner, RedundantRole, RouterState,
    VirtualMachine, VirtualRouter, VmState, Vpc,
};
pub use rule::{
    FirewallRule, NetworkRule, PortForwardingRule, PortRange, Protocol, Purpose, RuleState,
    TrafficType,
};
pub use service::{AclAction, GatewayState, NetworkAclItem, PrivateGateway, VpnUser};
