// ── Row identifiers ──
//
// Numeric store keys, one newtype per entity so ids of different tables
// cannot be mixed up. None of them implement `Display`: user-visible
// messages reference the entity's UUID or address instead.

use serde::{Deserialize, Serialize};

macro_rules! row_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub u64);

            impl From<u64> for $name {
                fn from(raw: u64) -> Self {
                    Self(raw)
                }
            }

            impl From<$name> for u64 {
                fn from(id: $name) -> Self {
                    id.0
                }
            }
        )+
    };
}

row_id!(
    /// Any rule row: firewall, port forwarding, static NAT, load balancing, VPN.
    RuleId,
    IpAddressId,
    NetworkId,
    VpcId,
    VmId,
    NicId,
    RouterId,
    AccountId,
    DomainId,
    PodId,
    AclItemId,
    VpnUserId,
    PrivateGatewayId,
);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_bare_numbers() {
        assert_eq!(serde_json::to_string(&RuleId(42)).unwrap(), "42");
        let id: NetworkId = serde_json::from_str("7").unwrap();
        assert_eq!(id, NetworkId(7));
    }
}
