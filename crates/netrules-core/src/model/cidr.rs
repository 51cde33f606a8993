// ── IPv4 CIDR blocks ──

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// An IPv4 network in `a.b.c.d/len` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, CoreError> {
        if prefix > 32 {
            return Err(CoreError::invalid(format!(
                "prefix length {prefix} is out of range for {addr}"
            )));
        }
        Ok(Self { addr, prefix })
    }

    /// Build from an address and a dotted netmask (`255.255.255.0`).
    pub fn from_netmask(addr: Ipv4Addr, netmask: Ipv4Addr) -> Result<Self, CoreError> {
        let bits = u32::from(netmask);
        let prefix = bits.leading_ones();
        if bits.checked_shl(prefix).unwrap_or(0) != 0 {
            return Err(CoreError::invalid(format!("{netmask} is not a valid netmask")));
        }
        #[allow(clippy::cast_possible_truncation)]
        Self::new(addr, prefix as u8)
    }

    /// The whole IPv4 space, `0.0.0.0/0`.
    pub const fn any() -> Self {
        Self {
            addr: Ipv4Addr::UNSPECIFIED,
            prefix: 0,
        }
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    /// First address of the block.
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & self.mask())
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask())
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask() == u32::from(self.network())
    }

    /// Two blocks intersect when the shorter prefix contains the other's
    /// network address.
    pub fn intersects(&self, other: &Self) -> bool {
        if self.prefix <= other.prefix {
            self.contains(other.network())
        } else {
            other.contains(self.network())
        }
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = s.split_once('/').unwrap_or((s, "32"));
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| CoreError::invalid(format!("{s} is not a valid CIDR")))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| CoreError::invalid(format!("{s} is not a valid CIDR")))?;
        Self::new(addr, prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}
