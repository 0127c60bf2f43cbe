//! Address types (§3). `Address` is what a caller or a routing table names; `ResolvedAddress` is
//! what the pool actually dials, carrying the original host name along for TLS SNI.

use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

/// An unresolved `(host, port)` pair as named by a URI, a routing table entry, or a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An address that has been through the injectable `Resolver` (§6) and now carries a concrete
/// IP plus the original host name it was resolved from, for TLS SNI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedAddress {
    pub original_host: String,
    pub ip: IpAddr,
    pub port: u16,
}

impl ResolvedAddress {
    pub fn new(original_host: impl Into<String>, ip: IpAddr, port: u16) -> Self {
        Self {
            original_host: original_host.into(),
            ip,
            port,
        }
    }

    pub fn family(&self) -> IpFamily {
        match self.ip {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}
