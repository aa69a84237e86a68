//! Addressing: IPv4 addresses, sockets, and the connection tuple.

use std::fmt::{self, Display};

/// A four-octet IPv4 address in network byte order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Address([u8; 4]);

impl Ipv4Address {
    /// The loopback address, `127.0.0.1`.
    pub const LOCALHOST: Self = Self([127, 0, 0, 1]);

    /// The unspecified address, `0.0.0.0`.
    pub const UNSPECIFIED: Self = Self([0, 0, 0, 0]);

    /// Creates an address from its octets.
    pub const fn new(octets: [u8; 4]) -> Self {
        Self(octets)
    }

    /// The octets in big-endian order.
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0
    }
}

impl From<[u8; 4]> for Ipv4Address {
    fn from(octets: [u8; 4]) -> Self {
        Self(octets)
    }
}

impl From<u32> for Ipv4Address {
    fn from(n: u32) -> Self {
        Self(n.to_be_bytes())
    }
}

impl From<Ipv4Address> for u32 {
    fn from(address: Ipv4Address) -> Self {
        u32::from_be_bytes(address.0)
    }
}

impl Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

/// One endpoint of a connection: an address and a port.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Socket {
    pub address: Ipv4Address,
    pub port: u16,
}

impl Socket {
    pub const fn new(address: Ipv4Address, port: u16) -> Self {
        Self { address, port }
    }
}

impl Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// The pair of sockets that identifies a connection to the host
/// demultiplexer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub local: Socket,
    pub remote: Socket,
}

impl ConnectionId {
    pub const fn new(local: Socket, remote: Socket) -> Self {
        Self { local, remote }
    }

    /// The same pair seen from the peer's side.
    pub const fn reverse(self) -> Self {
        Self {
            local: self.remote,
            remote: self.local,
        }
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.local, self.remote)
    }
}
