use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use super::identifier::Identifier;

/// A reachable reference to a peer.
///
/// Equality and hashing cover the identifier, the address and the port
/// together: the same identifier seen at another address is a different
/// contact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub id: Identifier,
    pub address: IpAddr,
    pub port: u16,
}

impl Contact {
    /// Create a new contact
    pub fn new(id: Identifier, address: IpAddr, port: u16) -> Self {
        Self { id, address, port }
    }

    pub fn from_socket_addr(id: Identifier, addr: SocketAddr) -> Self {
        Self::new(id, addr.ip(), addr.port())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.socket_addr())
    }
}
