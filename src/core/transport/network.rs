//! # Network transport core
//! Module containing the datastructures for specifiyng peers through network
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// #NetworkAddress
/// Contains the IP address and/or domain name of the peer to connect to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    address: SocketAddr,
    dns: Option<String>,
}

impl NetworkAddress {
    /// Create an instance with a socket address
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self {
            address: addr,
            dns: None,
        }
    }

    /// Create an instance through a DNS name and port specification. IPv4 results are
    /// preferred, listeners bound to `*` only accept IPv4.
    pub fn from_dns(dns: String) -> io::Result<Self> {
        let addresses: Vec<SocketAddr> = dns.to_socket_addrs()?.collect();
        let address = addresses
            .iter()
            .find(|address| address.is_ipv4())
            .or_else(|| addresses.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "Did not find address for DNS",
                )
            })?;
        Ok(Self {
            address,
            dns: Some(dns),
        })
    }

    /// Query the contained socket address
    pub fn get_address(&self) -> SocketAddr {
        self.address
    }

    /// Query the contained DNS name and port string if contained
    pub fn get_dns(&self) -> Option<String> {
        self.dns.clone()
    }
}

impl ToSocketAddrs for NetworkAddress {
    type Iter = std::option::IntoIter<SocketAddr>;
    fn to_socket_addrs(&self) -> io::Result<Self::Iter> {
        Ok(Some(self.get_address()).into_iter())
    }
}
