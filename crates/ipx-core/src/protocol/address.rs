//! Translation between real network endpoints and IPX transport addresses.
//!
//! The relay gives every client an IPX address derived from the `ip:port` the
//! relay sees it connecting from: the IPv4 address becomes the 32-bit `host`
//! field and the TCP port becomes `port`.  Routing later turns a frame's
//! destination back into `ip:port` and uses that string as the registry key,
//! so the two directions must agree bit-for-bit.
//!
//! # IPv6
//!
//! Dual-stack listeners report IPv4 peers as IPv4-mapped IPv6 addresses
//! (`[::ffff:a.b.c.d]:port`); those are folded to their IPv4 tail.  Any other
//! IPv6 address has no representation in a 32-bit host field and is rejected
//! with [`AddressError::NotIpv4`] instead of being truncated.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use thiserror::Error;

/// Errors produced while translating an endpoint into an IPX address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The string is not a valid `ip:port` endpoint.
    #[error("invalid endpoint '{0}': expected ip:port")]
    InvalidEndpoint(String),

    /// The endpoint is an IPv6 address with no embedded IPv4 address.
    #[error("endpoint {0} has no IPv4 representation")]
    NotIpv4(SocketAddr),
}

/// One IPX address as carried in the header (`dest` or `src`).
///
/// `host` and `port` carry a translated real endpoint; `network` and `socket`
/// are IPX-level tags that the relay only reads or stamps, never derives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TransportAddress {
    pub network: u32,
    pub host: u32,
    pub port: u16,
    pub socket: u16,
}

impl TransportAddress {
    /// Builds an address whose `host`/`port` come from `addr`.
    ///
    /// `network` and `socket` are left at zero for the caller to stamp.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::NotIpv4`] for IPv6 peers that are not
    /// IPv4-mapped.
    pub fn from_socket_addr(addr: SocketAddr) -> Result<Self, AddressError> {
        let mut address = Self::default();
        address.set_endpoint(addr)?;
        Ok(address)
    }

    /// Overwrites `host` and `port` from a real endpoint, keeping the tags.
    ///
    /// # Errors
    ///
    /// Same as [`TransportAddress::from_socket_addr`]; on error `self` is
    /// left untouched.
    pub fn set_endpoint(&mut self, addr: SocketAddr) -> Result<(), AddressError> {
        let ip = ipv4_of(addr)?;
        self.host = u32::from(ip);
        self.port = addr.port();
        Ok(())
    }

    /// The `host` field as an IPv4 address.
    pub fn ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.host)
    }

    /// The `host`/`port` pair as a socket address.
    pub fn to_socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ipv4(), self.port)
    }

    /// Renders `host`/`port` as `a.b.c.d:port`.  Equivalent to [`to_endpoint`].
    pub fn endpoint(&self) -> String {
        to_endpoint(self)
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}:{} (socket 0x{:04X})",
            self.network,
            self.to_socket_addr(),
            self.socket
        )
    }
}

/// Parses `ip:port` into an IPX address (`network` and `socket` zero).
///
/// # Errors
///
/// - [`AddressError::InvalidEndpoint`] if the string is not `ip:port`.
/// - [`AddressError::NotIpv4`] for IPv6 literals without an IPv4 tail.
///
/// # Examples
///
/// ```rust
/// use ipx_core::protocol::address::{to_address, to_endpoint};
///
/// let addr = to_address("203.0.113.5:4000").unwrap();
/// assert_eq!(addr.host, 0xCB00_7105);
/// assert_eq!(addr.port, 4000);
/// assert_eq!(to_endpoint(&addr), "203.0.113.5:4000");
/// ```
pub fn to_address(endpoint: &str) -> Result<TransportAddress, AddressError> {
    let addr: SocketAddr = endpoint
        .parse()
        .map_err(|_| AddressError::InvalidEndpoint(endpoint.to_string()))?;
    TransportAddress::from_socket_addr(addr)
}

/// Renders the `host`/`port` of `address` as `a.b.c.d:port`.
///
/// This is the exact inverse of [`to_address`] for every IPv4 endpoint, which
/// is what lets registry keys and routing lookups agree.
pub fn to_endpoint(address: &TransportAddress) -> String {
    address.to_socket_addr().to_string()
}

fn ipv4_of(addr: SocketAddr) -> Result<Ipv4Addr, AddressError> {
    match addr.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(ip) => ip.to_ipv4_mapped().ok_or(AddressError::NotIpv4(addr)),
    }
}
