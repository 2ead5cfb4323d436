//! Destination address extraction
//!
//! Connection attempts arrive with generic socket addresses. Only IPv4
//! endpoints can be proxied.

use crate::error::AddressError;
use socket2::SockAddr;
use std::net::{SocketAddr, SocketAddrV4};

/// Extract the IPv4 endpoint of a generic socket address
pub fn ipv4_endpoint(addr: &SockAddr) -> Result<SocketAddrV4, AddressError> {
    addr.as_socket()
        .ok_or(AddressError::UnsupportedFamily)
        .and_then(ipv4_socket_addr)
}

/// Extract the IPv4 endpoint of a standard socket address
pub fn ipv4_socket_addr(addr: SocketAddr) -> Result<SocketAddrV4, AddressError> {
    match addr {
        SocketAddr::V4(addr) => Ok(addr),
        SocketAddr::V6(addr) => Err(AddressError::Ipv6(addr)),
    }
}
