//! Transport module for Socksify
//!
//! This module provides the socket abstraction SOCKS sessions are driven
//! over, and its implementation on top of real non-blocking sockets.

mod addr;
mod socket;

pub use addr::{ipv4_endpoint, ipv4_socket_addr};
pub use socket::SocketTable;

use std::fmt;
use std::io;
use std::net::SocketAddrV4;

/// Identifier of a socket owned by the embedding program
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketHandle(usize);

impl SocketHandle {
    /// Wrap a raw identifier, such as a file descriptor
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The raw identifier
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of socket a connection attempt was made on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Connection-oriented byte stream (TCP)
    Stream,
    /// Datagram socket (UDP)
    Datagram,
    /// Anything else
    Other,
}

impl From<socket2::Type> for SocketKind {
    fn from(ty: socket2::Type) -> Self {
        if ty == socket2::Type::STREAM {
            SocketKind::Stream
        } else if ty == socket2::Type::DGRAM {
            SocketKind::Datagram
        } else {
            SocketKind::Other
        }
    }
}

/// State of a non-blocking connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectProgress {
    /// The connection is established
    Established,
    /// The connection is still being set up
    InProgress,
}

/// Non-blocking socket operations a SOCKS session needs
///
/// None of these may block. An operation that cannot make progress fails
/// with [`io::ErrorKind::WouldBlock`].
pub trait SocketIo {
    /// Start connecting `handle` to `addr`
    fn connect(&mut self, handle: SocketHandle, addr: SocketAddrV4) -> io::Result<ConnectProgress>;

    /// Check on a connect that was in progress
    ///
    /// A failed connect reports its error here.
    fn connect_status(&mut self, handle: SocketHandle) -> io::Result<ConnectProgress>;

    /// Write bytes, returning how many were accepted
    fn send(&mut self, handle: SocketHandle, buf: &[u8]) -> io::Result<usize>;

    /// Read bytes, returning 0 at end of stream
    fn recv(&mut self, handle: SocketHandle, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: SocketIo + ?Sized> SocketIo for &mut T {
    fn connect(&mut self, handle: SocketHandle, addr: SocketAddrV4) -> io::Result<ConnectProgress> {
        (**self).connect(handle, addr)
    }

    fn connect_status(&mut self, handle: SocketHandle) -> io::Result<ConnectProgress> {
        (**self).connect_status(handle)
    }

    fn send(&mut self, handle: SocketHandle, buf: &[u8]) -> io::Result<usize> {
        (**self).send(handle, buf)
    }

    fn recv(&mut self, handle: SocketHandle, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(handle, buf)
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
