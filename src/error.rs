//! Error types for Socksify
//!
//! This module defines all custom error types used throughout the library.
//! Every error that can reach an intercepted network call knows which
//! [`io::ErrorKind`] it should surface as.

use crate::config::Origin;
use crate::registry::SessionId;
use crate::socks::CredentialField;
use crate::transport::SocketHandle;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV6};
use std::sync::Arc;
use thiserror::Error;

/// Failure to pick a usable SOCKS server for a destination
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The selected profile has no server address
    #[error("no SOCKS server address configured ({origin})")]
    NoServerAddress {
        /// Profile the destination was routed to
        origin: Origin,
    },

    /// The server address does not resolve to an IPv4 address
    #[error("SOCKS server {address:?} ({origin}) does not resolve to an IPv4 address")]
    Unresolvable {
        /// Address as written in the configuration
        address: String,
        /// Profile the destination was routed to
        origin: Origin,
    },

    /// The server itself would have to be reached through a proxy
    #[error("SOCKS server {server} ({origin}) is not on a local network")]
    ServerNotLocal {
        /// Resolved server address
        server: Ipv4Addr,
        /// Profile the destination was routed to
        origin: Origin,
    },
}

impl RoutingError {
    /// The error an intercepted `connect` reports for this failure
    pub fn io_kind(&self) -> io::ErrorKind {
        io::ErrorKind::NetworkUnreachable
    }
}

/// SOCKS4 reply codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks4ReplyCode {
    /// Request granted
    Granted = 0x5A,
    /// Request rejected or failed
    Rejected = 0x5B,
    /// Rejected because the server cannot connect to identd on the client
    IdentdUnreachable = 0x5C,
    /// Rejected because identd and the client reported different user-ids
    IdentdMismatch = 0x5D,
}

impl From<Socks4ReplyCode> for u8 {
    fn from(code: Socks4ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks4ReplyCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x5A => Ok(Socks4ReplyCode::Granted),
            0x5B => Ok(Socks4ReplyCode::Rejected),
            0x5C => Ok(Socks4ReplyCode::IdentdUnreachable),
            0x5D => Ok(Socks4ReplyCode::IdentdMismatch),
            _ => Err(ProtocolError::UnknownSocks4Status(value)),
        }
    }
}

impl fmt::Display for Socks4ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Socks4ReplyCode::Granted => write!(f, "request granted"),
            Socks4ReplyCode::Rejected => write!(f, "SOCKS server refused connection"),
            Socks4ReplyCode::IdentdUnreachable => write!(
                f,
                "SOCKS server refused connection because of failed connect to identd on this machine"
            ),
            Socks4ReplyCode::IdentdMismatch => write!(
                f,
                "SOCKS server refused connection because identd and this library reported different user-ids"
            ),
        }
    }
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl Socks5ReplyCode {
    /// The error an intercepted `connect` reports for this status
    pub fn io_kind(self) -> io::ErrorKind {
        match self {
            Socks5ReplyCode::NetworkUnreachable => io::ErrorKind::NetworkUnreachable,
            Socks5ReplyCode::HostUnreachable => io::ErrorKind::HostUnreachable,
            Socks5ReplyCode::ConnectionRefused => io::ErrorKind::ConnectionRefused,
            Socks5ReplyCode::TtlExpired => io::ErrorKind::TimedOut,
            Socks5ReplyCode::Succeeded
            | Socks5ReplyCode::GeneralFailure
            | Socks5ReplyCode::ConnectionNotAllowed
            | Socks5ReplyCode::CommandNotSupported
            | Socks5ReplyCode::AddressTypeNotSupported => io::ErrorKind::ConnectionAborted,
        }
    }
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks5ReplyCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Socks5ReplyCode::Succeeded),
            0x01 => Ok(Socks5ReplyCode::GeneralFailure),
            0x02 => Ok(Socks5ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(Socks5ReplyCode::NetworkUnreachable),
            0x04 => Ok(Socks5ReplyCode::HostUnreachable),
            0x05 => Ok(Socks5ReplyCode::ConnectionRefused),
            0x06 => Ok(Socks5ReplyCode::TtlExpired),
            0x07 => Ok(Socks5ReplyCode::CommandNotSupported),
            0x08 => Ok(Socks5ReplyCode::AddressTypeNotSupported),
            _ => Err(ProtocolError::UnknownSocks5Status(value)),
        }
    }
}

impl fmt::Display for Socks5ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Socks5ReplyCode::Succeeded => write!(f, "succeeded"),
            Socks5ReplyCode::GeneralFailure => write!(f, "general SOCKS server failure"),
            Socks5ReplyCode::ConnectionNotAllowed => write!(f, "connection denied by rule"),
            Socks5ReplyCode::NetworkUnreachable => write!(f, "network unreachable"),
            Socks5ReplyCode::HostUnreachable => write!(f, "host unreachable"),
            Socks5ReplyCode::ConnectionRefused => write!(f, "connection refused"),
            Socks5ReplyCode::TtlExpired => write!(f, "TTL expired"),
            Socks5ReplyCode::CommandNotSupported => write!(f, "command not supported"),
            Socks5ReplyCode::AddressTypeNotSupported => write!(f, "address type not supported"),
        }
    }
}

/// The SOCKS server answered, but not with success
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// SOCKS4 request rejected
    #[error("SOCKS4 request failed: {0}")]
    Socks4Rejected(Socks4ReplyCode),

    /// SOCKS4 reply with a status outside the protocol
    #[error("SOCKS4 request failed with unknown status {0:#04x}")]
    UnknownSocks4Status(u8),

    /// SOCKS5 connect failed
    #[error("SOCKS5 connect failed: {0}")]
    Socks5Failed(Socks5ReplyCode),

    /// SOCKS5 reply with a status outside the protocol
    #[error("SOCKS5 connect failed with unknown status {0:#04x}")]
    UnknownSocks5Status(u8),

    /// None of the offered authentication methods was accepted
    #[error("SOCKS server refused authentication methods")]
    NoAcceptableMethod,

    /// The server chose a method that was never offered
    #[error("SOCKS server selected unsupported method {0:#04x}")]
    UnsupportedMethod(u8),

    /// Username/password sub-negotiation failed
    #[error("SOCKS authentication failed with status {0:#04x}, check username and password")]
    AuthRejected(u8),

    /// The server closed the connection before a full reply arrived
    #[error("short reply from SOCKS server: expected {expected} bytes, got {received}")]
    ShortReply {
        /// Length mandated by the protocol
        expected: usize,
        /// Bytes received before end of stream
        received: usize,
    },
}

impl ProtocolError {
    /// The error an intercepted `connect` reports for this failure
    pub fn io_kind(&self) -> io::ErrorKind {
        match self {
            ProtocolError::Socks4Rejected(_)
            | ProtocolError::UnknownSocks4Status(_)
            | ProtocolError::NoAcceptableMethod
            | ProtocolError::AuthRejected(_) => io::ErrorKind::ConnectionRefused,
            ProtocolError::Socks5Failed(code) => code.io_kind(),
            ProtocolError::UnknownSocks5Status(_)
            | ProtocolError::UnsupportedMethod(_)
            | ProtocolError::ShortReply { .. } => io::ErrorKind::ConnectionAborted,
        }
    }
}

/// Terminal failure of a SOCKS negotiation
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// A credential does not fit in the request
    #[error("SOCKS {field} is {len} bytes long, the limit is {limit}")]
    CredentialTooLong {
        /// Which credential overflowed
        field: CredentialField,
        /// Its length in bytes
        len: usize,
        /// The largest length that fits
        limit: usize,
    },

    /// Authentication was required but a credential is unavailable
    #[error("no SOCKS {0} available to authenticate with")]
    MissingCredentials(CredentialField),

    /// The server rejected the request
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Connecting to or talking with the server failed
    #[error("SOCKS server connection failed: {0}")]
    Io(Arc<io::Error>),

    /// The state machine kept transitioning without waiting for I/O
    #[error("SOCKS session made {0} transitions without waiting for I/O")]
    Stalled(usize),
}

impl SessionError {
    /// The error an intercepted `connect` reports for this failure
    pub fn io_kind(&self) -> io::ErrorKind {
        match self {
            SessionError::CredentialTooLong { .. } | SessionError::MissingCredentials(_) => {
                io::ErrorKind::ConnectionRefused
            }
            SessionError::Protocol(err) => err.io_kind(),
            SessionError::Io(err) => err.kind(),
            SessionError::Stalled(_) => io::ErrorKind::ConnectionAborted,
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        SessionError::Io(Arc::new(err))
    }
}

impl From<SessionError> for io::Error {
    fn from(err: SessionError) -> Self {
        io::Error::new(err.io_kind(), err)
    }
}

impl From<RoutingError> for io::Error {
    fn from(err: RoutingError) -> Self {
        io::Error::new(err.io_kind(), err)
    }
}

/// Misuse of the session registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No live session has this id
    #[error("no SOCKS session with id {0}")]
    InvalidSession(SessionId),

    /// The socket is already negotiating
    #[error("socket {0} already has a SOCKS negotiation in progress")]
    HandleBusy(SocketHandle),
}

impl From<RegistryError> for io::Error {
    fn from(err: RegistryError) -> Self {
        let kind = match err {
            RegistryError::InvalidSession(_) => io::ErrorKind::InvalidInput,
            RegistryError::HandleBusy(_) => io::ErrorKind::ResourceBusy,
        };
        io::Error::new(kind, err)
    }
}

/// A socket address that cannot be proxied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// IPv6 destinations are not supported
    #[error("IPv6 destination {0} cannot be proxied")]
    Ipv6(SocketAddrV6),

    /// Not an internet address at all
    #[error("address family is not IPv4")]
    UnsupportedFamily,
}

/// Invalid `ip[:port[-port]]/mask` network specification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// Not of the expected shape
    #[error("network specification {0:?} is not of the form ip[:port[-port]]/mask")]
    Malformed(String),

    /// Bad base address
    #[error("IP {0:?} in network specification is not valid")]
    InvalidIp(String),

    /// Bad mask
    #[error("SUBNET {0:?} in network specification is not valid")]
    InvalidMask(String),

    /// Base address has bits outside the mask
    #[error("IP ({ip}) & SUBNET ({mask}) != IP")]
    HostBitsSet {
        /// Base address
        ip: Ipv4Addr,
        /// Mask
        mask: Ipv4Addr,
    },

    /// Bad first port
    #[error("start port {0:?} in network specification is not valid")]
    InvalidStartPort(String),

    /// Bad last port
    #[error("end port {0:?} in network specification is not valid")]
    InvalidEndPort(String),

    /// Range ends before it starts
    #[error("end port {high} is less than start port {low}")]
    InvertedPortRange {
        /// First port
        low: u16,
        /// Last port
        high: u16,
    },
}

/// Invalid configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Line is neither a block delimiter nor `name = value`
    #[error("malformed configuration pair on {at}: {text:?}")]
    MalformedPair {
        /// Where
        at: Origin,
        /// Offending text
        text: String,
    },

    /// Unknown `name` in `name = value`
    #[error("invalid pair type {name:?} on {at}")]
    UnknownDirective {
        /// Where
        at: Origin,
        /// Directive name
        name: String,
    },

    /// `path` not followed by `{`
    #[error("badly formed path open statement on {at} (should look like \"path {{\")")]
    BadPathOpen {
        /// Where
        at: Origin,
    },

    /// `path {` inside another path
    #[error("path statements cannot be nested on {at} (path begins on {opened})")]
    NestedPath {
        /// Where
        at: Origin,
        /// Where the enclosing path started
        opened: Origin,
    },

    /// `}` without an open path
    #[error("path close statement on {at} has no matching \"path {{\"")]
    UnmatchedClose {
        /// Where
        at: Origin,
    },

    /// End of input inside a path block
    #[error("path beginning on {opened} is never closed")]
    UnclosedPath {
        /// Where the path started
        opened: Origin,
    },

    /// A scalar directive given twice for the same profile
    #[error("{directive} may only be specified once per profile ({profile}), again on {at}")]
    Duplicate {
        /// Where
        at: Origin,
        /// Directive name
        directive: &'static str,
        /// Profile being configured
        profile: Origin,
    },

    /// Bad `server_port`
    #[error("invalid server port number {value:?} on {at}")]
    InvalidPort {
        /// Where
        at: Origin,
        /// Offending value
        value: String,
    },

    /// Bad `server_type`
    #[error("invalid server type {value:?} on {at}, only 4 or 5 may be specified")]
    InvalidServerType {
        /// Where
        at: Origin,
        /// Offending value
        value: String,
    },

    /// `local` inside a path block
    #[error("local networks cannot be specified in a path block, on {at}")]
    LocalInPath {
        /// Where
        at: Origin,
    },

    /// `local` with a port range
    #[error("port specification is not allowed in local network specification {value:?} on {at}")]
    PortInLocal {
        /// Where
        at: Origin,
        /// Offending value
        value: String,
    },

    /// `reaches` outside any path block
    #[error("reaches is only valid inside a path block, on {at}")]
    ReachesOutsidePath {
        /// Where
        at: Origin,
    },

    /// A network specification failed to parse
    #[error("{source} on {at}")]
    InvalidRule {
        /// Where
        at: Origin,
        /// Why
        #[source]
        source: RuleError,
    },
}
