//! SOCKS client module
//!
//! Implements the client side of SOCKS4 and SOCKS5 (RFC 1928, with the
//! username/password method of RFC 1929) as a non-blocking state machine.

pub mod consts;
mod credentials;
mod session;
pub mod wire;

pub use credentials::{
    os_user_name, CredentialField, CredentialSource, Identity, PASSWORD_ENV, USERNAME_ENV,
};
pub use session::{
    Exchange, Progress, ReplyBuffer, SessionState, SocksSession, MAX_TRANSITIONS,
};
