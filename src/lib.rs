//! # Socksify - Transparent SOCKS Routing Engine
//!
//! Socksify decides, for every outbound TCP connection attempt, whether the
//! destination is reachable directly or has to go through a SOCKS proxy, and
//! drives the SOCKS4 or SOCKS5 handshake for proxied connections without ever
//! blocking a thread.
//!
//! ## Features
//!
//! - **Ordered routing**: paths are evaluated in the order they are declared,
//!   with a default server as fallback and local networks always bypassed
//! - **Non-blocking negotiation**: every handshake is a state machine that
//!   pauses whenever the socket would block
//! - **Multiplexed readiness**: a `select`/`poll` style wait advances every
//!   in-flight handshake while reporting only the events the caller cares about
//! - **Two configuration formats**: the classic `tsocks.conf` directive syntax
//!   and TOML
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksify::config::load_config;
//! use socksify::route::RoutingTable;
//! use socksify::socks::CredentialSource;
//! use socksify::transport::{SocketKind, SocketTable};
//! use socksify::{Attempt, Socksifier};
//!
//! fn main() -> anyhow::Result<()> {
//!     let routes = RoutingTable::new(load_config("/etc/socksify.conf")?);
//!     let mut sockets = SocketTable::new()?;
//!     let mut engine = Socksifier::new(&routes, CredentialSource::from_env());
//!
//!     let handle = sockets.open_stream()?;
//!     let destination = "203.0.113.7:443".parse()?;
//!     if let Attempt::Proxied(id) =
//!         engine.attempt(&mut sockets, handle, destination, SocketKind::Stream)?
//!     {
//!         engine.complete(&mut sockets, id, None)?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! attempt -> RoutingTable -> SessionRegistry -> SocksSession::step
//!                                  ^
//!                                  |
//!                       ReadinessMultiplexer::wait
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod engine;
pub mod error;
pub mod readiness;
pub mod registry;
pub mod route;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, RoutingConfig, ServerProfile};
pub use engine::{Attempt, Socksifier};
pub use error::{ProtocolError, RoutingError, SessionError};
pub use registry::{SessionId, SessionRegistry, StepOutcome};
pub use route::{NetworkRule, RoutingTable};

/// Version of the Socksify library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
