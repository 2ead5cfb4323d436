//! Routing module
//!
//! Decides whether a destination is reached directly or through one of
//! the configured SOCKS servers.

mod rule;
mod table;

pub use rule::NetworkRule;
pub use table::{resolve_ipv4, ProxyRoute, Route, RoutingTable, LOOPBACK_NETWORK};
