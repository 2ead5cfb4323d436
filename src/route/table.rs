//! Routing decisions
//!
//! The table resolves every profile's server address once, when it is
//! built. Lookups afterwards are pure and can be shared freely.

use super::NetworkRule;
use crate::config::{RoutingConfig, ServerProfile};
use crate::error::RoutingError;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use tracing::{debug, error};

/// Network that is always reached directly
pub const LOOPBACK_NETWORK: NetworkRule = NetworkRule::loopback();

/// A usable SOCKS server picked for a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyRoute<'a> {
    /// Profile selected for the destination
    pub profile: &'a ServerProfile,
    /// Resolved server endpoint
    pub server: SocketAddrV4,
}

/// Outcome of routing one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    /// Destination is on a local network
    Direct,
    /// Destination goes through a SOCKS server
    Proxy(ProxyRoute<'a>),
    /// Destination needs a proxy but the selected one cannot be used
    Unavailable(RoutingError),
}

/// Routing table built from a [`RoutingConfig`]
#[derive(Debug, Clone)]
pub struct RoutingTable {
    config: RoutingConfig,
    // Resolution status for each path, followed by the default server
    servers: Vec<Result<SocketAddrV4, RoutingError>>,
}

impl RoutingTable {
    /// Build a table, resolving server names through the system resolver
    pub fn new(config: RoutingConfig) -> Self {
        Self::with_resolver(config, resolve_ipv4)
    }

    /// Build a table with a custom name resolver
    pub fn with_resolver<F>(config: RoutingConfig, resolve: F) -> Self
    where
        F: Fn(&str) -> Option<Ipv4Addr>,
    {
        let servers = config
            .profiles()
            .map(|profile| check_server(&config, profile, &resolve))
            .collect();

        Self { config, servers }
    }

    /// The configuration this table was built from
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Whether `ip` is reached without a proxy
    pub fn is_local(&self, ip: Ipv4Addr) -> bool {
        is_local(&self.config, ip)
    }

    /// Profile responsible for `ip:port`
    ///
    /// Paths are scanned in declaration order and the first reach rule that
    /// matches wins. Without a match the default server is used.
    pub fn select_server(&self, ip: Ipv4Addr, port: u16) -> &ServerProfile {
        let index = self.select_index(ip, port);
        self.config.paths().get(index).unwrap_or(self.config.default_server())
    }

    /// Decide how to reach `destination`
    pub fn route(&self, destination: SocketAddrV4) -> Route<'_> {
        let (ip, port) = (*destination.ip(), destination.port());
        if self.is_local(ip) {
            debug!("Connection to {} is local", destination);
            return Route::Direct;
        }

        let index = self.select_index(ip, port);
        let profile = self.config.paths().get(index).unwrap_or(self.config.default_server());
        match &self.servers[index] {
            Ok(server) => {
                debug!(
                    "Connection to {} goes through {} ({})",
                    destination, server, profile.origin
                );
                Route::Proxy(ProxyRoute {
                    profile,
                    server: *server,
                })
            }
            Err(err) => Route::Unavailable(err.clone()),
        }
    }

    /// Resolved endpoint of a profile's server
    pub fn server_for(&self, profile: &ServerProfile) -> Result<SocketAddrV4, RoutingError> {
        self.config
            .profiles()
            .position(|candidate| std::ptr::eq(candidate, profile) || candidate == profile)
            .map(|index| self.servers[index].clone())
            .unwrap_or(Err(RoutingError::NoServerAddress {
                origin: profile.origin,
            }))
    }

    /// Every profile whose server cannot be used, in evaluation order
    pub fn problems(&self) -> impl Iterator<Item = &RoutingError> {
        self.servers.iter().filter_map(|status| status.as_ref().err())
    }

    fn select_index(&self, ip: Ipv4Addr, port: u16) -> usize {
        let paths = self.config.paths();
        paths
            .iter()
            .position(|path| path.reaches(ip, port).is_some())
            .unwrap_or(paths.len())
    }
}

fn is_local(config: &RoutingConfig, ip: Ipv4Addr) -> bool {
    LOOPBACK_NETWORK.contains(ip) || config.locals().iter().any(|rule| rule.contains(ip))
}

fn check_server<F>(
    config: &RoutingConfig,
    profile: &ServerProfile,
    resolve: &F,
) -> Result<SocketAddrV4, RoutingError>
where
    F: Fn(&str) -> Option<Ipv4Addr>,
{
    let origin = profile.origin;
    let status = match &profile.address {
        None => Err(RoutingError::NoServerAddress { origin }),
        Some(address) => match resolve(address) {
            None => Err(RoutingError::Unresolvable {
                address: address.clone(),
                origin,
            }),
            Some(server) if !is_local(config, server) => {
                Err(RoutingError::ServerNotLocal { server, origin })
            }
            Some(server) => Ok(SocketAddrV4::new(server, profile.port)),
        },
    };

    match &status {
        // Profiles without an address only fail once something routes to them
        Err(RoutingError::NoServerAddress { .. }) => {
            debug!("No SOCKS server configured for {}", origin)
        }
        Err(err) => error!("{}", err),
        Ok(_) => {}
    }
    status
}

/// Resolve a server name to its first IPv4 address
pub fn resolve_ipv4(address: &str) -> Option<Ipv4Addr> {
    if let Ok(ip) = address.parse() {
        return Some(ip);
    }

    (address, 0)
        .to_socket_addrs()
        .ok()?
        .find_map(|addr| match addr {
            SocketAddr::V4(addr) => Some(*addr.ip()),
            SocketAddr::V6(_) => None,
        })
}
