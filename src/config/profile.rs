//! Server profiles and the routing configuration
//!
//! Both configuration front-ends feed a [`ConfigBuilder`], which enforces
//! the directive rules and fills in defaults once the input is exhausted.
//! The resulting [`RoutingConfig`] is immutable.

use crate::error::ConfigError;
use crate::route::NetworkRule;
use std::fmt;
use tracing::warn;

/// Default SOCKS server port
pub const DEFAULT_SERVER_PORT: u16 = 1080;

/// Where a profile or directive came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The top-level default server
    Default,
    /// A line of a directive file (1-based)
    Line(usize),
    /// An entry of the `[[path]]` array in a TOML file (1-based)
    Entry(usize),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Default => write!(f, "default server"),
            Origin::Line(line) => write!(f, "line {}", line),
            Origin::Entry(index) => write!(f, "path #{}", index),
        }
    }
}

/// SOCKS protocol version spoken with a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocksVersion {
    /// SOCKS4
    #[default]
    V4,
    /// SOCKS5
    V5,
}

impl TryFrom<u8> for SocksVersion {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(SocksVersion::V4),
            5 => Ok(SocksVersion::V5),
            other => Err(other),
        }
    }
}

impl From<SocksVersion> for u8 {
    fn from(version: SocksVersion) -> Self {
        match version {
            SocksVersion::V4 => 4,
            SocksVersion::V5 => 5,
        }
    }
}

impl fmt::Display for SocksVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SOCKS{}", u8::from(*self))
    }
}

/// A SOCKS server and the destinations it reaches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerProfile {
    /// Host name or IPv4 address of the server
    pub address: Option<String>,
    /// Server port
    pub port: u16,
    /// Protocol version
    pub version: SocksVersion,
    /// Username for SOCKS5 authentication
    pub default_user: Option<String>,
    /// Password for SOCKS5 authentication
    pub default_pass: Option<String>,
    /// Destinations routed through this server, in declaration order
    pub reach_rules: Vec<NetworkRule>,
    /// Where the profile was declared
    pub origin: Origin,
}

impl ServerProfile {
    /// First reach rule covering `ip:port`
    pub fn reaches(&self, ip: std::net::Ipv4Addr, port: u16) -> Option<&NetworkRule> {
        self.reach_rules.iter().find(|rule| rule.matches(ip, port))
    }
}

impl fmt::Display for ServerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{} {}:{}", self.version, address, self.port)?,
            None => write!(f, "{} <no address>:{}", self.version, self.port)?,
        }
        write!(f, " ({})", self.origin)
    }
}

/// The complete, validated routing configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    default: ServerProfile,
    paths: Vec<ServerProfile>,
    locals: Vec<NetworkRule>,
}

impl RoutingConfig {
    /// Profile used when no path reaches a destination
    pub fn default_server(&self) -> &ServerProfile {
        &self.default
    }

    /// Path profiles in declaration order
    pub fn paths(&self) -> &[ServerProfile] {
        &self.paths
    }

    /// Networks reached directly, as configured
    pub fn locals(&self) -> &[NetworkRule] {
        &self.locals
    }

    /// Every profile in evaluation order, the default last
    pub fn profiles(&self) -> impl Iterator<Item = &ServerProfile> {
        self.paths.iter().chain(std::iter::once(&self.default))
    }
}

/// A single configuration statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `server`
    Server(String),
    /// `server_port`
    ServerPort(u16),
    /// `server_type`
    ServerType(SocksVersion),
    /// `default_user`
    DefaultUser(String),
    /// `default_pass`
    DefaultPass(String),
    /// `local`
    Local(NetworkRule),
    /// `reaches`
    Reaches(NetworkRule),
}

#[derive(Debug, Clone)]
struct ProfileDraft {
    address: Option<String>,
    port: Option<u16>,
    version: Option<SocksVersion>,
    default_user: Option<String>,
    default_pass: Option<String>,
    reach_rules: Vec<NetworkRule>,
    origin: Origin,
}

impl ProfileDraft {
    fn new(origin: Origin) -> Self {
        Self {
            address: None,
            port: None,
            version: None,
            default_user: None,
            default_pass: None,
            reach_rules: Vec::new(),
            origin,
        }
    }

    fn finish(self) -> ServerProfile {
        let version = self.version.unwrap_or_default();
        let (default_user, default_pass) = match version {
            SocksVersion::V4 if self.default_user.is_some() || self.default_pass.is_some() => {
                warn!(
                    "Default username/password specified for SOCKS4 server ({}), ignoring",
                    self.origin
                );
                (None, None)
            }
            _ => (self.default_user, self.default_pass),
        };

        ServerProfile {
            address: self.address,
            port: self.port.unwrap_or(DEFAULT_SERVER_PORT),
            version,
            default_user,
            default_pass,
            reach_rules: self.reach_rules,
            origin: self.origin,
        }
    }
}

fn set_once<T>(
    slot: &mut Option<T>,
    value: T,
    directive: &'static str,
    profile: Origin,
    at: Origin,
) -> Result<(), ConfigError> {
    if slot.is_some() {
        return Err(ConfigError::Duplicate {
            at,
            directive,
            profile,
        });
    }
    *slot = Some(value);
    Ok(())
}

/// Append-only builder for [`RoutingConfig`]
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    default: ProfileDraft,
    paths: Vec<ProfileDraft>,
    locals: Vec<NetworkRule>,
    open_path: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            default: ProfileDraft::new(Origin::Default),
            paths: Vec::new(),
            locals: Vec::new(),
            open_path: false,
        }
    }

    /// Start a path block; directives apply to it until [`end_path`](Self::end_path)
    pub fn begin_path(&mut self, at: Origin) -> Result<(), ConfigError> {
        if let Some(opened) = self.current_path_origin() {
            return Err(ConfigError::NestedPath { at, opened });
        }
        self.paths.push(ProfileDraft::new(at));
        self.open_path = true;
        Ok(())
    }

    /// Close the current path block
    pub fn end_path(&mut self, at: Origin) -> Result<(), ConfigError> {
        if !self.open_path {
            return Err(ConfigError::UnmatchedClose { at });
        }
        self.open_path = false;
        Ok(())
    }

    /// Apply a directive to the current profile
    pub fn apply(&mut self, at: Origin, directive: Directive) -> Result<(), ConfigError> {
        let in_path = self.open_path;
        let profile = match self.paths.last_mut() {
            Some(path) if in_path => path,
            _ => &mut self.default,
        };
        let origin = profile.origin;

        match directive {
            Directive::Server(address) => {
                set_once(&mut profile.address, address, "server", origin, at)
            }
            Directive::ServerPort(port) => {
                set_once(&mut profile.port, port, "server_port", origin, at)
            }
            Directive::ServerType(version) => {
                set_once(&mut profile.version, version, "server_type", origin, at)
            }
            Directive::DefaultUser(user) => {
                set_once(&mut profile.default_user, user, "default_user", origin, at)
            }
            Directive::DefaultPass(pass) => {
                set_once(&mut profile.default_pass, pass, "default_pass", origin, at)
            }
            Directive::Local(rule) => {
                if in_path {
                    return Err(ConfigError::LocalInPath { at });
                }
                if rule.ports().is_some() {
                    return Err(ConfigError::PortInLocal {
                        at,
                        value: rule.to_string(),
                    });
                }
                self.locals.push(rule);
                Ok(())
            }
            Directive::Reaches(rule) => {
                if !in_path {
                    return Err(ConfigError::ReachesOutsidePath { at });
                }
                profile.reach_rules.push(rule);
                Ok(())
            }
        }
    }

    /// Finish the configuration, applying defaults
    pub fn build(self) -> Result<RoutingConfig, ConfigError> {
        if let Some(opened) = self.current_path_origin() {
            return Err(ConfigError::UnclosedPath { opened });
        }

        Ok(RoutingConfig {
            default: self.default.finish(),
            paths: self.paths.into_iter().map(ProfileDraft::finish).collect(),
            locals: self.locals,
        })
    }

    fn current_path_origin(&self) -> Option<Origin> {
        if self.open_path {
            self.paths.last().map(|path| path.origin)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(s: &str) -> NetworkRule {
        s.parse().unwrap()
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(Origin::Default.to_string(), "default server");
        assert_eq!(Origin::Line(12).to_string(), "line 12");
        assert_eq!(Origin::Entry(2).to_string(), "path #2");
    }

    #[test]
    fn test_socks_version_conversions() {
        assert_eq!(SocksVersion::try_from(4), Ok(SocksVersion::V4));
        assert_eq!(SocksVersion::try_from(5), Ok(SocksVersion::V5));
        assert_eq!(SocksVersion::try_from(6), Err(6));
        assert_eq!(u8::from(SocksVersion::V5), 5);
        assert_eq!(SocksVersion::V4.to_string(), "SOCKS4");
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConfigBuilder::new().build().unwrap();
        let default = config.default_server();
        assert_eq!(default.address, None);
        assert_eq!(default.port, DEFAULT_SERVER_PORT);
        assert_eq!(default.version, SocksVersion::V4);
        assert!(default.reach_rules.is_empty());
        assert!(config.paths().is_empty());
    }

    #[test]
    fn test_path_profiles_keep_declaration_order() {
        let mut builder = ConfigBuilder::new();
        builder
            .apply(Origin::Line(1), Directive::Server("10.0.0.1".into()))
            .unwrap();
        builder.begin_path(Origin::Line(2)).unwrap();
        builder
            .apply(Origin::Line(3), Directive::Server("10.0.0.2".into()))
            .unwrap();
        builder
            .apply(Origin::Line(4), Directive::Reaches(rule("1.0.0.0/8")))
            .unwrap();
        builder.end_path(Origin::Line(5)).unwrap();
        builder.begin_path(Origin::Line(6)).unwrap();
        builder
            .apply(Origin::Line(7), Directive::Server("10.0.0.3".into()))
            .unwrap();
        builder.end_path(Origin::Line(8)).unwrap();

        let config = builder.build().unwrap();
        let addresses: Vec<_> = config
            .profiles()
            .map(|p| p.address.clone().unwrap())
            .collect();
        assert_eq!(addresses, vec!["10.0.0.2", "10.0.0.3", "10.0.0.1"]);
        assert_eq!(config.paths()[0].origin, Origin::Line(2));
    }

    #[test]
    fn test_duplicate_directive_rejected() {
        let mut builder = ConfigBuilder::new();
        builder
            .apply(Origin::Line(1), Directive::ServerPort(1080))
            .unwrap();
        let err = builder
            .apply(Origin::Line(2), Directive::ServerPort(1081))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Duplicate {
                at: Origin::Line(2),
                directive: "server_port",
                profile: Origin::Default,
            }
        );
    }

    #[test]
    fn test_same_directive_allowed_in_different_profiles() {
        let mut builder = ConfigBuilder::new();
        builder
            .apply(Origin::Line(1), Directive::Server("10.0.0.1".into()))
            .unwrap();
        builder.begin_path(Origin::Line(2)).unwrap();
        builder
            .apply(Origin::Line(3), Directive::Server("10.0.0.2".into()))
            .unwrap();
        builder.end_path(Origin::Line(4)).unwrap();
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_block_structure_errors() {
        let mut builder = ConfigBuilder::new();
        assert_eq!(
            builder.end_path(Origin::Line(1)),
            Err(ConfigError::UnmatchedClose { at: Origin::Line(1) })
        );

        builder.begin_path(Origin::Line(2)).unwrap();
        assert_eq!(
            builder.begin_path(Origin::Line(3)),
            Err(ConfigError::NestedPath {
                at: Origin::Line(3),
                opened: Origin::Line(2),
            })
        );
        assert_eq!(
            builder.build().unwrap_err(),
            ConfigError::UnclosedPath {
                opened: Origin::Line(2)
            }
        );
    }

    #[test]
    fn test_local_and_reaches_placement() {
        let mut builder = ConfigBuilder::new();
        assert_eq!(
            builder.apply(Origin::Line(1), Directive::Reaches(rule("1.0.0.0/8"))),
            Err(ConfigError::ReachesOutsidePath { at: Origin::Line(1) })
        );
        assert!(matches!(
            builder.apply(Origin::Line(2), Directive::Local(rule("10.0.0.0:80/8"))),
            Err(ConfigError::PortInLocal { .. })
        ));
        builder
            .apply(Origin::Line(3), Directive::Local(rule("10.0.0.0/8")))
            .unwrap();

        builder.begin_path(Origin::Line(4)).unwrap();
        assert_eq!(
            builder.apply(Origin::Line(5), Directive::Local(rule("192.168.0.0/16"))),
            Err(ConfigError::LocalInPath { at: Origin::Line(5) })
        );
        builder.end_path(Origin::Line(6)).unwrap();

        let config = builder.build().unwrap();
        assert_eq!(config.locals(), &[rule("10.0.0.0/8")]);
    }

    #[test]
    fn test_socks4_credentials_ignored() {
        let mut builder = ConfigBuilder::new();
        builder
            .apply(Origin::Line(1), Directive::DefaultUser("alice".into()))
            .unwrap();
        builder
            .apply(Origin::Line(2), Directive::DefaultPass("secret".into()))
            .unwrap();
        let config = builder.build().unwrap();
        assert_eq!(config.default_server().default_user, None);
        assert_eq!(config.default_server().default_pass, None);

        let mut builder = ConfigBuilder::new();
        builder
            .apply(Origin::Line(1), Directive::ServerType(SocksVersion::V5))
            .unwrap();
        builder
            .apply(Origin::Line(2), Directive::DefaultUser("alice".into()))
            .unwrap();
        let config = builder.build().unwrap();
        assert_eq!(config.default_server().default_user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_profile_reaches_first_rule() {
        let profile = ServerProfile {
            address: Some("10.0.0.1".into()),
            port: 1080,
            version: SocksVersion::V5,
            default_user: None,
            default_pass: None,
            reach_rules: vec![rule("1.0.0.0:80/8"), rule("1.2.0.0/16")],
            origin: Origin::Line(1),
        };
        let ip = std::net::Ipv4Addr::new(1, 2, 3, 4);
        assert_eq!(profile.reaches(ip, 80), Some(&profile.reach_rules[0]));
        assert_eq!(profile.reaches(ip, 81), Some(&profile.reach_rules[1]));
        assert_eq!(profile.reaches(std::net::Ipv4Addr::new(2, 0, 0, 1), 80), None);
        assert_eq!(profile.to_string(), "SOCKS5 10.0.0.1:1080 (line 1)");
    }
}
