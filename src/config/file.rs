//! TOML configuration files
//!
//! ```toml
//! local = ["192.168.0.0/24"]
//!
//! [server]
//! address = "192.168.0.1"
//! type = 5
//!
//! [[path]]
//! address = "192.168.0.2"
//! reaches = ["10.0.0.0/8"]
//! ```

use super::profile::{ConfigBuilder, Directive, Origin, RoutingConfig, SocksVersion};
use crate::error::ConfigError;
use crate::route::NetworkRule;
use serde::{Deserialize, Serialize};

/// Root of a TOML configuration file
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ConfigFile {
    /// Networks reached directly
    #[serde(default)]
    pub local: Vec<String>,

    /// Default server
    #[serde(default)]
    pub server: ServerSection,

    /// Path profiles, evaluated in order
    #[serde(default, rename = "path")]
    pub paths: Vec<PathSection>,
}

/// Settings shared by the default server and paths
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ServerSection {
    /// Host name or IPv4 address
    #[serde(default)]
    pub address: Option<String>,

    /// Server port
    #[serde(default)]
    pub port: Option<u16>,

    /// SOCKS version (4 or 5)
    #[serde(default, rename = "type")]
    pub version: Option<u8>,

    /// Username for SOCKS5 authentication
    #[serde(default)]
    pub default_user: Option<String>,

    /// Password for SOCKS5 authentication
    #[serde(default)]
    pub default_pass: Option<String>,
}

/// A `[[path]]` entry
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PathSection {
    /// Server settings
    #[serde(flatten)]
    pub server: ServerSection,

    /// Destinations reached through this server
    #[serde(default)]
    pub reaches: Vec<String>,
}

impl ConfigFile {
    /// Validate the file and build the routing configuration
    pub fn into_config(self) -> Result<RoutingConfig, ConfigError> {
        let mut builder = ConfigBuilder::new();

        for local in &self.local {
            builder.apply(Origin::Default, Directive::Local(parse_rule(Origin::Default, local)?))?;
        }
        apply_server(&mut builder, Origin::Default, self.server)?;

        for (index, path) in self.paths.into_iter().enumerate() {
            let at = Origin::Entry(index + 1);
            builder.begin_path(at)?;
            for reach in &path.reaches {
                builder.apply(at, Directive::Reaches(parse_rule(at, reach)?))?;
            }
            apply_server(&mut builder, at, path.server)?;
            builder.end_path(at)?;
        }

        builder.build()
    }
}

fn apply_server(
    builder: &mut ConfigBuilder,
    at: Origin,
    server: ServerSection,
) -> Result<(), ConfigError> {
    if let Some(address) = server.address {
        builder.apply(at, Directive::Server(address))?;
    }
    if let Some(port) = server.port {
        if port == 0 {
            return Err(ConfigError::InvalidPort {
                at,
                value: port.to_string(),
            });
        }
        builder.apply(at, Directive::ServerPort(port))?;
    }
    if let Some(version) = server.version {
        let version =
            SocksVersion::try_from(version).map_err(|value| ConfigError::InvalidServerType {
                at,
                value: value.to_string(),
            })?;
        builder.apply(at, Directive::ServerType(version))?;
    }
    if let Some(user) = server.default_user {
        builder.apply(at, Directive::DefaultUser(user))?;
    }
    if let Some(pass) = server.default_pass {
        builder.apply(at, Directive::DefaultPass(pass))?;
    }
    Ok(())
}

fn parse_rule(at: Origin, value: &str) -> Result<NetworkRule, ConfigError> {
    value
        .parse()
        .map_err(|source| ConfigError::InvalidRule { at, source })
}
