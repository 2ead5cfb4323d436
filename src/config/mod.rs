//! Configuration module for Socksify
//!
//! Routing configuration can be written either in the classic directive
//! format or in TOML. Both produce the same [`RoutingConfig`].

mod directive;
mod file;
mod profile;

pub use directive::parse_directives;
pub use file::{ConfigFile, PathSection, ServerSection};
pub use profile::{
    ConfigBuilder, Directive, Origin, RoutingConfig, ServerProfile, SocksVersion,
    DEFAULT_SERVER_PORT,
};

use anyhow::{Context, Result};
use std::path::Path;

/// Configuration file used when none is given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/socksify.conf";

/// Load configuration from a file
///
/// Files ending in `.toml` are read as TOML, anything else as directives.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RoutingConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        parse_config(&content)
    } else {
        parse_directives(&content)
            .with_context(|| format!("Invalid configuration in {:?}", path))
    }
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<RoutingConfig> {
    let file: ConfigFile =
        toml::from_str(content).with_context(|| "Failed to parse configuration")?;
    file.into_config()
        .with_context(|| "Invalid configuration")
}
