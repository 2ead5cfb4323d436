//! Classic `tsocks.conf` style directive files
//!
//! ```text
//! # Proxy everything through the local gateway, except the LAN
//! local = 192.168.0.0/255.255.255.0
//! server = 192.168.0.1
//! server_type = 5
//!
//! path {
//!     reaches = 10.0.0.0/8
//!     server = 192.168.0.2
//! }
//! ```
//!
//! Any token starting with `#` ends the line.

use super::profile::{ConfigBuilder, Directive, Origin, RoutingConfig, SocksVersion};
use crate::error::ConfigError;
use crate::route::NetworkRule;

/// Parse a directive file into a routing configuration
///
/// The first invalid line aborts parsing.
pub fn parse_directives(content: &str) -> Result<RoutingConfig, ConfigError> {
    let mut builder = ConfigBuilder::new();

    for (index, line) in content.lines().enumerate() {
        handle_line(&mut builder, Origin::Line(index + 1), line)?;
    }

    builder.build()
}

fn handle_line(builder: &mut ConfigBuilder, at: Origin, line: &str) -> Result<(), ConfigError> {
    let words: Vec<&str> = line
        .split([' ', '\t', '\r'])
        .filter(|word| !word.is_empty())
        .take_while(|word| !word.starts_with('#'))
        .collect();

    match words.as_slice() {
        [] => Ok(()),
        ["path", "{"] => builder.begin_path(at),
        ["path", ..] => Err(ConfigError::BadPathOpen { at }),
        ["}"] => builder.end_path(at),
        _ => {
            let text = words.join(" ");
            let (name, value) = split_pair(&text).ok_or_else(|| ConfigError::MalformedPair {
                at,
                text: line.trim().to_string(),
            })?;
            let directive = parse_directive(at, name, value)?;
            builder.apply(at, directive)
        }
    }
}

/// Split `name = value`, where neither side may contain whitespace
fn split_pair(text: &str) -> Option<(&str, &str)> {
    let (name, value) = text.split_once('=')?;
    let (name, value) = (name.trim(), value.trim());
    let single_word = |s: &str| !s.is_empty() && !s.contains([' ', '=']);

    (single_word(name) && single_word(value)).then_some((name, value))
}

/// Interpret the value of a named directive
pub(crate) fn parse_directive(
    at: Origin,
    name: &str,
    value: &str,
) -> Result<Directive, ConfigError> {
    let rule = |value: &str| {
        value
            .parse::<NetworkRule>()
            .map_err(|source| ConfigError::InvalidRule { at, source })
    };

    match name {
        "server" => Ok(Directive::Server(value.to_string())),
        "server_port" => value
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .map(Directive::ServerPort)
            .ok_or_else(|| ConfigError::InvalidPort {
                at,
                value: value.to_string(),
            }),
        "server_type" => value
            .parse::<u8>()
            .ok()
            .and_then(|version| SocksVersion::try_from(version).ok())
            .map(Directive::ServerType)
            .ok_or_else(|| ConfigError::InvalidServerType {
                at,
                value: value.to_string(),
            }),
        "default_user" => Ok(Directive::DefaultUser(value.to_string())),
        "default_pass" => Ok(Directive::DefaultPass(value.to_string())),
        "local" => rule(value).map(Directive::Local),
        "reaches" => rule(value).map(Directive::Reaches),
        _ => Err(ConfigError::UnknownDirective {
            at,
            name: name.to_string(),
        }),
    }
}
