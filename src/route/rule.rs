//! Network rules
//!
//! A rule is an IPv4 subnet with an optional inclusive port range, written
//! `ip[:port[-port]]/mask` in configuration files. The mask may be given in
//! dotted-quad form or as a prefix length.

use crate::error::RuleError;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Subnet plus optional port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkRule {
    base_ip: Ipv4Addr,
    mask: Ipv4Addr,
    port_low: u16,
    port_high: u16,
}

impl NetworkRule {
    /// Create a rule covering every port of `base_ip/mask`
    ///
    /// Fails if `base_ip` has bits set outside the mask.
    pub fn new(base_ip: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, RuleError> {
        if u32::from(base_ip) & u32::from(mask) != u32::from(base_ip) {
            return Err(RuleError::HostBitsSet { ip: base_ip, mask });
        }

        Ok(Self {
            base_ip,
            mask,
            port_low: 0,
            port_high: 0,
        })
    }

    /// The loopback network `127.0.0.0/8`
    pub const fn loopback() -> Self {
        Self {
            base_ip: Ipv4Addr::new(127, 0, 0, 0),
            mask: Ipv4Addr::new(255, 0, 0, 0),
            port_low: 0,
            port_high: 0,
        }
    }

    /// Restrict the rule to the inclusive range `low..=high`
    pub fn with_ports(mut self, low: u16, high: u16) -> Result<Self, RuleError> {
        if low == 0 {
            return Err(RuleError::InvalidStartPort(low.to_string()));
        }
        if high == 0 {
            return Err(RuleError::InvalidEndPort(high.to_string()));
        }
        if high < low {
            return Err(RuleError::InvertedPortRange { low, high });
        }

        self.port_low = low;
        self.port_high = high;
        Ok(self)
    }

    /// Base address of the subnet
    pub fn base_ip(&self) -> Ipv4Addr {
        self.base_ip
    }

    /// Subnet mask
    pub fn mask(&self) -> Ipv4Addr {
        self.mask
    }

    /// Inclusive port range, `None` when every port matches
    pub fn ports(&self) -> Option<(u16, u16)> {
        (self.port_low != 0).then_some((self.port_low, self.port_high))
    }

    /// Whether `ip` lies inside the subnet, ignoring ports
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & u32::from(self.mask) == u32::from(self.base_ip) & u32::from(self.mask)
    }

    /// Whether the endpoint `ip:port` is covered by this rule
    pub fn matches(&self, ip: Ipv4Addr, port: u16) -> bool {
        self.contains(ip)
            && (self.port_low == 0 || (self.port_low..=self.port_high).contains(&port))
    }
}

impl FromStr for NetworkRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (endpoint, mask) = s
            .split_once('/')
            .filter(|(endpoint, mask)| !endpoint.is_empty() && !mask.contains('/'))
            .ok_or_else(|| RuleError::Malformed(s.to_string()))?;

        let (ip, ports) = match endpoint.split_once(':') {
            Some((ip, ports)) => (ip, Some(ports)),
            None => (endpoint, None),
        };

        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|_| RuleError::InvalidIp(ip.to_string()))?;
        let rule = NetworkRule::new(ip, parse_mask(mask)?)?;

        match ports {
            None => Ok(rule),
            Some(ports) => {
                let (low, high) = match ports.split_once('-') {
                    Some((low, high)) => (low, Some(high)),
                    None => (ports, None),
                };
                let low = parse_port(low).ok_or_else(|| RuleError::InvalidStartPort(low.to_string()))?;
                let high = match high {
                    Some(high) => {
                        parse_port(high).ok_or_else(|| RuleError::InvalidEndPort(high.to_string()))?
                    }
                    None => low,
                };
                rule.with_ports(low, high)
            }
        }
    }
}

impl fmt::Display for NetworkRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_ip)?;
        match self.ports() {
            Some((low, high)) if low == high => write!(f, ":{}", low)?,
            Some((low, high)) => write!(f, ":{}-{}", low, high)?,
            None => {}
        }
        write!(f, "/{}", self.mask)
    }
}

fn parse_mask(mask: &str) -> Result<Ipv4Addr, RuleError> {
    if mask.contains('.') {
        return mask
            .parse()
            .map_err(|_| RuleError::InvalidMask(mask.to_string()));
    }

    match mask.parse::<u8>() {
        Ok(0) => Ok(Ipv4Addr::UNSPECIFIED),
        Ok(prefix @ 1..=32) => Ok(Ipv4Addr::from(u32::MAX << (32 - u32::from(prefix)))),
        _ => Err(RuleError::InvalidMask(mask.to_string())),
    }
}

fn parse_port(port: &str) -> Option<u16> {
    port.parse::<u16>().ok().filter(|port| *port != 0)
}
