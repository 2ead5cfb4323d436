//! SOCKS protocol constants
//!
//! Defines the constants needed to speak SOCKS4 and SOCKS5 as a client.

/// SOCKS4 protocol version
pub const SOCKS4_VERSION: u8 = 0x04;

/// SOCKS4 CONNECT command
pub const SOCKS4_CMD_CONNECT: u8 = 0x01;

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// SOCKS5 authentication sub-negotiation version
pub const SOCKS5_AUTH_VERSION: u8 = 0x01;

// Authentication methods
/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
/// Username/password authentication
pub const SOCKS5_AUTH_METHOD_PASSWORD: u8 = 0x02;
/// No acceptable methods
pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;

/// Authentication methods offered, in order of preference
pub const SOCKS5_OFFERED_METHODS: [u8; 2] = [SOCKS5_AUTH_METHOD_NONE, SOCKS5_AUTH_METHOD_PASSWORD];

/// Username/password sub-negotiation success
pub const SOCKS5_AUTH_SUCCEEDED: u8 = 0x00;

/// TCP CONNECT command
pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;

/// IPv4 address
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;

/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

// Reply lengths
/// `VN CD DSTPORT DSTIP`
pub const SOCKS4_REPLY_LEN: usize = 8;
/// `VER METHOD`
pub const SOCKS5_METHOD_REPLY_LEN: usize = 2;
/// `VER STATUS`
pub const SOCKS5_AUTH_REPLY_LEN: usize = 2;
/// `VER REP RSV ATYP BND.ADDR(4) BND.PORT(2)`
pub const SOCKS5_CONNECT_REPLY_LEN: usize = 10;
/// Longest reply a session ever waits for
pub const MAX_REPLY_LEN: usize = SOCKS5_CONNECT_REPLY_LEN;

// Buffer sizes
/// Largest request a session will send
pub const SESSION_BUFFER_SIZE: usize = 512;
/// Maximum username or password length
pub const MAX_CREDENTIAL_LEN: usize = 255;
