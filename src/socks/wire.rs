//! SOCKS client messages
//!
//! Builders for every request a session sends and interpreters for every
//! reply it waits for. Replies are handed over complete, the session
//! collects exactly the number of bytes each one has.

use super::consts::*;
use super::CredentialField;
use crate::error::{ProtocolError, SessionError, Socks4ReplyCode, Socks5ReplyCode};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddrV4;

/// Method chosen by a SOCKS5 server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication
    NoAuth,
    /// Username/password (RFC 1929)
    Password,
}

/// Build a SOCKS4 CONNECT request
///
/// ```text
/// +----+----+---------+--------+--------+------+
/// | VN | CD | DSTPORT | DSTIP  | USERID | NULL |
/// +----+----+---------+--------+--------+------+
/// | 1  | 1  |    2    |   4    |  var   |  1   |
/// +----+----+---------+--------+--------+------+
/// ```
pub fn socks4_connect_request(
    destination: SocketAddrV4,
    user_id: &str,
) -> Result<Bytes, SessionError> {
    let limit = SESSION_BUFFER_SIZE - 9;
    if user_id.len() > limit {
        return Err(SessionError::CredentialTooLong {
            field: CredentialField::UserId,
            len: user_id.len(),
            limit,
        });
    }

    let mut buf = BytesMut::with_capacity(9 + user_id.len());
    buf.put_u8(SOCKS4_VERSION);
    buf.put_u8(SOCKS4_CMD_CONNECT);
    buf.put_u16(destination.port());
    buf.put_slice(&destination.ip().octets());
    buf.put_slice(user_id.as_bytes());
    buf.put_u8(0);
    Ok(buf.freeze())
}

/// Build the SOCKS5 method selection request
///
/// Both no-auth and username/password are always offered.
pub fn socks5_method_request() -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + SOCKS5_OFFERED_METHODS.len());
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(SOCKS5_OFFERED_METHODS.len() as u8);
    buf.put_slice(&SOCKS5_OFFERED_METHODS);
    buf.freeze()
}

/// Build a SOCKS5 username/password request
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
///
/// Nothing is built if either credential, or the request as a whole, does
/// not fit.
pub fn socks5_auth_request(username: &str, password: &str) -> Result<Bytes, SessionError> {
    check_length(CredentialField::Username, username, MAX_CREDENTIAL_LEN)?;
    let room = SESSION_BUFFER_SIZE - 3 - username.len();
    check_length(CredentialField::Password, password, MAX_CREDENTIAL_LEN.min(room))?;

    let mut buf = BytesMut::with_capacity(3 + username.len() + password.len());
    buf.put_u8(SOCKS5_AUTH_VERSION);
    buf.put_u8(username.len() as u8);
    buf.put_slice(username.as_bytes());
    buf.put_u8(password.len() as u8);
    buf.put_slice(password.as_bytes());
    Ok(buf.freeze())
}

/// Build a SOCKS5 CONNECT request for an IPv4 destination
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   |    4     |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub fn socks5_connect_request(destination: SocketAddrV4) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(SOCKS5_CMD_TCP_CONNECT);
    buf.put_u8(SOCKS5_RESERVED);
    buf.put_u8(SOCKS5_ADDR_TYPE_IPV4);
    buf.put_slice(&destination.ip().octets());
    buf.put_u16(destination.port());
    buf.freeze()
}

/// Interpret a SOCKS4 reply
pub fn parse_socks4_reply(reply: &[u8]) -> Result<(), ProtocolError> {
    let status = status_byte(reply, SOCKS4_REPLY_LEN)?;
    match Socks4ReplyCode::try_from(status)? {
        Socks4ReplyCode::Granted => Ok(()),
        code => Err(ProtocolError::Socks4Rejected(code)),
    }
}

/// Interpret a SOCKS5 method selection reply
pub fn parse_method_reply(reply: &[u8]) -> Result<AuthMethod, ProtocolError> {
    match status_byte(reply, SOCKS5_METHOD_REPLY_LEN)? {
        SOCKS5_AUTH_METHOD_NONE => Ok(AuthMethod::NoAuth),
        SOCKS5_AUTH_METHOD_PASSWORD => Ok(AuthMethod::Password),
        SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE => Err(ProtocolError::NoAcceptableMethod),
        other => Err(ProtocolError::UnsupportedMethod(other)),
    }
}

/// Interpret a SOCKS5 username/password reply
pub fn parse_auth_reply(reply: &[u8]) -> Result<(), ProtocolError> {
    match status_byte(reply, SOCKS5_AUTH_REPLY_LEN)? {
        SOCKS5_AUTH_SUCCEEDED => Ok(()),
        status => Err(ProtocolError::AuthRejected(status)),
    }
}

/// Interpret a SOCKS5 CONNECT reply
///
/// Only the status is looked at, the bound address is ignored.
pub fn parse_connect_reply(reply: &[u8]) -> Result<(), ProtocolError> {
    let status = status_byte(reply, SOCKS5_CONNECT_REPLY_LEN)?;
    match Socks5ReplyCode::try_from(status)? {
        Socks5ReplyCode::Succeeded => Ok(()),
        code => Err(ProtocolError::Socks5Failed(code)),
    }
}

/// Second byte of a reply of the given length
fn status_byte(reply: &[u8], expected: usize) -> Result<u8, ProtocolError> {
    if reply.len() < expected {
        return Err(ProtocolError::ShortReply {
            expected,
            received: reply.len(),
        });
    }
    Ok(reply[1])
}

fn check_length(field: CredentialField, value: &str, limit: usize) -> Result<(), SessionError> {
    if value.len() > limit {
        return Err(SessionError::CredentialTooLong {
            field,
            len: value.len(),
            limit,
        });
    }
    Ok(())
}
