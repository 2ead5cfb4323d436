//! SOCKS negotiation state machine
//!
//! A session connects to its SOCKS server and walks through the SOCKS4 or
//! SOCKS5 handshake for one destination. [`SocksSession::step`] never
//! blocks: it advances as far as the socket allows and reports what
//! readiness it is waiting for.
//!
//! ```text
//! Unstarted -> Connecting -> Connected
//!   v4: Sending(Socks4Connect) -> Sent -> Receiving -> Received -> Done
//!   v5: Sending(MethodSelection) -> Sent -> Receiving -> Received
//!         no-auth:   -> Sending(Socks5Connect) ... -> Done
//!         user/pass: -> Sending(Authentication) ... -> Sending(Socks5Connect) ... -> Done
//! ```
//!
//! Any failure moves the session to `Failed`. `Done` and `Failed` are final.

use super::consts::*;
use super::wire::{self, AuthMethod};
use super::Identity;
use crate::config::{ServerProfile, SocksVersion};
use crate::error::{ProtocolError, SessionError};
use crate::readiness::Interest;
use crate::transport::{ConnectProgress, SocketHandle, SocketIo};
use bytes::Bytes;
use std::fmt;
use std::io;
use std::net::SocketAddrV4;
use tracing::{debug, trace, warn};

/// Pure transitions allowed between two I/O operations
pub const MAX_TRANSITIONS: usize = 16;

/// A request/reply pair of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// SOCKS4 CONNECT
    Socks4Connect,
    /// SOCKS5 method selection
    MethodSelection,
    /// SOCKS5 username/password
    Authentication,
    /// SOCKS5 CONNECT
    Socks5Connect,
}

impl Exchange {
    /// Length of the reply to this exchange
    pub fn reply_len(self) -> usize {
        match self {
            Exchange::Socks4Connect => SOCKS4_REPLY_LEN,
            Exchange::MethodSelection => SOCKS5_METHOD_REPLY_LEN,
            Exchange::Authentication => SOCKS5_AUTH_REPLY_LEN,
            Exchange::Socks5Connect => SOCKS5_CONNECT_REPLY_LEN,
        }
    }
}

/// Reply bytes collected so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyBuffer {
    bytes: [u8; MAX_REPLY_LEN],
    filled: usize,
    expected: usize,
}

impl ReplyBuffer {
    fn new(expected: usize) -> Self {
        Self {
            bytes: [0; MAX_REPLY_LEN],
            filled: 0,
            expected,
        }
    }

    /// Bytes received
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.filled]
    }

    fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.filled..self.expected]
    }

    fn is_complete(&self) -> bool {
        self.filled == self.expected
    }
}

/// Where a session is in the handshake
#[derive(Debug, Clone)]
pub enum SessionState {
    /// Created, connect not issued yet
    Unstarted,
    /// Waiting for the connection to the server
    Connecting,
    /// Connected to the server, nothing sent
    Connected,
    /// Writing a request
    Sending {
        /// Exchange the request belongs to
        exchange: Exchange,
        /// Complete request
        request: Bytes,
        /// Bytes written so far
        written: usize,
    },
    /// Request fully written
    Sent(Exchange),
    /// Reading a reply
    Receiving {
        /// Exchange the reply belongs to
        exchange: Exchange,
        /// Reply bytes so far
        reply: ReplyBuffer,
    },
    /// Reply fully read, not yet interpreted
    Received {
        /// Exchange the reply belongs to
        exchange: Exchange,
        /// Complete reply
        reply: ReplyBuffer,
    },
    /// Negotiation succeeded
    Done,
    /// Negotiation failed
    Failed(SessionError),
}

impl SessionState {
    /// Whether the state is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unstarted => write!(f, "unstarted"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Sending { exchange, .. } => write!(f, "sending {:?}", exchange),
            SessionState::Sent(exchange) => write!(f, "sent {:?}", exchange),
            SessionState::Receiving { exchange, .. } => write!(f, "receiving {:?}", exchange),
            SessionState::Received { exchange, .. } => write!(f, "received {:?}", exchange),
            SessionState::Done => write!(f, "done"),
            SessionState::Failed(_) => write!(f, "failed"),
        }
    }
}

/// Result of a call to [`SocksSession::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Waiting for the socket to become ready
    Blocked(Interest),
    /// The session reached `Done` or `Failed`
    Finished,
}

enum Advance {
    // State changed without I/O
    Transition,
    // Bytes were moved
    Io,
    Blocked(Interest),
    Finished,
}

/// One SOCKS negotiation on one socket
#[derive(Debug)]
pub struct SocksSession<'a> {
    handle: SocketHandle,
    destination: SocketAddrV4,
    profile: &'a ServerProfile,
    server: SocketAddrV4,
    identity: Identity,
    state: SessionState,
}

impl<'a> SocksSession<'a> {
    /// Create a session that will reach `destination` through `server`
    pub fn new(
        handle: SocketHandle,
        destination: SocketAddrV4,
        profile: &'a ServerProfile,
        server: SocketAddrV4,
        identity: Identity,
    ) -> Self {
        Self {
            handle,
            destination,
            profile,
            server,
            identity,
            state: SessionState::Unstarted,
        }
    }

    /// Socket the negotiation runs on
    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// Final destination
    pub fn destination(&self) -> SocketAddrV4 {
        self.destination
    }

    /// SOCKS server endpoint
    pub fn server(&self) -> SocketAddrV4 {
        self.server
    }

    /// Profile the server was picked from
    pub fn profile(&self) -> &'a ServerProfile {
        self.profile
    }

    /// Current state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Whether the negotiation is over
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Outcome of a finished negotiation
    pub fn result(&self) -> Option<Result<(), SessionError>> {
        match &self.state {
            SessionState::Done => Some(Ok(())),
            SessionState::Failed(err) => Some(Err(err.clone())),
            _ => None,
        }
    }

    /// Readiness the session is waiting for, if any
    pub fn interest(&self) -> Option<Interest> {
        match self.state {
            SessionState::Connecting | SessionState::Sending { .. } => Some(Interest::WRITE),
            SessionState::Receiving { .. } => Some(Interest::READ),
            _ => None,
        }
    }

    /// Advance the negotiation as far as possible without blocking
    pub fn step<S: SocketIo + ?Sized>(&mut self, io: &mut S) -> Progress {
        let mut transitions = 0;

        loop {
            match self.advance(io) {
                Ok(Advance::Transition) => {
                    transitions += 1;
                    if transitions > MAX_TRANSITIONS {
                        self.fail(SessionError::Stalled(transitions));
                        return Progress::Finished;
                    }
                }
                Ok(Advance::Io) => transitions = 0,
                Ok(Advance::Blocked(interest)) => return Progress::Blocked(interest),
                Ok(Advance::Finished) => return Progress::Finished,
                Err(err) => {
                    self.fail(err);
                    return Progress::Finished;
                }
            }
        }
    }

    fn fail(&mut self, err: SessionError) {
        warn!(
            "SOCKS negotiation on {} for {} via {} failed in state {}: {}",
            self.handle, self.destination, self.server, self.state, err
        );
        self.state = SessionState::Failed(err);
    }

    fn enter(&mut self, state: SessionState) {
        debug!("Session on {}: {} -> {}", self.handle, self.state, state);
        self.state = state;
    }

    fn sending(exchange: Exchange, request: Bytes) -> SessionState {
        SessionState::Sending {
            exchange,
            request,
            written: 0,
        }
    }

    fn advance<S: SocketIo + ?Sized>(&mut self, io: &mut S) -> Result<Advance, SessionError> {
        let handle = self.handle;

        match &mut self.state {
            SessionState::Done | SessionState::Failed(_) => Ok(Advance::Finished),

            SessionState::Unstarted => match io.connect(handle, self.server) {
                Ok(ConnectProgress::Established) => {
                    self.enter(SessionState::Connected);
                    Ok(Advance::Transition)
                }
                Ok(ConnectProgress::InProgress) => {
                    self.enter(SessionState::Connecting);
                    Ok(Advance::Blocked(Interest::WRITE))
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Advance::Transition),
                Err(e) => Err(e.into()),
            },

            SessionState::Connecting => match io.connect_status(handle)? {
                ConnectProgress::Established => {
                    self.enter(SessionState::Connected);
                    Ok(Advance::Transition)
                }
                ConnectProgress::InProgress => Ok(Advance::Blocked(Interest::WRITE)),
            },

            SessionState::Connected => {
                let next = match self.profile.version {
                    SocksVersion::V4 => Self::sending(
                        Exchange::Socks4Connect,
                        wire::socks4_connect_request(self.destination, &self.identity.user_id)?,
                    ),
                    SocksVersion::V5 => {
                        Self::sending(Exchange::MethodSelection, wire::socks5_method_request())
                    }
                };
                self.enter(next);
                Ok(Advance::Transition)
            }

            SessionState::Sending {
                exchange,
                request,
                written,
            } => match io.send(handle, &request[*written..]) {
                Ok(0) => Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    *written += n;
                    trace!("Session on {}: wrote {}/{} bytes", handle, written, request.len());
                    if *written == request.len() {
                        let exchange = *exchange;
                        self.enter(SessionState::Sent(exchange));
                    }
                    Ok(Advance::Io)
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    Ok(Advance::Blocked(Interest::WRITE))
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Advance::Transition),
                Err(e) => Err(e.into()),
            },

            SessionState::Sent(exchange) => {
                let exchange = *exchange;
                self.enter(SessionState::Receiving {
                    exchange,
                    reply: ReplyBuffer::new(exchange.reply_len()),
                });
                Ok(Advance::Transition)
            }

            SessionState::Receiving { exchange, reply } => {
                match io.recv(handle, reply.unfilled_mut()) {
                    Ok(0) => Err(ProtocolError::ShortReply {
                        expected: reply.expected,
                        received: reply.filled,
                    }
                    .into()),
                    Ok(n) => {
                        reply.filled += n;
                        trace!(
                            "Session on {}: read {}/{} bytes",
                            handle,
                            reply.filled,
                            reply.expected
                        );
                        if reply.is_complete() {
                            let (exchange, reply) = (*exchange, *reply);
                            self.enter(SessionState::Received { exchange, reply });
                        }
                        Ok(Advance::Io)
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        Ok(Advance::Blocked(Interest::READ))
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Advance::Transition),
                    Err(e) => Err(e.into()),
                }
            }

            SessionState::Received { exchange, reply } => {
                let (exchange, reply) = (*exchange, *reply);
                let next = self.interpret(exchange, reply.as_slice())?;
                if matches!(next, SessionState::Done) {
                    debug!(
                        "SOCKS negotiation on {} for {} via {} complete",
                        self.handle, self.destination, self.server
                    );
                }
                self.enter(next);
                Ok(Advance::Transition)
            }
        }
    }

    fn interpret(&self, exchange: Exchange, reply: &[u8]) -> Result<SessionState, SessionError> {
        match exchange {
            Exchange::Socks4Connect => {
                wire::parse_socks4_reply(reply)?;
                Ok(SessionState::Done)
            }
            Exchange::MethodSelection => match wire::parse_method_reply(reply)? {
                AuthMethod::NoAuth => Ok(Self::sending(
                    Exchange::Socks5Connect,
                    wire::socks5_connect_request(self.destination),
                )),
                AuthMethod::Password => {
                    let (username, password) = self.identity.credentials()?;
                    Ok(Self::sending(
                        Exchange::Authentication,
                        wire::socks5_auth_request(username, password)?,
                    ))
                }
            },
            Exchange::Authentication => {
                wire::parse_auth_reply(reply)?;
                Ok(Self::sending(
                    Exchange::Socks5Connect,
                    wire::socks5_connect_request(self.destination),
                ))
            }
            Exchange::Socks5Connect => {
                wire::parse_connect_reply(reply)?;
                Ok(SessionState::Done)
            }
        }
    }
}
