//! Session registry
//!
//! Owns every in-flight SOCKS session, keyed by a monotonically increasing
//! id. A socket has at most one live session at a time. Sessions are
//! serviced in creation order.

use crate::error::{RegistryError, SessionError};
use crate::readiness::Interest;
use crate::route::ProxyRoute;
use crate::socks::{Identity, Progress, SocksSession};
use crate::transport::{SocketHandle, SocketIo};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::SocketAddrV4;
use tracing::debug;

/// Identifier of a SOCKS session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw id
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of advancing a session
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Still negotiating, waiting for the given readiness
    InProgress(Interest),
    /// The proxied connection is ready to use
    Done,
    /// The negotiation failed
    Failed(SessionError),
}

impl StepOutcome {
    /// Whether the negotiation is over
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepOutcome::InProgress(_))
    }
}

/// All live SOCKS sessions
#[derive(Debug)]
pub struct SessionRegistry<'a> {
    sessions: BTreeMap<SessionId, SocksSession<'a>>,
    handles: HashMap<SocketHandle, SessionId>,
    next_id: u64,
}

impl Default for SessionRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> SessionRegistry<'a> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
            handles: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a new negotiation on `handle`
    ///
    /// A finished session still registered on the same socket is discarded.
    pub fn create(
        &mut self,
        handle: SocketHandle,
        destination: SocketAddrV4,
        route: ProxyRoute<'a>,
        identity: Identity,
    ) -> Result<SessionId, RegistryError> {
        self.discard_finished(handle)?;

        let id = SessionId(self.next_id);
        self.next_id += 1;

        self.sessions.insert(
            id,
            SocksSession::new(handle, destination, route.profile, route.server, identity),
        );
        self.handles.insert(handle, id);
        debug!(
            "Created session {} on {} for {} via {}",
            id, handle, destination, route.server
        );
        Ok(id)
    }

    /// Free `handle` of a finished session before it is reused
    ///
    /// Fails with [`RegistryError::HandleBusy`] while a negotiation is still
    /// running on it.
    pub fn discard_finished(&mut self, handle: SocketHandle) -> Result<(), RegistryError> {
        let Some(existing) = self.lookup(handle) else {
            return Ok(());
        };
        let terminal = self
            .sessions
            .get(&existing)
            .map_or(true, SocksSession::is_terminal);
        if !terminal {
            return Err(RegistryError::HandleBusy(handle));
        }
        debug!("Discarding finished session {} on {}", existing, handle);
        self.dispose(existing);
        Ok(())
    }

    /// Advance a session as far as it goes without blocking
    pub fn step<S: SocketIo + ?Sized>(
        &mut self,
        id: SessionId,
        io: &mut S,
    ) -> Result<StepOutcome, RegistryError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(RegistryError::InvalidSession(id))?;

        Ok(match session.step(io) {
            Progress::Blocked(interest) => StepOutcome::InProgress(interest),
            Progress::Finished => match session.result() {
                Some(Err(err)) => StepOutcome::Failed(err),
                _ => StepOutcome::Done,
            },
        })
    }

    /// Remove a session
    pub fn dispose(&mut self, id: SessionId) -> Option<SocksSession<'a>> {
        let session = self.sessions.remove(&id)?;
        if self.handles.get(&session.handle()) == Some(&id) {
            self.handles.remove(&session.handle());
        }
        Some(session)
    }

    /// Remove whatever session runs on a socket that is being closed
    pub fn close_handle(&mut self, handle: SocketHandle) -> Option<SessionId> {
        let id = self.handles.remove(&handle)?;
        self.sessions.remove(&id);
        debug!("Socket {} closed, dropped session {}", handle, id);
        Some(id)
    }

    /// Session running on `handle`
    pub fn lookup(&self, handle: SocketHandle) -> Option<SessionId> {
        self.handles.get(&handle).copied()
    }

    /// Borrow a session
    pub fn get(&self, id: SessionId) -> Option<&SocksSession<'a>> {
        self.sessions.get(&id)
    }

    /// Session ids in creation order
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Sessions in creation order
    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &SocksSession<'a>)> {
        self.sessions.iter().map(|(id, session)| (*id, session))
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
