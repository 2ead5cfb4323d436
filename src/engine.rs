//! Connection attempt engine
//!
//! [`Socksifier`] is the single entry point an interception layer talks
//! to. It mirrors the calls a program makes on a socket: a connect attempt,
//! polling the attempt, waiting for readiness and closing the socket.

use crate::error::{RegistryError, RoutingError};
use crate::readiness::{Event, InterestSet, ReadinessMultiplexer, ReadinessSource};
use crate::registry::{SessionId, SessionRegistry, StepOutcome};
use crate::route::{Route, RoutingTable};
use crate::socks::CredentialSource;
use crate::transport::{ipv4_endpoint, SocketHandle, SocketIo, SocketKind};
use socket2::SockAddr;
use std::io;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What happened to a connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Connect directly, the engine is not involved
    Bypass,
    /// A SOCKS negotiation was started
    Proxied(SessionId),
    /// A proxy is needed but none can be used
    RoutingFailed(RoutingError),
}

/// Routes connection attempts and drives their SOCKS negotiations
#[derive(Debug)]
pub struct Socksifier<'a> {
    routes: &'a RoutingTable,
    credentials: CredentialSource,
    registry: SessionRegistry<'a>,
}

impl<'a> Socksifier<'a> {
    /// Create an engine over a routing table
    pub fn new(routes: &'a RoutingTable, credentials: CredentialSource) -> Self {
        Self {
            routes,
            credentials,
            registry: SessionRegistry::new(),
        }
    }

    /// Handle a connection attempt of `handle` to `destination`
    ///
    /// Proxied attempts start connecting to the SOCKS server right away.
    /// Their outcome is collected with [`Socksifier::poll_progress`].
    pub fn attempt<S: SocketIo + ?Sized>(
        &mut self,
        io: &mut S,
        handle: SocketHandle,
        destination: SocketAddrV4,
        kind: SocketKind,
    ) -> Result<Attempt, RegistryError> {
        // Whatever route this attempt takes, a finished negotiation on the
        // socket must not keep answering for it
        self.registry.discard_finished(handle)?;

        if kind != SocketKind::Stream {
            debug!("Socket {} is not a stream socket, connecting directly", handle);
            return Ok(Attempt::Bypass);
        }

        let route = match self.routes.route(destination) {
            Route::Direct => return Ok(Attempt::Bypass),
            Route::Unavailable(err) => {
                warn!("Cannot route {} from {}: {}", destination, handle, err);
                return Ok(Attempt::RoutingFailed(err));
            }
            Route::Proxy(route) => route,
        };

        let identity = self.credentials.identity_for(route.profile);
        let id = self.registry.create(handle, destination, route, identity)?;
        self.registry.step(id, io)?;
        Ok(Attempt::Proxied(id))
    }

    /// Handle a connection attempt to a generic socket address
    ///
    /// Only IPv4 destinations can be proxied, everything else connects
    /// directly.
    pub fn attempt_sockaddr<S: SocketIo + ?Sized>(
        &mut self,
        io: &mut S,
        handle: SocketHandle,
        destination: &SockAddr,
        kind: SocketKind,
    ) -> Result<Attempt, RegistryError> {
        match ipv4_endpoint(destination) {
            Ok(destination) => self.attempt(io, handle, destination, kind),
            Err(err) => {
                debug!("Socket {}: {}, connecting directly", handle, err);
                Ok(Attempt::Bypass)
            }
        }
    }

    /// Advance a negotiation and report where it stands
    ///
    /// A finished negotiation reports its outcome once, after which the id
    /// is no longer valid.
    pub fn poll_progress<S: SocketIo + ?Sized>(
        &mut self,
        io: &mut S,
        id: SessionId,
    ) -> Result<StepOutcome, RegistryError> {
        let outcome = self.registry.step(id, io)?;
        if outcome.is_terminal() {
            self.registry.dispose(id);
        }
        Ok(outcome)
    }

    /// Forget whatever negotiation runs on a socket being closed
    pub fn notify_closed(&mut self, handle: SocketHandle) -> Option<SessionId> {
        self.registry.close_handle(handle)
    }

    /// Wait for readiness on the caller's sockets, servicing negotiations
    ///
    /// See [`ReadinessMultiplexer`].
    pub fn wait<S>(
        &mut self,
        sockets: &mut S,
        interest: &InterestSet,
        timeout: Option<Duration>,
    ) -> io::Result<Vec<Event>>
    where
        S: SocketIo + ReadinessSource + ?Sized,
    {
        ReadinessMultiplexer::new(&mut self.registry, sockets).wait(interest, timeout)
    }

    /// Drive one negotiation until it finishes, the way a blocking connect
    /// would
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] if `timeout` elapses first.
    /// The negotiation is left registered in that case.
    pub fn complete<S>(
        &mut self,
        sockets: &mut S,
        id: SessionId,
        timeout: Option<Duration>,
    ) -> io::Result<()>
    where
        S: SocketIo + ReadinessSource + ?Sized,
    {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let handle = self
                .registry
                .get(id)
                .map(|session| session.handle())
                .ok_or(RegistryError::InvalidSession(id))?;

            let interest = match self.poll_progress(sockets, id)? {
                StepOutcome::Done => {
                    info!("Socket {} connected through SOCKS", handle);
                    return Ok(());
                }
                StepOutcome::Failed(err) => return Err(err.into()),
                StepOutcome::InProgress(interest) => interest,
            };

            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("SOCKS negotiation on {} timed out", handle),
                        ));
                    }
                    Some(deadline - now)
                }
            };
            let wanted: InterestSet = [(handle, interest)].into_iter().collect();
            sockets.wait(&wanted, remaining)?;
        }
    }

    /// Live negotiations
    pub fn registry(&self) -> &SessionRegistry<'a> {
        &self.registry
    }

    /// Routing table in use
    pub fn routes(&self) -> &'a RoutingTable {
        self.routes
    }
}
