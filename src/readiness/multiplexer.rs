//! Readiness multiplexing over in-flight SOCKS sessions
//!
//! The caller waits on its sockets exactly as it would with `select` or
//! `poll`. Sockets that are still negotiating are waited on for whatever
//! the negotiation needs, and their events are consumed by stepping the
//! session. The caller only sees an event for such a socket once the
//! negotiation is over:
//!
//! - success reports the socket writable, if the caller asked for that,
//!   and passes read interest through to the real socket
//! - failure reports every readiness the caller asked for, so the next
//!   call on the socket observes the error

use super::{Event, Interest, InterestSet, ReadinessSource};
use crate::registry::SessionRegistry;
use crate::socks::SessionState;
use crate::transport::{SocketHandle, SocketIo};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::time::{Duration, Instant};
use tracing::trace;

/// Readiness wait that advances SOCKS sessions behind the caller's back
pub struct ReadinessMultiplexer<'r, 'a, S: ?Sized> {
    registry: &'r mut SessionRegistry<'a>,
    sockets: &'r mut S,
}

impl<'r, 'a, S> ReadinessMultiplexer<'r, 'a, S>
where
    S: SocketIo + ReadinessSource + ?Sized,
{
    /// Wrap a registry and the sockets its sessions run on
    pub fn new(registry: &'r mut SessionRegistry<'a>, sockets: &'r mut S) -> Self {
        Self { registry, sockets }
    }

    /// Wait until a socket in `interest` is ready or `timeout` elapses
    ///
    /// Every negotiating session is serviced while waiting, including those
    /// on sockets the caller did not ask about.
    pub fn wait(
        &mut self,
        interest: &InterestSet,
        timeout: Option<Duration>,
    ) -> io::Result<Vec<Event>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            self.start_unstarted();

            let mut report = Report::default();
            self.report_completions(interest, &mut report);
            if !report.is_empty() {
                return Ok(report.into_events());
            }

            let combined = self.overlay(interest);
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let events = self.sockets.wait(&combined, remaining)?;

            let mut ready: BTreeSet<SocketHandle> = BTreeSet::new();
            for event in events {
                if self.is_negotiating(event.handle) {
                    ready.insert(event.handle);
                } else if let Some(wanted) = interest.get(event.handle) {
                    report.add(event.restrict(wanted));
                }
            }

            for id in self.registry.ids() {
                let Some(handle) = self.registry.get(id).map(|session| session.handle()) else {
                    continue;
                };
                if ready.contains(&handle) {
                    trace!("Servicing session {} on {}", id, handle);
                    self.registry
                        .step(id, &mut *self.sockets)
                        .map_err(io::Error::from)?;
                }
            }

            self.report_completions(interest, &mut report);
            if !report.is_empty() {
                return Ok(report.into_events());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(Vec::new());
            }
        }
    }

    /// Kick off sessions nobody has stepped yet, so they have an interest
    fn start_unstarted(&mut self) {
        let pending: Vec<_> = self
            .registry
            .iter()
            .filter(|(_, session)| matches!(session.state(), SessionState::Unstarted))
            .map(|(id, _)| id)
            .collect();
        for id in pending {
            if let Ok(outcome) = self.registry.step(id, &mut *self.sockets) {
                trace!("Started session {}: {:?}", id, outcome);
            }
        }
    }

    fn is_negotiating(&self, handle: SocketHandle) -> bool {
        self.registry
            .lookup(handle)
            .and_then(|id| self.registry.get(id))
            .is_some_and(|session| !session.is_terminal())
    }

    /// The caller's interest with every negotiating session's needs laid over it
    fn overlay(&self, interest: &InterestSet) -> InterestSet {
        let mut combined = InterestSet::new();

        for (handle, wanted) in interest.iter() {
            let owner = self.registry.lookup(handle).and_then(|id| self.registry.get(id));
            match owner.map(|session| session.state()) {
                None => combined.insert(handle, wanted),
                // Connected through the proxy, reads go to the real socket
                Some(SessionState::Done) => combined.insert(
                    handle,
                    Interest {
                        readable: wanted.readable,
                        writable: false,
                    },
                ),
                Some(_) => {}
            }
        }

        for (_, session) in self.registry.iter() {
            if let Some(needed) = session.interest() {
                combined.insert(session.handle(), needed);
            }
        }

        combined
    }

    /// Synthesize events for finished sessions the caller is waiting on
    fn report_completions(&self, interest: &InterestSet, report: &mut Report) {
        for (handle, wanted) in interest.iter() {
            let Some(session) = self.registry.lookup(handle).and_then(|id| self.registry.get(id))
            else {
                continue;
            };
            let event = match session.state() {
                SessionState::Done => Event {
                    handle,
                    readable: false,
                    writable: wanted.writable,
                },
                SessionState::Failed(_) => Event {
                    handle,
                    readable: wanted.readable,
                    writable: wanted.writable,
                },
                _ => continue,
            };
            report.add(event);
        }
    }
}

/// Events to hand back, merged per socket
#[derive(Default)]
struct Report(BTreeMap<SocketHandle, Event>);

impl Report {
    fn add(&mut self, event: Event) {
        if event.is_empty() {
            return;
        }
        self.0
            .entry(event.handle)
            .and_modify(|existing| {
                existing.readable |= event.readable;
                existing.writable |= event.writable;
            })
            .or_insert(event);
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn into_events(self) -> Vec<Event> {
        self.0.into_values().collect()
    }
}
