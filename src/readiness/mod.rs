//! Readiness waiting
//!
//! A [`ReadinessSource`] is anything that can block until sockets become
//! readable or writable, in the manner of `select` or `poll`. The
//! [`ReadinessMultiplexer`] sits on top of one and hides in-flight SOCKS
//! negotiations from the caller.

mod multiplexer;

pub use multiplexer::ReadinessMultiplexer;

use crate::transport::SocketHandle;
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

/// Readiness a caller is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    /// Wait for the socket to become readable
    pub readable: bool,
    /// Wait for the socket to become writable
    pub writable: bool,
}

impl Interest {
    /// Readable only
    pub const READ: Interest = Interest {
        readable: true,
        writable: false,
    };

    /// Writable only
    pub const WRITE: Interest = Interest {
        readable: false,
        writable: true,
    };

    /// Readable or writable
    pub const BOTH: Interest = Interest {
        readable: true,
        writable: true,
    };

    /// Whether no readiness is requested
    pub fn is_empty(self) -> bool {
        !self.readable && !self.writable
    }

    /// Readiness requested by either side
    pub fn union(self, other: Interest) -> Interest {
        Interest {
            readable: self.readable || other.readable,
            writable: self.writable || other.writable,
        }
    }
}

/// A socket that became ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Socket the event is for
    pub handle: SocketHandle,
    /// The socket is readable, or has an error or hang-up pending
    pub readable: bool,
    /// The socket is writable
    pub writable: bool,
}

impl Event {
    /// Keep only the readiness covered by `interest`
    pub fn restrict(self, interest: Interest) -> Event {
        Event {
            handle: self.handle,
            readable: self.readable && interest.readable,
            writable: self.writable && interest.writable,
        }
    }

    /// Whether the event carries no readiness at all
    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// Interest for a set of sockets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterestSet(BTreeMap<SocketHandle, Interest>);

impl InterestSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add interest for `handle`, merging with any already present
    pub fn insert(&mut self, handle: SocketHandle, interest: Interest) {
        if interest.is_empty() {
            return;
        }
        let entry = self.0.entry(handle).or_default();
        *entry = entry.union(interest);
    }

    /// Interest registered for `handle`
    pub fn get(&self, handle: SocketHandle) -> Option<Interest> {
        self.0.get(&handle).copied()
    }

    /// Iterate in handle order
    pub fn iter(&self) -> impl Iterator<Item = (SocketHandle, Interest)> + '_ {
        self.0.iter().map(|(handle, interest)| (*handle, *interest))
    }

    /// Number of sockets in the set
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(SocketHandle, Interest)> for InterestSet {
    fn from_iter<I: IntoIterator<Item = (SocketHandle, Interest)>>(iter: I) -> Self {
        let mut set = InterestSet::new();
        for (handle, interest) in iter {
            set.insert(handle, interest);
        }
        set
    }
}

/// Something that can wait for socket readiness
pub trait ReadinessSource {
    /// Block until at least one socket in `interest` is ready or `timeout`
    /// elapses, and report the ready sockets
    ///
    /// `None` waits indefinitely. An elapsed timeout is not an error, it
    /// yields an empty list.
    fn wait(&mut self, interest: &InterestSet, timeout: Option<Duration>) -> io::Result<Vec<Event>>;
}

impl<T: ReadinessSource + ?Sized> ReadinessSource for &mut T {
    fn wait(&mut self, interest: &InterestSet, timeout: Option<Duration>) -> io::Result<Vec<Event>> {
        (**self).wait(interest, timeout)
    }
}
