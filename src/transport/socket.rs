//! Non-blocking sockets
//!
//! [`SocketTable`] owns a set of non-blocking IPv4 TCP sockets and a
//! poller. It is the production implementation of both [`SocketIo`] and
//! [`ReadinessSource`].

use super::{ConnectProgress, SocketHandle, SocketIo, SocketKind};
use crate::readiness::{Event, InterestSet, ReadinessSource};
use polling::Poller;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::net::SocketAddrV4;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Table of non-blocking sockets with readiness polling
pub struct SocketTable {
    poller: Poller,
    events: polling::Events,
    sockets: BTreeMap<SocketHandle, Socket>,
    next_handle: usize,
}

impl std::fmt::Debug for SocketTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTable")
            .field("sockets", &self.sockets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SocketTable {
    /// Create an empty table
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            events: polling::Events::new(),
            sockets: BTreeMap::new(),
            next_handle: 1,
        })
    }

    /// Open a non-blocking IPv4 TCP socket
    pub fn open_stream(&mut self) -> io::Result<SocketHandle> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;

        let handle = SocketHandle::from_raw(self.next_handle);
        self.next_handle += 1;

        // SAFETY: the socket is removed from the poller in `close` or on drop
        // of the table, before it is closed.
        unsafe {
            self.poller.add(&socket, polling::Event::none(handle.as_raw()))?;
        }
        self.sockets.insert(handle, socket);
        debug!("Opened socket {}", handle);
        Ok(handle)
    }

    /// Close a socket and forget it
    pub fn close(&mut self, handle: SocketHandle) -> io::Result<()> {
        let socket = self.sockets.remove(&handle).ok_or_else(|| unknown(handle))?;
        self.poller.delete(&socket)?;
        debug!("Closed socket {}", handle);
        Ok(())
    }

    /// Borrow the underlying socket
    pub fn socket(&self, handle: SocketHandle) -> Option<&Socket> {
        self.sockets.get(&handle)
    }

    /// Classify a socket
    pub fn kind(&self, handle: SocketHandle) -> io::Result<SocketKind> {
        Ok(self.get(handle)?.r#type()?.into())
    }

    fn get(&self, handle: SocketHandle) -> io::Result<&Socket> {
        self.sockets.get(&handle).ok_or_else(|| unknown(handle))
    }
}

impl Drop for SocketTable {
    fn drop(&mut self) {
        for (handle, socket) in &self.sockets {
            if let Err(e) = self.poller.delete(socket) {
                warn!("Failed to remove socket {} from poller: {}", handle, e);
            }
        }
    }
}

impl SocketIo for SocketTable {
    fn connect(&mut self, handle: SocketHandle, addr: SocketAddrV4) -> io::Result<ConnectProgress> {
        let socket = self.get(handle)?;
        match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => Ok(ConnectProgress::Established),
            Err(e) if connect_in_progress(&e) => Ok(ConnectProgress::InProgress),
            Err(e) => Err(e),
        }
    }

    fn connect_status(&mut self, handle: SocketHandle) -> io::Result<ConnectProgress> {
        let socket = self.get(handle)?;
        if let Some(e) = socket.take_error()? {
            return Err(e);
        }
        match socket.peer_addr() {
            Ok(_) => Ok(ConnectProgress::Established),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(ConnectProgress::InProgress),
            Err(e) => Err(e),
        }
    }

    fn send(&mut self, handle: SocketHandle, buf: &[u8]) -> io::Result<usize> {
        let sent = self.get(handle)?.send(buf)?;
        trace!("Sent {} of {} bytes on {}", sent, buf.len(), handle);
        Ok(sent)
    }

    fn recv(&mut self, handle: SocketHandle, buf: &mut [u8]) -> io::Result<usize> {
        let mut socket = self.get(handle)?;
        let received = socket.read(buf)?;
        trace!("Received {} bytes on {}", received, handle);
        Ok(received)
    }
}

impl ReadinessSource for SocketTable {
    fn wait(&mut self, interest: &InterestSet, timeout: Option<Duration>) -> io::Result<Vec<Event>> {
        if let Some((handle, _)) = interest
            .iter()
            .find(|(handle, _)| !self.sockets.contains_key(handle))
        {
            return Err(unknown(handle));
        }

        // Poller events are oneshot, re-arm every socket before waiting
        for (handle, socket) in &self.sockets {
            let key = handle.as_raw();
            let event = match interest.get(*handle) {
                Some(wanted) => polling::Event::new(key, wanted.readable, wanted.writable),
                None => polling::Event::none(key),
            };
            self.poller.modify(socket, event)?;
        }

        self.events.clear();
        match self.poller.wait(&mut self.events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        Ok(self
            .events
            .iter()
            .map(|event| Event {
                handle: SocketHandle::from_raw(event.key),
                readable: event.readable,
                writable: event.writable,
            })
            .filter(|event| !event.is_empty())
            .collect())
    }
}

fn unknown(handle: SocketHandle) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unknown socket handle {}", handle),
    )
}

fn connect_in_progress(e: &io::Error) -> bool {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    e.kind() == io::ErrorKind::WouldBlock
}
