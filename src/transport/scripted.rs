//! In-memory sockets for tests
//!
//! Available to unit tests and, with the `test-util` feature, to
//! integration tests.

use super::{ConnectProgress, SocketHandle, SocketIo};
use crate::readiness::{Event, InterestSet, ReadinessSource};
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::SocketAddrV4;
use std::time::Duration;

/// How a scripted connect behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Connects immediately
    Immediate,
    /// Stays in progress until `finish_connect`
    Deferred,
    /// Fails with connection refused
    Refused,
}

/// One scripted socket
#[derive(Debug)]
pub struct ScriptedSocket {
    pub mode: ConnectMode,
    pub connected_to: Option<SocketAddrV4>,
    pub connect_ready: bool,
    pub inbound: VecDeque<Vec<u8>>,
    pub eof: bool,
    pub sent: Vec<u8>,
    /// Bytes `send` still accepts, unlimited when `None`
    pub send_budget: Option<usize>,
}

/// Scripted sockets keyed by handle
#[derive(Debug, Default)]
pub struct ScriptedSockets {
    pub sockets: BTreeMap<SocketHandle, ScriptedSocket>,
    /// Number of `wait` calls made
    pub waits: usize,
}

impl ScriptedSockets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a socket with raw handle `raw`
    pub fn add(&mut self, raw: usize, mode: ConnectMode) -> SocketHandle {
        let handle = SocketHandle::from_raw(raw);
        self.sockets.insert(
            handle,
            ScriptedSocket {
                mode,
                connected_to: None,
                connect_ready: mode == ConnectMode::Immediate,
                inbound: VecDeque::new(),
                eof: false,
                sent: Vec::new(),
                send_budget: None,
            },
        );
        handle
    }

    pub fn socket(&mut self, handle: SocketHandle) -> &mut ScriptedSocket {
        self.sockets.get_mut(&handle).expect("unknown scripted socket")
    }

    /// Queue bytes for the session to read, as one segment
    pub fn push_inbound(&mut self, handle: SocketHandle, bytes: &[u8]) {
        self.socket(handle).inbound.push_back(bytes.to_vec());
    }

    /// Let a deferred connect complete
    pub fn finish_connect(&mut self, handle: SocketHandle) {
        self.socket(handle).connect_ready = true;
    }

    /// Take everything written so far
    pub fn take_sent(&mut self, handle: SocketHandle) -> Vec<u8> {
        std::mem::take(&mut self.socket(handle).sent)
    }

    fn readiness(&self, handle: SocketHandle) -> (bool, bool) {
        match self.sockets.get(&handle) {
            Some(socket) => (
                !socket.inbound.is_empty() || socket.eof,
                socket.connect_ready && socket.send_budget != Some(0),
            ),
            None => (false, false),
        }
    }
}

fn would_block() -> io::Error {
    io::Error::from(io::ErrorKind::WouldBlock)
}

impl SocketIo for ScriptedSockets {
    fn connect(&mut self, handle: SocketHandle, addr: SocketAddrV4) -> io::Result<ConnectProgress> {
        let socket = self.socket(handle);
        socket.connected_to = Some(addr);
        match socket.mode {
            ConnectMode::Immediate => Ok(ConnectProgress::Established),
            ConnectMode::Deferred => Ok(ConnectProgress::InProgress),
            ConnectMode::Refused => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
        }
    }

    fn connect_status(&mut self, handle: SocketHandle) -> io::Result<ConnectProgress> {
        if self.socket(handle).connect_ready {
            Ok(ConnectProgress::Established)
        } else {
            Ok(ConnectProgress::InProgress)
        }
    }

    fn send(&mut self, handle: SocketHandle, buf: &[u8]) -> io::Result<usize> {
        let socket = self.socket(handle);
        let n = match socket.send_budget {
            Some(0) => return Err(would_block()),
            Some(budget) => budget.min(buf.len()),
            None => buf.len(),
        };
        if let Some(budget) = socket.send_budget.as_mut() {
            *budget -= n;
        }
        socket.sent.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn recv(&mut self, handle: SocketHandle, buf: &mut [u8]) -> io::Result<usize> {
        let socket = self.socket(handle);
        let Some(mut segment) = socket.inbound.pop_front() else {
            return if socket.eof { Ok(0) } else { Err(would_block()) };
        };
        let n = segment.len().min(buf.len());
        buf[..n].copy_from_slice(&segment[..n]);
        if n < segment.len() {
            segment.drain(..n);
            socket.inbound.push_front(segment);
        }
        Ok(n)
    }
}

impl ReadinessSource for ScriptedSockets {
    fn wait(&mut self, interest: &InterestSet, timeout: Option<Duration>) -> io::Result<Vec<Event>> {
        self.waits += 1;
        let events: Vec<Event> = interest
            .iter()
            .map(|(handle, wanted)| {
                let (readable, writable) = self.readiness(handle);
                Event {
                    handle,
                    readable,
                    writable,
                }
                .restrict(wanted)
            })
            .filter(|event| !event.is_empty())
            .collect();

        if events.is_empty() {
            match timeout {
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "scripted sockets would block forever",
                    ))
                }
                Some(timeout) => std::thread::sleep(timeout),
            }
        }
        Ok(events)
    }
}
