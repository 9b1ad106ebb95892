//! Edge-triggered readiness demultiplexer.
//!
//! Thin wrapper over `mio::Poll`. Sockets, the wake pipe and the timer fd
//! all register uniformly through `SourceFd`, which maps to epoll on Linux
//! in edge-triggered mode — read and write handlers must loop until
//! `WouldBlock`.

use crate::watch::FdWatch;
use mio::unix::SourceFd;
use mio::{Events, Poll};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Plain readiness record decoded from one poll event.
#[derive(Debug, Clone, Copy)]
pub struct PollEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub error: bool,
}

/// One poller per loop. Not thread-safe: only the owning loop may call it.
pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
        })
    }

    /// Register a descriptor (epoll ADD).
    pub fn add(&self, watch: &FdWatch) -> io::Result<()> {
        let fd = watch.fd();
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), watch.token(), watch.interest())
    }

    /// Change a registration (epoll MOD).
    pub fn modify(&self, watch: &FdWatch) -> io::Result<()> {
        let fd = watch.fd();
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), watch.token(), watch.interest())
    }

    /// Remove a registration (epoll DEL).
    pub fn remove(&self, watch: &FdWatch) -> io::Result<()> {
        let fd = watch.fd();
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    /// Block until readiness or timeout. Events are collected into plain
    /// records so the caller can mutate registrations while iterating.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<PollEvent>> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(self
            .events
            .iter()
            .map(|event| PollEvent {
                fd: event.token().0 as RawFd,
                readable: event.is_readable(),
                writable: event.is_writable(),
                read_closed: event.is_read_closed(),
                error: event.is_error(),
            })
            .collect())
    }
}
