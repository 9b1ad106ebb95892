//! The acceptor (main) loop: owns the listening socket and deals accepted
//! sockets out to the workers round-robin.
//!
//! Workers never accept; the acceptor never reads or writes application
//! bytes.

use crate::poller::Poller;
use crate::wake::WakePipe;
use crate::watch::FdWatch;
use crate::worker::WorkerShared;
use mio::Interest;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct Acceptor {
    listener: TcpListener,
    listener_fd: RawFd,
    poller: Poller,
    waker: Arc<WakePipe>,
    workers: Vec<Arc<WorkerShared>>,
    running: Arc<AtomicBool>,
    tcp_nodelay: bool,
    cursor: usize,
}

impl Acceptor {
    pub(crate) fn new(
        listener: TcpListener,
        workers: Vec<Arc<WorkerShared>>,
        waker: Arc<WakePipe>,
        running: Arc<AtomicBool>,
        tcp_nodelay: bool,
    ) -> io::Result<Self> {
        let listener_fd = listener.as_raw_fd();
        let poller = Poller::new()?;
        poller.add(&FdWatch::new(listener_fd, Interest::READABLE))?;
        poller.add(&FdWatch::new(waker.read_fd(), Interest::READABLE))?;
        Ok(Self {
            listener,
            listener_fd,
            poller,
            waker,
            workers,
            running,
            tcp_nodelay,
            cursor: 0,
        })
    }

    pub(crate) fn run(&mut self) -> io::Result<()> {
        tracing::info!(
            addr = %self.listener.local_addr()?,
            workers = self.workers.len(),
            "acceptor loop started"
        );
        while self.running.load(Ordering::Acquire) {
            let events = self.poller.wait(None)?;
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            for event in events {
                if event.fd == self.waker.read_fd() {
                    self.waker.drain();
                } else if event.fd == self.listener_fd && event.readable {
                    self.accept_pending();
                }
            }
        }
        tracing::info!("acceptor loop stopped");
        Ok(())
    }

    /// Accept until the listener runs dry (edge-triggered registration).
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(peer = %peer, error = %e, "set_nonblocking failed");
                        continue;
                    }
                    if self.tcp_nodelay {
                        let _ = stream.set_nodelay(true);
                    }
                    let worker = &self.workers[self.cursor % self.workers.len()];
                    self.cursor = self.cursor.wrapping_add(1);
                    tracing::debug!(
                        worker = worker.worker_id(),
                        peer = %peer,
                        "dispatching accepted socket"
                    );
                    worker.push_socket(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(libc::ECONNABORTED) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }
}

/// Build the non-blocking listening socket: SO_REUSEADDR, bound to `addr`,
/// backlog SOMAXCONN.
pub(crate) fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(libc::SOMAXCONN)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_listener_binds() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_listener_is_nonblocking() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        match listener.accept() {
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
            Ok(_) => panic!("accept on an idle listener should not succeed"),
        }
    }
}
