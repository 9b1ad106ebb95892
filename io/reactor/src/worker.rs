//! The worker (sub) loop: event demultiplexing, read/write handling, timer
//! expiry and inter-thread hand-off for one shard of the connections.

use crate::connection::Connection;
use crate::handler::{DisconnectReason, Handler};
use crate::metrics::{BYTES_RECEIVED, BYTES_SENT, CONNECTIONS_ACCEPTED, CONNECTIONS_ACTIVE};
use crate::poller::{PollEvent, Poller};
use crate::server::Config;
use crate::timer::TimerService;
use crate::wake::WakePipe;
use crate::watch::FdWatch;
use ahash::AHashMap;
use mio::Interest;
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Interval for retrying a drain that hit `WouldBlock` while the
/// connection is closing. There is no persistent writable subscription, so
/// a graceful close keeps itself moving with short one-shot timers.
const DRAIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// The half of a worker that other threads may touch: the two in-boxes,
/// the wake-up pipe, the timer service and the running flag.
///
/// In-box critical sections are O(1) pushes and whole-vector moves.
pub(crate) struct WorkerShared {
    worker_id: usize,
    new_sockets: Mutex<Vec<TcpStream>>,
    send_requests: Mutex<Vec<RawFd>>,
    timers: TimerService,
    waker: WakePipe,
    running: AtomicBool,
}

impl WorkerShared {
    pub(crate) fn new(worker_id: usize) -> io::Result<Self> {
        Ok(Self {
            worker_id,
            new_sockets: Mutex::new(Vec::new()),
            send_requests: Mutex::new(Vec::new()),
            timers: TimerService::new()?,
            waker: WakePipe::new()?,
            running: AtomicBool::new(true),
        })
    }

    #[inline]
    pub(crate) fn worker_id(&self) -> usize {
        self.worker_id
    }

    #[inline]
    pub(crate) fn timers(&self) -> &TimerService {
        &self.timers
    }

    /// Hand a freshly accepted socket to this worker.
    pub(crate) fn push_socket(&self, stream: TcpStream) {
        self.new_sockets.lock().push(stream);
        self.waker.wake();
    }

    /// Ask the worker to attempt a write-drain on `fd`.
    pub(crate) fn request_send(&self, fd: RawFd) {
        self.send_requests.lock().push(fd);
        self.waker.wake();
    }

    /// Signal the loop to exit and wake it.
    pub(crate) fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.waker.wake();
    }

    #[inline]
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn take_new_sockets(&self) -> Vec<TcpStream> {
        std::mem::take(&mut *self.new_sockets.lock())
    }

    fn take_send_requests(&self) -> Vec<RawFd> {
        std::mem::take(&mut *self.send_requests.lock())
    }
}

struct ConnEntry {
    stream: TcpStream,
    conn: Arc<Connection>,
    /// Read side already shut for a graceful close.
    half_closed: bool,
    /// Reason to report once a deferred teardown completes (peer EOF seen
    /// while bytes were still staged for sending).
    pending_reason: Option<DisconnectReason>,
}

enum WriteOutcome {
    Drained,
    WouldBlock,
    Fatal,
}

/// Loop-owned worker state. The connection map and poller registrations
/// are only ever touched on this thread.
pub(crate) struct Worker {
    shared: Arc<WorkerShared>,
    handler: Arc<dyn Handler>,
    poller: Poller,
    connections: AHashMap<RawFd, ConnEntry>,
    scratch: Vec<u8>,
    write_chunk_size: usize,
    initial_buffer_capacity: usize,
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<WorkerShared>,
        handler: Arc<dyn Handler>,
        config: &Config,
    ) -> io::Result<Self> {
        let poller = Poller::new()?;
        poller.add(&FdWatch::new(shared.waker.read_fd(), Interest::READABLE))?;
        poller.add(&FdWatch::new(shared.timers.fd(), Interest::READABLE))?;
        Ok(Self {
            shared,
            handler,
            poller,
            connections: AHashMap::new(),
            scratch: vec![0u8; config.read_chunk_size],
            write_chunk_size: config.write_chunk_size,
            initial_buffer_capacity: config.initial_buffer_capacity,
        })
    }

    pub(crate) fn run(&mut self) -> io::Result<()> {
        tracing::debug!(worker = self.shared.worker_id, "worker loop started");
        let result = self.event_loop();
        self.teardown_all();
        tracing::debug!(worker = self.shared.worker_id, "worker loop stopped");
        result
    }

    fn event_loop(&mut self) -> io::Result<()> {
        loop {
            let events = self.poller.wait(None)?;
            if !self.shared.is_running() {
                return Ok(());
            }
            for event in events {
                self.dispatch(event);
            }
            if !self.shared.is_running() {
                return Ok(());
            }
        }
    }

    fn dispatch(&mut self, event: PollEvent) {
        let fd = event.fd;
        if fd == self.shared.waker.read_fd() {
            self.shared.waker.drain();
            self.process_new_sockets();
            self.process_send_requests();
        } else if fd == self.shared.timers.fd() {
            self.shared.timers.on_expiry();
        } else {
            self.dispatch_connection(fd, event);
        }
    }

    fn process_new_sockets(&mut self) {
        for stream in self.shared.take_new_sockets() {
            self.register_connection(stream);
        }
    }

    fn register_connection(&mut self, stream: TcpStream) {
        let fd = stream.as_raw_fd();
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::debug!(fd, error = %e, "peer vanished before registration");
                return;
            }
        };
        let watch = FdWatch::new(fd, Interest::READABLE);
        if let Err(e) = self.poller.add(&watch) {
            tracing::warn!(fd, error = %e, "failed to register accepted socket");
            return;
        }
        let conn = Arc::new(Connection::new(
            watch,
            peer_addr,
            self.shared.clone(),
            self.initial_buffer_capacity,
        ));
        self.connections.insert(
            fd,
            ConnEntry {
                stream,
                conn: conn.clone(),
                half_closed: false,
                pending_reason: None,
            },
        );
        CONNECTIONS_ACCEPTED.increment();
        CONNECTIONS_ACTIVE.increment();
        tracing::debug!(
            worker = self.shared.worker_id,
            fd,
            peer = %peer_addr,
            "connection registered"
        );
        self.handler.on_accepted(&conn);
    }

    fn process_send_requests(&mut self) {
        for fd in self.shared.take_send_requests() {
            self.drain_writes(fd);
        }
    }

    /// Optimistic write-drain: chunked writes until the buffer is empty,
    /// the socket pushes back, or the write fails. There is no persistent
    /// writable subscription — a non-closing connection that hit
    /// `WouldBlock` is retried by the next `send`, a closing one by a
    /// short one-shot timer so the graceful drain completes on its own.
    fn drain_writes(&mut self, fd: RawFd) {
        let Some(entry) = self.connections.get_mut(&fd) else {
            return;
        };
        let conn = entry.conn.clone();

        if conn.is_force_close() {
            self.remove_connection(fd, DisconnectReason::Normal);
            return;
        }

        let outcome = loop {
            let mut buf = conn.send_buf().lock();
            if buf.is_empty() {
                break WriteOutcome::Drained;
            }
            let chunk = buf.len().min(self.write_chunk_size);
            match entry.stream.write(&buf.data()[..chunk]) {
                Ok(0) => break WriteOutcome::Fatal,
                Ok(n) => {
                    buf.advance(n);
                    BYTES_SENT.add(n as u64);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break WriteOutcome::WouldBlock,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(fd, error = %e, "write failed");
                    break WriteOutcome::Fatal;
                }
            }
        };

        match outcome {
            WriteOutcome::Drained => {
                if conn.is_closing() {
                    self.remove_connection(fd, DisconnectReason::Normal);
                }
            }
            WriteOutcome::WouldBlock => {
                if conn.is_closing() {
                    self.half_close_read(fd);
                    self.arm_drain_retry(fd);
                }
            }
            WriteOutcome::Fatal => {
                self.remove_connection(fd, DisconnectReason::WriteError);
            }
        }
    }

    fn half_close_read(&mut self, fd: RawFd) {
        if let Some(entry) = self.connections.get_mut(&fd)
            && !entry.half_closed
        {
            entry.half_closed = true;
            if let Err(e) = entry.stream.shutdown(Shutdown::Read) {
                tracing::debug!(fd, error = %e, "read-side shutdown failed");
            }
        }
    }

    fn arm_drain_retry(&self, fd: RawFd) {
        let shared = Arc::downgrade(&self.shared);
        let _ = self
            .shared
            .timers
            .register_timer(DRAIN_RETRY_INTERVAL, false, move || {
                if let Some(shared) = shared.upgrade() {
                    shared.request_send(fd);
                }
            });
    }

    fn dispatch_connection(&mut self, fd: RawFd, event: PollEvent) {
        if !self.connections.contains_key(&fd) {
            return;
        }
        if event.error {
            self.disconnect(fd, DisconnectReason::PeerClosed);
            return;
        }
        if event.readable {
            self.handle_readable(fd);
        }
        if event.read_closed {
            let hangup = self
                .connections
                .get(&fd)
                .is_some_and(|entry| !entry.conn.is_closing());
            if hangup {
                self.disconnect(fd, DisconnectReason::PeerHangup);
            }
        }
    }

    /// Edge-triggered read: loop into the scratch buffer until the socket
    /// runs dry, delivering one `on_message` per chunk.
    fn handle_readable(&mut self, fd: RawFd) {
        let handler = self.handler.clone();
        let mut disconnect = None;
        {
            let Some(entry) = self.connections.get_mut(&fd) else {
                return;
            };
            let conn = entry.conn.clone();
            if conn.is_closing() {
                // Read side is (being) shut for a graceful close; the drain
                // path owns the rest of this connection's life.
                return;
            }
            loop {
                match entry.stream.read(&mut self.scratch) {
                    Ok(0) => {
                        disconnect = Some(DisconnectReason::PeerClosed);
                        break;
                    }
                    Ok(n) => {
                        BYTES_RECEIVED.add(n as u64);
                        handler.on_message(&conn, &self.scratch[..n]);
                        if conn.is_closing() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::debug!(fd, error = %e, "read failed");
                        disconnect = Some(DisconnectReason::PeerClosed);
                        break;
                    }
                }
            }
        }
        if let Some(reason) = disconnect {
            self.disconnect(fd, reason);
        }
    }

    /// Peer-initiated teardown. If bytes are still staged for sending the
    /// removal is deferred: the connection flips into drain mode and the
    /// peer's reason is reported once the buffer has been flushed.
    fn disconnect(&mut self, fd: RawFd, reason: DisconnectReason) {
        let Some(entry) = self.connections.get_mut(&fd) else {
            return;
        };
        let conn = entry.conn.clone();
        let has_pending = !conn.send_buf().lock().is_empty();
        if has_pending
            && matches!(
                reason,
                DisconnectReason::PeerClosed | DisconnectReason::PeerHangup
            )
        {
            entry.pending_reason = Some(reason);
            conn.set_closing();
            self.drain_writes(fd);
        } else {
            self.remove_connection(fd, reason);
        }
    }

    /// Final teardown: unregister, drop the map entry (which closes the
    /// descriptor exactly once) and deliver the single `on_disconnected`.
    fn remove_connection(&mut self, fd: RawFd, reason: DisconnectReason) {
        let Some(entry) = self.connections.remove(&fd) else {
            return;
        };
        if let Err(e) = self.poller.remove(entry.conn.watch()) {
            tracing::debug!(fd, error = %e, "deregister failed");
        }
        entry.conn.mark_closed();
        CONNECTIONS_ACTIVE.decrement();
        let reason = entry.pending_reason.unwrap_or(reason);
        tracing::debug!(
            worker = self.shared.worker_id,
            fd,
            reason = %reason,
            "connection removed"
        );
        self.handler.on_disconnected(&entry.conn, reason);
    }

    fn teardown_all(&mut self) {
        let fds: Vec<RawFd> = self.connections.keys().copied().collect();
        for fd in fds {
            self.remove_connection(fd, DisconnectReason::RuntimeStopping);
        }
    }
}
