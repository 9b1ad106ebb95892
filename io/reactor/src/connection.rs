//! Per-socket connection state.

use crate::buffer::ByteBuffer;
use crate::timer::TimerId;
use crate::watch::FdWatch;
use crate::worker::WorkerShared;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A live TCP connection owned by one worker loop.
///
/// The worker performs all socket I/O; other threads interact through
/// `send` and `close`, which stage work and marshal it to the worker via
/// its send-request in-box and wake-up pipe. Clones of the `Arc` handed to
/// callbacks stay valid after disconnection, but every I/O operation on a
/// closed connection is a no-op.
pub struct Connection {
    watch: FdWatch,
    peer_addr: SocketAddr,
    worker: Arc<WorkerShared>,
    send_buf: Mutex<ByteBuffer>,
    closing: AtomicBool,
    closed: AtomicBool,
    force_close: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        watch: FdWatch,
        peer_addr: SocketAddr,
        worker: Arc<WorkerShared>,
        initial_buffer_capacity: usize,
    ) -> Self {
        Self {
            watch,
            peer_addr,
            worker,
            send_buf: Mutex::new(ByteBuffer::with_capacity(initial_buffer_capacity)),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            force_close: AtomicBool::new(false),
        }
    }

    /// Queue `data` for delivery. Thread-safe and non-blocking: the bytes
    /// are appended to the send buffer under the send mutex, then the
    /// owning worker is asked to drain. All bytes are buffered, or none —
    /// a connection already marked closing drops the call silently.
    ///
    /// Bytes from concurrent `send` calls interleave at whole-call
    /// granularity, never mid-call.
    pub fn send(&self, data: &[u8]) {
        if data.is_empty() || self.closing.load(Ordering::Acquire) {
            return;
        }
        let mut buf = self.send_buf.lock();
        buf.write(data);
        self.worker.request_send(self.watch.fd());
    }

    /// Close the connection. With `force` false and bytes still staged, the
    /// worker half-closes the read side, drains the send buffer, then tears
    /// down; with `force` true it tears down immediately.
    pub fn close(&self, force: bool) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if force {
            self.force_close.store(true, Ordering::Release);
        }
        self.closing.store(true, Ordering::Release);
        self.worker.request_send(self.watch.fd());
    }

    /// Register a timer on the owning worker. The callback runs on that
    /// worker thread.
    pub fn register_timer<F>(&self, interval: Duration, recurring: bool, callback: F) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.worker.timers().register_timer(interval, recurring, callback)
    }

    /// Cancel a timer registered through this connection's worker.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.worker.timers().cancel_timer(id)
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.watch.fd()
    }

    /// The descriptor and event mask this connection is registered with.
    #[inline]
    pub fn watch(&self) -> &FdWatch {
        &self.watch
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Index of the worker loop that owns this connection.
    #[inline]
    pub fn worker_id(&self) -> usize {
        self.worker.worker_id()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_force_close(&self) -> bool {
        self.force_close.load(Ordering::Acquire)
    }

    /// Enter drain mode without an application `close` call (deferred
    /// teardown after peer EOF with staged bytes).
    pub(crate) fn set_closing(&self) {
        self.closing.store(true, Ordering::Release);
    }

    pub(crate) fn mark_closed(&self) {
        self.closing.store(true, Ordering::Release);
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn send_buf(&self) -> &Mutex<ByteBuffer> {
        &self.send_buf
    }
}
