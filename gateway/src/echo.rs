//! Echo session handler with an optional idle sweep.

use ahash::AHashMap;
use io_reactor::{Connection, DisconnectReason, Handler, TimerId};
use parking_lot::Mutex;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

struct Session {
    bytes_seen: Arc<AtomicU64>,
    sweep_timer: Option<TimerId>,
}

/// Echoes every inbound chunk back to the peer. When an idle interval is
/// configured, a per-session recurring timer closes sessions that received
/// no bytes across one full interval.
pub struct EchoHandler {
    idle_interval: Option<Duration>,
    sessions: Mutex<AHashMap<RawFd, Session>>,
}

impl EchoHandler {
    pub fn new(idle_interval: Option<Duration>) -> Self {
        Self {
            idle_interval,
            sessions: Mutex::new(AHashMap::new()),
        }
    }
}

impl Handler for EchoHandler {
    fn on_accepted(&self, conn: &Arc<Connection>) {
        tracing::info!(
            fd = conn.fd(),
            peer = %conn.peer_addr(),
            worker = conn.worker_id(),
            "session opened"
        );

        let bytes_seen = Arc::new(AtomicU64::new(0));
        let sweep_timer = self.idle_interval.map(|interval| {
            let conn = conn.clone();
            let seen = bytes_seen.clone();
            let last_seen = AtomicU64::new(0);
            conn.clone().register_timer(interval, true, move || {
                let total = seen.load(Ordering::Relaxed);
                if total == last_seen.swap(total, Ordering::Relaxed) {
                    tracing::info!(fd = conn.fd(), "closing idle session");
                    conn.close(false);
                }
            })
        });

        self.sessions.lock().insert(
            conn.fd(),
            Session {
                bytes_seen,
                sweep_timer,
            },
        );
    }

    fn on_message(&self, conn: &Arc<Connection>, data: &[u8]) {
        if let Some(session) = self.sessions.lock().get(&conn.fd()) {
            session
                .bytes_seen
                .fetch_add(data.len() as u64, Ordering::Relaxed);
        }
        conn.send(data);
    }

    fn on_disconnected(&self, conn: &Arc<Connection>, reason: DisconnectReason) {
        if let Some(session) = self.sessions.lock().remove(&conn.fd())
            && let Some(timer) = session.sweep_timer
        {
            conn.cancel_timer(timer);
        }
        tracing::info!(
            fd = conn.fd(),
            code = reason.code(),
            reason = %reason,
            "session closed"
        );
    }
}
