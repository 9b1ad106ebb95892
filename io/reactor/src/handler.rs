//! The callback contract between the runtime and the application.

use crate::connection::Connection;
use std::fmt;
use std::sync::Arc;

/// Application-side event handler.
///
/// All three callbacks run on the worker thread that owns the connection,
/// and must not block — the worker cannot service its other connections
/// until the callback returns. `conn.send`, `conn.close`,
/// `conn.register_timer` and `conn.cancel_timer` may be called from any
/// callback or from any external thread while the connection is live.
///
/// Ordering per connection: `on_accepted` precedes every `on_message`,
/// every `on_message` precedes `on_disconnected`, and `on_disconnected` is
/// delivered exactly once. The connection must not be used for I/O after
/// `on_disconnected` returns.
pub trait Handler: Send + Sync + 'static {
    /// The connection is registered with its worker and ready for traffic.
    fn on_accepted(&self, conn: &Arc<Connection>);

    /// A chunk of inbound bytes. `data` points into a worker-owned buffer
    /// and is only valid for the duration of the call; the runtime imposes
    /// no framing.
    fn on_message(&self, conn: &Arc<Connection>, data: &[u8]);

    /// The connection is gone. No further callbacks fire for it.
    fn on_disconnected(&self, conn: &Arc<Connection>, reason: DisconnectReason);
}

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Locally initiated close completed.
    Normal,
    /// Peer closed (zero-length read) or the read failed.
    PeerClosed,
    /// Peer hangup reported by the poller.
    PeerHangup,
    /// A write failed with a fatal error.
    WriteError,
    /// The runtime is stopping.
    RuntimeStopping,
}

impl DisconnectReason {
    /// Stable numeric code for logs and wire-side diagnostics.
    pub fn code(&self) -> u8 {
        match self {
            DisconnectReason::Normal => 0,
            DisconnectReason::PeerClosed => 1,
            DisconnectReason::PeerHangup => 2,
            DisconnectReason::WriteError => 3,
            DisconnectReason::RuntimeStopping => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Normal => "normal",
            DisconnectReason::PeerClosed => "peer_closed_or_read_error",
            DisconnectReason::PeerHangup => "peer_hangup",
            DisconnectReason::WriteError => "write_error",
            DisconnectReason::RuntimeStopping => "runtime_stopping",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        assert_eq!(DisconnectReason::Normal.code(), 0);
        assert_eq!(DisconnectReason::PeerClosed.code(), 1);
        assert_eq!(DisconnectReason::PeerHangup.code(), 2);
        assert_eq!(DisconnectReason::WriteError.code(), 3);
        assert_eq!(DisconnectReason::RuntimeStopping.code(), 4);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(DisconnectReason::PeerHangup.to_string(), "peer_hangup");
    }
}
