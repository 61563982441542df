//! Messaging session states.
//!
//! ```text
//!  Disconnected ──▶ Connecting ──▶ Connected
//!                      │  ▲            │
//!                      ▼  │            │
//!                    Backoff ◀─────────┘
//! ```

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected yet.
    Disconnected,
    /// TCP connect and CONNECT/CONNACK handshake in flight.
    Connecting,
    /// Broker accepted the session.
    Connected {
        /// Counts accepted sessions since boot, starting at 1.
        session_id: u32,
        /// Last time the broker proved it was alive.
        last_keepalive_ms: u64,
    },
    /// Waiting before the next connect attempt.
    Backoff { next_retry_ms: u64, attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Edges of the session state machine.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected { .. })
                | (Self::Connecting, Self::Backoff { .. })
                | (Self::Connected { .. }, Self::Backoff { .. })
                | (Self::Backoff { .. }, Self::Connecting)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected { session_id, .. } => write!(f, "CONNECTED(#{session_id})"),
            Self::Backoff {
                next_retry_ms,
                attempt,
            } => write!(f, "BACKOFF(attempt {attempt}, retry at {next_retry_ms} ms)"),
        }
    }
}
