//! Session lifecycle states
//!
//! ```text
//! Disconnected → Connecting → Connected → Reconnecting → Connected ...
//!       ↑             │            │            │
//!       └─────────────┴── destroy ─┴────────────┘
//!
//!                  any ── session expiry ──→ SessionExpired (terminal)
//! ```
//!
//! The state is written only by the session's controller task and published
//! through a `tokio::sync::watch` channel, see
//! [`Session::watch_state`](crate::Session::watch_state).

use std::fmt;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No controller is running
    Disconnected,
    /// First connect cycle in progress
    Connecting,
    /// Handshake done, liveness monitor running
    Connected,
    /// Connection replaced after a drop, staleness or explicit request
    Reconnecting,
    /// The pool rejected the session key; never reconnects
    SessionExpired,
}

impl SessionState {
    /// Numeric value recorded on the state gauge
    pub fn as_metric(self) -> i64 {
        match self {
            SessionState::Disconnected => 0,
            SessionState::Connecting => 1,
            SessionState::Connected => 2,
            SessionState::Reconnecting => 3,
            SessionState::SessionExpired => 4,
        }
    }

    /// Whether the session can never connect again
    pub fn is_terminal(self) -> bool {
        self == SessionState::SessionExpired
    }

    /// Whether a connect cycle is in progress
    pub fn is_connecting(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Reconnecting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::SessionExpired => "session-expired",
        };
        f.write_str(name)
    }
}
