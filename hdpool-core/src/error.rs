//! Error types for hdpool
//!
//! This module defines the single error type shared by every hdpool crate,
//! plus the wire-format error object the pool attaches to failed replies.
//!
//! # Error Categories
//!
//! - **Remote errors**: `Protocol` wraps the `err` object of an inbound frame
//! - **Session errors**: `SessionExpired`, `ConnectionReset`, `NotConnected`
//! - **Transport errors**: `ConnectionFailure`, `WebSocket`, `StaleConnection`
//! - **Local errors**: `InvalidArgument`, `Serialization`, `Internal`
//!
//! # Propagation
//!
//! Transport failures are absorbed by the connector and retried, so
//! `ConnectionFailure` and `StaleConnection` normally only appear in logs and
//! on the event bus. `Protocol` rejects exactly the one request whose reply
//! carried it. `ConnectionReset` is fanned out to every request that was
//! still waiting when its connection was torn down, which is why the enum is
//! `Clone`.
//!
//! # Examples
//!
//! ```rust
//! use hdpool_core::{Error, RemoteError};
//!
//! let remote = RemoteError::new("EFATAL", "boom");
//! let error = Error::Protocol(remote);
//! assert_eq!(error.remote_message(), Some("boom"));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for hdpool operations
pub type Result<T> = std::result::Result<T, Error>;

/// `err.ret` value the pool uses for unrecoverable failures
pub const FATAL_RET: &str = "EFATAL";

/// Prefix of `err.msg` signalling that the session key is no longer valid
pub const SESSION_EXPIRED_PREFIX: &str = "uid not equ.";

/// Application-level error type for hdpool operations
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The pool answered the request with an `err` object
    ///
    /// Only the request whose reply carried the error is rejected; the
    /// caller decides whether to retry.
    #[error("Protocol error: {0}")]
    Protocol(#[from] RemoteError),

    /// An endpoint attempt did not open
    ///
    /// Retried transparently by the connector and never returned to callers.
    #[error("Connection to {url} failed: {reason}")]
    ConnectionFailure {
        /// Endpoint that was attempted
        url: String,
        /// Why the attempt failed
        reason: String,
    },

    /// The connection a request was waiting on was torn down
    #[error("Connection reset before a reply arrived")]
    ConnectionReset,

    /// No heartbeat evidence within the freshness window
    #[error("Connection stale: no heartbeat for {elapsed_ms}ms")]
    StaleConnection {
        /// Time since the last successful heartbeat
        elapsed_ms: u64,
    },

    /// The pool rejected the session key; terminal
    #[error("Session expired")]
    SessionExpired,

    /// No connection is currently established
    #[error("Not connected")]
    NotConnected,

    /// A façade argument failed validation before anything was sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebSocket transport layer error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The remote-supplied message, if this is a protocol error
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Error::Protocol(remote) => Some(&remote.msg),
            _ => None,
        }
    }

    /// Whether this error is the terminal session-expiry signal
    pub fn is_session_expired(&self) -> bool {
        match self {
            Error::SessionExpired => true,
            Error::Protocol(remote) => remote.is_session_expired(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Error object carried in the `err` field of an inbound frame
///
/// ```json
/// { "ret": "EFATAL", "msg": "uid not equ. session" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Pool error code, e.g. `"EFATAL"`
    #[serde(default)]
    pub ret: String,

    /// Human-readable message
    #[serde(default)]
    pub msg: String,
}

impl RemoteError {
    /// Create a remote error from its code and message
    pub fn new(ret: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            ret: ret.into(),
            msg: msg.into(),
        }
    }

    /// Whether the pool is telling us the session key is no longer valid
    pub fn is_session_expired(&self) -> bool {
        self.ret == FATAL_RET && self.msg.starts_with(SESSION_EXPIRED_PREFIX)
    }
}

impl std::fmt::Display for RemoteError {
    /// Formats as "[ret] msg"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.ret, self.msg)
    }
}

impl std::error::Error for RemoteError {}
