//! Core wire types and codec for the HDPool WebSocket protocol
//!
//! This crate holds everything that does not need a socket:
//!
//! - **Types**: outbound and inbound frame shapes
//! - **Codec**: JSON encoding/decoding of frames
//! - **Error handling**: the shared error enum and the pool's `err` object
//! - **Observability**: `tracing` subscriber and OpenTelemetry bootstrap
//!
//! The session machinery lives in `hdpool-client`.
//!
//! # Example
//!
//! ```rust
//! use hdpool_core::{codec, OutboundFrame};
//! use serde_json::json;
//!
//! let frame = OutboundFrame::new("apid.get_pool_stat")
//!     .with_chk(1000)
//!     .with_para(json!({}));
//! let text = codec::encode(&frame).unwrap();
//!
//! let reply = codec::decode(r#"{"cmd":"apid.get_pool_stat","chk":"1000","para":{"hashrate":123}}"#).unwrap();
//! assert_eq!(reply.into_outcome().unwrap(), json!({"hashrate": 123}));
//! # let _ = text;
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use error::{Error, RemoteError, Result, FATAL_RET, SESSION_EXPIRED_PREFIX};
pub use observability::{init_logging, init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{token_text, InboundFrame, OutboundFrame};
