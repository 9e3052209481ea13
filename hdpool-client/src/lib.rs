//! HDPool WebSocket session client
//!
//! This crate keeps one long-lived WebSocket session to an HDPool endpoint
//! healthy and exposes the pool's JSON commands on top of it.
//!
//! # Core Features
//!
//! - **Endpoint rotation**: round-robin over candidate URLs with a fixed
//!   retry delay until one opens
//! - **Liveness**: periodic heartbeats plus a staleness check that forces a
//!   full reconnect
//! - **Request/response**: replies are matched to requests by command name
//!   (and `chk` token when echoed)
//! - **Pub/Sub**: an in-process event bus for connection events and pool
//!   pushes; subscriptions survive reconnects
//! - **Session expiry**: a rejected session key tears the session down for
//!   good
//! - **Façades**: [`AccountApi`], [`MiningApi`] and [`PublicApi`]
//! - **Observability**: `tracing` everywhere, optional OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hdpool_client::PublicApi;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = PublicApi::new()?;
//!     api.init().await?;
//!
//!     api.on_best_mining_info(|info| {
//!         println!("best mining info: {}", info);
//!     });
//!
//!     let stats = api.get_pool_stats().await?;
//!     println!("pool stats: {}", stats);
//!
//!     api.destroy(true).await;
//!     Ok(())
//! }
//! ```
//!
//! # Raw Session
//!
//! ```rust,no_run
//! use hdpool_client::{OnlineHeartbeat, SessionBuilder};
//! use hdpool_core::OutboundFrame;
//! use serde_json::json;
//!
//! # async fn example() -> hdpool_core::Result<()> {
//! let session = SessionBuilder::new(["wss://hdpool.com"]).build(OnlineHeartbeat)?;
//! session.init().await?;
//!
//! session.subscribe("websocket/broken", |event| {
//!     eprintln!("connection went stale: {}", event);
//! });
//!
//! let stats = session
//!     .send(OutboundFrame::new("apid.get_pool_stat").with_chk(1000).with_para(json!({})))
//!     .await?;
//! # let _ = stats;
//! # Ok(())
//! # }
//! ```

pub mod api;
mod connection;
mod connector;
mod correlator;
mod endpoint;
mod event_bus;
mod liveness;
mod metrics;
mod session;
mod session_builder;
mod session_state;

pub use api::{AccountApi, HeightFilter, MiningApi, PublicApi};
pub use connector::{Connector, Established, WsStream};
pub use correlator::{CommandCorrelation, CorrelationStrategy, Correlator, RequestKey, Ticket};
pub use endpoint::{endpoint_index, EndpointList};
pub use event_bus::{Callback, EventBus, Subscription};
pub use liveness::{is_stale, Heartbeat, HeartbeatState, OnlineHeartbeat};
pub use metrics::SessionMetrics;
pub use session::Session;
pub use session_builder::{
    SessionBuilder, SessionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_FRESHNESS_WINDOW,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_LIVENESS_CHECK_INTERVAL, DEFAULT_RETRY_DELAY,
};
pub use session_state::SessionState;
