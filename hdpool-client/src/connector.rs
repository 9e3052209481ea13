//! Transport connector
//!
//! Opens one WebSocket from an [`EndpointList`]. Attempts go round-robin, one
//! at a time, each bounded by a connect timeout. A failed attempt is logged,
//! followed by a fixed delay, and the next endpoint is tried. The loop never
//! gives up: `connect` returns only once an attempt opens, or is dropped by
//! its caller.
//!
//! # Events
//!
//! - `"debug"` once per attempt: `{"message": "connecting", "attempt", "url"}`
//! - `"websocket/opened"` on success: `{"url", "attempt"}`

use crate::endpoint::EndpointList;
use crate::event_bus::EventBus;
use crate::metrics::SessionMetrics;
use hdpool_core::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The socket type every connection runs on
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A freshly opened socket and where it came from
pub struct Established {
    /// The open socket
    pub stream: WsStream,
    /// Endpoint that accepted the connection
    pub url: String,
    /// Attempt number (0-based) within this connect cycle
    pub attempt: u64,
}

/// Opens sockets from an endpoint list
#[derive(Clone)]
pub struct Connector {
    endpoints: EndpointList,
    retry_delay: Duration,
    connect_timeout: Duration,
    events: EventBus<Value>,
    metrics: Option<Arc<SessionMetrics>>,
}

impl Connector {
    /// Create a connector publishing its events on `events`
    pub fn new(
        endpoints: EndpointList,
        retry_delay: Duration,
        connect_timeout: Duration,
        events: EventBus<Value>,
    ) -> Self {
        Self {
            endpoints,
            retry_delay,
            connect_timeout,
            events,
            metrics: None,
        }
    }

    /// Record attempts on the given metrics
    pub fn with_metrics(mut self, metrics: Option<Arc<SessionMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Endpoints this connector rotates through
    pub fn endpoints(&self) -> &EndpointList {
        &self.endpoints
    }

    /// Make one bounded attempt against `url`
    pub async fn attempt(&self, url: &str) -> Result<WsStream> {
        match timeout(self.connect_timeout, connect_async(url)).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(Error::ConnectionFailure {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionFailure {
                url: url.to_string(),
                reason: format!("no answer within {:?}", self.connect_timeout),
            }),
        }
    }

    /// Rotate through the endpoints until one opens
    #[tracing::instrument(skip(self), fields(endpoints = self.endpoints.len()))]
    pub async fn connect(&self) -> Established {
        let mut attempt: u64 = 0;

        loop {
            let url = self.endpoints.for_attempt(attempt).to_string();

            self.events.publish(
                "debug",
                &json!({ "message": "connecting", "attempt": attempt, "url": url }),
            );
            tracing::debug!(url = %url, attempt, "Connecting");

            match self.attempt(&url).await {
                Ok(stream) => {
                    if let Some(ref m) = self.metrics {
                        m.record_connect_attempt(&url, "opened");
                    }
                    tracing::info!(url = %url, attempt, "WebSocket opened");
                    self.events
                        .publish("websocket/opened", &json!({ "url": url, "attempt": attempt }));
                    return Established {
                        stream,
                        url,
                        attempt,
                    };
                }
                Err(e) => {
                    if let Some(ref m) = self.metrics {
                        m.record_connect_attempt(&url, "failed");
                    }
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = self.retry_delay.as_millis() as u64,
                        "Connection attempt failed"
                    );
                }
            }

            sleep(self.retry_delay).await;
            attempt += 1;
        }
    }
}
