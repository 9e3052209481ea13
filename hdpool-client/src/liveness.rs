//! Heartbeats and staleness detection
//!
//! Two timers run per connection and share one [`HeartbeatState`]:
//!
//! - the **heartbeat** timer sends the role's heartbeat frame every
//!   `heartbeat_interval` and records the instant of each success (the
//!   reply for acknowledged heartbeats, the write otherwise);
//! - the **check** timer runs every `liveness_check_interval` and, while the
//!   session is connected, compares the time since the last success with the
//!   freshness window. Once it is exceeded it publishes `"websocket/broken"`,
//!   asks the controller for one reconnect, and stops.
//!
//! A heartbeat round trip is itself bounded by the freshness window, so a
//! pool that stops answering cannot park the heartbeat timer forever.

use crate::connection::Connection;
use crate::event_bus::EventBus;
use crate::metrics::SessionMetrics;
use crate::session::Command;
use crate::session_state::SessionState;
use hdpool_core::{Error, OutboundFrame, Result};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

/// The frame a role sends to keep its session alive
pub trait Heartbeat: Send + Sync {
    /// Heartbeat frame to send
    fn frame(&self) -> OutboundFrame;

    /// Whether freshness requires the pool's reply
    ///
    /// When false, a successful write counts as evidence.
    fn requires_ack(&self) -> bool {
        true
    }
}

/// Plain `online.heartbeat` with no parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct OnlineHeartbeat;

impl Heartbeat for OnlineHeartbeat {
    fn frame(&self) -> OutboundFrame {
        OutboundFrame::new("online.heartbeat")
    }
}

/// Instant of the last successful heartbeat
#[derive(Clone)]
pub struct HeartbeatState {
    last: Arc<Mutex<Instant>>,
}

impl HeartbeatState {
    /// Start fresh
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Record heartbeat evidence now
    pub fn record(&self) {
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    /// Start a new freshness window, used when a connection is replaced
    pub fn reset(&self) {
        self.record();
    }

    /// Time since the last evidence
    pub fn elapsed(&self) -> Duration {
        self.last.lock().unwrap_or_else(|p| p.into_inner()).elapsed()
    }
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `elapsed` without evidence exceeds the freshness window
pub fn is_stale(elapsed: Duration, freshness_window: Duration) -> bool {
    elapsed > freshness_window
}

/// Send one heartbeat and record it on success
///
/// Used for the handshake as well as by the heartbeat timer.
pub(crate) async fn beat(
    connection: Arc<Connection>,
    heartbeat: Arc<dyn Heartbeat>,
    state: HeartbeatState,
    freshness_window: Duration,
) -> Result<()> {
    let frame = heartbeat.frame();

    if heartbeat.requires_ack() {
        match timeout(freshness_window, connection.request(frame)).await {
            Ok(reply) => {
                reply?;
            }
            Err(_) => {
                return Err(Error::StaleConnection {
                    elapsed_ms: freshness_window.as_millis() as u64,
                })
            }
        }
    } else {
        connection.transmit(&frame).await?;
    }

    state.record();
    Ok(())
}

/// Timer settings
#[derive(Debug, Clone, Copy)]
pub(crate) struct LivenessConfig {
    pub(crate) heartbeat_interval: Duration,
    pub(crate) check_interval: Duration,
    pub(crate) freshness_window: Duration,
}

/// Shared handles the timers work with
#[derive(Clone)]
pub(crate) struct MonitorContext {
    pub(crate) heartbeat: Arc<dyn Heartbeat>,
    pub(crate) state: HeartbeatState,
    pub(crate) session_state: watch::Receiver<SessionState>,
    pub(crate) control: mpsc::UnboundedSender<Command>,
    pub(crate) events: EventBus<Value>,
    pub(crate) metrics: Option<Arc<SessionMetrics>>,
}

/// Running timers for one connection; stopped on drop
pub(crate) struct Monitor {
    tasks: Vec<JoinHandle<()>>,
}

impl Monitor {
    pub(crate) fn start(
        connection: Arc<Connection>,
        config: LivenessConfig,
        ctx: MonitorContext,
    ) -> Self {
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            Arc::clone(&connection),
            config,
            ctx.clone(),
        ));
        let check_task = tokio::spawn(check_loop(connection, config, ctx));

        Self {
            tasks: vec![heartbeat_task, check_task],
        }
    }

    pub(crate) fn stop(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn heartbeat_loop(connection: Arc<Connection>, config: LivenessConfig, ctx: MonitorContext) {
    let mut ticker = interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The handshake just sent one
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let outcome = beat(
            Arc::clone(&connection),
            Arc::clone(&ctx.heartbeat),
            ctx.state.clone(),
            config.freshness_window,
        )
        .await;

        match outcome {
            Ok(()) => {
                tracing::trace!(connection = connection.id(), "Heartbeat acknowledged");
                if let Some(ref m) = ctx.metrics {
                    m.record_heartbeat("ok");
                }
            }
            Err(Error::ConnectionReset) | Err(Error::NotConnected) => break,
            Err(e) => {
                tracing::warn!(connection = connection.id(), error = %e, "Heartbeat failed");
                if let Some(ref m) = ctx.metrics {
                    m.record_heartbeat("failed");
                }
            }
        }
    }
}

async fn check_loop(connection: Arc<Connection>, config: LivenessConfig, ctx: MonitorContext) {
    let mut ticker = interval(config.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if *ctx.session_state.borrow() != SessionState::Connected {
            continue;
        }

        let elapsed = ctx.state.elapsed();
        if !is_stale(elapsed, config.freshness_window) {
            continue;
        }

        let elapsed_ms = elapsed.as_millis() as u64;
        let error = Error::StaleConnection { elapsed_ms };
        tracing::warn!(connection = connection.id(), url = %connection.url(), error = %error, "Connection broken");
        if let Some(ref m) = ctx.metrics {
            m.record_stale();
        }

        ctx.events.publish(
            "websocket/broken",
            &json!({ "url": connection.url(), "connection": connection.id(), "elapsed_ms": elapsed_ms }),
        );
        let _ = ctx.control.send(Command::Stale {
            connection: connection.id(),
        });
        break;
    }
}
