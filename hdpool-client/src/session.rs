//! Session core
//!
//! A `Session` owns at most one live connection to the pool and keeps it
//! healthy. It offers four primitives to the role façades:
//!
//! - **connect**: [`Session::init`]
//! - **send-and-await**: [`Session::send`] / [`Session::request`]
//! - **publish/subscribe**: [`Session::subscribe`] / [`Session::publish`]
//! - **destroy**: [`Session::destroy`]
//!
//! # Controller
//!
//! All state changes happen on one controller task, spawned by `init`. Each
//! cycle connects through the [`Connector`], installs the new connection,
//! runs one acknowledged heartbeat as the handshake, then starts the liveness
//! monitor and waits. The reader and monitor tasks report to the controller
//! with [`Command`]s carrying their connection id, so a late signal from a
//! replaced connection is ignored.
//!
//! | trigger                     | reaction                                       |
//! |-----------------------------|------------------------------------------------|
//! | peer close / transport error| teardown, reconnect                            |
//! | liveness check stale        | teardown, reconnect                            |
//! | `reconnect()`               | teardown, reconnect                            |
//! | handshake failure           | teardown, wait `retry_delay`, reconnect        |
//! | session-expiry frame        | teardown, `"sessionExpired"`, clear, terminal  |
//! | `destroy(complete)`         | teardown, clear if `complete`, disconnected    |
//!
//! Teardown rejects every request pending on the old connection with
//! `ConnectionReset`. Subscriptions survive everything but a complete destroy
//! and session expiry.
//!
//! # Cloning
//!
//! `Session` is cheaply cloneable; clones share the same controller,
//! connection and event bus. The controller outlives the last clone until
//! `destroy` is called.

use crate::connection::{Connection, ExpiryLatch, ReaderContext};
use crate::connector::Connector;
use crate::correlator::{CorrelationStrategy, Correlator};
use crate::event_bus::{EventBus, Subscription};
use crate::liveness::{self, Heartbeat, HeartbeatState, LivenessConfig, Monitor, MonitorContext};
use crate::metrics::SessionMetrics;
use crate::session_builder::SessionConfig;
use crate::session_state::SessionState;
use hdpool_core::{Error, InboundFrame, OutboundFrame, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch, RwLock};

/// Messages to the controller task
pub(crate) enum Command {
    /// Explicit reconnect request
    Reconnect,
    /// The liveness check found the connection stale
    Stale { connection: u64 },
    /// The reader saw the socket end
    ConnectionLost { connection: u64 },
    /// A session-expiry frame arrived
    SessionExpired,
    /// Stop the controller
    Destroy {
        complete: bool,
        done: oneshot::Sender<()>,
    },
}

struct SessionInner {
    config: SessionConfig,
    heartbeat: Arc<dyn Heartbeat>,
    correlation: Arc<dyn CorrelationStrategy>,
    events: EventBus<Value>,
    frames: EventBus<InboundFrame>,
    state_tx: watch::Sender<SessionState>,
    connection: RwLock<Option<Arc<Connection>>>,
    control: StdMutex<Option<mpsc::UnboundedSender<Command>>>,
    heartbeat_state: HeartbeatState,
    expiry: ExpiryLatch,
    next_connection_id: AtomicU64,
    metrics: Option<Arc<SessionMetrics>>,
}

impl SessionInner {
    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Session state changed");
        }
        if let Some(ref m) = self.metrics {
            m.update_state(state.as_metric());
        }
    }

    fn control(&self) -> Option<mpsc::UnboundedSender<Command>> {
        self.control
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Forget the controller channel, unless a newer controller owns the slot
    fn release_control(&self, own: &mpsc::UnboundedSender<Command>) {
        let mut slot = self.control.lock().unwrap_or_else(|p| p.into_inner());
        if slot.as_ref().is_some_and(|current| current.same_channel(own)) {
            *slot = None;
        }
    }

    fn clear_listeners(&self) {
        self.events.clear();
        self.frames.clear();
    }

    fn connector(&self) -> Connector {
        Connector::new(
            self.config.endpoints.clone(),
            self.config.retry_delay,
            self.config.connect_timeout,
            self.events.clone(),
        )
        .with_metrics(self.metrics.clone())
    }

    fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig {
            heartbeat_interval: self.config.heartbeat_interval,
            check_interval: self.config.liveness_check_interval,
            freshness_window: self.config.freshness_window,
        }
    }

    async fn teardown(&self, connection: &Arc<Connection>) {
        {
            let mut slot = self.connection.write().await;
            if slot
                .as_ref()
                .is_some_and(|current| current.id() == connection.id())
            {
                *slot = None;
            }
        }
        connection.close().await;
    }
}

/// How a controller cycle ended
enum Cycle {
    Reconnect,
    Exit(Exit),
}

enum Exit {
    Destroy {
        complete: bool,
        done: oneshot::Sender<()>,
    },
    Expired,
}

struct Controller {
    inner: Arc<SessionInner>,
    commands: mpsc::UnboundedReceiver<Command>,
    control: mpsc::UnboundedSender<Command>,
}

impl Controller {
    async fn run(mut self) {
        let mut reconnecting = false;
        let exit = loop {
            match self.cycle(reconnecting).await {
                Cycle::Reconnect => reconnecting = true,
                Cycle::Exit(exit) => break exit,
            }
        };
        self.finish(exit);
    }

    async fn cycle(&mut self, reconnecting: bool) -> Cycle {
        if reconnecting {
            self.inner.set_state(SessionState::Reconnecting);
            if let Some(ref m) = self.inner.metrics {
                m.record_reconnect();
            }
        } else {
            self.inner.set_state(SessionState::Connecting);
        }

        // Connect, while staying responsive to destroy
        let connector = self.inner.connector();
        let connect = connector.connect();
        tokio::pin!(connect);
        let established = loop {
            tokio::select! {
                established = &mut connect => break established,
                Some(command) = self.commands.recv() => match command {
                    Command::Destroy { complete, done } => {
                        return Cycle::Exit(Exit::Destroy { complete, done });
                    }
                    Command::SessionExpired => return Cycle::Exit(Exit::Expired),
                    // Already connecting; anything else is from a replaced connection
                    _ => {}
                },
            }
        };

        let id = self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst) + 1;
        let connection = Connection::open(
            id,
            established.url,
            established.stream,
            Correlator::new(Arc::clone(&self.inner.correlation)),
            ReaderContext {
                events: self.inner.events.clone(),
                frames: self.inner.frames.clone(),
                control: self.control.clone(),
                expiry: self.inner.expiry.clone(),
                metrics: self.inner.metrics.clone(),
            },
        );
        *self.inner.connection.write().await = Some(Arc::clone(&connection));
        self.inner.heartbeat_state.reset();

        // Handshake: one acknowledged heartbeat
        let handshake = liveness::beat(
            Arc::clone(&connection),
            Arc::clone(&self.inner.heartbeat),
            self.inner.heartbeat_state.clone(),
            self.inner.config.freshness_window,
        );
        tokio::pin!(handshake);
        let outcome = loop {
            tokio::select! {
                outcome = &mut handshake => break outcome,
                Some(command) = self.commands.recv() => match command {
                    Command::Destroy { complete, done } => {
                        self.inner.teardown(&connection).await;
                        return Cycle::Exit(Exit::Destroy { complete, done });
                    }
                    Command::SessionExpired => {
                        self.inner.teardown(&connection).await;
                        return Cycle::Exit(Exit::Expired);
                    }
                    Command::Reconnect => {
                        self.inner.teardown(&connection).await;
                        return Cycle::Reconnect;
                    }
                    // A lost connection fails the handshake on its own
                    _ => {}
                },
            }
        };

        if let Err(e) = outcome {
            self.inner.teardown(&connection).await;
            if self.inner.expiry.is_tripped() {
                return Cycle::Exit(Exit::Expired);
            }

            tracing::warn!(
                connection = id,
                error = %e,
                retry_in_ms = self.inner.config.retry_delay.as_millis() as u64,
                "Handshake failed"
            );
            if let Some(ref m) = self.inner.metrics {
                m.record_error("handshake");
            }

            let pause = tokio::time::sleep(self.inner.config.retry_delay);
            tokio::pin!(pause);
            loop {
                tokio::select! {
                    _ = &mut pause => return Cycle::Reconnect,
                    Some(command) = self.commands.recv() => match command {
                        Command::Destroy { complete, done } => {
                            return Cycle::Exit(Exit::Destroy { complete, done });
                        }
                        Command::SessionExpired => return Cycle::Exit(Exit::Expired),
                        _ => {}
                    },
                }
            }
        }

        self.inner.set_state(SessionState::Connected);
        tracing::info!(connection = id, url = %connection.url(), "Session connected");

        let monitor = Monitor::start(
            Arc::clone(&connection),
            self.inner.liveness_config(),
            MonitorContext {
                heartbeat: Arc::clone(&self.inner.heartbeat),
                state: self.inner.heartbeat_state.clone(),
                session_state: self.inner.state_tx.subscribe(),
                control: self.control.clone(),
                events: self.inner.events.clone(),
                metrics: self.inner.metrics.clone(),
            },
        );

        let next = loop {
            let Some(command) = self.commands.recv().await else {
                // Unreachable while we hold `control`; treat as a destroy
                let (done, _) = oneshot::channel();
                break Cycle::Exit(Exit::Destroy {
                    complete: false,
                    done,
                });
            };

            match command {
                Command::Reconnect => {
                    tracing::info!(connection = id, "Reconnect requested");
                    break Cycle::Reconnect;
                }
                Command::Stale { connection: stale } if stale == id => {
                    break Cycle::Reconnect;
                }
                Command::ConnectionLost { connection: lost } if lost == id => {
                    tracing::info!(connection = id, "Connection lost, reconnecting");
                    break Cycle::Reconnect;
                }
                Command::SessionExpired => break Cycle::Exit(Exit::Expired),
                Command::Destroy { complete, done } => {
                    break Cycle::Exit(Exit::Destroy { complete, done });
                }
                other => {
                    tracing::debug!(connection = id, signal = ?other, "Ignoring signal from replaced connection");
                }
            }
        };

        monitor.stop();
        self.inner.teardown(&connection).await;
        next
    }

    fn finish(self, exit: Exit) {
        match exit {
            Exit::Destroy { complete, done } => {
                if complete {
                    self.inner.clear_listeners();
                }
                self.inner.set_state(SessionState::Disconnected);
                self.inner.release_control(&self.control);
                tracing::info!(complete, "Session destroyed");
                let _ = done.send(());
            }
            Exit::Expired => {
                let payload = self
                    .inner
                    .expiry
                    .error()
                    .and_then(|err| serde_json::to_value(err).ok())
                    .unwrap_or(Value::Null);
                self.inner.events.publish("sessionExpired", &payload);
                self.inner.clear_listeners();
                self.inner.set_state(SessionState::SessionExpired);
                self.inner.release_control(&self.control);
                tracing::warn!("Session expired; not reconnecting");
            }
        }
    }
}

/// Long-lived pool session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(
        config: SessionConfig,
        heartbeat: Arc<dyn Heartbeat>,
        correlation: Arc<dyn CorrelationStrategy>,
        metrics: Option<Arc<SessionMetrics>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            inner: Arc::new(SessionInner {
                config,
                heartbeat,
                correlation,
                events: EventBus::new(),
                frames: EventBus::new(),
                state_tx,
                connection: RwLock::new(None),
                control: StdMutex::new(None),
                heartbeat_state: HeartbeatState::new(),
                expiry: ExpiryLatch::default(),
                next_connection_id: AtomicU64::new(0),
                metrics,
            }),
        }
    }

    /// Connect and complete the handshake
    ///
    /// Starts the controller if it is not running and waits until the
    /// session is `Connected`. Fails with `SessionExpired` once the pool has
    /// rejected the session key, and with `NotConnected` if the session is
    /// destroyed before it connects.
    #[tracing::instrument(skip(self), fields(endpoints = self.inner.config.endpoints.len()))]
    pub async fn init(&self) -> Result<()> {
        if self.inner.expiry.is_tripped() {
            return Err(Error::SessionExpired);
        }

        let mut state_rx = self.inner.state_tx.subscribe();
        {
            let mut slot = self.inner.control.lock().unwrap_or_else(|p| p.into_inner());
            if slot.is_none() {
                let (control, commands) = mpsc::unbounded_channel();
                *slot = Some(control.clone());
                self.inner.set_state(SessionState::Connecting);

                tracing::info!("Starting session");
                let controller = Controller {
                    inner: Arc::clone(&self.inner),
                    commands,
                    control,
                };
                tokio::spawn(controller.run());
            }
        }

        wait_for_connected(&mut state_rx).await
    }

    /// Replace the connection and wait until the new one is up
    ///
    /// Pending requests on the old connection fail with `ConnectionReset`;
    /// subscriptions are kept.
    #[tracing::instrument(skip(self))]
    pub async fn reconnect(&self) -> Result<()> {
        let control = self.inner.control().ok_or(Error::NotConnected)?;
        let mut state_rx = self.inner.state_tx.subscribe();

        control
            .send(Command::Reconnect)
            .map_err(|_| Error::NotConnected)?;

        loop {
            state_rx
                .changed()
                .await
                .map_err(|_| Error::Internal("session state channel closed".to_string()))?;
            match *state_rx.borrow_and_update() {
                SessionState::Connected => return Ok(()),
                SessionState::SessionExpired => return Err(Error::SessionExpired),
                SessionState::Disconnected => return Err(Error::NotConnected),
                SessionState::Connecting | SessionState::Reconnecting => {}
            }
        }
    }

    /// Stop timers and close the connection
    ///
    /// With `complete`, every subscription (and façade frame listener) is
    /// dropped too; otherwise they survive a later `init`. Waits for the
    /// controller to finish.
    #[tracing::instrument(skip(self))]
    pub async fn destroy(&self, complete: bool) {
        if let Some(control) = self.inner.control() {
            let (done, finished) = oneshot::channel();
            if control.send(Command::Destroy { complete, done }).is_ok() {
                let _ = finished.await;
                return;
            }
        }

        // No controller running
        if complete {
            self.inner.clear_listeners();
        }
        if *self.inner.state_tx.borrow() != SessionState::SessionExpired {
            self.inner.set_state(SessionState::Disconnected);
        }
    }

    /// Send a frame and wait for its reply's `para`
    ///
    /// A reply carrying `err` fails with [`Error::Protocol`]. There is no
    /// timeout: the request ends with its reply or with `ConnectionReset`
    /// when its connection is torn down.
    #[tracing::instrument(skip(self, frame), fields(cmd = %frame.cmd))]
    pub async fn send(&self, frame: OutboundFrame) -> Result<Value> {
        let start = Instant::now();
        let cmd = frame.cmd.clone();
        let connection = self.connection().await?;

        let result = connection.request(frame).await;

        let duration = start.elapsed().as_secs_f64();
        match &result {
            Ok(_) => {
                tracing::debug!(duration_secs = duration, "Request completed");
                if let Some(ref m) = self.inner.metrics {
                    m.record_request(&cmd, "success", duration);
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Request failed");
                if let Some(ref m) = self.inner.metrics {
                    m.record_request(&cmd, "error", duration);
                    m.record_error(match e {
                        Error::Protocol(_) => "protocol",
                        Error::ConnectionReset => "connection_reset",
                        _ => "transport",
                    });
                }
            }
        }

        result
    }

    /// Send a frame and deserialize its reply
    pub async fn request<R>(&self, frame: OutboundFrame) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let value = self.send(frame).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Write a frame without waiting for, or registering, a reply
    #[tracing::instrument(skip(self, frame), fields(cmd = %frame.cmd))]
    pub async fn send_no_reply(&self, frame: OutboundFrame) -> Result<()> {
        let connection = self.connection().await?;
        connection.transmit(&frame).await
    }

    /// Subscribe to a session topic
    ///
    /// Topics: `"websocket/opened"`, `"websocket/closed"`,
    /// `"websocket/broken"`, `"debug"`, `"sessionExpired"`, plus whatever
    /// the façades publish.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(topic, callback)
    }

    /// Publish on a session topic
    pub fn publish(&self, topic: &str, payload: &Value) -> usize {
        self.inner.events.publish(topic, payload)
    }

    /// Listen to every inbound frame with the given `cmd`
    ///
    /// Sees replies as well as pushes; runs after correlation.
    pub fn on_frame<F>(&self, cmd: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&InboundFrame) + Send + Sync + 'static,
    {
        self.inner.frames.subscribe(cmd, callback)
    }

    /// The session's event bus
    pub fn events(&self) -> &EventBus<Value> {
        &self.inner.events
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Whether the pool has rejected the session key
    pub fn is_expired(&self) -> bool {
        self.inner.expiry.is_tripped()
    }

    /// Settings the session was built with
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Time since the last heartbeat evidence
    pub fn heartbeat_age(&self) -> std::time::Duration {
        self.inner.heartbeat_state.elapsed()
    }

    /// Requests waiting on the current connection
    pub async fn pending_requests(&self) -> usize {
        match self.inner.connection.read().await.as_ref() {
            Some(connection) => connection.pending_count().await,
            None => 0,
        }
    }

    /// Endpoint of the current connection
    pub async fn connected_url(&self) -> Option<String> {
        self.inner
            .connection
            .read()
            .await
            .as_ref()
            .map(|connection| connection.url().to_string())
    }

    pub(crate) fn metrics(&self) -> Option<Arc<SessionMetrics>> {
        self.inner.metrics.clone()
    }

    async fn connection(&self) -> Result<Arc<Connection>> {
        match self.inner.connection.read().await.as_ref() {
            Some(connection) if !connection.is_closed() => Ok(Arc::clone(connection)),
            _ => Err(Error::NotConnected),
        }
    }
}

async fn wait_for_connected(state_rx: &mut watch::Receiver<SessionState>) -> Result<()> {
    loop {
        match *state_rx.borrow_and_update() {
            SessionState::Connected => return Ok(()),
            SessionState::SessionExpired => return Err(Error::SessionExpired),
            SessionState::Disconnected => return Err(Error::NotConnected),
            SessionState::Connecting | SessionState::Reconnecting => {}
        }
        state_rx
            .changed()
            .await
            .map_err(|_| Error::Internal("session state channel closed".to_string()))?;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("endpoints", &self.inner.config.endpoints)
            .finish()
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Reconnect => f.write_str("Reconnect"),
            Command::Stale { connection } => write!(f, "Stale({})", connection),
            Command::ConnectionLost { connection } => write!(f, "ConnectionLost({})", connection),
            Command::SessionExpired => f.write_str("SessionExpired"),
            Command::Destroy { complete, .. } => write!(f, "Destroy(complete={})", complete),
        }
    }
}
