//! One live socket
//!
//! A `Connection` is created per successful connect and never reused: a
//! reconnect builds a new one with a new id. It owns the write half of the
//! socket, a [`Correlator`] for its outstanding requests, and a reader task
//! that processes inbound frames strictly in arrival order:
//!
//! 1. decode the text frame
//! 2. on a session-expiry error, latch it and signal the controller
//! 3. offer it to the correlator (resolves at most one request)
//! 4. publish it on the frame bus under its `cmd`
//!
//! When the socket ends (peer close or transport error), the reader rejects
//! the pending requests, publishes `"websocket/closed"` and tells the
//! controller. Signals carry the connection id so the controller can ignore
//! stragglers from a connection it already replaced.

use crate::connector::WsStream;
use crate::correlator::Correlator;
use crate::event_bus::EventBus;
use crate::metrics::SessionMetrics;
use crate::session::Command;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use hdpool_core::{codec, Error, InboundFrame, OutboundFrame, RemoteError, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

type WsSink = SplitSink<WsStream, Message>;

/// Upper bound on the close handshake during teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// First session-expiry error seen by any connection of a session
#[derive(Clone, Default)]
pub(crate) struct ExpiryLatch(Arc<StdMutex<Option<RemoteError>>>);

impl ExpiryLatch {
    /// Record the error; returns true the first time only
    pub(crate) fn trip(&self, error: RemoteError) -> bool {
        let mut slot = self.0.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(error);
        true
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    pub(crate) fn error(&self) -> Option<RemoteError> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Everything the reader task needs besides the socket
#[derive(Clone)]
pub(crate) struct ReaderContext {
    pub(crate) events: EventBus<Value>,
    pub(crate) frames: EventBus<InboundFrame>,
    pub(crate) control: mpsc::UnboundedSender<Command>,
    pub(crate) expiry: ExpiryLatch,
    pub(crate) metrics: Option<Arc<SessionMetrics>>,
}

pub(crate) struct Connection {
    id: u64,
    url: String,
    sender: Mutex<WsSink>,
    correlator: Correlator,
    closed: Arc<AtomicBool>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    events: EventBus<Value>,
}

impl Connection {
    /// Split the socket and start the reader task
    pub(crate) fn open(
        id: u64,
        url: String,
        stream: WsStream,
        correlator: Correlator,
        ctx: ReaderContext,
    ) -> Arc<Self> {
        let (sender, receiver) = stream.split();
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            id,
            url.clone(),
            receiver,
            correlator.clone(),
            Arc::clone(&closed),
            ctx.clone(),
        ));

        Arc::new(Self {
            id,
            url,
            sender: Mutex::new(sender),
            correlator,
            closed,
            reader: StdMutex::new(Some(reader)),
            events: ctx.events,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write one frame without registering for a reply
    pub(crate) async fn transmit(&self, frame: &OutboundFrame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }
        let text = codec::encode(frame)?;
        tracing::debug!(connection = self.id, cmd = %frame.cmd, "Sending frame");
        self.sender
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    /// Register, transmit, and wait for the matching reply
    pub(crate) async fn request(&self, frame: OutboundFrame) -> Result<Value> {
        let (ticket, rx) = self.correlator.register(&frame).await?;

        if let Err(e) = self.transmit(&frame).await {
            self.correlator.cancel(ticket).await;
            return Err(e);
        }

        rx.await.map_err(|_| Error::ConnectionReset)?
    }

    /// Number of requests waiting on this connection
    pub(crate) async fn pending_count(&self) -> usize {
        self.correlator.pending_count().await
    }

    /// Tear the connection down
    ///
    /// Rejects every pending request with `ConnectionReset`, stops the reader
    /// and closes the socket. `"websocket/closed"` is published once per
    /// connection, whichever of `close` and the reader gets there first.
    pub(crate) async fn close(&self) {
        let first = !self.closed.swap(true, Ordering::SeqCst);

        let rejected = self.correlator.close(Error::ConnectionReset).await;
        if rejected > 0 {
            tracing::debug!(connection = self.id, rejected, "Rejected pending requests");
        }

        let reader = self.reader.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = reader {
            handle.abort();
        }

        // The peer may already be gone, or black-holed
        let _ = timeout(CLOSE_TIMEOUT, async {
            let _ = self.sender.lock().await.close().await;
        })
        .await;

        if first {
            tracing::info!(connection = self.id, url = %self.url, "Connection closed");
            self.events.publish(
                "websocket/closed",
                &json!({ "url": self.url, "connection": self.id }),
            );
        }
    }
}

async fn read_loop(
    id: u64,
    url: String,
    mut receiver: SplitStream<WsStream>,
    correlator: Correlator,
    closed: Arc<AtomicBool>,
    ctx: ReaderContext,
) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => handle_text(id, &text, &correlator, &ctx).await,
            Ok(Message::Close(frame)) => {
                tracing::info!(connection = id, close = ?frame, "Connection closed by pool");
                break;
            }
            Err(e) => {
                tracing::warn!(connection = id, error = %e, "WebSocket error");
                if let Some(ref m) = ctx.metrics {
                    m.record_error("websocket");
                }
                break;
            }
            // Ping/pong are answered by tungstenite; binary frames are not part of the protocol
            _ => {}
        }
    }

    if !closed.swap(true, Ordering::SeqCst) {
        correlator.close(Error::ConnectionReset).await;
        ctx.events
            .publish("websocket/closed", &json!({ "url": url, "connection": id }));
    }
    let _ = ctx.control.send(Command::ConnectionLost { connection: id });
}

async fn handle_text(id: u64, text: &str, correlator: &Correlator, ctx: &ReaderContext) {
    let frame = match codec::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(connection = id, error = %e, "Dropping undecodable frame");
            if let Some(ref m) = ctx.metrics {
                m.record_error("decode");
            }
            return;
        }
    };

    tracing::debug!(connection = id, cmd = %frame.cmd, "Frame received");
    if let Some(ref m) = ctx.metrics {
        m.record_frame(&frame.cmd);
    }

    // Signal before dispatch so the controller sees expiry before any
    // request it answers can resume
    if let Some(err) = frame.err.as_ref().filter(|err| err.is_session_expired()) {
        if ctx.expiry.trip(err.clone()) {
            tracing::warn!(connection = id, error = %err, "Session expired");
            let _ = ctx.control.send(Command::SessionExpired);
        }
    }

    correlator.dispatch(&frame).await;
    ctx.frames.publish(&frame.cmd, &frame);
}
