//! Common test utilities for hdpool-client integration tests
//!
//! A scriptable pool endpoint: every inbound frame is recorded and handed to
//! a handler that decides what to send back. Tests can also push frames to
//! every open connection or drop them all.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use hdpool_client::SessionBuilder;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Decides the replies to one inbound frame; gets the connection index
/// (0 for the first connection the server accepted)
pub type Handler = Arc<dyn Fn(usize, &Value) -> Vec<String> + Send + Sync>;

/// Mock pool endpoint
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    received: Arc<Mutex<Vec<(usize, Value)>>>,
    peers: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
    connections: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Server that acknowledges heartbeats and ignores everything else
    pub async fn new() -> Self {
        Self::with_handler(|_, frame| ack_heartbeat(frame)).await
    }

    /// Server that acknowledges heartbeats and asks `handler` about the rest
    pub async fn acking<F>(handler: F) -> Self
    where
        F: Fn(usize, &Value) -> Vec<String> + Send + Sync + 'static,
    {
        Self::with_handler(move |conn, frame| {
            if is_heartbeat(frame) {
                ack_heartbeat(frame)
            } else {
                handler(conn, frame)
            }
        })
        .await
    }

    /// Server fully driven by `handler`, heartbeats included
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(usize, &Value) -> Vec<String> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let received = Arc::new(Mutex::new(Vec::new()));
        let peers = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_received = Arc::clone(&received);
        let accept_peers = Arc::clone(&peers);
        let accept_connections = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let handler = Arc::clone(&handler);
                        let received = Arc::clone(&accept_received);
                        let peers = Arc::clone(&accept_peers);
                        let connections = Arc::clone(&accept_connections);

                        tokio::spawn(async move {
                            let Ok(ws_stream) = accept_async(stream).await else { return };
                            let index = connections.fetch_add(1, Ordering::SeqCst);
                            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
                            peers.lock().unwrap().push(out_tx);
                            let (mut write, mut read) = ws_stream.split();

                            loop {
                                tokio::select! {
                                    inbound = read.next() => match inbound {
                                        Some(Ok(Message::Text(text))) => {
                                            let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                                                continue;
                                            };
                                            received.lock().unwrap().push((index, frame.clone()));
                                            for reply in handler(index, &frame) {
                                                if write.send(Message::Text(reply)).await.is_err() {
                                                    return;
                                                }
                                            }
                                        }
                                        Some(Ok(_)) => {}
                                        _ => return,
                                    },
                                    outbound = out_rx.recv() => match outbound {
                                        Some(Message::Close(frame)) => {
                                            let _ = write.send(Message::Close(frame)).await;
                                            return;
                                        }
                                        Some(message) => {
                                            if write.send(message).await.is_err() {
                                                return;
                                            }
                                        }
                                        None => return,
                                    },
                                }
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            received,
            peers,
            connections,
        }
    }

    /// WebSocket URL of this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Every frame received so far, with its connection index
    pub fn received(&self) -> Vec<(usize, Value)> {
        self.received.lock().unwrap().clone()
    }

    /// Frames received with the given `cmd`
    pub fn received_cmd(&self, cmd: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|(_, frame)| frame["cmd"] == cmd)
            .map(|(_, frame)| frame)
            .collect()
    }

    /// Wait until a frame with the given `cmd` arrives
    pub async fn wait_for_cmd(&self, cmd: &str) -> Option<Value> {
        let received = Arc::clone(&self.received);
        let found = eventually(Duration::from_secs(5), || {
            received
                .lock()
                .unwrap()
                .iter()
                .any(|(_, frame)| frame["cmd"] == cmd)
        })
        .await;
        if found {
            self.received_cmd(cmd).into_iter().next()
        } else {
            None
        }
    }

    /// Send a frame to every open connection
    pub fn push(&self, text: String) {
        let peers = self.peers.lock().unwrap();
        for peer in peers.iter() {
            let _ = peer.send(Message::Text(text.clone()));
        }
    }

    /// Close every open connection from the server side
    pub fn close_all(&self) {
        let mut peers = self.peers.lock().unwrap();
        for peer in peers.drain(..) {
            let _ = peer.send(Message::Close(None));
        }
    }

    /// Stop accepting connections
    pub async fn shutdown(self) {
        self.close_all();
        let _ = self.shutdown_tx.send(()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Whether the frame is a heartbeat of either role
pub fn is_heartbeat(frame: &Value) -> bool {
    matches!(
        frame["cmd"].as_str(),
        Some("online.heartbeat") | Some("poolmgr.heartbeat")
    )
}

/// Acknowledge a heartbeat, ignore anything else
pub fn ack_heartbeat(frame: &Value) -> Vec<String> {
    if is_heartbeat(frame) {
        vec![reply(frame, json!({}))]
    } else {
        Vec::new()
    }
}

/// Successful reply to `request`, echoing its `chk`
pub fn reply(request: &Value, para: Value) -> String {
    let mut frame = json!({ "cmd": request["cmd"], "para": para });
    if let Some(chk) = request.get("chk") {
        frame["chk"] = chk.clone();
    }
    frame.to_string()
}

/// Error reply to `request`, echoing its `chk`
pub fn error_reply(request: &Value, ret: &str, msg: &str) -> String {
    let mut frame = json!({ "cmd": request["cmd"], "err": { "ret": ret, "msg": msg } });
    if let Some(chk) = request.get("chk") {
        frame["chk"] = chk.clone();
    }
    frame.to_string()
}

/// Unsolicited frame
pub fn push_frame(cmd: &str, para: Value) -> String {
    json!({ "cmd": cmd, "para": para }).to_string()
}

/// A ws:// URL nothing listens on
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

/// Builder with timers short enough for tests
pub fn fast_builder<I, S>(endpoints: I) -> SessionBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    SessionBuilder::new(endpoints)
        .retry_delay(Duration::from_millis(50))
        .connect_timeout(Duration::from_secs(1))
        .heartbeat_interval(Duration::from_secs(1))
        .liveness_check_interval(Duration::from_millis(50))
        .freshness_window(Duration::from_secs(2))
}

/// Route client logs to the test harness; `RUST_LOG` picks the level
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every 10ms until it holds or `limit` passes
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collects payloads published on one topic
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Value>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback appending to this recorder
    pub fn callback(&self) -> impl Fn(&Value) + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |payload| seen.lock().unwrap().push(payload.clone())
    }

    pub fn seen(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Wait until at least `count` payloads arrived
    pub async fn wait_for(&self, count: usize) -> bool {
        let seen = Arc::clone(&self.seen);
        eventually(Duration::from_secs(5), move || seen.lock().unwrap().len() >= count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_echoes_chk() {
        let request = json!({"cmd": "apid.get_pool_stat", "chk": 1000, "para": {}});
        let frame: Value = serde_json::from_str(&reply(&request, json!({"a": 1}))).unwrap();
        assert_eq!(frame["chk"], 1000);
        assert_eq!(frame["para"]["a"], 1);

        let heartbeat = json!({"cmd": "online.heartbeat"});
        let frame: Value = serde_json::from_str(&reply(&heartbeat, json!({}))).unwrap();
        assert!(frame.get("chk").is_none());
    }

    #[test]
    fn test_error_reply_format() {
        let request = json!({"cmd": "apid.x"});
        let frame: Value =
            serde_json::from_str(&error_reply(&request, "EFATAL", "boom")).unwrap();
        assert_eq!(frame["err"]["msg"], "boom");
    }
}
