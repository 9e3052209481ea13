//! Mining façade
//!
//! Speaks to the miner gateway the way the `hdproxy` client does: identifies
//! itself in every heartbeat, receives `poolmgr.mining_info` on each new
//! block, and submits nonces without waiting for an answer (the gateway
//! never sends one).

use super::filter::HeightFilter;
use super::{require, Relay};
use crate::event_bus::Subscription;
use crate::liveness::Heartbeat;
use crate::session::Session;
use crate::session_builder::SessionBuilder;
use hdpool_core::{OutboundFrame, Result};
use serde_json::{json, Value};
use std::sync::Arc;

/// Miner gateway endpoint
pub const MINING_ENDPOINT: &str = "wss://hdminer.hdpool.com";

/// hdproxy build the miner mark claims to be
pub const HDPROXY_VERSION: &str = "20181212";

/// `poolmgr.heartbeat` identifying one miner
#[derive(Debug, Clone)]
pub struct MinerHeartbeat {
    account_key: String,
    miner_name: String,
    capacity_gb: u64,
}

impl MinerHeartbeat {
    /// Heartbeat for the given miner
    pub fn new(account_key: impl Into<String>, miner_name: impl Into<String>, capacity_gb: u64) -> Self {
        Self {
            account_key: account_key.into(),
            miner_name: miner_name.into(),
            capacity_gb,
        }
    }

    /// `<miner name>.hdproxy.exe.<version>`
    pub fn miner_mark(&self) -> String {
        format!("{}.hdproxy.exe.{}", self.miner_name, HDPROXY_VERSION)
    }
}

impl Heartbeat for MinerHeartbeat {
    fn frame(&self) -> OutboundFrame {
        OutboundFrame::new("poolmgr.heartbeat").with_para(json!({
            "account_key": self.account_key,
            "miner_name": self.miner_name,
            "miner_mark": self.miner_mark(),
            "capacity": self.capacity_gb,
        }))
    }
}

/// Mining API
pub struct MiningApi {
    session: Session,
    heartbeat: MinerHeartbeat,
    filter: Arc<HeightFilter>,
    relay: Relay,
}

impl MiningApi {
    /// Mining session against the miner gateway
    pub fn new(
        account_key: impl Into<String>,
        miner_name: impl Into<String>,
        capacity_gb: u64,
    ) -> Result<Self> {
        Self::with_builder(
            account_key,
            miner_name,
            capacity_gb,
            SessionBuilder::new([MINING_ENDPOINT]),
        )
    }

    /// Mining session with custom session settings
    pub fn with_builder(
        account_key: impl Into<String>,
        miner_name: impl Into<String>,
        capacity_gb: u64,
        builder: SessionBuilder,
    ) -> Result<Self> {
        let account_key = account_key.into();
        let miner_name = miner_name.into();
        require(!account_key.is_empty(), "accountKey")?;
        require(!miner_name.is_empty(), "minerName")?;
        require(capacity_gb > 0, "capacity")?;

        let heartbeat = MinerHeartbeat::new(account_key, miner_name, capacity_gb);
        Ok(Self {
            session: builder.build(heartbeat.clone())?,
            heartbeat,
            filter: Arc::new(HeightFilter::default()),
            relay: Relay::default(),
        })
    }

    /// Replace the height drift filter; call before `init`
    pub fn with_height_filter(mut self, filter: HeightFilter) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    /// Connect and start re-publishing filtered `poolmgr.mining_info`
    pub async fn init(&self) -> Result<()> {
        self.relay.attach(|| {
            let filter = Arc::clone(&self.filter);
            let events = self.session.events().clone();
            let metrics = self.session.metrics();
            let mining_info = self.session.on_frame("poolmgr.mining_info", move |frame| {
                if frame.err.is_some() {
                    return;
                }
                let para = frame.para.clone().unwrap_or(Value::Null);
                if filter.accept(&para) {
                    events.publish("miningInfo", &para);
                } else {
                    tracing::debug!(
                        height = %para["height"],
                        threshold = filter.threshold(),
                        "Dropping mining info with drifting height"
                    );
                    if let Some(ref m) = metrics {
                        m.record_dropped(&frame.cmd);
                    }
                }
            });

            let filter = Arc::clone(&self.filter);
            let reset = self
                .session
                .subscribe("websocket/opened", move |_| filter.reset());

            vec![mining_info, reset]
        });
        self.session.init().await
    }

    /// Close the session; `complete` also drops every subscription
    pub async fn destroy(&self, complete: bool) {
        self.session.destroy(complete).await;
        if complete {
            self.relay.detach();
        }
    }

    /// Subscribe to a session topic
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.session.subscribe(topic, callback)
    }

    /// Underlying session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Heartbeat this miner identifies itself with
    pub fn heartbeat(&self) -> &MinerHeartbeat {
        &self.heartbeat
    }

    /// Current mining parameters
    pub async fn get_mining_info(&self) -> Result<Value> {
        self.session
            .send(OutboundFrame::new("mining_info").with_para(json!({})))
            .await
    }

    /// Submit a nonce; the gateway sends no reply
    pub async fn submit_nonce(
        &self,
        account_id: u64,
        height: u64,
        nonce: u64,
        deadline: u64,
    ) -> Result<()> {
        require(account_id > 0, "accountId")?;
        require(height > 0, "height")?;
        require(nonce > 0, "nonce")?;
        require(deadline > 0, "deadline")?;

        self.session
            .send_no_reply(self.submission(account_id, height, nonce, deadline))
            .await
    }

    fn submission(&self, account_id: u64, height: u64, nonce: u64, deadline: u64) -> OutboundFrame {
        let ts = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        OutboundFrame::new("poolmgr.submit_nonce").with_para(json!({
            "account_key": self.heartbeat.account_key,
            "capacity": self.heartbeat.capacity_gb,
            "miner_mark": "",
            "miner_name": self.heartbeat.miner_name,
            "submit": [{
                "accountId": account_id,
                "height": height,
                "nonce": nonce,
                "deadline": deadline,
                "ts": ts,
            }],
        }))
    }

    /// Subscribe to filtered `miningInfo` pushes
    pub fn on_mining_info<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.session.subscribe("miningInfo", callback)
    }
}
