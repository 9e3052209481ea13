//! Public façade: pool statistics and block announcements, no credentials.

use super::{forward, stamped, Relay};
use crate::event_bus::Subscription;
use crate::liveness::OnlineHeartbeat;
use crate::session::Session;
use crate::session_builder::SessionBuilder;
use hdpool_core::Result;
use serde_json::{json, Value};

/// Public endpoints, tried round-robin
pub const PUBLIC_ENDPOINTS: [&str; 3] = [
    "wss://hdpool.com",
    "wss://ali3.hdpool.com",
    "wss://ali4.hdpool.com",
];

/// Pool queried when none is named
pub const DEFAULT_POOL: &str = "bhd_co";

/// Public API
pub struct PublicApi {
    session: Session,
    pool: String,
    relay: Relay,
}

impl PublicApi {
    /// Public session for the default pool
    pub fn new() -> Result<Self> {
        Self::for_pool(DEFAULT_POOL)
    }

    /// Public session for a named pool
    pub fn for_pool(pool: impl Into<String>) -> Result<Self> {
        Self::with_builder(pool, SessionBuilder::new(PUBLIC_ENDPOINTS))
    }

    /// Public session with custom session settings
    pub fn with_builder(pool: impl Into<String>, builder: SessionBuilder) -> Result<Self> {
        Ok(Self {
            session: builder.build(OnlineHeartbeat)?,
            pool: pool.into(),
            relay: Relay::default(),
        })
    }

    /// Connect and start re-publishing `apid.best_mining_info`
    pub async fn init(&self) -> Result<()> {
        self.relay
            .attach(|| vec![forward(&self.session, "apid.best_mining_info", "bestMiningInfo")]);
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

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Statistics of this façade's pool
    pub async fn get_pool_stats(&self) -> Result<Value> {
        self.session
            .send(stamped("apid.get_pool_stat", json!({})).with_mark(self.pool.clone()))
            .await
    }

    /// Subscribe to `bestMiningInfo` pushes
    pub fn on_best_mining_info<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.session.subscribe("bestMiningInfo", callback)
    }
}
