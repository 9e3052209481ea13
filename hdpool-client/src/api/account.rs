//! Account façade
//!
//! Logged-in view of one pool account. The session key travels in the
//! endpoint query string; a stale key makes the pool answer with the
//! session-expiry error, after which the façade is permanently closed.

use super::{forward, require, stamped, Relay, COIN_TYPE};
use crate::event_bus::Subscription;
use crate::liveness::OnlineHeartbeat;
use crate::session::Session;
use crate::session_builder::SessionBuilder;
use hdpool_core::Result;
use serde_json::{json, Map, Value};

/// Account endpoint without credentials
pub const ACCOUNT_BASE_URL: &str = "wss://hdpool.com";

/// Account endpoint for the given credentials, percent-encoded
pub fn account_endpoint(uid: &str, key: &str) -> String {
    format!(
        "{}/?uid={}&key={}",
        ACCOUNT_BASE_URL,
        urlencoding::encode(uid),
        urlencoding::encode(key)
    )
}

/// Offset/count window for history listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Entries to skip
    pub offset: u64,
    /// Entries to return
    pub count: u64,
}

impl Page {
    /// Window starting at `offset`
    pub fn new(offset: u64, count: u64) -> Self {
        Self { offset, count }
    }

    /// The first `count` entries
    pub fn first(count: u64) -> Self {
        Self { offset: 0, count }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(10)
    }
}

/// Expected-earnings listings default to a longer window
const EXPECTED_EARNINGS_PAGE: Page = Page {
    offset: 0,
    count: 200,
};
const DEFAULT_RENTAL_DAYS: u32 = 7;
const DEFAULT_LENDING_STATS_AMOUNT: u64 = 100_000_000;

/// Account API
pub struct AccountApi {
    session: Session,
    uid: String,
    relay: Relay,
}

impl AccountApi {
    /// Account session against the public pool endpoint
    pub fn new(uid: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let uid = uid.into();
        let key = key.into();
        require(!uid.is_empty(), "uid")?;
        require(!key.is_empty(), "key")?;

        let builder = SessionBuilder::new([account_endpoint(&uid, &key)]);
        Self::build(uid, builder)
    }

    /// Account session with custom session settings
    ///
    /// The builder's endpoints are used as given, so they must already carry
    /// the credentials (see [`account_endpoint`]).
    pub fn with_builder(uid: impl Into<String>, builder: SessionBuilder) -> Result<Self> {
        let uid = uid.into();
        require(!uid.is_empty(), "uid")?;
        Self::build(uid, builder)
    }

    fn build(uid: String, builder: SessionBuilder) -> Result<Self> {
        Ok(Self {
            session: builder.build(OnlineHeartbeat)?,
            uid,
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

    /// Underlying session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Account id this façade works for
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// `{uid, type}` plus the command's own fields
    fn para(&self, extra: Value) -> Value {
        let mut para = Map::new();
        para.insert("uid".to_string(), json!(self.uid));
        para.insert("type".to_string(), json!(COIN_TYPE));
        if let Value::Object(fields) = extra {
            para.extend(fields);
        }
        Value::Object(para)
    }

    async fn call(&self, cmd: &str, extra: Value) -> Result<Value> {
        self.session.send(stamped(cmd, self.para(extra))).await
    }

    async fn paged(&self, cmd: &str, page: Page) -> Result<Value> {
        self.call(cmd, json!({ "offset": page.offset, "count": page.count }))
            .await
    }

    /// Pool-wide statistics
    pub async fn get_pool_stats(&self) -> Result<Value> {
        self.session
            .send(stamped("apid.get_pool_stat", json!({ "type": COIN_TYPE })))
            .await
    }

    /// Account profile
    pub async fn get_user_info(&self) -> Result<Value> {
        self.session
            .send(stamped("logind.get_uinfo", json!({ "uid": self.uid })))
            .await
    }

    /// Dashboard summary
    pub async fn get_general_stats(&self) -> Result<Value> {
        self.call("apid.get_index_data", json!({})).await
    }

    /// Miners reporting for this account (the reply's `data` list)
    pub async fn get_miners(&self) -> Result<Value> {
        let reply = self.call("apid.get_mill_list", json!({})).await?;
        Ok(reply.get("data").cloned().unwrap_or(Value::Null))
    }

    /// Expected earnings per block; defaults to the first 200 entries
    pub async fn get_expected_earnings_history(&self, page: Option<Page>) -> Result<Value> {
        self.paged(
            "apid.get_expected_profit",
            page.unwrap_or(EXPECTED_EARNINGS_PAGE),
        )
        .await
    }

    /// Paid earnings
    pub async fn get_earnings_history(&self, page: Option<Page>) -> Result<Value> {
        self.paged("apid.get_award_list", page.unwrap_or_default())
            .await
    }

    /// Withdrawals
    pub async fn get_withdraw_history(&self, page: Option<Page>) -> Result<Value> {
        self.paged("apid.get_ransom_state", page.unwrap_or_default())
            .await
    }

    /// Pledge deposits
    pub async fn get_deposit_history(&self, page: Option<Page>) -> Result<Value> {
        self.paged("apid.get_pledge_apply_state", page.unwrap_or_default())
            .await
    }

    /// Current pledge
    pub async fn get_pledge_state(&self) -> Result<Value> {
        self.call("apid.get_pledge_state", json!({})).await
    }

    /// Plotters bound to the account
    pub async fn get_bound_plotter(&self, page: Option<Page>) -> Result<Value> {
        self.paged("apid.get_bind_plotter_status", page.unwrap_or_default())
            .await
    }

    /// Rental overview for the last `days` (default 7)
    pub async fn get_rental_details(&self, days: Option<u32>) -> Result<Value> {
        let days = days.unwrap_or(DEFAULT_RENTAL_DAYS);
        self.call("apid.get_rental_detail", json!({ "days": days }))
            .await
    }

    /// Capacity currently rented in
    pub async fn get_renting_state(&self) -> Result<Value> {
        self.call("apid.get_rentin_state", json!({})).await
    }

    /// Rent-in orders
    pub async fn get_renting_order_history(&self, page: Option<Page>) -> Result<Value> {
        self.paged("apid.get_rentin_order_list", page.unwrap_or_default())
            .await
    }

    /// Lending earnings estimate (default amount 100000000)
    pub async fn get_lending_earnings_stats(&self, amount: Option<u64>) -> Result<Value> {
        let amount = amount.unwrap_or(DEFAULT_LENDING_STATS_AMOUNT);
        self.call("apid.get_rentout_earning", json!({ "amount": amount }))
            .await
    }

    /// Rent-out orders
    pub async fn get_lending_order_history(&self, page: Option<Page>) -> Result<Value> {
        self.paged("apid.get_rentout_order_list", page.unwrap_or_default())
            .await
    }

    /// Rent capacity in
    pub async fn rent(&self, amount: f64, days: u32) -> Result<()> {
        require(is_positive(amount), "amount")?;
        require(days > 0, "days")?;
        self.call("apid.rentin_apply", json!({ "amount": amount, "days": days }))
            .await?;
        Ok(())
    }

    /// Lend capacity out
    pub async fn lend(&self, amount: f64, days: u32) -> Result<()> {
        require(is_positive(amount), "amount")?;
        require(days > 0, "days")?;
        self.call("apid.rentout_apply", json!({ "amount": amount, "days": days }))
            .await?;
        Ok(())
    }

    /// Withdraw from the pledge
    pub async fn withdraw(&self, amount: f64) -> Result<()> {
        require(is_positive(amount), "amount")?;
        self.call("apid.ransom_apply", json!({ "amount": amount }))
            .await?;
        Ok(())
    }

    /// Add to the pledge
    pub async fn deposit(&self, amount: f64) -> Result<Value> {
        require(is_positive(amount), "amount")?;
        self.call("apid.pledge_apply", json!({ "amount": amount }))
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

fn is_positive(amount: f64) -> bool {
    amount.is_finite() && amount > 0.0
}
