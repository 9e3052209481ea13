//! Role façades
//!
//! Each façade owns a [`Session`](crate::Session) configured for one role
//! and turns method calls into command frames. They add no protocol logic
//! of their own beyond:
//!
//! - argument checks (empty or zero arguments fail with `InvalidArgument`
//!   before anything is sent)
//! - stamping `chk` with the current Unix time in milliseconds
//! - re-publishing pool pushes on friendlier topics (`bestMiningInfo`,
//!   `miningInfo`)
//!
//! | façade        | endpoint(s)                                   | heartbeat           |
//! |---------------|-----------------------------------------------|---------------------|
//! | [`AccountApi`]| `wss://hdpool.com/?uid=..&key=..`             | `online.heartbeat`  |
//! | [`MiningApi`] | `wss://hdminer.hdpool.com`                    | `poolmgr.heartbeat` |
//! | [`PublicApi`] | `wss://hdpool.com`, `ali3`, `ali4`            | `online.heartbeat`  |

mod account;
mod filter;
mod mining;
mod public;

pub use account::{account_endpoint, AccountApi, Page, ACCOUNT_BASE_URL};
pub use filter::{HeightFilter, DEFAULT_HEIGHT_THRESHOLD};
pub use mining::{MinerHeartbeat, MiningApi, HDPROXY_VERSION, MINING_ENDPOINT};
pub use public::{PublicApi, DEFAULT_POOL, PUBLIC_ENDPOINTS};

use crate::event_bus::Subscription;
use crate::session::Session;
use hdpool_core::{Error, OutboundFrame, Result};
use serde_json::Value;
use std::sync::Mutex;

/// Coin selector sent as `para.type`
pub const COIN_TYPE: &str = "bhd";

/// Current Unix time in milliseconds, used as `chk`
pub(crate) fn timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A command frame stamped with a fresh `chk`
pub(crate) fn stamped(cmd: &str, para: Value) -> OutboundFrame {
    OutboundFrame::new(cmd)
        .with_chk(timestamp_ms())
        .with_para(para)
}

pub(crate) fn require(present: bool, what: &str) -> Result<()> {
    if present {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("No {} supplied", what)))
    }
}

/// Forward the `para` of every successful `cmd` frame to `topic`
pub(crate) fn forward(session: &Session, cmd: &'static str, topic: &'static str) -> Subscription {
    let events = session.events().clone();
    session.on_frame(cmd, move |frame| {
        if frame.err.is_none() {
            events.publish(topic, frame.para.as_ref().unwrap_or(&Value::Null));
        }
    })
}

/// Listener set a façade installs once per session lifetime
///
/// Attached before the first `init` and kept across reconnects and partial
/// destroys. A complete destroy clears the session's buses, so the relay
/// forgets its handles and attaches again on the next `init`.
#[derive(Default)]
pub(crate) struct Relay {
    subscriptions: Mutex<Option<Vec<Subscription>>>,
}

impl Relay {
    pub(crate) fn attach<F>(&self, install: F)
    where
        F: FnOnce() -> Vec<Subscription>,
    {
        let mut slot = self.subscriptions.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(install());
        }
    }

    pub(crate) fn detach(&self) {
        let taken = self
            .subscriptions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        for subscription in taken.into_iter().flatten() {
            subscription.unsubscribe();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_attached(&self) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;

    #[test]
    fn test_stamped_frame() {
        let before = timestamp_ms();
        let frame = stamped("apid.get_pool_stat", serde_json::json!({"type": COIN_TYPE}));
        let chk = frame.chk.unwrap();
        assert!(chk >= before);
        assert_eq!(frame.para.unwrap()["type"], "bhd");
    }

    #[test]
    fn test_require() {
        assert!(require(true, "uid").is_ok());
        match require(false, "uid") {
            Err(Error::InvalidArgument(msg)) => assert_eq!(msg, "No uid supplied"),
            other => panic!("Expected InvalidArgument, got {:?}", other),
        }
    }

    #[test]
    fn test_relay_attaches_once() {
        let bus: EventBus<Value> = EventBus::new();
        let relay = Relay::default();

        relay.attach(|| vec![bus.subscribe("a", |_| {})]);
        relay.attach(|| vec![bus.subscribe("a", |_| {})]);
        assert!(relay.is_attached());
        assert_eq!(bus.subscriber_count("a"), 1);

        relay.detach();
        assert!(!relay.is_attached());
        assert_eq!(bus.subscriber_count("a"), 0);

        relay.attach(|| vec![bus.subscribe("a", |_| {})]);
        assert_eq!(bus.subscriber_count("a"), 1);
    }
}
