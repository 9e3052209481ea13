//! Request/response correlation
//!
//! The pool has no request ids. A reply is recognised by echoing the
//! request's command name, and sometimes its `chk` token. Each outstanding
//! request gets an entry in a FIFO pending table with a oneshot completion
//! slot; every inbound frame is offered to the table and resolves at most one
//! entry, the earliest registered one that matches.
//!
//! # Request Lifecycle
//!
//! 1. **Register**: the entry is added before the frame is transmitted, so
//!    a fast reply can never overtake its registration
//! 2. **Dispatch**: the first matching inbound frame removes the entry and
//!    resolves it with `para` or rejects it with the frame's `err`
//! 3. **Teardown**: when the connection closes, every remaining entry is
//!    rejected with `ConnectionReset` and later registrations fail at once
//!
//! # Same-command requests
//!
//! Two concurrent requests for the same command without a distinguishing
//! token cannot be told apart. The first matching reply completes whichever
//! was registered first. Matching rules live behind [`CorrelationStrategy`]
//! so a protocol with real ids can plug in without touching callers.

use hdpool_core::{Error, InboundFrame, OutboundFrame, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// What a pending request is waiting for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
    /// Command name the reply must carry
    pub cmd: String,
    /// Textual correlation token, if the request carried one
    pub token: Option<String>,
}

/// Decides which inbound frame answers which request
pub trait CorrelationStrategy: Send + Sync {
    /// Key under which an outbound frame waits
    fn key(&self, frame: &OutboundFrame) -> RequestKey;

    /// Whether `frame` answers a request registered under `key`
    fn matches(&self, key: &RequestKey, frame: &InboundFrame) -> bool;
}

/// Match by command name, and by token when both sides carry one
///
/// A reply without `chk` still answers a request that sent one; the pool
/// does not echo the token on every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandCorrelation;

impl CorrelationStrategy for CommandCorrelation {
    fn key(&self, frame: &OutboundFrame) -> RequestKey {
        RequestKey {
            cmd: frame.cmd.clone(),
            token: frame.token(),
        }
    }

    fn matches(&self, key: &RequestKey, frame: &InboundFrame) -> bool {
        if key.cmd != frame.cmd {
            return false;
        }
        match (&key.token, frame.token()) {
            (Some(sent), Some(echoed)) => *sent == echoed,
            _ => true,
        }
    }
}

/// Handle for a registered request, used to cancel it
pub type Ticket = u64;

struct Pending {
    ticket: Ticket,
    key: RequestKey,
    tx: oneshot::Sender<Result<Value>>,
}

struct PendingTable {
    next_ticket: Ticket,
    entries: VecDeque<Pending>,
    closed: bool,
}

/// Pending request table for one connection
#[derive(Clone)]
pub struct Correlator {
    strategy: Arc<dyn CorrelationStrategy>,
    table: Arc<Mutex<PendingTable>>,
}

impl Correlator {
    /// Create an empty table using `strategy`
    pub fn new(strategy: Arc<dyn CorrelationStrategy>) -> Self {
        Self {
            strategy,
            table: Arc::new(Mutex::new(PendingTable {
                next_ticket: 0,
                entries: VecDeque::new(),
                closed: false,
            })),
        }
    }

    /// Register a request before it is transmitted
    ///
    /// Fails with `ConnectionReset` once the table has been closed.
    pub async fn register(
        &self,
        frame: &OutboundFrame,
    ) -> Result<(Ticket, oneshot::Receiver<Result<Value>>)> {
        let key = self.strategy.key(frame);
        let mut table = self.table.lock().await;
        if table.closed {
            return Err(Error::ConnectionReset);
        }

        let (tx, rx) = oneshot::channel();
        let ticket = table.next_ticket;
        table.next_ticket += 1;
        table.entries.push_back(Pending { ticket, key, tx });

        Ok((ticket, rx))
    }

    /// Offer an inbound frame to the table
    ///
    /// Returns true if it resolved a pending request. Entries whose caller
    /// has gone away are discarded on the way and never consume a frame.
    pub async fn dispatch(&self, frame: &InboundFrame) -> bool {
        let mut table = self.table.lock().await;
        table.entries.retain(|pending| !pending.tx.is_closed());

        let position = table
            .entries
            .iter()
            .position(|pending| self.strategy.matches(&pending.key, frame));

        let Some(pending) = position.and_then(|index| table.entries.remove(index)) else {
            return false;
        };
        drop(table);

        let outcome = frame.clone().into_outcome().map_err(Error::Protocol);
        let _ = pending.tx.send(outcome);
        true
    }

    /// Remove a request that will never be answered (e.g. its transmit failed)
    pub async fn cancel(&self, ticket: Ticket) -> bool {
        let mut table = self.table.lock().await;
        let before = table.entries.len();
        table.entries.retain(|pending| pending.ticket != ticket);
        table.entries.len() != before
    }

    /// Reject every pending request with `error` and refuse new ones
    ///
    /// Returns the number of requests rejected. Idempotent.
    pub async fn close(&self, error: Error) -> usize {
        let drained: Vec<Pending> = {
            let mut table = self.table.lock().await;
            table.closed = true;
            table.entries.drain(..).collect()
        };

        let count = drained.len();
        for pending in drained {
            let _ = pending.tx.send(Err(error.clone()));
        }
        count
    }

    /// Number of requests still waiting
    pub async fn pending_count(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    /// Whether [`close`](Self::close) has run
    pub async fn is_closed(&self) -> bool {
        self.table.lock().await.closed
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(Arc::new(CommandCorrelation))
    }
}
