//! hdpool - HDPool WebSocket client
//!
//! This is the main convenience crate that re-exports the hdpool sub-crates.
//! Use this crate if you want a single dependency for the session core and
//! the role façades.
//!
//! # Architecture
//!
//! - **hdpool-core**: wire frames, codec, error type, observability
//! - **hdpool-client**: session core (connector, correlator, liveness, event
//!   bus) and the account, mining and public façades
//!
//! # Quick Start - Mining
//!
//! ```rust,no_run
//! use hdpool::MiningApi;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = MiningApi::new("account-key", "rig-01", 4096)?;
//!     api.init().await?;
//!
//!     api.on_mining_info(|info| {
//!         println!("new block: {}", info["height"]);
//!     });
//!
//!     api.submit_nonce(123, 150_000, 42, 1_000).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Quick Start - Account
//!
//! ```rust,no_run
//! use hdpool::AccountApi;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = AccountApi::new("10001", "session-key")?;
//!     api.subscribe("sessionExpired", |err| eprintln!("log in again: {}", err));
//!     api.init().await?;
//!
//!     let miners = api.get_miners().await?;
//!     println!("miners: {}", miners);
//!
//!     api.destroy(true).await;
//!     Ok(())
//! }
//! ```

pub use hdpool_client as client;
pub use hdpool_core as core;

pub use hdpool_client::{AccountApi, MiningApi, PublicApi, Session, SessionBuilder, SessionState};
pub use hdpool_core::{Error, Result};
