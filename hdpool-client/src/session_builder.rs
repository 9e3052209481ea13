//! Session configuration and builder
//!
//! `SessionBuilder` is the fluent way to configure a [`Session`] before its
//! first `init`. It lets you:
//! - choose the endpoint list and its retry/timeout pacing
//! - tune the heartbeat and liveness timers
//! - swap the request correlation strategy
//! - enable OpenTelemetry observability
//!
//! # Examples
//!
//! ```rust,no_run
//! use hdpool_client::{OnlineHeartbeat, SessionBuilder};
//! use std::time::Duration;
//!
//! # async fn example() -> hdpool_core::Result<()> {
//! let session = SessionBuilder::new(["wss://hdpool.com", "wss://ali3.hdpool.com"])
//!     .retry_delay(Duration::from_secs(2))
//!     .freshness_window(Duration::from_secs(45))
//!     .with_default_observability()
//!     .service_name("pool-watcher")
//!     .build(OnlineHeartbeat)?;
//!
//! session.init().await?;
//! # Ok(())
//! # }
//! ```

use crate::correlator::{CommandCorrelation, CorrelationStrategy};
use crate::endpoint::EndpointList;
use crate::liveness::Heartbeat;
use crate::metrics::SessionMetrics;
use crate::session::Session;
use hdpool_core::{Error, ObservabilityConfig, Result};
use std::sync::Arc;
use std::time::Duration;

/// Pause between failed endpoint attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Upper bound on a single endpoint attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Heartbeat period
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Staleness check period
pub const DEFAULT_LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(5);
/// Maximum age of the last heartbeat before the connection is replaced
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(30);

/// Validated session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Candidate endpoints in rotation order
    pub endpoints: EndpointList,
    /// Pause between failed endpoint attempts, and after a failed handshake
    pub retry_delay: Duration,
    /// Upper bound on a single endpoint attempt
    pub connect_timeout: Duration,
    /// Heartbeat period
    pub heartbeat_interval: Duration,
    /// Staleness check period
    pub liveness_check_interval: Duration,
    /// Maximum heartbeat age, also the bound on one heartbeat round trip
    pub freshness_window: Duration,
}

impl SessionConfig {
    /// Default timings for the given endpoints
    pub fn new(endpoints: EndpointList) -> Self {
        Self {
            endpoints,
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            liveness_check_interval: DEFAULT_LIVENESS_CHECK_INTERVAL,
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
        }
    }

    /// Reject zero durations
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("retry_delay", self.retry_delay),
            ("connect_timeout", self.connect_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("liveness_check_interval", self.liveness_check_interval),
            ("freshness_window", self.freshness_window),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::InvalidArgument(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}

/// Builder for configuring and creating a [`Session`]
pub struct SessionBuilder {
    endpoints: Vec<String>,
    retry_delay: Duration,
    connect_timeout: Duration,
    heartbeat_interval: Duration,
    liveness_check_interval: Duration,
    freshness_window: Duration,
    correlation: Option<Arc<dyn CorrelationStrategy>>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl SessionBuilder {
    /// Start from an endpoint list with default timings
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            liveness_check_interval: DEFAULT_LIVENESS_CHECK_INTERVAL,
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            correlation: None,
            observability_config: None,
            service_name: None,
        }
    }

    /// Replace the endpoint list
    pub fn endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Pause between failed endpoint attempts
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Upper bound on a single endpoint attempt
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Heartbeat period
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Staleness check period
    pub fn liveness_check_interval(mut self, interval: Duration) -> Self {
        self.liveness_check_interval = interval;
        self
    }

    /// Maximum heartbeat age before the connection is replaced
    pub fn freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    /// Use a custom request correlation strategy
    pub fn with_correlation(mut self, strategy: Arc<dyn CorrelationStrategy>) -> Self {
        self.correlation = Some(strategy);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Validate the settings into a [`SessionConfig`]
    pub fn config(&self) -> Result<SessionConfig> {
        let config = SessionConfig {
            endpoints: EndpointList::new(self.endpoints.iter().cloned())?,
            retry_delay: self.retry_delay,
            connect_timeout: self.connect_timeout,
            heartbeat_interval: self.heartbeat_interval,
            liveness_check_interval: self.liveness_check_interval,
            freshness_window: self.freshness_window,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build the session; nothing connects until [`Session::init`]
    pub fn build<H>(self, heartbeat: H) -> Result<Session>
    where
        H: Heartbeat + 'static,
    {
        self.build_with(Arc::new(heartbeat))
    }

    /// Build with a shared heartbeat
    pub fn build_with(self, heartbeat: Arc<dyn Heartbeat>) -> Result<Session> {
        let config = self.config()?;

        let metrics = if let Some(mut obs) = self.observability_config {
            if let Some(name) = self.service_name {
                obs.service_name = name;
            }

            hdpool_core::init_observability(obs.clone()).map_err(|e| {
                Error::Internal(format!("Failed to initialize observability: {}", e))
            })?;

            Some(Arc::new(SessionMetrics::new(obs.service_name)))
        } else {
            None
        };

        let correlation = self
            .correlation
            .unwrap_or_else(|| Arc::new(CommandCorrelation));

        Ok(Session::new(config, heartbeat, correlation, metrics))
    }
}
