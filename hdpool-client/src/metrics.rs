//! Session metrics definitions
//!
//! OpenTelemetry instruments for session health. They are only created when
//! the builder enables observability; the session holds them as
//! `Option<Arc<SessionMetrics>>` and skips recording otherwise.
//!
//! # Metrics Collected
//!
//! - **session_state**: current [`SessionState`](crate::SessionState) (gauge)
//! - **requests_total** / **request_duration**: correlated requests by command
//!   and outcome
//! - **errors_total**: errors by kind
//! - **connect_attempts**: endpoint attempts by URL and outcome
//! - **reconnects**: reconnect cycles started
//! - **heartbeats**: heartbeat round trips by outcome
//! - **stale_detections**: liveness check failures
//! - **frames_received**: inbound frames by command
//! - **frames_dropped**: push frames rejected by a façade filter

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Session metrics for monitoring
pub struct SessionMetrics {
    /// Session state (see `SessionState::as_metric`)
    pub session_state: Gauge<i64>,
    /// Correlated requests sent
    pub requests_total: Counter<u64>,
    /// Request round trip in seconds
    pub request_duration: Histogram<f64>,
    /// Errors encountered
    pub errors_total: Counter<u64>,
    /// Endpoint connection attempts
    pub connect_attempts: Counter<u64>,
    /// Reconnect cycles
    pub reconnects: Counter<u64>,
    /// Heartbeat round trips
    pub heartbeats: Counter<u64>,
    /// Stale connection detections
    pub stale_detections: Counter<u64>,
    /// Inbound frames
    pub frames_received: Counter<u64>,
    /// Push frames dropped by a filter
    pub frames_dropped: Counter<u64>,
}

impl SessionMetrics {
    /// Create metrics on the global meter provider
    pub fn new(service_name: impl Into<String>) -> Self {
        // `global::meter` wants a static name
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    /// Create metrics on a specific meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            session_state: meter
                .i64_gauge("hdpool.session.state")
                .with_description("Session state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=expired)")
                .build(),
            requests_total: meter
                .u64_counter("hdpool.session.requests.total")
                .with_description("Total number of correlated requests")
                .build(),
            request_duration: meter
                .f64_histogram("hdpool.session.request.duration")
                .with_description("Request round trip in seconds")
                .build(),
            errors_total: meter
                .u64_counter("hdpool.session.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
            connect_attempts: meter
                .u64_counter("hdpool.session.connect.attempts")
                .with_description("Endpoint connection attempts")
                .build(),
            reconnects: meter
                .u64_counter("hdpool.session.reconnects")
                .with_description("Reconnect cycles started")
                .build(),
            heartbeats: meter
                .u64_counter("hdpool.session.heartbeats")
                .with_description("Heartbeat round trips")
                .build(),
            stale_detections: meter
                .u64_counter("hdpool.session.stale")
                .with_description("Connections declared stale by the liveness check")
                .build(),
            frames_received: meter
                .u64_counter("hdpool.session.frames.received")
                .with_description("Inbound frames")
                .build(),
            frames_dropped: meter
                .u64_counter("hdpool.session.frames.dropped")
                .with_description("Push frames rejected by a filter")
                .build(),
        }
    }

    /// Update the session state gauge
    pub fn update_state(&self, state: i64) {
        self.session_state.record(state, &[]);
    }

    /// Record a completed request
    pub fn record_request(&self, cmd: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("cmd", cmd.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    /// Record an error
    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error_type.to_string())]);
    }

    /// Record one endpoint attempt
    pub fn record_connect_attempt(&self, url: &str, status: &str) {
        self.connect_attempts.add(
            1,
            &[
                KeyValue::new("url", url.to_string()),
                KeyValue::new("status", status.to_string()),
            ],
        );
    }

    /// Record the start of a reconnect cycle
    pub fn record_reconnect(&self) {
        self.reconnects.add(1, &[]);
    }

    /// Record a heartbeat round trip
    pub fn record_heartbeat(&self, status: &str) {
        self.heartbeats
            .add(1, &[KeyValue::new("status", status.to_string())]);
    }

    /// Record a stale connection
    pub fn record_stale(&self) {
        self.stale_detections.add(1, &[]);
    }

    /// Record an inbound frame
    pub fn record_frame(&self, cmd: &str) {
        self.frames_received
            .add(1, &[KeyValue::new("cmd", cmd.to_string())]);
    }

    /// Record a push frame dropped by a filter
    pub fn record_dropped(&self, cmd: &str) {
        self.frames_dropped
            .add(1, &[KeyValue::new("cmd", cmd.to_string())]);
    }
}
