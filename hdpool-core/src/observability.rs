//! Logging and OpenTelemetry bootstrap
//!
//! hdpool logs through `tracing` everywhere. Applications pick how those
//! events leave the process:
//!
//! - [`init_logging`]: local `tracing-subscriber` output only
//! - [`init_observability`]: local output plus OTLP export of spans and
//!   metrics to a collector
//!
//! Both honour `RUST_LOG` before falling back to the configured level.
//!
//! ```rust,no_run
//! use hdpool_core::ObservabilityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ObservabilityConfig::new("hdpool-miner")
//!         .with_endpoint("http://localhost:4317")
//!         .with_log_level("debug");
//!
//!     hdpool_core::init_observability(config).expect("Failed to init observability");
//!
//!     // ... run sessions ...
//!
//!     hdpool_core::shutdown_observability();
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector endpoint
//! - `RUST_LOG`: log filter directives (e.g. `hdpool_client=debug`)

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How often the periodic reader pushes metrics to the collector
const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Observability configuration
///
/// # Defaults
///
/// - Service name: "hdpool"
/// - Service version: the crate version
/// - OTLP endpoint: `$OTEL_EXPORTER_OTLP_ENDPOINT` or "http://localhost:4317"
/// - Traces and metrics enabled
/// - Log level: `$RUST_LOG` or "info"
/// - JSON log lines
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to every span and metric
    pub service_name: String,

    /// Service version attached to every span and metric
    pub service_version: String,

    /// OTLP/gRPC collector endpoint
    pub otlp_endpoint: String,

    /// Export spans to the collector
    pub enable_traces: bool,

    /// Export metrics to the collector
    pub enable_metrics: bool,

    /// Fallback filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "hdpool".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            json_logs: true,
        }
    }
}

impl ObservabilityConfig {
    /// Create a configuration with a custom service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the OTLP collector endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    /// Set the fallback log filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Enable or disable span export
    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    /// Enable or disable metric export
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Switch between JSON and human-readable log lines
    pub fn with_json_logs(mut self, enable: bool) -> Self {
        self.json_logs = enable;
        self
    }

    fn resource(&self) -> opentelemetry_sdk::Resource {
        opentelemetry_sdk::Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Install local logging only, with no OTLP export
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), BoxError> {
    init_tracing_subscriber(config, None)
}

/// Install local logging and the enabled OTLP pipelines
///
/// Call once at startup. Fails if the exporters cannot be built or a global
/// subscriber is already installed.
pub fn init_observability(config: ObservabilityConfig) -> Result<(), BoxError> {
    // The subscriber needs the tracer before the provider is registered globally
    let tracer = if config.enable_traces {
        Some(init_tracer(&config)?)
    } else {
        None
    };

    if config.enable_metrics {
        init_metrics(&config)?;
    }

    init_tracing_subscriber(&config, tracer)?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        "Observability initialized"
    );

    Ok(())
}

fn init_tracer(config: &ObservabilityConfig) -> Result<opentelemetry_sdk::trace::Tracer, BoxError> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();

    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider);

    Ok(tracer)
}

fn init_metrics(config: &ObservabilityConfig) -> Result<(), BoxError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(METRICS_EXPORT_INTERVAL)
        .build();

    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build();

    global::set_meter_provider(provider);
    Ok(())
}

fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> Result<(), BoxError> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let telemetry_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let json_layer = config.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .json()
    });
    let text_layer = (!config.json_logs).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(())
}

/// Flush and stop telemetry export
///
/// SDK providers flush on drop; this only marks the shutdown in the logs so
/// it is exported with the final batch.
pub fn shutdown_observability() {
    tracing::info!("Shutting down observability");
}
