//! Tracing and OpenTelemetry setup for the cortex process.
//!
//! Call [`init_tracing`] once at startup and keep the returned guard alive.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `CORTEX_LOG_FORMAT=json` | Newline-delimited JSON logs instead of compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector URL; enables span export. |
//!
//! ```rust,no_run
//! let _guard = cortex_runtime::telemetry::init_tracing("cortex");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Selects the log line format.
pub const LOG_FORMAT_ENV: &str = "CORTEX_LOG_FORMAT";
/// OTLP collector endpoint.
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Install the global subscriber.  Spans created by `#[instrument]` on the
/// tick and mode-swap paths are exported when an OTLP endpoint is set.
///
/// Calling this twice in one process is harmless: the second subscriber is
/// rejected and the first stays in place.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let use_json = std::env::var(LOG_FORMAT_ENV).as_deref() == Ok("json");

    let provider = std::env::var(OTLP_ENDPOINT_ENV)
        .ok()
        .and_then(|endpoint| build_provider(service_name, &endpoint));
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("cortex")));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);
    let installed = if use_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
    };
    if let Err(e) = installed {
        eprintln!("[cortex] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

/// Shuts the tracer provider down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans are exported to a collector.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[cortex] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

/// Build a provider exporting to `endpoint`.  Returns `None` (after printing
/// the reason) when the exporter cannot be created.
fn build_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[cortex] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // The simple exporter needs no running tokio runtime at init time.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
