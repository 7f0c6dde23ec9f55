//! Observability
//! Structured logs, optional OTLP spans, Prometheus metrics and the health server

pub mod health;
pub mod metrics;
pub mod tracing_setup;

use opentelemetry::global;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,exchange_core=debug";

/// Installs the global subscriber and the metrics registry. Logs are JSON
/// unless LOG_FORMAT=pretty.
pub fn init_observability(service_name: &str) -> anyhow::Result<()> {
    metrics::init_metrics(service_name)?;

    let tracer = tracing_setup::init_tracer(service_name)?;
    let otlp = tracer.is_some();

    let pretty = std::env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("pretty"));
    let (json_layer, pretty_layer) = if pretty {
        (None, Some(tracing_subscriber::fmt::layer().pretty()))
    } else {
        let json = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(true);
        (Some(json), None)
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(json_layer)
        .with(pretty_layer)
        .with(tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t)))
        .init();

    tracing::info!(service = service_name, otlp = otlp, pretty = pretty, "Observability initialized");
    Ok(())
}

/// Flushes spans still queued in the batch exporter
pub fn shutdown_observability() {
    global::shutdown_tracer_provider();
}
