//! OTLP span export
//! Off unless a collector endpoint is configured

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use std::env;

/// Export settings read from the standard OTEL_* variables
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub endpoint: String,
    pub environment: String,
    /// Fraction of root traces kept; `None` keeps every trace
    pub sample_ratio: Option<f64>,
}

impl ExportSettings {
    pub fn from_env() -> Option<Self> {
        let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|e| !e.is_empty())?;
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let ratio = env::var("OTEL_TRACES_SAMPLER_ARG")
            .ok()
            .and_then(|v| v.parse::<f64>().ok());

        Some(Self::new(endpoint, environment, ratio))
    }

    /// Production samples 10 % of traces unless told otherwise
    pub fn new(endpoint: String, environment: String, ratio: Option<f64>) -> Self {
        let sample_ratio = match ratio {
            Some(r) => Some(r.clamp(0.0, 1.0)),
            None if environment == "production" => Some(0.1),
            None => None,
        };
        Self {
            endpoint,
            environment,
            sample_ratio,
        }
    }

    fn sampler(&self) -> sdktrace::Sampler {
        match self.sample_ratio {
            Some(ratio) => sdktrace::Sampler::ParentBased(Box::new(
                sdktrace::Sampler::TraceIdRatioBased(ratio),
            )),
            None => sdktrace::Sampler::AlwaysOn,
        }
    }
}

/// Installs the batch exporter; `None` when no collector is configured
pub fn init_tracer(service_name: &str) -> anyhow::Result<Option<sdktrace::Tracer>> {
    let Some(settings) = ExportSettings::from_env() else {
        return Ok(None);
    };

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("service.namespace", "prediction-exchange"),
        KeyValue::new("deployment.environment", settings.environment.clone()),
    ]);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&settings.endpoint),
        )
        .with_trace_config(
            sdktrace::Config::default()
                .with_sampler(settings.sampler())
                .with_max_events_per_span(64)
                .with_max_attributes_per_span(32)
                .with_resource(resource),
        )
        .install_batch(runtime::Tokio)?;

    tracing::info!(
        endpoint = %settings.endpoint,
        sample_ratio = ?settings.sample_ratio,
        "OTLP exporter installed"
    );
    Ok(Some(tracer))
}
