//! Health Check & Metrics HTTP Server
//! Provides /health, /health/live, /health/ready, /metrics endpoints

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use super::metrics::encode_metrics;
use crate::store::SharedStore;

#[derive(Clone)]
pub struct HealthState {
    pub store: SharedStore,
    /// `None` when the service runs without a message bus
    pub nats_connected: Option<Arc<AtomicBool>>,
    pub ready: Arc<AtomicBool>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    store: ComponentHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    nats: Option<ComponentHealth>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency_ms: Option<u64>) -> Self {
        Self {
            status: "healthy".to_string(),
            latency_ms,
            error: None,
        }
    }

    fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy".to_string(),
            latency_ms: None,
            error: Some(error),
        }
    }

    fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

static START_TIME: OnceLock<Instant> = OnceLock::new();

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the health check and metrics HTTP server
#[instrument(skip(state))]
pub async fn start_health_server(port: u16, state: HealthState) -> anyhow::Result<()> {
    START_TIME.get_or_init(Instant::now);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!(port = port, "Health/metrics server started");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn check_store(store: &SharedStore) -> ComponentHealth {
    let start = Instant::now();
    match store.ping().await {
        Ok(()) => ComponentHealth::healthy(Some(start.elapsed().as_millis() as u64)),
        Err(e) => ComponentHealth::unhealthy(e.to_string()),
    }
}

fn check_nats(flag: &Option<Arc<AtomicBool>>) -> Option<ComponentHealth> {
    flag.as_ref().map(|connected| {
        if connected.load(Ordering::Relaxed) {
            ComponentHealth::healthy(None)
        } else {
            ComponentHealth::unhealthy("NATS not connected".to_string())
        }
    })
}

#[instrument(skip(state))]
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    let store = check_store(&state.store).await;
    let nats = check_nats(&state.nats_connected);

    let overall_healthy = store.is_healthy() && nats.as_ref().map_or(true, |n| n.is_healthy());
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    let response = HealthResponse {
        status: if overall_healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        checks: HealthChecks { store, nats },
    };

    let status_code = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}

#[instrument(skip(state))]
async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
    if !state.ready.load(Ordering::Relaxed) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "reason": "initializing" })),
        );
    }

    let store_ok = state.store.ping().await.is_ok();
    let nats_ok = state
        .nats_connected
        .as_ref()
        .map_or(true, |c| c.load(Ordering::Relaxed));

    if store_ok && nats_ok {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "store": store_ok,
                "nats": nats_ok
            })),
        )
    }
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        encode_metrics(),
    )
}
