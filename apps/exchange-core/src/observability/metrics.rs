//! Prometheus Metrics for the Exchange
//! Order flow, settlement, resolution and message-surface counters

use once_cell::sync::Lazy;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{Mutex, MutexGuard};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Application metrics
pub struct Metrics {
    pub orders_submitted_total: CounterVec,
    pub orders_rejected_total: CounterVec,
    pub orders_cancelled_total: Counter,
    pub trades_executed_total: Counter,
    pub traded_volume_total: Counter,
    pub settlement_conflicts_total: Counter,
    pub matching_duration: HistogramVec,
    pub markets_resolved_total: CounterVec,
    pub claims_total: Counter,
    pub db_pool_connections: GaugeVec,
    pub nats_messages_received: CounterVec,
    pub nats_messages_published: CounterVec,
    pub events_published: CounterVec,
    pub events_failed: CounterVec,
    pub retry_attempts_total: CounterVec,
    pub sweep_failures_total: CounterVec,
}

static METRICS: Lazy<Mutex<Option<Metrics>>> = Lazy::new(|| Mutex::new(None));

/// Initialize metrics; later calls are no-ops
pub fn init_metrics(service_name: &str) -> anyhow::Result<()> {
    if get_metrics().is_some() {
        return Ok(());
    }

    let opts = |name: &str, help: &str| {
        Opts::new(name, help)
            .namespace("exchange")
            .const_label("service", service_name)
    };

    let orders_submitted_total = CounterVec::new(
        opts("orders_submitted_total", "Orders accepted into the book"),
        &["side", "type"],
    )?;

    let orders_rejected_total = CounterVec::new(
        opts("orders_rejected_total", "Orders rejected at submission"),
        &["code"],
    )?;

    let orders_cancelled_total = Counter::with_opts(opts(
        "orders_cancelled_total",
        "Orders cancelled by their owner",
    ))?;

    let trades_executed_total =
        Counter::with_opts(opts("trades_executed_total", "Settled trades"))?;

    let traded_volume_total = Counter::with_opts(opts(
        "traded_volume_total",
        "Sum of price x amount over settled trades",
    ))?;

    let settlement_conflicts_total = Counter::with_opts(opts(
        "settlement_conflicts_total",
        "Trades rejected because an order changed before commit",
    ))?;

    let matching_duration = HistogramVec::new(
        HistogramOpts::new(
            "matching_duration_seconds",
            "Matching and settlement latency in seconds",
        )
        .namespace("exchange")
        .const_label("service", service_name)
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["operation"],
    )?;

    let markets_resolved_total = CounterVec::new(
        opts("markets_resolved_total", "Markets resolved"),
        &["trigger"], // manual, sweep
    )?;

    let claims_total = Counter::with_opts(opts("claims_total", "Winning positions claimed"))?;

    let db_pool_connections = GaugeVec::new(
        opts("db_pool_connections", "Database pool connections"),
        &["state"], // active, idle
    )?;

    let nats_messages_received = CounterVec::new(
        opts("nats_messages_received_total", "NATS messages received"),
        &["subject"],
    )?;

    let nats_messages_published = CounterVec::new(
        opts("nats_messages_published_total", "NATS messages published"),
        &["subject"],
    )?;

    let events_published = CounterVec::new(
        opts("events_published_total", "Outbound events delivered"),
        &["event"],
    )?;

    let events_failed = CounterVec::new(
        opts("events_failed_total", "Outbound events that failed to publish"),
        &["event"],
    )?;

    let retry_attempts_total = CounterVec::new(
        opts("retry_attempts_total", "Total retry attempts"),
        &["operation", "outcome"],
    )?;

    let sweep_failures_total = CounterVec::new(
        opts("sweep_failures_total", "Per-market failures inside background sweeps"),
        &["job"],
    )?;

    REGISTRY.register(Box::new(orders_submitted_total.clone()))?;
    REGISTRY.register(Box::new(orders_rejected_total.clone()))?;
    REGISTRY.register(Box::new(orders_cancelled_total.clone()))?;
    REGISTRY.register(Box::new(trades_executed_total.clone()))?;
    REGISTRY.register(Box::new(traded_volume_total.clone()))?;
    REGISTRY.register(Box::new(settlement_conflicts_total.clone()))?;
    REGISTRY.register(Box::new(matching_duration.clone()))?;
    REGISTRY.register(Box::new(markets_resolved_total.clone()))?;
    REGISTRY.register(Box::new(claims_total.clone()))?;
    REGISTRY.register(Box::new(db_pool_connections.clone()))?;
    REGISTRY.register(Box::new(nats_messages_received.clone()))?;
    REGISTRY.register(Box::new(nats_messages_published.clone()))?;
    REGISTRY.register(Box::new(events_published.clone()))?;
    REGISTRY.register(Box::new(events_failed.clone()))?;
    REGISTRY.register(Box::new(retry_attempts_total.clone()))?;
    REGISTRY.register(Box::new(sweep_failures_total.clone()))?;

    let metrics = Metrics {
        orders_submitted_total,
        orders_rejected_total,
        orders_cancelled_total,
        trades_executed_total,
        traded_volume_total,
        settlement_conflicts_total,
        matching_duration,
        markets_resolved_total,
        claims_total,
        db_pool_connections,
        nats_messages_received,
        nats_messages_published,
        events_published,
        events_failed,
        retry_attempts_total,
        sweep_failures_total,
    };

    *get_metrics() = Some(metrics);

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Get metrics instance; `None` until `init_metrics` ran (tests, tools)
pub fn get_metrics() -> MutexGuard<'static, Option<Metrics>> {
    METRICS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Encode metrics to Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
