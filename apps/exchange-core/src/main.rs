//! Exchange Core - prediction market matching & settlement service

use exchange_core::config::{Config, StoreBackend};
use exchange_core::events::{BroadcastPublisher, SharedPublisher};
use exchange_core::jobs::{spawn_price_snapshots, spawn_resolution_sweep};
use exchange_core::nats_handler::{NatsPublisher, NatsSubscriber};
use exchange_core::observability::{self, health::{start_health_server, HealthState}};
use exchange_core::observability::metrics::get_metrics;
use exchange_core::resilience::{with_retry_async, RetryConfig};
use exchange_core::store::{MemoryStore, PgStore, SharedStore};
use exchange_core::Exchange;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    observability::init_observability(&config.service_name)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.store_backend,
        "Starting Exchange Core..."
    );

    let ready = Arc::new(AtomicBool::new(false));
    let nats_connected = Arc::new(AtomicBool::new(false));

    let store: SharedStore = match config.store_backend {
        StoreBackend::Postgres => {
            let pg = with_retry_async("database_connect", &RetryConfig::startup(), || {
                PgStore::connect(&config)
            })
            .await?;
            info!("Connected to PostgreSQL");

            pg.migrate().await?;
            info!("Migrations applied");

            if let Some(ref metrics) = *get_metrics() {
                metrics.db_pool_connections.with_label_values(&["max"]).set(config.pool_max_connections as f64);
                metrics.db_pool_connections.with_label_values(&["min"]).set(config.pool_min_connections as f64);
                metrics.db_pool_connections.with_label_values(&["open"]).set(pg.pool().size() as f64);
            }
            Arc::new(pg)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; state is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let nats_client = with_retry_async("nats_connect", &RetryConfig::startup(), || async {
        async_nats::connect(&config.nats_url).await
    })
    .await;

    let (publisher, nats_client): (SharedPublisher, _) = match nats_client {
        Ok(client) => {
            nats_connected.store(true, Ordering::Relaxed);
            info!(url = %config.nats_url, "Connected to NATS");
            (Arc::new(NatsPublisher::new(client.clone())), Some(client))
        }
        Err(e) => {
            error!(error = %e, "NATS unavailable; events stay in-process");
            (Arc::new(BroadcastPublisher::default()), None)
        }
    };

    let exchange = Arc::new(Exchange::new(store.clone(), publisher, config.book_price_scale));

    let recovered = exchange.recover().await?;
    info!(recovered = recovered, "Match outbox recovered");

    let health_state = HealthState {
        store: store.clone(),
        nats_connected: nats_client.as_ref().map(|_| nats_connected.clone()),
        ready: ready.clone(),
    };
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(metrics_port, health_state).await {
            error!(error = %e, "Health server failed");
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    let sweep = spawn_resolution_sweep(
        exchange.clone(),
        config.resolution_sweep_interval,
        shutdown_tx.subscribe(),
    );
    let snapshots = spawn_price_snapshots(
        store.clone(),
        config.price_snapshot_interval,
        shutdown_tx.subscribe(),
    );

    ready.store(true, Ordering::Relaxed);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = signal_tx.send(());
    });

    let mut shutdown_rx = shutdown_rx;
    match nats_client {
        Some(client) => {
            let subscriber = NatsSubscriber::new(client, exchange.clone());
            tokio::select! {
                result = subscriber.run() => {
                    if let Err(e) = result {
                        error!(error = %e, "Subscriber error");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutting down...");
                }
            }
        }
        None => {
            let _ = shutdown_rx.recv().await;
            info!("Shutting down...");
        }
    }

    ready.store(false, Ordering::Relaxed);
    let _ = shutdown_tx.send(());
    let (sweep, snapshots) = tokio::join!(sweep, snapshots);
    for (job, result) in [("resolution_sweep", sweep), ("price_snapshots", snapshots)] {
        if let Err(e) = result {
            error!(job = job, error = %e, "Background job ended abnormally");
        }
    }

    observability::shutdown_observability();
    info!("Exchange Core stopped");
    Ok(())
}
