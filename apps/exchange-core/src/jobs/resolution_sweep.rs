//! Auto-resolution of markets past their resolution date

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::spawn_periodic;
use crate::exchange::Exchange;

pub fn spawn_resolution_sweep(
    exchange: Arc<Exchange>,
    period: Duration,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    spawn_periodic("resolution_sweep", period, shutdown, move || {
        let exchange = exchange.clone();
        async move {
            if let Err(e) = exchange.resolver.sweep_expired(Utc::now()).await {
                tracing::error!(error = %e, "Resolution sweep failed to list expired markets");
            }
        }
    })
}
