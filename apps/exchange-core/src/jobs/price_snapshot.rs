//! Price history snapshots of every ACTIVE market

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::spawn_periodic;
use crate::domain::PriceSnapshot;
use crate::error::Result;
use crate::observability::metrics::get_metrics;
use crate::store::{ExchangeStore, SharedStore};

/// Records the current price of each outcome of each ACTIVE market.
/// Markets are written independently; returns how many were recorded.
pub async fn snapshot_prices(store: &dyn ExchangeStore, now: DateTime<Utc>) -> Result<usize> {
    let markets = store.active_markets().await?;
    let mut recorded = 0;

    for market in &markets {
        let snapshots: Vec<PriceSnapshot> = market
            .outcomes
            .iter()
            .map(|o| PriceSnapshot {
                market_id: o.market_id,
                outcome_id: o.id,
                price: o.price,
                recorded_at: now,
            })
            .collect();

        match store.record_price_snapshots(&snapshots).await {
            Ok(()) => recorded += 1,
            Err(e) => {
                tracing::error!(
                    market_id = %market.market.id,
                    error = %e,
                    "Failed to record price snapshot"
                );
                if let Some(ref metrics) = *get_metrics() {
                    metrics
                        .sweep_failures_total
                        .with_label_values(&["price_snapshot"])
                        .inc();
                }
            }
        }
    }

    tracing::debug!(markets = recorded, "Price snapshots recorded");
    Ok(recorded)
}

pub fn spawn_price_snapshots(
    store: SharedStore,
    period: Duration,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    spawn_periodic("price_snapshot", period, shutdown, move || {
        let store = store.clone();
        async move {
            if let Err(e) = snapshot_prices(store.as_ref(), Utc::now()).await {
                tracing::error!(error = %e, "Price snapshot sweep failed to list markets");
            }
        }
    })
}
