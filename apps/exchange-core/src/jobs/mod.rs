//! Background Jobs
//! Periodic sweeps. Each job awaits its own run before the next tick, so runs
//! of one job never overlap; missed ticks are skipped rather than bunched.

pub mod price_snapshot;
pub mod resolution_sweep;

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

pub use price_snapshot::{snapshot_prices, spawn_price_snapshots};
pub use resolution_sweep::spawn_resolution_sweep;

/// Runs `run` every `period` until `shutdown` fires
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut run: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(job = name, period_secs = period.as_secs(), "Background job started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(job = name, "Background job stopping");
                    break;
                }
                _ = ticker.tick() => {
                    debug!(job = name, "Background job tick");
                    run().await;
                }
            }
        }
    })
}
