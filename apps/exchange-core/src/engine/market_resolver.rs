//! Market Resolution
//! Terminal ACTIVE -> RESOLVED transition and the expiry sweep built on it

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{permissions, AuthContext};
use crate::domain::{decide_by_price, MarketStatus, MarketWithOutcomes, Order, OutcomeLabel, Position};
use crate::engine::dispatcher::MatchDispatcher;
use crate::engine::order_book::build_order_book;
use crate::error::{ExchangeError, Result};
use crate::events::{publish_logged, ExchangeEvent, MarketResolved, OrderBookUpdated, SharedPublisher};
use crate::observability::metrics::get_metrics;
use crate::store::{Resolution, SharedStore};

// =====================================================
// SETTLEMENT RULES
// =====================================================

/// Applies a resolution to rows already loaded and locked by a store.
///
/// `orders` are the market's resting orders and `positions` every ledger row of
/// the market. Returns the ids of the orders that were cancelled.
pub fn settle_market(
    market: &mut MarketWithOutcomes,
    orders: &mut [Order],
    positions: &mut [Position],
    winner: OutcomeLabel,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    market.market.resolve(winner, now)?;

    for outcome in market.outcomes.iter_mut() {
        outcome.settle(winner);
    }
    let winning_id = market
        .outcome(winner)
        .map(|o| o.id)
        .ok_or_else(|| ExchangeError::not_found("Winning outcome not found"))?;

    let mut cancelled = Vec::new();
    for order in orders.iter_mut().filter(|o| o.is_open()) {
        order.cancel(now)?;
        cancelled.push(order.id);
    }

    for position in positions.iter_mut() {
        position.mark_resolved(position.outcome_id == winning_id, now);
    }

    Ok(cancelled)
}

/// Applies an administrative status change to rows loaded and locked by a
/// store. Cancelling a market also cancels its resting `orders`; returns their ids.
pub fn apply_status_change(
    market: &mut MarketWithOutcomes,
    orders: &mut [Order],
    status: MarketStatus,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    market.market.set_status(status)?;

    let mut cancelled = Vec::new();
    if status == MarketStatus::Cancelled {
        for order in orders.iter_mut().filter(|o| o.is_open()) {
            order.cancel(now)?;
            cancelled.push(order.id);
        }
    }
    Ok(cancelled)
}

// =====================================================
// RESOLVER SERVICE
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTrigger {
    Manual,
    Sweep,
}

impl ResolutionTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Sweep => "sweep",
        }
    }
}

/// Per-run result of the expiry sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub resolved: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

pub struct MarketResolver {
    store: SharedStore,
    publisher: SharedPublisher,
    dispatcher: Arc<MatchDispatcher>,
    price_scale: u32,
}

impl MarketResolver {
    pub fn new(
        store: SharedStore,
        publisher: SharedPublisher,
        dispatcher: Arc<MatchDispatcher>,
        price_scale: u32,
    ) -> Self {
        Self {
            store,
            publisher,
            dispatcher,
            price_scale,
        }
    }

    /// Pauses, resumes or cancels a market. Cancelling also cancels every
    /// resting order; a RESOLVED or CANCELLED market no longer changes.
    #[tracing::instrument(skip(self, auth), fields(actor = %auth.user_id))]
    pub async fn set_market_status(
        &self,
        auth: &AuthContext,
        market_id: Uuid,
        status: MarketStatus,
    ) -> Result<MarketWithOutcomes> {
        auth.require(permissions::MARKETS_CREATE)?;
        let change = self.store.set_market_status(market_id, status).await?;

        tracing::info!(
            market_id = %market_id,
            status = %status,
            cancelled_orders = change.cancelled_orders.len(),
            "Market status changed"
        );

        if status.is_terminal() {
            self.dispatcher.retire(market_id);
        }
        if !change.cancelled_orders.is_empty() {
            self.publish_empty_book(market_id).await;
        }
        Ok(change.market)
    }

    /// Resolves on behalf of an oracle or admin decision
    #[tracing::instrument(skip(self, auth), fields(actor = %auth.user_id))]
    pub async fn resolve_market(
        &self,
        auth: &AuthContext,
        market_id: Uuid,
        winner: OutcomeLabel,
    ) -> Result<MarketWithOutcomes> {
        auth.require(permissions::MARKETS_RESOLVE)?;
        self.resolve(market_id, winner, ResolutionTrigger::Manual)
            .await
            .map(|r| r.market)
    }

    async fn resolve(
        &self,
        market_id: Uuid,
        winner: OutcomeLabel,
        trigger: ResolutionTrigger,
    ) -> Result<Resolution> {
        let resolution = self.store.resolve_market(market_id, winner).await?;

        tracing::info!(
            market_id = %market_id,
            outcome = %winner,
            trigger = trigger.as_str(),
            cancelled_orders = resolution.cancelled_orders.len(),
            positions_settled = resolution.positions_settled,
            "Market resolved"
        );
        if let Some(ref metrics) = *get_metrics() {
            metrics
                .markets_resolved_total
                .with_label_values(&[trigger.as_str()])
                .inc();
        }

        publish_logged(
            self.publisher.as_ref(),
            ExchangeEvent::MarketResolved(MarketResolved {
                market_id,
                question: resolution.market.market.question.clone(),
                outcome: winner,
            }),
        )
        .await;

        self.dispatcher.retire(market_id);
        self.publish_empty_book(market_id).await;

        Ok(resolution)
    }

    /// Every resting order of a closed market was cancelled with it
    async fn publish_empty_book(&self, market_id: Uuid) {
        let ladder = build_order_book(market_id, std::iter::empty(), self.price_scale);
        publish_logged(
            self.publisher.as_ref(),
            ExchangeEvent::OrderBookUpdated(OrderBookUpdated { market_id, ladder }),
        )
        .await;
    }

    /// Resolves every ACTIVE market past its resolution date using the
    /// last-trade YES price. One market failing never stops the others.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired = self.store.expired_markets(now).await?;
        let mut report = SweepReport::default();

        for market in expired {
            let market_id = market.market.id;
            let winner = decide_by_price(&market.outcomes);

            match self.resolve(market_id, winner, ResolutionTrigger::Sweep).await {
                Ok(_) => report.resolved.push(market_id),
                Err(e) => {
                    tracing::error!(
                        market_id = %market_id,
                        error = %e,
                        "Failed to auto-resolve market"
                    );
                    if let Some(ref metrics) = *get_metrics() {
                        metrics
                            .sweep_failures_total
                            .with_label_values(&["resolution"])
                            .inc();
                    }
                    report.failed.push(market_id);
                }
            }
        }

        if !report.resolved.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                resolved = report.resolved.len(),
                failed = report.failed.len(),
                "Resolution sweep finished"
            );
        }
        Ok(report)
    }
}
