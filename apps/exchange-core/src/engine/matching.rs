//! Matching Engine
//! Price-time priority matching of one aggressor against resting liquidity.
//! Candidates are settled strictly one after another; each settlement hands
//! back the post-trade orders so the loop never re-polls the store.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;
use uuid::Uuid;

use crate::domain::{Order, OrderType, Side, Trade};
use crate::engine::order_book::load_order_book;
use crate::engine::settlement::{Execution, TradeRequest};
use crate::error::Result;
use crate::events::{publish_logged, ExchangeEvent, OrderBookUpdated, SharedPublisher};
use crate::observability::metrics::get_metrics;
use crate::store::SharedStore;

// =====================================================
// CANDIDATE SELECTION
// =====================================================

fn price_compatible(aggressor: &Order, resting: &Order) -> bool {
    match (aggressor.order_type, aggressor.side) {
        (OrderType::Market, _) => true,
        (OrderType::Limit, Side::Buy) => resting.price <= aggressor.price,
        (OrderType::Limit, Side::Sell) => resting.price >= aggressor.price,
    }
}

/// Filters `resting` down to orders the aggressor may trade with and sorts them
/// best price first (lowest ask for a BUY, highest bid for a SELL), then by
/// earliest `created_at`, then by insertion sequence.
pub fn rank_candidates(aggressor: &Order, resting: Vec<Order>) -> Vec<Order> {
    let mut candidates: Vec<Order> = resting
        .into_iter()
        .filter(|o| {
            o.id != aggressor.id
                && o.market_id == aggressor.market_id
                && o.outcome_id == aggressor.outcome_id
                && o.side == aggressor.side.opposite()
                && o.user_id != aggressor.user_id
                && o.is_open()
                && o.remaining > Decimal::ZERO
                && price_compatible(aggressor, o)
        })
        .collect();

    candidates.sort_by(|a, b| priority(aggressor.side, a, b));
    candidates
}

/// Price priority for an aggressor on `side`, then FIFO
fn priority(side: Side, a: &Order, b: &Order) -> Ordering {
    let by_price = match side {
        Side::Buy => a.price.cmp(&b.price),
        Side::Sell => b.price.cmp(&a.price),
    };
    by_price
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.seq.cmp(&b.seq))
}

/// The trade an aggressor and a resting order would make right now
pub fn propose_trade(aggressor: &Order, resting: &Order) -> TradeRequest {
    let (buy_order_id, sell_order_id) = match aggressor.side {
        Side::Buy => (aggressor.id, resting.id),
        Side::Sell => (resting.id, aggressor.id),
    };
    TradeRequest {
        buy_order_id,
        sell_order_id,
        // The resting order always sets the execution price
        price: resting.price,
        amount: aggressor.remaining.min(resting.remaining),
    }
}

// =====================================================
// MATCHING ENGINE
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    /// Aggressor as it stands after the pass
    pub order: Order,
    pub trades: Vec<Trade>,
    /// Candidates skipped because settlement failed
    pub failed_candidates: usize,
}

impl MatchReport {
    pub fn filled_amount(&self) -> Decimal {
        self.trades.iter().map(|t| t.amount).sum()
    }
}

enum Attempt {
    Settled(Execution),
    /// The aggressor is no longer resting; stop the pass
    AggressorGone(Order),
    Skipped,
}

pub struct MatchingEngine {
    store: SharedStore,
    publisher: SharedPublisher,
    price_scale: u32,
}

impl MatchingEngine {
    pub fn new(store: SharedStore, publisher: SharedPublisher, price_scale: u32) -> Self {
        Self {
            store,
            publisher,
            price_scale,
        }
    }

    /// Runs one matching pass for `order_id` and refreshes the book
    #[tracing::instrument(skip(self))]
    pub async fn match_order(&self, order_id: Uuid) -> Result<MatchReport> {
        let start = Instant::now();
        let mut aggressor = self.store.get_order(order_id).await?;
        let mut report_trades = Vec::new();
        let mut failed_candidates = 0;

        if aggressor.is_open() {
            let resting = self
                .store
                .resting_orders(
                    aggressor.market_id,
                    aggressor.outcome_id,
                    aggressor.side.opposite(),
                    aggressor.user_id,
                )
                .await?;
            let candidates = rank_candidates(&aggressor, resting);

            tracing::debug!(
                order_id = %order_id,
                candidates = candidates.len(),
                "Matching order"
            );

            for candidate in candidates {
                if !aggressor.is_open() || aggressor.remaining <= Decimal::ZERO {
                    break;
                }

                match self.attempt(&aggressor, candidate).await {
                    Attempt::Settled(execution) => {
                        if let Some(updated) = execution.order(aggressor.id) {
                            aggressor = updated.clone();
                        }
                        self.on_trade(&execution.trade).await;
                        report_trades.push(execution.trade);
                    }
                    Attempt::AggressorGone(order) => {
                        aggressor = order;
                        break;
                    }
                    Attempt::Skipped => failed_candidates += 1,
                }
            }
        }

        self.refresh_book(aggressor.market_id).await;

        if let Some(ref metrics) = *get_metrics() {
            metrics
                .matching_duration
                .with_label_values(&["match_order"])
                .observe(start.elapsed().as_secs_f64());
        }

        tracing::info!(
            order_id = %order_id,
            trades = report_trades.len(),
            status = ?aggressor.status,
            remaining = %aggressor.remaining,
            "Matching pass finished"
        );

        Ok(MatchReport {
            order: aggressor,
            trades: report_trades,
            failed_candidates,
        })
    }

    /// Settles against one candidate; on a stale read both orders are
    /// reloaded and the trade is recomputed and retried once.
    async fn attempt(&self, aggressor: &Order, candidate: Order) -> Attempt {
        let request = propose_trade(aggressor, &candidate);

        let err = match self.store.execute_trade(&request).await {
            Ok(execution) => return Attempt::Settled(execution),
            Err(e) => e,
        };
        if !err.is_conflict() {
            tracing::warn!(
                aggressor_id = %aggressor.id,
                candidate_id = %candidate.id,
                error = %err,
                "Trade execution failed, skipping candidate"
            );
            return Attempt::Skipped;
        }
        self.count_conflict();

        let (aggressor, candidate) = match self.reload(aggressor.id, candidate.id).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to reload orders after conflict");
                return Attempt::Skipped;
            }
        };
        if !aggressor.is_open() || aggressor.remaining <= Decimal::ZERO {
            return Attempt::AggressorGone(aggressor);
        }
        if !candidate.is_open() || candidate.remaining <= Decimal::ZERO {
            tracing::debug!(candidate_id = %candidate.id, "Candidate no longer resting");
            return Attempt::Skipped;
        }

        let retry = propose_trade(&aggressor, &candidate);
        match self.store.execute_trade(&retry).await {
            Ok(execution) => Attempt::Settled(execution),
            Err(e) => {
                if e.is_conflict() {
                    self.count_conflict();
                }
                tracing::warn!(
                    aggressor_id = %aggressor.id,
                    candidate_id = %candidate.id,
                    error = %e,
                    "Retried trade execution failed, skipping candidate"
                );
                // Keep the aggressor view current for the next candidate
                match self.store.get_order(aggressor.id).await {
                    Ok(order) if !order.is_open() => Attempt::AggressorGone(order),
                    _ => Attempt::Skipped,
                }
            }
        }
    }

    async fn reload(&self, aggressor_id: Uuid, candidate_id: Uuid) -> Result<(Order, Order)> {
        let aggressor = self.store.get_order(aggressor_id).await?;
        let candidate = self.store.get_order(candidate_id).await?;
        Ok((aggressor, candidate))
    }

    fn count_conflict(&self) {
        if let Some(ref metrics) = *get_metrics() {
            metrics.settlement_conflicts_total.inc();
        }
    }

    async fn on_trade(&self, trade: &Trade) {
        tracing::info!(
            trade_id = %trade.id,
            market_id = %trade.market_id,
            price = %trade.price,
            amount = %trade.amount,
            "Trade executed"
        );
        if let Some(ref metrics) = *get_metrics() {
            metrics.trades_executed_total.inc();
            metrics
                .traded_volume_total
                .inc_by((trade.price * trade.amount).to_f64().unwrap_or(0.0));
        }
        publish_logged(
            self.publisher.as_ref(),
            ExchangeEvent::TradeExecuted(trade.into()),
        )
        .await;
    }

    async fn refresh_book(&self, market_id: Uuid) {
        match load_order_book(self.store.as_ref(), market_id, self.price_scale).await {
            Ok(ladder) => {
                publish_logged(
                    self.publisher.as_ref(),
                    ExchangeEvent::OrderBookUpdated(OrderBookUpdated { market_id, ladder }),
                )
                .await
            }
            Err(e) => tracing::warn!(market_id = %market_id, error = %e, "Failed to rebuild order book"),
        }
    }
}
