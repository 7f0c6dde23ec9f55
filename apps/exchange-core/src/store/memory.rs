//! In-process store
//! One mutex over the whole state: every call is a serialized transaction.
//! Rows are copied out, changed through the domain rules and written back only
//! when every step succeeded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ExchangeStore, MatchTask, Resolution, StatusChange};
use crate::domain::{
    Claim, Market, MarketStatus, MarketWithOutcomes, NewOrderRequest, Order, OrderStatus,
    Outcome, OutcomeLabel, Position, PriceSnapshot, Side, Trade,
};
use crate::engine::market_resolver::{apply_status_change, settle_market};
use crate::engine::settlement::{settle, Execution, SettlementInput, TradeRequest};
use crate::error::{ExchangeError, Result};

type PositionKey = (Uuid, Uuid, Uuid);

#[derive(Default)]
struct State {
    markets: HashMap<Uuid, Market>,
    outcomes: HashMap<Uuid, Outcome>,
    orders: HashMap<Uuid, Order>,
    trades: Vec<Trade>,
    positions: HashMap<PositionKey, Position>,
    price_history: Vec<PriceSnapshot>,
    match_tasks: Vec<MatchTask>,
    next_seq: i64,
}

impl State {
    fn market(&self, market_id: Uuid) -> Result<MarketWithOutcomes> {
        let market = self
            .markets
            .get(&market_id)
            .cloned()
            .ok_or_else(|| ExchangeError::not_found("Market not found"))?;
        let mut outcomes: Vec<Outcome> = self
            .outcomes
            .values()
            .filter(|o| o.market_id == market_id)
            .cloned()
            .collect();
        outcomes.sort_by_key(|o| o.label);
        Ok(MarketWithOutcomes { market, outcomes })
    }

    fn markets_where<F>(&self, keep: F) -> Vec<MarketWithOutcomes>
    where
        F: Fn(&Market) -> bool,
    {
        let mut markets: Vec<MarketWithOutcomes> = self
            .markets
            .values()
            .filter(|m| keep(m))
            .filter_map(|m| self.market(m.id).ok())
            .collect();
        markets.sort_by_key(|m| m.market.created_at);
        markets
    }

    fn order(&self, order_id: Uuid) -> Result<Order> {
        self.orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::not_found("Order not found"))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExchangeStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_market(&self, market: MarketWithOutcomes) -> Result<MarketWithOutcomes> {
        let mut state = self.state.lock().await;
        for outcome in &market.outcomes {
            state.outcomes.insert(outcome.id, outcome.clone());
        }
        state.markets.insert(market.market.id, market.market.clone());
        Ok(market)
    }

    async fn get_market(&self, market_id: Uuid) -> Result<MarketWithOutcomes> {
        self.state.lock().await.market(market_id)
    }

    async fn active_markets(&self) -> Result<Vec<MarketWithOutcomes>> {
        let state = self.state.lock().await;
        Ok(state.markets_where(|m| m.status == MarketStatus::Active))
    }

    async fn expired_markets(&self, now: DateTime<Utc>) -> Result<Vec<MarketWithOutcomes>> {
        let state = self.state.lock().await;
        Ok(state.markets_where(|m| m.is_expired(now)))
    }

    async fn resolve_market(&self, market_id: Uuid, winner: OutcomeLabel) -> Result<Resolution> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut market = state.market(market_id)?;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.market_id == market_id && o.is_open())
            .cloned()
            .collect();
        let mut positions: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.market_id == market_id)
            .cloned()
            .collect();

        let cancelled_orders = settle_market(&mut market, &mut orders, &mut positions, winner, now)?;

        state.markets.insert(market_id, market.market.clone());
        for outcome in &market.outcomes {
            state.outcomes.insert(outcome.id, outcome.clone());
        }
        for order in orders {
            state.orders.insert(order.id, order);
        }
        let positions_settled = positions.len();
        for position in positions {
            state.positions.insert(
                (position.user_id, position.market_id, position.outcome_id),
                position,
            );
        }

        Ok(Resolution {
            market,
            cancelled_orders,
            positions_settled,
        })
    }

    async fn set_market_status(&self, market_id: Uuid, status: MarketStatus) -> Result<StatusChange> {
        let mut state = self.state.lock().await;

        let mut market = state.market(market_id)?;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.market_id == market_id && o.is_open())
            .cloned()
            .collect();

        let cancelled_orders = apply_status_change(&mut market, &mut orders, status, Utc::now())?;

        state.markets.insert(market_id, market.market.clone());
        for order in orders {
            state.orders.insert(order.id, order);
        }
        Ok(StatusChange {
            market,
            cancelled_orders,
        })
    }

    async fn create_order(&self, user_id: Uuid, request: NewOrderRequest) -> Result<Order> {
        request.validate()?;
        let mut state = self.state.lock().await;

        let market = state.market(request.market_id)?;
        market.market.ensure_active()?;
        let outcome = market
            .outcomes
            .iter()
            .find(|o| o.id == request.outcome_id)
            .ok_or_else(|| ExchangeError::not_found("Outcome not found"))?;

        state.next_seq += 1;
        let now = Utc::now();
        let order = request.into_order(user_id, outcome.price, state.next_seq, now);

        state.orders.insert(order.id, order.clone());
        state.match_tasks.push(MatchTask {
            order_id: order.id,
            market_id: order.market_id,
            enqueued_at: now,
        });
        Ok(order)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.state.lock().await.order(order_id)
    }

    async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order> {
        let mut state = self.state.lock().await;
        let mut order = state.order(order_id)?;
        order.ensure_owned_by(user_id)?;
        order.cancel(Utc::now())?;
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn resting_orders(
        &self,
        market_id: Uuid,
        outcome_id: Uuid,
        side: Side,
        exclude_user: Uuid,
    ) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| {
                o.market_id == market_id
                    && o.outcome_id == outcome_id
                    && o.side == side
                    && o.is_open()
                    && o.user_id != exclude_user
            })
            .cloned()
            .collect())
    }

    async fn open_orders(&self, market_id: Uuid) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.market_id == market_id && o.is_open())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.seq);
        Ok(orders)
    }

    async fn user_orders(&self, user_id: Uuid, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id && status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(orders)
    }

    async fn execute_trade(&self, request: &TradeRequest) -> Result<Execution> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let buy_order = state.order(request.buy_order_id)?;
        let sell_order = state.order(request.sell_order_id)?;
        let market = state.market(buy_order.market_id)?;
        let outcome = market
            .outcomes
            .iter()
            .find(|o| o.id == buy_order.outcome_id)
            .cloned()
            .ok_or_else(|| ExchangeError::not_found("Outcome not found"))?;

        let buyer_key = (buy_order.user_id, buy_order.market_id, buy_order.outcome_id);
        let seller_key = (sell_order.user_id, sell_order.market_id, sell_order.outcome_id);
        let buyer_position = state.positions.get(&buyer_key).cloned().unwrap_or_else(|| {
            Position::flat(buy_order.user_id, buy_order.market_id, buy_order.outcome_id, now)
        });
        let seller_position = state.positions.get(&seller_key).cloned();

        let settlement = settle(
            SettlementInput {
                market: market.market,
                outcome,
                buy_order,
                sell_order,
                buyer_position,
                seller_position,
            },
            request,
            now,
        )?;

        state.trades.push(settlement.trade.clone());
        state
            .orders
            .insert(settlement.buy_order.id, settlement.buy_order.clone());
        state
            .orders
            .insert(settlement.sell_order.id, settlement.sell_order.clone());
        state
            .outcomes
            .insert(settlement.outcome.id, settlement.outcome.clone());
        state
            .positions
            .insert(buyer_key, settlement.buyer_position.clone());
        if let Some(ref seller_position) = settlement.seller_position {
            state.positions.insert(seller_key, seller_position.clone());
        }

        Ok(settlement.into())
    }

    async fn claim_winnings(&self, user_id: Uuid, market_id: Uuid) -> Result<Claim> {
        let mut state = self.state.lock().await;
        let market = state.market(market_id)?;
        let winner = market.market.winning_label()?;
        let winning = market
            .outcome(winner)
            .ok_or_else(|| ExchangeError::not_found("Winning outcome not found"))?;

        let key = (user_id, market_id, winning.id);
        let mut position = state
            .positions
            .get(&key)
            .cloned()
            .ok_or_else(|| ExchangeError::not_found("No position found for this market"))?;

        let claim = position.claim(Utc::now())?;
        state.positions.insert(key, position);
        Ok(claim)
    }

    async fn user_positions(&self, user_id: Uuid) -> Result<Vec<Position>> {
        let state = self.state.lock().await;
        let mut positions: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        positions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(positions)
    }

    async fn market_positions(&self, market_id: Uuid) -> Result<Vec<Position>> {
        let state = self.state.lock().await;
        Ok(state
            .positions
            .values()
            .filter(|p| p.market_id == market_id)
            .cloned()
            .collect())
    }

    async fn market_trades(&self, market_id: Uuid, limit: i64) -> Result<Vec<Trade>> {
        let state = self.state.lock().await;
        Ok(state
            .trades
            .iter()
            .rev()
            .filter(|t| t.market_id == market_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn user_trades(&self, user_id: Uuid, limit: i64) -> Result<Vec<Trade>> {
        let state = self.state.lock().await;
        Ok(state
            .trades
            .iter()
            .rev()
            .filter(|t| t.buyer_id == user_id || t.seller_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn record_price_snapshots(&self, snapshots: &[PriceSnapshot]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.price_history.extend_from_slice(snapshots);
        Ok(())
    }

    async fn price_history(
        &self,
        market_id: Uuid,
        outcome_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PriceSnapshot>> {
        let state = self.state.lock().await;
        state.market(market_id)?;
        Ok(state
            .price_history
            .iter()
            .filter(|s| s.market_id == market_id && s.outcome_id == outcome_id)
            .filter(|s| since.map_or(true, |since| s.recorded_at >= since))
            .cloned()
            .collect())
    }

    async fn pending_match_tasks(&self) -> Result<Vec<MatchTask>> {
        Ok(self.state.lock().await.match_tasks.clone())
    }

    async fn complete_match_task(&self, order_id: Uuid) -> Result<()> {
        self.state
            .lock()
            .await
            .match_tasks
            .retain(|t| t.order_id != order_id);
        Ok(())
    }
}

