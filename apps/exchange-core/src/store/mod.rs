//! Storage seam
//! Every mutating call is one atomic transaction with row-level locking on the
//! rows it touches; business rules live in `domain` and `engine` and are shared
//! by both implementations.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    Claim, MarketStatus, MarketWithOutcomes, NewOrderRequest, Order, OrderStatus, OutcomeLabel,
    Position, PriceSnapshot, Side, Trade,
};
use crate::engine::settlement::{Execution, TradeRequest};
use crate::error::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type SharedStore = Arc<dyn ExchangeStore>;

/// Outbox row written together with the order it asks to match
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MatchTask {
    pub order_id: Uuid,
    pub market_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

/// Outcome of a committed market resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub market: MarketWithOutcomes,
    pub cancelled_orders: Vec<Uuid>,
    pub positions_settled: usize,
}

/// Outcome of a committed administrative status change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub market: MarketWithOutcomes,
    pub cancelled_orders: Vec<Uuid>,
}

#[async_trait]
pub trait ExchangeStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    // Markets

    async fn create_market(&self, market: MarketWithOutcomes) -> Result<MarketWithOutcomes>;

    async fn get_market(&self, market_id: Uuid) -> Result<MarketWithOutcomes>;

    async fn active_markets(&self) -> Result<Vec<MarketWithOutcomes>>;

    /// ACTIVE markets whose resolution date is at or before `now`
    async fn expired_markets(&self, now: DateTime<Utc>) -> Result<Vec<MarketWithOutcomes>>;

    /// ACTIVE -> RESOLVED: settles outcome prices, cancels resting orders and
    /// revalues every position of the market
    async fn resolve_market(&self, market_id: Uuid, winner: OutcomeLabel) -> Result<Resolution>;

    /// ACTIVE <-> PAUSED, or -> CANCELLED together with every resting order
    async fn set_market_status(&self, market_id: Uuid, status: MarketStatus) -> Result<StatusChange>;

    // Orders

    /// Inserts an OPEN order and its match task in one transaction
    async fn create_order(&self, user_id: Uuid, request: NewOrderRequest) -> Result<Order>;

    async fn get_order(&self, order_id: Uuid) -> Result<Order>;

    async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order>;

    /// Resting orders on `side` of one outcome, excluding `exclude_user`
    async fn resting_orders(
        &self,
        market_id: Uuid,
        outcome_id: Uuid,
        side: Side,
        exclude_user: Uuid,
    ) -> Result<Vec<Order>>;

    /// Every resting order of a market
    async fn open_orders(&self, market_id: Uuid) -> Result<Vec<Order>>;

    /// A user's orders newest first, optionally only those in `status`
    async fn user_orders(&self, user_id: Uuid, status: Option<OrderStatus>) -> Result<Vec<Order>>;

    // Settlement

    async fn execute_trade(&self, request: &TradeRequest) -> Result<Execution>;

    async fn claim_winnings(&self, user_id: Uuid, market_id: Uuid) -> Result<Claim>;

    // Ledger & history

    async fn user_positions(&self, user_id: Uuid) -> Result<Vec<Position>>;

    async fn market_positions(&self, market_id: Uuid) -> Result<Vec<Position>>;

    async fn market_trades(&self, market_id: Uuid, limit: i64) -> Result<Vec<Trade>>;

    async fn user_trades(&self, user_id: Uuid, limit: i64) -> Result<Vec<Trade>>;

    async fn record_price_snapshots(&self, snapshots: &[PriceSnapshot]) -> Result<()>;

    async fn price_history(
        &self,
        market_id: Uuid,
        outcome_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PriceSnapshot>>;

    // Match outbox

    async fn pending_match_tasks(&self) -> Result<Vec<MatchTask>>;

    async fn complete_match_task(&self, order_id: Uuid) -> Result<()>;
}
