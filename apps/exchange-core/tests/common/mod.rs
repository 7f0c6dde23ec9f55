//! Shared harness: an exchange over the in-memory store with an in-process
//! event bus

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fake::faker::lorem::en::Sentence;
use fake::Fake;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

use exchange_core::auth::AuthContext;
use exchange_core::domain::{
    Claim, MarketStatus, MarketWithOutcomes, NewOrderRequest, Order, OrderStatus, OrderType,
    OutcomeLabel, Position, PriceSnapshot, Side, Trade,
};
use exchange_core::engine::order_book::DEFAULT_PRICE_SCALE;
use exchange_core::engine::settlement::{Execution, TradeRequest};
use exchange_core::events::{BroadcastPublisher, ExchangeEvent};
use exchange_core::store::{
    ExchangeStore, MatchTask, MemoryStore, Resolution, SharedStore, StatusChange,
};
use exchange_core::{Exchange, ExchangeError};

pub struct Harness {
    pub exchange: Arc<Exchange>,
    pub store: SharedStore,
    pub bus: Arc<BroadcastPublisher>,
    pub events: broadcast::Receiver<ExchangeEvent>,
    pub admin: AuthContext,
}

impl Harness {
    pub fn new() -> Self {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let bus = Arc::new(BroadcastPublisher::new(4096));
        let events = bus.subscribe();
        let exchange = Arc::new(Exchange::new(store.clone(), bus.clone(), DEFAULT_PRICE_SCALE));

        Self {
            exchange,
            store,
            bus,
            events,
            admin: AuthContext::admin(Uuid::new_v4()),
        }
    }

    /// ACTIVE market resolving in a week, YES and NO at 0.5
    pub async fn market(&self) -> MarketWithOutcomes {
        self.market_resolving_at(Utc::now() + Duration::days(7)).await
    }

    /// Inserted through the store so the date may lie in the past
    pub async fn market_resolving_at(&self, resolution_date: DateTime<Utc>) -> MarketWithOutcomes {
        let question: String = Sentence(4..9).fake();
        self.store
            .create_market(MarketWithOutcomes::open(question, resolution_date, Utc::now()))
            .await
            .expect("create market")
    }

    /// Submits and waits until its matching pass has run
    pub async fn submit(&self, auth: &AuthContext, request: NewOrderRequest) -> Order {
        let order = self
            .exchange
            .orders
            .submit_order(auth, request)
            .await
            .expect("submit order");
        self.settle(order.market_id).await;
        self.order(order.id).await
    }

    pub async fn settle(&self, market_id: Uuid) {
        self.exchange.dispatcher.barrier(market_id).await;
    }

    pub async fn order(&self, order_id: Uuid) -> Order {
        self.store.get_order(order_id).await.expect("load order")
    }

    pub fn drain_events(&mut self) -> Vec<ExchangeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn trader() -> AuthContext {
    AuthContext::trader(Uuid::new_v4())
}

pub fn outcome_id(market: &MarketWithOutcomes, label: OutcomeLabel) -> Uuid {
    market.outcome(label).expect("outcome exists").id
}

pub fn limit(
    market: &MarketWithOutcomes,
    label: OutcomeLabel,
    side: Side,
    amount: Decimal,
    price: Decimal,
) -> NewOrderRequest {
    NewOrderRequest {
        market_id: market.market.id,
        outcome_id: outcome_id(market, label),
        side,
        order_type: OrderType::Limit,
        price: Some(price),
        amount,
    }
}

pub fn market_order(
    market: &MarketWithOutcomes,
    label: OutcomeLabel,
    side: Side,
    amount: Decimal,
) -> NewOrderRequest {
    NewOrderRequest {
        market_id: market.market.id,
        outcome_id: outcome_id(market, label),
        side,
        order_type: OrderType::Market,
        price: None,
        amount,
    }
}

// =====================================================
// SCRIPTED STORE
// =====================================================

/// Interference injected ahead of the first settlement
pub enum Interference {
    /// The owner cancels this resting order
    Cancel { owner: Uuid, order_id: Uuid },
    /// Another trade settles first and takes liquidity
    Trade(TradeRequest),
}

/// Memory store that lets a test change the book between the matcher's read
/// and its settlement, or fail one market's resolution
pub struct ScriptedStore {
    pub inner: MemoryStore,
    interference: Mutex<Option<Interference>>,
    failing_resolution: Mutex<Option<Uuid>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            interference: Mutex::new(None),
            failing_resolution: Mutex::new(None),
        }
    }

    pub fn interfere(&self, interference: Interference) {
        *self.interference.lock().expect("interference lock") = Some(interference);
    }

    pub fn fail_resolution_of(&self, market_id: Uuid) {
        *self.failing_resolution.lock().expect("resolution lock") = Some(market_id);
    }
}

#[async_trait]
impl ExchangeStore for ScriptedStore {
    async fn ping(&self) -> exchange_core::Result<()> {
        self.inner.ping().await
    }

    async fn create_market(&self, market: MarketWithOutcomes) -> exchange_core::Result<MarketWithOutcomes> {
        self.inner.create_market(market).await
    }

    async fn get_market(&self, market_id: Uuid) -> exchange_core::Result<MarketWithOutcomes> {
        self.inner.get_market(market_id).await
    }

    async fn active_markets(&self) -> exchange_core::Result<Vec<MarketWithOutcomes>> {
        self.inner.active_markets().await
    }

    async fn expired_markets(&self, now: DateTime<Utc>) -> exchange_core::Result<Vec<MarketWithOutcomes>> {
        self.inner.expired_markets(now).await
    }

    async fn resolve_market(&self, market_id: Uuid, winner: OutcomeLabel) -> exchange_core::Result<Resolution> {
        let failing = *self.failing_resolution.lock().expect("resolution lock");
        if failing == Some(market_id) {
            return Err(ExchangeError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.resolve_market(market_id, winner).await
    }

    async fn set_market_status(&self, market_id: Uuid, status: MarketStatus) -> exchange_core::Result<StatusChange> {
        self.inner.set_market_status(market_id, status).await
    }

    async fn create_order(&self, user_id: Uuid, request: NewOrderRequest) -> exchange_core::Result<Order> {
        self.inner.create_order(user_id, request).await
    }

    async fn get_order(&self, order_id: Uuid) -> exchange_core::Result<Order> {
        self.inner.get_order(order_id).await
    }

    async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> exchange_core::Result<Order> {
        self.inner.cancel_order(user_id, order_id).await
    }

    async fn resting_orders(
        &self,
        market_id: Uuid,
        outcome_id: Uuid,
        side: Side,
        exclude_user: Uuid,
    ) -> exchange_core::Result<Vec<Order>> {
        self.inner
            .resting_orders(market_id, outcome_id, side, exclude_user)
            .await
    }

    async fn open_orders(&self, market_id: Uuid) -> exchange_core::Result<Vec<Order>> {
        self.inner.open_orders(market_id).await
    }

    async fn user_orders(&self, user_id: Uuid, status: Option<OrderStatus>) -> exchange_core::Result<Vec<Order>> {
        self.inner.user_orders(user_id, status).await
    }

    async fn execute_trade(&self, request: &TradeRequest) -> exchange_core::Result<Execution> {
        let pending = self.interference.lock().expect("interference lock").take();
        match pending {
            Some(Interference::Cancel { owner, order_id }) => {
                self.inner.cancel_order(owner, order_id).await?;
            }
            Some(Interference::Trade(other)) => {
                self.inner.execute_trade(&other).await?;
            }
            None => {}
        }
        self.inner.execute_trade(request).await
    }

    async fn claim_winnings(&self, user_id: Uuid, market_id: Uuid) -> exchange_core::Result<Claim> {
        self.inner.claim_winnings(user_id, market_id).await
    }

    async fn user_positions(&self, user_id: Uuid) -> exchange_core::Result<Vec<Position>> {
        self.inner.user_positions(user_id).await
    }

    async fn market_positions(&self, market_id: Uuid) -> exchange_core::Result<Vec<Position>> {
        self.inner.market_positions(market_id).await
    }

    async fn market_trades(&self, market_id: Uuid, limit: i64) -> exchange_core::Result<Vec<Trade>> {
        self.inner.market_trades(market_id, limit).await
    }

    async fn user_trades(&self, user_id: Uuid, limit: i64) -> exchange_core::Result<Vec<Trade>> {
        self.inner.user_trades(user_id, limit).await
    }

    async fn record_price_snapshots(&self, snapshots: &[PriceSnapshot]) -> exchange_core::Result<()> {
        self.inner.record_price_snapshots(snapshots).await
    }

    async fn price_history(
        &self,
        market_id: Uuid,
        outcome_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> exchange_core::Result<Vec<PriceSnapshot>> {
        self.inner.price_history(market_id, outcome_id, since).await
    }

    async fn pending_match_tasks(&self) -> exchange_core::Result<Vec<MatchTask>> {
        self.inner.pending_match_tasks().await
    }

    async fn complete_match_task(&self, order_id: Uuid) -> exchange_core::Result<()> {
        self.inner.complete_match_task(order_id).await
    }
}
