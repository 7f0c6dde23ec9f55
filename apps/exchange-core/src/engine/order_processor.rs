//! Order Processing
//! Market creation, order submission and cancellation, and the order-side
//! read queries. Matching itself runs behind the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{permissions, AuthContext};
use crate::domain::{MarketWithOutcomes, NewOrderRequest, Order, OrderStatus, Trade};
use crate::engine::dispatcher::MatchDispatcher;
use crate::engine::order_book::{load_order_book, OrderBook};
use crate::error::{ExchangeError, Result};
use crate::events::{publish_logged, ExchangeEvent, OrderBookUpdated, SharedPublisher};
use crate::observability::metrics::get_metrics;
use crate::store::SharedStore;

/// Most recent trades returned when a caller gives no limit
pub const DEFAULT_TRADE_LIMIT: i64 = 50;
pub const MAX_TRADE_LIMIT: i64 = 500;

// =====================================================
// REQUESTS
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMarketRequest {
    pub question: String,
    #[serde(alias = "resolution_date")]
    pub resolution_date: DateTime<Utc>,
}

impl CreateMarketRequest {
    fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(ExchangeError::validation("Question is required"));
        }
        if self.resolution_date <= now {
            return Err(ExchangeError::validation(
                "Resolution date must be in the future",
            ));
        }
        Ok(())
    }
}

// =====================================================
// ORDER PROCESSOR
// =====================================================

pub struct OrderProcessor {
    store: SharedStore,
    publisher: SharedPublisher,
    dispatcher: Arc<MatchDispatcher>,
    price_scale: u32,
}

impl OrderProcessor {
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

    pub fn dispatcher(&self) -> &MatchDispatcher {
        &self.dispatcher
    }

    // =====================================================
    // MARKETS
    // =====================================================

    /// Opens a market with YES and NO both priced at 0.5
    #[tracing::instrument(skip(self, auth, req), fields(actor = %auth.user_id))]
    pub async fn create_market(
        &self,
        auth: &AuthContext,
        req: CreateMarketRequest,
    ) -> Result<MarketWithOutcomes> {
        auth.require(permissions::MARKETS_CREATE)?;
        let now = Utc::now();
        req.validate(now)?;

        let market = self
            .store
            .create_market(MarketWithOutcomes::open(
                req.question.trim().to_string(),
                req.resolution_date,
                now,
            ))
            .await?;

        tracing::info!(
            market_id = %market.market.id,
            resolution_date = %market.market.resolution_date,
            "Market created"
        );
        Ok(market)
    }

    pub async fn get_market(&self, market_id: Uuid) -> Result<MarketWithOutcomes> {
        self.store.get_market(market_id).await
    }

    pub async fn active_markets(&self) -> Result<Vec<MarketWithOutcomes>> {
        self.store.active_markets().await
    }

    // =====================================================
    // SUBMIT / CANCEL
    // =====================================================

    /// Persists the order OPEN together with its match task and queues the
    /// matching pass. The returned order is the pre-match snapshot.
    #[tracing::instrument(skip(self, auth, req), fields(actor = %auth.user_id))]
    pub async fn submit_order(&self, auth: &AuthContext, req: NewOrderRequest) -> Result<Order> {
        let side = req.side;
        let order_type = req.order_type;

        let result = match auth.require(permissions::ORDERS_CREATE) {
            Ok(()) => self.store.create_order(auth.user_id, req).await,
            Err(e) => Err(e),
        };

        let order = match result {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "Order rejected");
                if let Some(ref metrics) = *get_metrics() {
                    metrics
                        .orders_rejected_total
                        .with_label_values(&[e.code()])
                        .inc();
                }
                return Err(e);
            }
        };

        if let Some(ref metrics) = *get_metrics() {
            metrics
                .orders_submitted_total
                .with_label_values(&[side.as_str(), order_type.as_str()])
                .inc();
        }
        tracing::info!(
            order_id = %order.id,
            market_id = %order.market_id,
            side = side.as_str(),
            order_type = order_type.as_str(),
            price = %order.price,
            amount = %order.amount,
            "Order accepted"
        );

        self.dispatcher.enqueue(order.market_id, order.id);
        Ok(order)
    }

    #[tracing::instrument(skip(self, auth), fields(actor = %auth.user_id))]
    pub async fn cancel_order(&self, auth: &AuthContext, order_id: Uuid) -> Result<Order> {
        auth.require(permissions::ORDERS_CANCEL)?;
        let order = self.store.cancel_order(auth.user_id, order_id).await?;

        if let Some(ref metrics) = *get_metrics() {
            metrics.orders_cancelled_total.inc();
        }
        tracing::info!(order_id = %order.id, remaining = %order.remaining, "Order cancelled");

        self.publish_book(order.market_id).await;
        Ok(order)
    }

    // =====================================================
    // QUERIES
    // =====================================================

    pub async fn get_order(&self, auth: &AuthContext, order_id: Uuid) -> Result<Order> {
        auth.require(permissions::ORDERS_READ)?;
        let order = self.store.get_order(order_id).await?;
        if !auth.can_access_user(&order.user_id) {
            return Err(ExchangeError::forbidden("Not your order"));
        }
        Ok(order)
    }

    /// The caller's orders newest first, optionally narrowed to one status
    pub async fn user_orders(
        &self,
        auth: &AuthContext,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        auth.require(permissions::ORDERS_READ)?;
        self.store.user_orders(auth.user_id, status).await
    }

    pub async fn get_order_book(&self, market_id: Uuid) -> Result<OrderBook> {
        load_order_book(self.store.as_ref(), market_id, self.price_scale).await
    }

    /// Most recent trades of a market, newest first
    pub async fn market_trades(&self, market_id: Uuid, limit: Option<i64>) -> Result<Vec<Trade>> {
        self.store.get_market(market_id).await?;
        let limit = limit.unwrap_or(DEFAULT_TRADE_LIMIT).clamp(1, MAX_TRADE_LIMIT);
        self.store.market_trades(market_id, limit).await
    }

    async fn publish_book(&self, market_id: Uuid) {
        match self.get_order_book(market_id).await {
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
