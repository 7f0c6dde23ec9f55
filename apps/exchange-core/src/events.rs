//! Outbound events
//! Published after the owning transaction commits; a failed publish is logged
//! and counted, never rolled back into state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::{OutcomeLabel, Trade};
use crate::engine::order_book::OrderBook;
use crate::error::ExchangeError;
use crate::observability::metrics::get_metrics;

pub const TRADE_EXECUTED: &str = "trade.executed";
pub const ORDERBOOK_UPDATED: &str = "orderbook.updated";
pub const MARKET_RESOLVED: &str = "market.resolved";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeExecuted {
    pub trade_id: Uuid,
    pub market_id: Uuid,
    pub outcome_id: Uuid,
    pub price: Decimal,
    pub amount: Decimal,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub executed_at: DateTime<Utc>,
}

impl From<&Trade> for TradeExecuted {
    fn from(t: &Trade) -> Self {
        Self {
            trade_id: t.id,
            market_id: t.market_id,
            outcome_id: t.outcome_id,
            price: t.price,
            amount: t.amount,
            buyer_id: t.buyer_id,
            seller_id: t.seller_id,
            executed_at: t.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookUpdated {
    pub market_id: Uuid,
    pub ladder: OrderBook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketResolved {
    pub market_id: Uuid,
    pub question: String,
    pub outcome: OutcomeLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ExchangeEvent {
    #[serde(rename = "trade.executed")]
    TradeExecuted(TradeExecuted),
    #[serde(rename = "orderbook.updated")]
    OrderBookUpdated(OrderBookUpdated),
    #[serde(rename = "market.resolved")]
    MarketResolved(MarketResolved),
}

impl ExchangeEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::TradeExecuted(_) => TRADE_EXECUTED,
            Self::OrderBookUpdated(_) => ORDERBOOK_UPDATED,
            Self::MarketResolved(_) => MARKET_RESOLVED,
        }
    }

    pub fn market_id(&self) -> Uuid {
        match self {
            Self::TradeExecuted(e) => e.market_id,
            Self::OrderBookUpdated(e) => e.market_id,
            Self::MarketResolved(e) => e.market_id,
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &ExchangeEvent) -> Result<(), ExchangeError>;
}

pub type SharedPublisher = Arc<dyn EventPublisher>;

/// Publishes and swallows failures; events never undo a committed change
pub async fn publish_logged(publisher: &dyn EventPublisher, event: ExchangeEvent) {
    match publisher.publish(&event).await {
        Ok(()) => {
            if let Some(ref metrics) = *get_metrics() {
                metrics
                    .events_published
                    .with_label_values(&[event.subject()])
                    .inc();
            }
        }
        Err(e) => {
            tracing::error!(
                subject = event.subject(),
                market_id = %event.market_id(),
                error = %e,
                "Failed to publish event"
            );
            if let Some(ref metrics) = *get_metrics() {
                metrics
                    .events_failed
                    .with_label_values(&[event.subject()])
                    .inc();
            }
        }
    }
}

/// In-process fan-out; subscribers that lag lose the oldest events
pub struct BroadcastPublisher {
    sender: broadcast::Sender<ExchangeEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: &ExchangeEvent) -> Result<(), ExchangeError> {
        // No subscribers is not an error
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}
