//! NATS Request Handler
//! Request/reply surface over the exchange services. Callers are
//! authenticated upstream and pass their context in an `auth` block.

use async_nats::Client;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::domain::{MarketStatus, NewOrderRequest, OrderStatus, OutcomeLabel};
use crate::engine::order_processor::CreateMarketRequest;
use crate::error::{ExchangeError, Result};
use crate::exchange::Exchange;
use crate::observability::metrics::get_metrics;

pub const SUBJECTS: &[&str] = &[
    "orders.submit",
    "orders.cancel",
    "orders.query",
    "markets.create",
    "markets.resolve",
    "markets.update",
    "markets.query",
    "positions.claim",
    "positions.query",
    "positions.pnl",
    "portfolio.summary",
    "orderbook.query",
    "trades.query",
    "prices.history",
];

// =====================================================
// MESSAGE TYPES
// =====================================================

#[derive(Debug, Deserialize)]
struct AuthenticatedMessage<T> {
    auth: AuthContext,
    #[serde(flatten)]
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRef {
    #[serde(alias = "order_id")]
    order_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketRef {
    #[serde(alias = "market_id")]
    market_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketFilter {
    #[serde(default, alias = "market_id")]
    market_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest {
    #[serde(alias = "market_id")]
    market_id: Uuid,
    outcome: OutcomeLabel,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusUpdate {
    #[serde(alias = "market_id")]
    market_id: Uuid,
    status: MarketStatus,
}

#[derive(Debug, Default, Deserialize)]
struct OrdersQuery {
    #[serde(default)]
    status: Option<OrderStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradesQuery {
    #[serde(default)]
    auth: Option<AuthContext>,
    #[serde(default, alias = "market_id")]
    market_id: Option<Uuid>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceHistoryQuery {
    #[serde(alias = "market_id")]
    market_id: Uuid,
    #[serde(alias = "outcome_id")]
    outcome_id: Uuid,
    #[serde(default)]
    since: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AuthOnly {
    auth: AuthContext,
}

/// Reply envelope shared by every subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Reply {
    fn ok<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                success: true,
                data: Some(value),
                error: None,
                code: None,
            },
            Err(e) => Self::failure("INTERNAL", e.to_string()),
        }
    }

    fn failure(code: &str, error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            code: Some(code.to_string()),
        }
    }

    fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(&data),
            Err(e) => Self::failure(e.code(), e.to_string()),
        }
    }
}

fn parse<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload)
        .map_err(|e| ExchangeError::validation(format!("Invalid payload: {}", e)))
}

// =====================================================
// ROUTING
// =====================================================

/// Routes one request to the exchange and builds its reply
pub async fn handle_request(exchange: &Exchange, subject: &str, payload: &[u8]) -> Reply {
    match subject {
        "orders.submit" => Reply::from_result(
            async {
                let msg: AuthenticatedMessage<NewOrderRequest> = parse(payload)?;
                exchange.orders.submit_order(&msg.auth, msg.data).await
            }
            .await,
        ),
        "orders.cancel" => Reply::from_result(
            async {
                let msg: AuthenticatedMessage<OrderRef> = parse(payload)?;
                exchange.orders.cancel_order(&msg.auth, msg.data.order_id).await
            }
            .await,
        ),
        "orders.query" => Reply::from_result(
            async {
                let msg: AuthenticatedMessage<OrdersQuery> = parse(payload)?;
                exchange.orders.user_orders(&msg.auth, msg.data.status).await
            }
            .await,
        ),
        "markets.create" => Reply::from_result(
            async {
                let msg: AuthenticatedMessage<CreateMarketRequest> = parse(payload)?;
                exchange.orders.create_market(&msg.auth, msg.data).await
            }
            .await,
        ),
        "markets.resolve" => Reply::from_result(
            async {
                let msg: AuthenticatedMessage<ResolveRequest> = parse(payload)?;
                exchange
                    .resolver
                    .resolve_market(&msg.auth, msg.data.market_id, msg.data.outcome)
                    .await
            }
            .await,
        ),
        "markets.update" => Reply::from_result(
            async {
                let msg: AuthenticatedMessage<StatusUpdate> = parse(payload)?;
                exchange
                    .resolver
                    .set_market_status(&msg.auth, msg.data.market_id, msg.data.status)
                    .await
            }
            .await,
        ),
        "markets.query" => {
            let filter: Result<MarketFilter> = parse(payload);
            match filter {
                Ok(MarketFilter {
                    market_id: Some(id),
                }) => Reply::from_result(exchange.orders.get_market(id).await),
                Ok(_) => Reply::from_result(exchange.orders.active_markets().await),
                Err(e) => Reply::from_result::<()>(Err(e)),
            }
        }
        "positions.claim" => Reply::from_result(
            async {
                let msg: AuthenticatedMessage<MarketRef> = parse(payload)?;
                exchange
                    .positions
                    .claim_winnings(&msg.auth, msg.data.market_id)
                    .await
            }
            .await,
        ),
        "positions.query" => Reply::from_result(
            async {
                let msg: AuthOnly = parse(payload)?;
                exchange.positions.positions(&msg.auth).await
            }
            .await,
        ),
        "positions.pnl" => Reply::from_result(
            async {
                let msg: AuthOnly = parse(payload)?;
                exchange.positions.pnl_report(&msg.auth).await
            }
            .await,
        ),
        "portfolio.summary" => Reply::from_result(
            async {
                let msg: AuthOnly = parse(payload)?;
                exchange.positions.portfolio_summary(&msg.auth).await
            }
            .await,
        ),
        "orderbook.query" => Reply::from_result(
            async {
                let msg: MarketRef = parse(payload)?;
                exchange.orders.get_order_book(msg.market_id).await
            }
            .await,
        ),
        "trades.query" => {
            let query: Result<TradesQuery> = parse(payload);
            match query {
                Ok(TradesQuery {
                    market_id: Some(market_id),
                    limit,
                    ..
                }) => Reply::from_result(exchange.orders.market_trades(market_id, limit).await),
                Ok(TradesQuery {
                    auth: Some(auth),
                    limit,
                    ..
                }) => Reply::from_result(exchange.positions.trade_history(&auth, limit).await),
                Ok(_) => Reply::failure(
                    "VALIDATION",
                    "marketId or auth is required".to_string(),
                ),
                Err(e) => Reply::from_result::<()>(Err(e)),
            }
        }
        "prices.history" => Reply::from_result(
            async {
                let q: PriceHistoryQuery = parse(payload)?;
                exchange
                    .positions
                    .price_history(q.market_id, q.outcome_id, q.since)
                    .await
            }
            .await,
        ),
        other => Reply::failure("NOT_FOUND", format!("Unknown subject: {}", other)),
    }
}

// =====================================================
// NATS SUBSCRIBER
// =====================================================

pub struct NatsSubscriber {
    client: Client,
    exchange: Arc<Exchange>,
}

impl NatsSubscriber {
    pub fn new(client: Client, exchange: Arc<Exchange>) -> Self {
        Self { client, exchange }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut subscriptions = Vec::with_capacity(SUBJECTS.len());
        for subject in SUBJECTS {
            subscriptions.push(self.client.subscribe(*subject).await?);
        }
        let mut messages = stream::select_all(subscriptions);

        tracing::info!(subjects = SUBJECTS.len(), "NATS subscriber running");

        while let Some(msg) = messages.next().await {
            let client = self.client.clone();
            let exchange = self.exchange.clone();

            tokio::spawn(async move {
                let subject = msg.subject.to_string();
                if let Some(ref metrics) = *get_metrics() {
                    metrics
                        .nats_messages_received
                        .with_label_values(&[subject.as_str()])
                        .inc();
                }

                let reply = handle_request(&exchange, &subject, &msg.payload).await;
                if !reply.success {
                    tracing::debug!(
                        subject = %subject,
                        code = reply.code.as_deref().unwrap_or(""),
                        error = reply.error.as_deref().unwrap_or(""),
                        "Request failed"
                    );
                }

                let Some(reply_to) = msg.reply else {
                    return;
                };
                match serde_json::to_vec(&reply) {
                    Ok(body) => {
                        if let Err(e) = client.publish(reply_to, body.into()).await {
                            tracing::warn!(subject = %subject, error = %e, "Failed to send reply");
                        }
                    }
                    Err(e) => tracing::error!(subject = %subject, error = %e, "Failed to encode reply"),
                }
            });
        }

        anyhow::bail!("NATS subscriptions closed")
    }
}
