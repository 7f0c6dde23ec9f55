//! NATS Event Publisher
//! Outbound events on subjects named after the event, JSON bodies

use async_nats::Client;
use async_trait::async_trait;

use crate::error::ExchangeError;
use crate::events::{EventPublisher, ExchangeEvent};
use crate::observability::metrics::get_metrics;
use crate::resilience::{with_retry_async, RetryConfig};

pub struct NatsPublisher {
    client: Client,
    retry: RetryConfig,
}

impl NatsPublisher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: RetryConfig::publish(),
        }
    }
}

/// Body of an event as consumers see it: the event fields without the envelope
pub fn encode_event(event: &ExchangeEvent) -> serde_json::Result<Vec<u8>> {
    match event {
        ExchangeEvent::TradeExecuted(e) => serde_json::to_vec(e),
        ExchangeEvent::OrderBookUpdated(e) => serde_json::to_vec(e),
        ExchangeEvent::MarketResolved(e) => serde_json::to_vec(e),
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &ExchangeEvent) -> Result<(), ExchangeError> {
        let subject = event.subject();
        let body = encode_event(event).map_err(|e| ExchangeError::Publish(e.to_string()))?;

        with_retry_async(subject, &self.retry, || async {
            self.client
                .publish(subject, body.clone().into())
                .await
                .map_err(|e| ExchangeError::Publish(e.to_string()))
        })
        .await?;

        if let Some(ref metrics) = *get_metrics() {
            metrics
                .nats_messages_published
                .with_label_values(&[subject])
                .inc();
        }
        Ok(())
    }
}
