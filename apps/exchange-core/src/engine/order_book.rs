//! Order Book View
//! Per-outcome bid/ask ladders aggregated from resting orders on demand

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::{Order, Side};
use crate::error::Result;
use crate::store::ExchangeStore;

/// Decimal places price levels are bucketed to
pub const DEFAULT_PRICE_SCALE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ladder {
    /// Highest price first
    pub bids: Vec<PriceLevel>,
    /// Lowest price first
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    pub market_id: Uuid,
    /// Keyed by outcome id
    pub outcomes: BTreeMap<Uuid, Ladder>,
}

impl OrderBook {
    pub fn ladder(&self, outcome_id: Uuid) -> Option<&Ladder> {
        self.outcomes.get(&outcome_id)
    }
}

/// Groups resting orders by outcome then side and sums `remaining` per price level.
/// Orders that are not resting are skipped.
pub fn build_order_book<'a, I>(market_id: Uuid, orders: I, price_scale: u32) -> OrderBook
where
    I: IntoIterator<Item = &'a Order>,
{
    #[derive(Default)]
    struct Sides {
        bids: BTreeMap<Decimal, Decimal>,
        asks: BTreeMap<Decimal, Decimal>,
    }

    let mut grouped: BTreeMap<Uuid, Sides> = BTreeMap::new();

    for order in orders {
        if order.market_id != market_id || !order.is_open() {
            continue;
        }
        let sides = grouped.entry(order.outcome_id).or_default();
        let levels = match order.side {
            Side::Buy => &mut sides.bids,
            Side::Sell => &mut sides.asks,
        };
        *levels
            .entry(order.price.round_dp(price_scale).normalize())
            .or_insert(Decimal::ZERO) += order.remaining;
    }

    let outcomes = grouped
        .into_iter()
        .map(|(outcome_id, sides)| {
            let ladder = Ladder {
                bids: sides
                    .bids
                    .into_iter()
                    .rev()
                    .map(|(price, amount)| PriceLevel { price, amount })
                    .collect(),
                asks: sides
                    .asks
                    .into_iter()
                    .map(|(price, amount)| PriceLevel { price, amount })
                    .collect(),
            };
            (outcome_id, ladder)
        })
        .collect();

    OrderBook { market_id, outcomes }
}

/// Current book of a market straight from the store; NotFound for unknown markets
pub async fn load_order_book(
    store: &dyn ExchangeStore,
    market_id: Uuid,
    price_scale: u32,
) -> Result<OrderBook> {
    store.get_market(market_id).await?;
    let orders = store.open_orders(market_id).await?;
    Ok(build_order_book(market_id, &orders, price_scale))
}
