//! Trade Execution
//! Turns one match into the full set of row changes a store commits atomically:
//! the trade, both order fills, the outcome mark and both ledger entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Market, Order, Outcome, Position, SellFill, Side, Trade};
use crate::error::ExchangeError;

/// A match the engine asks a store to settle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    /// Resting order's price
    pub price: Decimal,
    pub amount: Decimal,
}

/// Rows read (and locked) by the store for one settlement
#[derive(Debug, Clone)]
pub struct SettlementInput {
    pub market: Market,
    pub outcome: Outcome,
    pub buy_order: Order,
    pub sell_order: Order,
    /// Buyer's ledger row; stores create it flat before locking
    pub buyer_position: Position,
    /// Seller's ledger row, absent when the seller never bought this outcome
    pub seller_position: Option<Position>,
}

/// Rows to write back, in the same transaction
#[derive(Debug, Clone)]
pub struct Settlement {
    pub trade: Trade,
    pub buy_order: Order,
    pub sell_order: Order,
    pub outcome: Outcome,
    pub buyer_position: Position,
    pub seller_position: Option<Position>,
    pub seller_fill: Option<SellFill>,
}

/// What the engine gets back once a settlement committed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub trade: Trade,
    pub buy_order: Order,
    pub sell_order: Order,
    pub outcome: Outcome,
}

impl Execution {
    /// Post-trade state of one of the two orders
    pub fn order(&self, order_id: Uuid) -> Option<&Order> {
        if self.buy_order.id == order_id {
            Some(&self.buy_order)
        } else if self.sell_order.id == order_id {
            Some(&self.sell_order)
        } else {
            None
        }
    }
}

impl From<Settlement> for Execution {
    fn from(s: Settlement) -> Self {
        Self {
            trade: s.trade,
            buy_order: s.buy_order,
            sell_order: s.sell_order,
            outcome: s.outcome,
        }
    }
}

/// Re-validates the locked rows and computes every change of one trade.
///
/// Any failed precondition aborts with nothing applied; `Conflict` means the
/// engine's view of an order went stale before commit.
pub fn settle(
    input: SettlementInput,
    request: &TradeRequest,
    now: DateTime<Utc>,
) -> Result<Settlement, ExchangeError> {
    let SettlementInput {
        market,
        mut outcome,
        mut buy_order,
        mut sell_order,
        mut buyer_position,
        mut seller_position,
    } = input;

    market.ensure_active()?;

    if buy_order.side != Side::Buy || sell_order.side != Side::Sell {
        return Err(ExchangeError::validation("Trade sides do not oppose"));
    }
    if buy_order.user_id == sell_order.user_id {
        return Err(ExchangeError::validation("Self-matching is not permitted"));
    }
    if buy_order.market_id != market.id
        || sell_order.market_id != market.id
        || buy_order.outcome_id != outcome.id
        || sell_order.outcome_id != outcome.id
    {
        return Err(ExchangeError::validation(
            "Orders do not trade the same outcome",
        ));
    }

    buy_order.apply_fill(request.amount, now)?;
    sell_order.apply_fill(request.amount, now)?;

    outcome.record_trade(request.price, request.amount);

    buyer_position.apply_buy(request.amount, request.price, now);
    let seller_fill = seller_position
        .as_mut()
        .map(|p| p.apply_sell(request.amount, request.price, now));

    let trade = Trade {
        id: Uuid::new_v4(),
        market_id: market.id,
        outcome_id: outcome.id,
        buy_order_id: buy_order.id,
        sell_order_id: sell_order.id,
        buyer_id: buy_order.user_id,
        seller_id: sell_order.user_id,
        price: request.price,
        amount: request.amount,
        created_at: now,
    };

    Ok(Settlement {
        trade,
        buy_order,
        sell_order,
        outcome,
        buyer_position,
        seller_position,
        seller_fill,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketWithOutcomes, NewOrderRequest, OrderStatus, OrderType, OutcomeLabel};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn fixture(buy: (Decimal, Decimal), sell: (Decimal, Decimal)) -> SettlementInput {
        let now = Utc::now();
        let opened = MarketWithOutcomes::open("Will it rain?".into(), now + Duration::days(1), now);
        let outcome = opened.outcomes[0].clone();
        let order = |side, (price, amount), seq| {
            NewOrderRequest {
                market_id: opened.market.id,
                outcome_id: outcome.id,
                side,
                order_type: OrderType::Limit,
                price: Some(price),
                amount,
            }
            .into_order(Uuid::new_v4(), outcome.price, seq, now)
        };
        let buy_order = order(Side::Buy, buy, 1);
        let sell_order = order(Side::Sell, sell, 2);

        SettlementInput {
            buyer_position: Position::flat(buy_order.user_id, opened.market.id, outcome.id, now),
            seller_position: None,
            market: opened.market,
            outcome,
            buy_order,
            sell_order,
        }
    }

    fn request(input: &SettlementInput, price: Decimal, amount: Decimal) -> TradeRequest {
        TradeRequest {
            buy_order_id: input.buy_order.id,
            sell_order_id: input.sell_order.id,
            price,
            amount,
        }
    }

    #[test]
    fn test_settle_applies_fills_mark_and_ledger() {
        let input = fixture((dec!(0.60), dec!(100)), (dec!(0.55), dec!(40)));
        assert_eq!(input.outcome.label, OutcomeLabel::Yes);
        let req = request(&input, dec!(0.55), dec!(40));

        let s = settle(input, &req, Utc::now()).unwrap();

        assert_eq!(s.buy_order.filled, dec!(40));
        assert_eq!(s.buy_order.remaining, dec!(60));
        assert_eq!(s.buy_order.status, OrderStatus::PartiallyFilled);
        assert_eq!(s.sell_order.remaining, Decimal::ZERO);
        assert_eq!(s.sell_order.status, OrderStatus::Filled);

        assert_eq!(s.outcome.price, dec!(0.55));
        assert_eq!(s.outcome.total_shares, dec!(40));
        assert_eq!(s.outcome.total_volume, dec!(22));

        assert_eq!(s.buyer_position.shares(), dec!(40));
        assert_eq!(s.buyer_position.avg_price(), Some(dec!(0.55)));
        assert!(s.seller_position.is_none());
        assert!(s.seller_fill.is_none());

        assert_eq!(s.trade.buyer_id, s.buy_order.user_id);
        assert_eq!(s.trade.seller_id, s.sell_order.user_id);
        assert_ne!(s.trade.buyer_id, s.trade.seller_id);
    }

    #[test]
    fn test_seller_position_realizes_pnl() {
        let mut input = fixture((dec!(0.70), dec!(5)), (dec!(0.70), dec!(5)));
        let now = Utc::now();
        let mut held = Position::flat(
            input.sell_order.user_id,
            input.market.id,
            input.outcome.id,
            now,
        );
        held.apply_buy(dec!(10), dec!(0.50), now);
        input.seller_position = Some(held);
        let req = request(&input, dec!(0.70), dec!(5));

        let s = settle(input, &req, now).unwrap();

        let seller = s.seller_position.unwrap();
        assert_eq!(seller.shares(), dec!(5));
        assert_eq!(seller.avg_price(), Some(dec!(0.50)));
        assert_eq!(seller.pnl, dec!(1));
        assert_eq!(s.seller_fill.unwrap().realized_pnl, dec!(1));
    }

    #[test]
    fn test_stale_remaining_is_a_conflict() {
        let input = fixture((dec!(0.60), dec!(100)), (dec!(0.55), dec!(40)));
        let req = request(&input, dec!(0.55), dec!(50));

        let err = settle(input, &req, Utc::now()).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_cancelled_order_is_a_conflict() {
        let mut input = fixture((dec!(0.60), dec!(100)), (dec!(0.55), dec!(40)));
        input.sell_order.cancel(Utc::now()).unwrap();
        let req = request(&input, dec!(0.55), dec!(40));

        let err = settle(input, &req, Utc::now()).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_self_match_and_inactive_market_are_rejected() {
        let mut input = fixture((dec!(0.60), dec!(10)), (dec!(0.55), dec!(10)));
        input.sell_order.user_id = input.buy_order.user_id;
        let req = request(&input, dec!(0.55), dec!(10));
        assert!(matches!(
            settle(input, &req, Utc::now()),
            Err(ExchangeError::Validation(_))
        ));

        let mut input = fixture((dec!(0.60), dec!(10)), (dec!(0.55), dec!(10)));
        input
            .market
            .resolve(OutcomeLabel::No, Utc::now())
            .unwrap();
        let req = request(&input, dec!(0.55), dec!(10));
        assert!(matches!(
            settle(input, &req, Utc::now()),
            Err(ExchangeError::Validation(_))
        ));
    }
}
