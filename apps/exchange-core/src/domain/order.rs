//! Order model and its forward-only state machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ExchangeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// OPEN and PARTIALLY_FILLED orders are resting liquidity
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::PartiallyFilled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub outcome_id: Uuid,
    pub side: Side,
    pub order_type: OrderType,
    /// Limit price, or the outcome's mark price at submission for MARKET orders
    pub price: Decimal,
    pub amount: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub status: OrderStatus,
    /// Insertion sequence, final tie-break behind created_at
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Applies one execution to this order.
    ///
    /// Rejects with `Conflict` when the order is no longer resting or the
    /// amount exceeds what is left, so a stale match never overwrites a
    /// concurrent cancel or fill.
    pub fn apply_fill(&mut self, amount: Decimal, now: DateTime<Utc>) -> Result<(), ExchangeError> {
        if !self.is_open() {
            return Err(ExchangeError::conflict(
                self.id,
                format!("order is {:?}", self.status),
            ));
        }
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::validation("Fill amount must be positive"));
        }
        if amount > self.remaining {
            return Err(ExchangeError::conflict(
                self.id,
                format!("fill {} exceeds remaining {}", amount, self.remaining),
            ));
        }

        self.filled += amount;
        self.remaining = self.amount - self.filled;
        self.status = if self.remaining <= Decimal::ZERO {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = now;
        Ok(())
    }

    /// OPEN/PARTIALLY_FILLED -> CANCELLED; filled and remaining are frozen
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), ExchangeError> {
        if !self.is_open() {
            return Err(ExchangeError::validation("Order cannot be cancelled"));
        }
        self.status = OrderStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    pub fn ensure_owned_by(&self, user_id: Uuid) -> Result<(), ExchangeError> {
        if self.user_id != user_id {
            return Err(ExchangeError::forbidden("Not your order"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderRequest {
    #[serde(alias = "market_id")]
    pub market_id: Uuid,
    #[serde(alias = "outcome_id")]
    pub outcome_id: Uuid,
    pub side: Side,
    #[serde(alias = "order_type", alias = "type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Option<Decimal>,
    pub amount: Decimal,
}

impl NewOrderRequest {
    /// Boundary checks: positive amount, LIMIT price strictly inside (0, 1)
    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.amount <= Decimal::ZERO {
            return Err(ExchangeError::validation("Amount must be positive"));
        }
        if self.order_type == OrderType::Limit {
            match self.price {
                None => {
                    return Err(ExchangeError::validation(
                        "Price is required for limit orders",
                    ))
                }
                Some(p) if p <= Decimal::ZERO || p >= Decimal::ONE => {
                    return Err(ExchangeError::validation(
                        "Limit price must be between 0 and 1",
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Builds the OPEN order; MARKET orders take the outcome's mark price
    pub fn into_order(self, user_id: Uuid, mark_price: Decimal, seq: i64, now: DateTime<Utc>) -> Order {
        let price = match self.order_type {
            OrderType::Limit => self.price.unwrap_or(mark_price),
            OrderType::Market => mark_price,
        };

        Order {
            id: Uuid::new_v4(),
            user_id,
            market_id: self.market_id,
            outcome_id: self.outcome_id,
            side: self.side,
            order_type: self.order_type,
            price,
            amount: self.amount,
            filled: Decimal::ZERO,
            remaining: self.amount,
            status: OrderStatus::Open,
            seq,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit(side: Side, amount: Decimal, price: Decimal) -> Order {
        NewOrderRequest {
            market_id: Uuid::new_v4(),
            outcome_id: Uuid::new_v4(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            amount,
        }
        .into_order(Uuid::new_v4(), dec!(0.5), 1, Utc::now())
    }

    #[test]
    fn test_fill_partial_then_complete() {
        let mut order = limit(Side::Buy, dec!(100), dec!(0.6));

        order.apply_fill(dec!(40), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining, dec!(60));

        order.apply_fill(dec!(60), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.remaining, dec!(0));
        assert_eq!(order.filled, order.amount);
    }

    #[test]
    fn test_overfill_is_conflict() {
        let mut order = limit(Side::Sell, dec!(10), dec!(0.4));
        let err = order.apply_fill(dec!(11), Utc::now()).unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(order.filled, dec!(0));
    }

    #[test]
    fn test_terminal_orders_do_not_change() {
        let mut order = limit(Side::Buy, dec!(10), dec!(0.4));
        order.cancel(Utc::now()).unwrap();

        assert!(order.apply_fill(dec!(1), Utc::now()).unwrap_err().is_conflict());
        assert!(matches!(
            order.cancel(Utc::now()),
            Err(ExchangeError::Validation(_))
        ));
        assert_eq!(order.remaining, dec!(10));
    }

    #[test]
    fn test_market_order_takes_mark_price() {
        let order = NewOrderRequest {
            market_id: Uuid::new_v4(),
            outcome_id: Uuid::new_v4(),
            side: Side::Buy,
            order_type: OrderType::Market,
            price: Some(dec!(0.9)),
            amount: dec!(5),
        }
        .into_order(Uuid::new_v4(), dec!(0.42), 1, Utc::now());

        assert_eq!(order.price, dec!(0.42));
    }

    #[test]
    fn test_validation() {
        let mut req = NewOrderRequest {
            market_id: Uuid::new_v4(),
            outcome_id: Uuid::new_v4(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: None,
            amount: dec!(5),
        };
        assert!(req.validate().is_err());

        req.price = Some(dec!(1));
        assert!(req.validate().is_err());

        req.price = Some(dec!(0.99));
        assert!(req.validate().is_ok());

        req.amount = dec!(0);
        assert!(req.validate().is_err());

        req.amount = dec!(1);
        req.order_type = OrderType::Market;
        req.price = None;
        assert!(req.validate().is_ok());
    }
}
