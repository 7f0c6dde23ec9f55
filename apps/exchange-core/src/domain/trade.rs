use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One executed match. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: Uuid,
    pub market_id: Uuid,
    pub outcome_id: Uuid,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub price: Decimal,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeRole {
    Buyer,
    Seller,
}

/// A trade seen from one participant's side
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTrade {
    #[serde(flatten)]
    pub trade: Trade,
    pub role: TradeRole,
}

impl UserTrade {
    pub fn for_user(trade: Trade, user_id: Uuid) -> Self {
        let role = if trade.buyer_id == user_id {
            TradeRole::Buyer
        } else {
            TradeRole::Seller
        };
        Self { trade, role }
    }
}
