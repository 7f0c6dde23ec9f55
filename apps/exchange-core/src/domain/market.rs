//! Markets and their two outcomes

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ExchangeError;

/// Price both outcomes open at
pub const INITIAL_OUTCOME_PRICE: Decimal = dec!(0.5);

/// YES price at or above which the expiry sweep settles a market YES
pub const AUTO_RESOLVE_THRESHOLD: Decimal = dec!(0.5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "market_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Active,
    Paused,
    Resolved,
    Cancelled,
}

impl MarketStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Resolved => "RESOLVED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outcome_label", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeLabel {
    Yes,
    No,
}

impl OutcomeLabel {
    pub const ALL: [OutcomeLabel; 2] = [OutcomeLabel::Yes, OutcomeLabel::No];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
        }
    }
}

impl fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeLabel {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "YES" => Ok(Self::Yes),
            "NO" => Ok(Self::No),
            other => Err(ExchangeError::validation(format!(
                "Unknown outcome label: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: Uuid,
    pub question: String,
    pub status: MarketStatus,
    /// Winning label, set only once the market is resolved
    pub outcome: Option<OutcomeLabel>,
    pub resolution_date: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Market {
    pub fn new(question: String, resolution_date: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            question,
            status: MarketStatus::Active,
            outcome: None,
            resolution_date,
            resolved_at: None,
            created_at: now,
        }
    }

    pub fn ensure_active(&self) -> Result<(), ExchangeError> {
        if self.status != MarketStatus::Active {
            return Err(ExchangeError::validation("Market is not active"));
        }
        Ok(())
    }

    /// ACTIVE -> RESOLVED with the winning label fixed
    pub fn resolve(&mut self, winner: OutcomeLabel, now: DateTime<Utc>) -> Result<(), ExchangeError> {
        self.ensure_active()?;
        self.status = MarketStatus::Resolved;
        self.outcome = Some(winner);
        self.resolved_at = Some(now);
        Ok(())
    }

    /// Administrative lifecycle change: ACTIVE <-> PAUSED, and ACTIVE or PAUSED
    /// -> CANCELLED. RESOLVED is reached only through `resolve`.
    pub fn set_status(&mut self, status: MarketStatus) -> Result<(), ExchangeError> {
        if self.status.is_terminal() {
            return Err(ExchangeError::validation(format!(
                "Market is already {}",
                self.status
            )));
        }
        match status {
            MarketStatus::Resolved => {
                return Err(ExchangeError::validation(
                    "Markets are resolved with an outcome, not a status change",
                ))
            }
            s if s == self.status => {
                return Err(ExchangeError::validation(format!("Market is already {}", s)))
            }
            _ => {}
        }
        self.status = status;
        Ok(())
    }

    /// The winning label of a resolved market
    pub fn winning_label(&self) -> Result<OutcomeLabel, ExchangeError> {
        if self.status != MarketStatus::Resolved {
            return Err(ExchangeError::validation("Market is not resolved"));
        }
        self.outcome
            .ok_or_else(|| ExchangeError::validation("Market outcome not set"))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == MarketStatus::Active && self.resolution_date <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub id: Uuid,
    pub market_id: Uuid,
    pub label: OutcomeLabel,
    /// Last traded price; 1 or 0 once the market resolves
    pub price: Decimal,
    pub total_shares: Decimal,
    pub total_volume: Decimal,
}

impl Outcome {
    pub fn new(market_id: Uuid, label: OutcomeLabel) -> Self {
        Self {
            id: Uuid::new_v4(),
            market_id,
            label,
            price: INITIAL_OUTCOME_PRICE,
            total_shares: Decimal::ZERO,
            total_volume: Decimal::ZERO,
        }
    }

    /// Marks the outcome at the execution price and accumulates volume
    pub fn record_trade(&mut self, price: Decimal, amount: Decimal) {
        self.total_volume += price * amount;
        self.total_shares += amount;
        self.price = price;
    }

    pub fn settle(&mut self, winner: OutcomeLabel) {
        self.price = if self.label == winner {
            Decimal::ONE
        } else {
            Decimal::ZERO
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketWithOutcomes {
    #[serde(flatten)]
    pub market: Market,
    pub outcomes: Vec<Outcome>,
}

impl MarketWithOutcomes {
    /// A fresh ACTIVE market with YES and NO both at the opening price
    pub fn open(question: String, resolution_date: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let market = Market::new(question, resolution_date, now);
        let outcomes = OutcomeLabel::ALL
            .iter()
            .map(|label| Outcome::new(market.id, *label))
            .collect();
        Self { market, outcomes }
    }

    pub fn outcome(&self, label: OutcomeLabel) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.label == label)
    }
}

/// Placeholder policy used by the expiry sweep until an oracle decides
pub fn decide_by_price(outcomes: &[Outcome]) -> OutcomeLabel {
    match outcomes.iter().find(|o| o.label == OutcomeLabel::Yes) {
        Some(yes) if yes.price >= AUTO_RESOLVE_THRESHOLD => OutcomeLabel::Yes,
        _ => OutcomeLabel::No,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub market_id: Uuid,
    pub outcome_id: Uuid,
    pub price: Decimal,
    pub recorded_at: DateTime<Utc>,
}
