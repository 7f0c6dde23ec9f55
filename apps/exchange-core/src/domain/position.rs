//! Position ledger with weighted-average cost basis
//!
//! A position is keyed by (user, market, outcome). Its cost basis is the
//! `Holding` value type: either flat, or a positive share count together with
//! the volume-weighted average price paid for those shares. The average price
//! only moves when shares are bought; sells and resolution realize pnl
//! against it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use crate::domain::market::{MarketStatus, MarketWithOutcomes, OutcomeLabel};
use crate::error::ExchangeError;

/// Cost basis of the shares currently held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Holding {
    Flat,
    #[serde(rename_all = "camelCase")]
    Held { shares: Decimal, avg_price: Decimal },
}

impl Holding {
    /// Rebuilds a holding from persisted columns; avg_price is present iff shares > 0
    pub fn from_parts(shares: Decimal, avg_price: Option<Decimal>) -> Result<Self, String> {
        match (shares > Decimal::ZERO, avg_price) {
            (true, Some(avg_price)) => Ok(Self::Held { shares, avg_price }),
            (false, None) if shares == Decimal::ZERO => Ok(Self::Flat),
            (true, None) => Err(format!("{} shares held without an average price", shares)),
            (false, Some(_)) => Err("average price recorded for a flat position".to_string()),
            (false, None) => Err(format!("negative share count {}", shares)),
        }
    }

    pub fn shares(&self) -> Decimal {
        match self {
            Self::Flat => Decimal::ZERO,
            Self::Held { shares, .. } => *shares,
        }
    }

    pub fn avg_price(&self) -> Option<Decimal> {
        match self {
            Self::Flat => None,
            Self::Held { avg_price, .. } => Some(*avg_price),
        }
    }

    /// shares × avg_price
    pub fn cost(&self) -> Decimal {
        match self {
            Self::Flat => Decimal::ZERO,
            Self::Held { shares, avg_price } => shares * avg_price,
        }
    }

    fn bought(self, shares: Decimal, price: Decimal) -> Self {
        let new_shares = self.shares() + shares;
        let new_cost = self.cost() + shares * price;
        Self::Held {
            shares: new_shares,
            avg_price: new_cost / new_shares,
        }
    }

    fn reduced(self, shares: Decimal) -> Self {
        match self {
            Self::Flat => Self::Flat,
            Self::Held { shares: held, avg_price } => {
                let left = held - shares;
                if left <= Decimal::ZERO {
                    Self::Flat
                } else {
                    Self::Held {
                        shares: left,
                        avg_price,
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: Uuid,
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub outcome_id: Uuid,
    #[serde(flatten)]
    pub holding: Holding,
    pub current_value: Decimal,
    /// Cumulative profit/loss, kept after the position goes flat
    pub pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Result of applying a sell to the ledger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellFill {
    /// Shares that were actually held and realized
    pub realized_shares: Decimal,
    /// Shares sold beyond the holding, floored away
    pub clamped_shares: Decimal,
    pub realized_pnl: Decimal,
}

/// Payout of a winning position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub winnings: Decimal,
    pub pnl: Decimal,
    pub shares: Decimal,
}

impl Position {
    /// Flat ledger row for a user who has not traded this outcome yet
    pub fn flat(user_id: Uuid, market_id: Uuid, outcome_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            market_id,
            outcome_id,
            holding: Holding::Flat,
            current_value: Decimal::ZERO,
            pnl: Decimal::ZERO,
            updated_at: now,
        }
    }

    pub fn shares(&self) -> Decimal {
        self.holding.shares()
    }

    pub fn avg_price(&self) -> Option<Decimal> {
        self.holding.avg_price()
    }

    /// BUY: re-weights the average price and marks the whole holding at `price`
    pub fn apply_buy(&mut self, shares: Decimal, price: Decimal, now: DateTime<Utc>) {
        let holding = self.holding.bought(shares, price);
        let new_cost = holding.cost();

        self.current_value = holding.shares() * price;
        self.pnl = self.current_value - new_cost;
        self.holding = holding;
        self.updated_at = now;
    }

    /// SELL: realizes (price − avg_price) per held share sold. Shares sold
    /// beyond the holding are floored at zero and realize nothing.
    pub fn apply_sell(&mut self, shares: Decimal, price: Decimal, now: DateTime<Utc>) -> SellFill {
        let held = self.holding.shares();
        let realized_shares = shares.min(held);
        let realized_pnl = match self.holding.avg_price() {
            Some(avg_price) => (price - avg_price) * realized_shares,
            None => Decimal::ZERO,
        };

        self.pnl += realized_pnl;
        self.holding = self.holding.reduced(shares);
        self.current_value = self.holding.shares() * price;
        self.updated_at = now;

        SellFill {
            realized_shares,
            clamped_shares: shares - realized_shares,
            realized_pnl,
        }
    }

    /// Values the holding at the settled price (1 for the winner, 0 otherwise).
    ///
    /// Flat positions are skipped: their pnl is what earlier sells realized,
    /// and `value - shares * avg_price` would be 0 for them and erase it.
    pub fn mark_resolved(&mut self, won: bool, now: DateTime<Utc>) {
        if let Holding::Held { shares, .. } = self.holding {
            self.current_value = if won { shares } else { Decimal::ZERO };
            self.pnl = self.current_value - self.holding.cost();
            self.updated_at = now;
        }
    }

    /// Pays out a winning holding once; the position goes flat
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<Claim, ExchangeError> {
        let shares = self.holding.shares();
        if shares <= Decimal::ZERO {
            return Err(ExchangeError::validation("No shares to claim"));
        }

        let winnings = shares * Decimal::ONE;
        let pnl = winnings - self.holding.cost();

        self.holding = Holding::Flat;
        self.current_value = Decimal::ZERO;
        self.pnl = pnl;
        self.updated_at = now;

        Ok(Claim {
            winnings,
            pnl,
            shares,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Position {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let shares: Decimal = row.try_get("shares")?;
        let avg_price: Option<Decimal> = row.try_get("avg_price")?;
        let holding = Holding::from_parts(shares, avg_price).map_err(|e| sqlx::Error::Decode(e.into()))?;

        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            market_id: row.try_get("market_id")?,
            outcome_id: row.try_get("outcome_id")?,
            holding,
            current_value: row.try_get("current_value")?,
            pnl: row.try_get("pnl")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub total_value: Decimal,
    pub total_invested: Decimal,
    pub total_pnl: Decimal,
    pub pnl_percentage: Decimal,
    pub active_positions: usize,
    pub total_positions: usize,
}

impl PortfolioSummary {
    /// Aggregates held positions; `is_active` tells whether a position's market still trades
    pub fn from_positions<F>(positions: &[Position], is_active: F) -> Self
    where
        F: Fn(&Position) -> bool,
    {
        let held: Vec<&Position> = positions
            .iter()
            .filter(|p| p.shares() > Decimal::ZERO)
            .collect();

        let total_value: Decimal = held.iter().map(|p| p.current_value).sum();
        let total_invested: Decimal = held.iter().map(|p| p.holding.cost()).sum();
        let total_pnl: Decimal = held.iter().map(|p| p.pnl).sum();
        let pnl_percentage = if total_invested > Decimal::ZERO {
            total_pnl / total_invested * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        Self {
            total_value,
            total_invested,
            total_pnl,
            pnl_percentage,
            active_positions: held.iter().filter(|p| is_active(p)).count(),
            total_positions: held.len(),
        }
    }
}

/// One ledger row of the PnL report, flat positions included
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPnl {
    pub market_id: Uuid,
    pub market_question: String,
    pub market_status: MarketStatus,
    pub outcome_id: Uuid,
    pub outcome_label: OutcomeLabel,
    pub shares: Decimal,
    pub avg_price: Option<Decimal>,
    pub current_price: Decimal,
    pub current_value: Decimal,
    pub invested: Decimal,
    pub pnl: Decimal,
    /// Move of the outcome price against the average paid, in percent
    pub pnl_percentage: Decimal,
}

impl PositionPnl {
    /// None when `market` does not carry the position's outcome
    pub fn new(position: &Position, market: &MarketWithOutcomes) -> Option<Self> {
        let outcome = market
            .outcomes
            .iter()
            .find(|o| o.id == position.outcome_id)?;

        let pnl_percentage = match position.avg_price() {
            Some(avg) if avg > Decimal::ZERO => {
                (outcome.price - avg) / avg * Decimal::ONE_HUNDRED
            }
            _ => Decimal::ZERO,
        };

        Some(Self {
            market_id: market.market.id,
            market_question: market.market.question.clone(),
            market_status: market.market.status,
            outcome_id: outcome.id,
            outcome_label: outcome.label,
            shares: position.shares(),
            avg_price: position.avg_price(),
            current_price: outcome.price,
            current_value: position.current_value,
            invested: position.holding.cost(),
            pnl: position.pnl,
            pnl_percentage,
        })
    }
}
