//! Position Keeping
//! Claims on resolved markets and the ledger-side read queries

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::auth::{permissions, AuthContext};
use crate::domain::{
    Claim, MarketWithOutcomes, PortfolioSummary, Position, PositionPnl, PriceSnapshot, UserTrade,
};
use crate::engine::order_processor::{DEFAULT_TRADE_LIMIT, MAX_TRADE_LIMIT};
use crate::error::Result;
use crate::observability::metrics::get_metrics;
use crate::store::SharedStore;

pub struct PositionKeeper {
    store: SharedStore,
}

impl PositionKeeper {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Pays out the caller's winning position once; a second call is a
    /// Validation error and changes nothing
    #[tracing::instrument(skip(self, auth), fields(actor = %auth.user_id))]
    pub async fn claim_winnings(&self, auth: &AuthContext, market_id: Uuid) -> Result<Claim> {
        auth.require(permissions::POSITIONS_CLAIM)?;
        let claim = self.store.claim_winnings(auth.user_id, market_id).await?;

        if let Some(ref metrics) = *get_metrics() {
            metrics.claims_total.inc();
        }
        tracing::info!(
            market_id = %market_id,
            winnings = %claim.winnings,
            pnl = %claim.pnl,
            "Winnings claimed"
        );
        Ok(claim)
    }

    /// Positions currently holding shares, most recently updated first
    pub async fn positions(&self, auth: &AuthContext) -> Result<Vec<Position>> {
        auth.require(permissions::POSITIONS_READ)?;
        let positions = self.store.user_positions(auth.user_id).await?;
        Ok(positions
            .into_iter()
            .filter(|p| p.shares() > Decimal::ZERO)
            .collect())
    }

    pub async fn portfolio_summary(&self, auth: &AuthContext) -> Result<PortfolioSummary> {
        auth.require(permissions::POSITIONS_READ)?;
        let positions = self.store.user_positions(auth.user_id).await?;
        let active: HashSet<Uuid> = self
            .store
            .active_markets()
            .await?
            .into_iter()
            .map(|m| m.market.id)
            .collect();

        Ok(PortfolioSummary::from_positions(&positions, |p| {
            active.contains(&p.market_id)
        }))
    }

    /// Every ledger row of the caller, flat ones included, priced against the
    /// current outcome marks
    pub async fn pnl_report(&self, auth: &AuthContext) -> Result<Vec<PositionPnl>> {
        auth.require(permissions::POSITIONS_READ)?;
        let positions = self.store.user_positions(auth.user_id).await?;

        let mut markets: HashMap<Uuid, MarketWithOutcomes> = HashMap::new();
        for position in &positions {
            if !markets.contains_key(&position.market_id) {
                let market = self.store.get_market(position.market_id).await?;
                markets.insert(position.market_id, market);
            }
        }

        Ok(positions
            .iter()
            .filter_map(|p| {
                let line = markets
                    .get(&p.market_id)
                    .and_then(|m| PositionPnl::new(p, m));
                if line.is_none() {
                    tracing::warn!(position_id = %p.id, "Position outcome missing from its market");
                }
                line
            })
            .collect())
    }

    /// The caller's trades with the side they were on, newest first
    pub async fn trade_history(
        &self,
        auth: &AuthContext,
        limit: Option<i64>,
    ) -> Result<Vec<UserTrade>> {
        auth.require(permissions::POSITIONS_READ)?;
        let limit = limit.unwrap_or(DEFAULT_TRADE_LIMIT).clamp(1, MAX_TRADE_LIMIT);
        let trades = self.store.user_trades(auth.user_id, limit).await?;
        Ok(trades
            .into_iter()
            .map(|t| UserTrade::for_user(t, auth.user_id))
            .collect())
    }

    pub async fn price_history(
        &self,
        market_id: Uuid,
        outcome_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PriceSnapshot>> {
        self.store.price_history(market_id, outcome_id, since).await
    }
}
