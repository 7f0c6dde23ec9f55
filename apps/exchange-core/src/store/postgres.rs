//! PostgreSQL store
//! Each mutating call is one transaction. Lock order is always market row,
//! then orders by id, then outcomes, then positions by id, so concurrent
//! trades and resolutions serialize instead of deadlocking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{ExchangeStore, MatchTask, Resolution, StatusChange};
use crate::config::Config;
use crate::domain::{
    Claim, Market, MarketStatus, MarketWithOutcomes, NewOrderRequest, Order, OrderStatus, Outcome,
    OutcomeLabel, Position, PriceSnapshot, Side, Trade,
};
use crate::engine::market_resolver::{apply_status_change, settle_market};
use crate::engine::settlement::{settle, Execution, SettlementInput, TradeRequest};
use crate::error::{ExchangeError, Result};

const MARKET_COLUMNS: &str =
    "id, question, status, outcome, resolution_date, resolved_at, created_at";
const OUTCOME_COLUMNS: &str = "id, market_id, label, price, total_shares, total_volume";
const ORDER_COLUMNS: &str = "id, user_id, market_id, outcome_id, side, order_type, price, \
     amount, filled, remaining, status, seq, created_at, updated_at";
const TRADE_COLUMNS: &str = "id, market_id, outcome_id, buy_order_id, sell_order_id, \
     buyer_id, seller_id, price, amount, created_at";
const POSITION_COLUMNS: &str =
    "id, user_id, market_id, outcome_id, shares, avg_price, current_value, pnl, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lock {
    None,
    Share,
    Update,
}

impl Lock {
    fn clause(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Share => " FOR SHARE",
            Self::Update => " FOR UPDATE",
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens the pool; every session gets the configured statement timeout so a
    /// stalled transaction surfaces as an error
    pub async fn connect(config: &Config) -> std::result::Result<Self, sqlx::Error> {
        let timeout_ms = config.statement_timeout_ms;
        let pool = PgPoolOptions::new()
            .min_connections(config.pool_min_connections)
            .max_connections(config.pool_max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    let stmt = format!("SET statement_timeout = {}", timeout_ms);
                    sqlx::query(&stmt).execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =====================================================
// ROW HELPERS
// =====================================================

async fn fetch_market(
    conn: &mut PgConnection,
    market_id: Uuid,
    lock: Lock,
) -> Result<MarketWithOutcomes> {
    let sql = format!(
        "SELECT {} FROM markets WHERE id = $1{}",
        MARKET_COLUMNS,
        lock.clause()
    );
    let market: Market = sqlx::query_as(&sql)
        .bind(market_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ExchangeError::not_found("Market not found"))?;

    // Outcomes are only written under a market lock, FOR UPDATE when settling
    let outcome_lock = if lock == Lock::Update { Lock::Update } else { Lock::None };
    let sql = format!(
        "SELECT {} FROM outcomes WHERE market_id = $1 ORDER BY label{}",
        OUTCOME_COLUMNS,
        outcome_lock.clause()
    );
    let outcomes: Vec<Outcome> = sqlx::query_as(&sql)
        .bind(market_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(MarketWithOutcomes { market, outcomes })
}

async fn attach_outcomes(
    conn: &mut PgConnection,
    markets: Vec<Market>,
) -> Result<Vec<MarketWithOutcomes>> {
    let ids: Vec<Uuid> = markets.iter().map(|m| m.id).collect();
    let sql = format!(
        "SELECT {} FROM outcomes WHERE market_id = ANY($1) ORDER BY market_id, label",
        OUTCOME_COLUMNS
    );
    let outcomes: Vec<Outcome> = sqlx::query_as(&sql)
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

    let mut grouped: HashMap<Uuid, Vec<Outcome>> = HashMap::new();
    for outcome in outcomes {
        grouped.entry(outcome.market_id).or_default().push(outcome);
    }

    Ok(markets
        .into_iter()
        .map(|market| {
            let outcomes = grouped.remove(&market.id).unwrap_or_default();
            MarketWithOutcomes { market, outcomes }
        })
        .collect())
}

async fn fetch_order(conn: &mut PgConnection, order_id: Uuid, lock: Lock) -> Result<Order> {
    let sql = format!(
        "SELECT {} FROM orders WHERE id = $1{}",
        ORDER_COLUMNS,
        lock.clause()
    );
    sqlx::query_as(&sql)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ExchangeError::not_found("Order not found"))
}

async fn write_market(conn: &mut PgConnection, market: &Market) -> Result<()> {
    sqlx::query("UPDATE markets SET status = $2, outcome = $3, resolved_at = $4 WHERE id = $1")
        .bind(market.id)
        .bind(market.status)
        .bind(market.outcome)
        .bind(market.resolved_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn write_outcome(conn: &mut PgConnection, outcome: &Outcome) -> Result<()> {
    sqlx::query(
        "UPDATE outcomes SET price = $2, total_shares = $3, total_volume = $4 WHERE id = $1",
    )
    .bind(outcome.id)
    .bind(outcome.price)
    .bind(outcome.total_shares)
    .bind(outcome.total_volume)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_order(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query(
        r#"UPDATE orders
           SET filled = $2, remaining = $3, status = $4, updated_at = $5
           WHERE id = $1"#,
    )
    .bind(order.id)
    .bind(order.filled)
    .bind(order.remaining)
    .bind(order.status)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_position(conn: &mut PgConnection, position: &Position) -> Result<()> {
    sqlx::query(
        r#"UPDATE positions
           SET shares = $2, avg_price = $3, current_value = $4, pnl = $5, updated_at = $6
           WHERE id = $1"#,
    )
    .bind(position.id)
    .bind(position.shares())
    .bind(position.avg_price())
    .bind(position.current_value)
    .bind(position.pnl)
    .bind(position.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Ensures the buyer has a ledger row, then locks both parties' rows in id order
async fn lock_positions(
    conn: &mut PgConnection,
    buy_order: &Order,
    sell_order: &Order,
    now: DateTime<Utc>,
) -> Result<(Position, Option<Position>)> {
    let flat = Position::flat(buy_order.user_id, buy_order.market_id, buy_order.outcome_id, now);
    sqlx::query(
        r#"INSERT INTO positions (id, user_id, market_id, outcome_id, shares, avg_price,
                                  current_value, pnl, updated_at)
           VALUES ($1, $2, $3, $4, 0, NULL, 0, 0, $5)
           ON CONFLICT (user_id, market_id, outcome_id) DO NOTHING"#,
    )
    .bind(flat.id)
    .bind(flat.user_id)
    .bind(flat.market_id)
    .bind(flat.outcome_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let sql = format!(
        r#"SELECT {} FROM positions
           WHERE market_id = $1 AND outcome_id = $2 AND user_id = ANY($3)
           ORDER BY id FOR UPDATE"#,
        POSITION_COLUMNS
    );
    let users = vec![buy_order.user_id, sell_order.user_id];
    let rows: Vec<Position> = sqlx::query_as(&sql)
        .bind(buy_order.market_id)
        .bind(buy_order.outcome_id)
        .bind(&users)
        .fetch_all(&mut *conn)
        .await?;

    let mut buyer = None;
    let mut seller = None;
    for row in rows {
        if row.user_id == buy_order.user_id {
            buyer = Some(row);
        } else if row.user_id == sell_order.user_id {
            seller = Some(row);
        }
    }
    let buyer = buyer.ok_or_else(|| ExchangeError::not_found("Buyer position not found"))?;
    Ok((buyer, seller))
}

// =====================================================
// STORE
// =====================================================

#[async_trait]
impl ExchangeStore for PgStore {
    async fn ping(&self) -> Result<()> {
        let _row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn create_market(&self, market: MarketWithOutcomes) -> Result<MarketWithOutcomes> {
        let mut tx = self.pool.begin().await?;

        let m = &market.market;
        sqlx::query(
            r#"INSERT INTO markets (id, question, status, outcome, resolution_date, resolved_at, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(m.id)
        .bind(&m.question)
        .bind(m.status)
        .bind(m.outcome)
        .bind(m.resolution_date)
        .bind(m.resolved_at)
        .bind(m.created_at)
        .execute(&mut *tx)
        .await?;

        for o in &market.outcomes {
            sqlx::query(
                r#"INSERT INTO outcomes (id, market_id, label, price, total_shares, total_volume)
                   VALUES ($1, $2, $3, $4, $5, $6)"#,
            )
            .bind(o.id)
            .bind(o.market_id)
            .bind(o.label)
            .bind(o.price)
            .bind(o.total_shares)
            .bind(o.total_volume)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(market)
    }

    async fn get_market(&self, market_id: Uuid) -> Result<MarketWithOutcomes> {
        let mut conn = self.pool.acquire().await?;
        fetch_market(&mut conn, market_id, Lock::None).await
    }

    async fn active_markets(&self) -> Result<Vec<MarketWithOutcomes>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM markets WHERE status = 'ACTIVE' ORDER BY created_at",
            MARKET_COLUMNS
        );
        let markets: Vec<Market> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
        attach_outcomes(&mut conn, markets).await
    }

    async fn expired_markets(&self, now: DateTime<Utc>) -> Result<Vec<MarketWithOutcomes>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            r#"SELECT {} FROM markets
               WHERE status = 'ACTIVE' AND resolution_date <= $1
               ORDER BY resolution_date"#,
            MARKET_COLUMNS
        );
        let markets: Vec<Market> = sqlx::query_as(&sql)
            .bind(now)
            .fetch_all(&mut *conn)
            .await?;
        attach_outcomes(&mut conn, markets).await
    }

    async fn resolve_market(&self, market_id: Uuid, winner: OutcomeLabel) -> Result<Resolution> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let mut market = fetch_market(&mut tx, market_id, Lock::Update).await?;

        let sql = format!(
            r#"SELECT {} FROM orders
               WHERE market_id = $1 AND status IN ('OPEN', 'PARTIALLY_FILLED')
               ORDER BY id FOR UPDATE"#,
            ORDER_COLUMNS
        );
        let mut orders: Vec<Order> = sqlx::query_as(&sql)
            .bind(market_id)
            .fetch_all(&mut *tx)
            .await?;

        let sql = format!(
            "SELECT {} FROM positions WHERE market_id = $1 ORDER BY id FOR UPDATE",
            POSITION_COLUMNS
        );
        let mut positions: Vec<Position> = sqlx::query_as(&sql)
            .bind(market_id)
            .fetch_all(&mut *tx)
            .await?;

        let cancelled_orders =
            settle_market(&mut market, &mut orders, &mut positions, winner, now)?;

        write_market(&mut tx, &market.market).await?;
        for outcome in &market.outcomes {
            write_outcome(&mut tx, outcome).await?;
        }
        for order in &orders {
            write_order(&mut tx, order).await?;
        }
        for position in &positions {
            write_position(&mut tx, position).await?;
        }

        tx.commit().await?;
        Ok(Resolution {
            market,
            cancelled_orders,
            positions_settled: positions.len(),
        })
    }

    async fn set_market_status(&self, market_id: Uuid, status: MarketStatus) -> Result<StatusChange> {
        let mut tx = self.pool.begin().await?;

        let mut market = fetch_market(&mut tx, market_id, Lock::Update).await?;

        let sql = format!(
            r#"SELECT {} FROM orders
               WHERE market_id = $1 AND status IN ('OPEN', 'PARTIALLY_FILLED')
               ORDER BY id FOR UPDATE"#,
            ORDER_COLUMNS
        );
        let mut orders: Vec<Order> = sqlx::query_as(&sql)
            .bind(market_id)
            .fetch_all(&mut *tx)
            .await?;

        let cancelled_orders = apply_status_change(&mut market, &mut orders, status, Utc::now())?;

        write_market(&mut tx, &market.market).await?;
        for order in orders.iter().filter(|o| cancelled_orders.contains(&o.id)) {
            write_order(&mut tx, order).await?;
        }

        tx.commit().await?;
        Ok(StatusChange {
            market,
            cancelled_orders,
        })
    }

    async fn create_order(&self, user_id: Uuid, request: NewOrderRequest) -> Result<Order> {
        request.validate()?;
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let market = fetch_market(&mut tx, request.market_id, Lock::Share).await?;
        market.market.ensure_active()?;
        let mark_price = market
            .outcomes
            .iter()
            .find(|o| o.id == request.outcome_id)
            .map(|o| o.price)
            .ok_or_else(|| ExchangeError::not_found("Outcome not found"))?;

        // seq is assigned by the database
        let draft = request.into_order(user_id, mark_price, 0, now);
        let sql = format!(
            r#"INSERT INTO orders (id, user_id, market_id, outcome_id, side, order_type, price,
                                   amount, filled, remaining, status, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
               RETURNING {}"#,
            ORDER_COLUMNS
        );
        let order: Order = sqlx::query_as(&sql)
            .bind(draft.id)
            .bind(draft.user_id)
            .bind(draft.market_id)
            .bind(draft.outcome_id)
            .bind(draft.side)
            .bind(draft.order_type)
            .bind(draft.price)
            .bind(draft.amount)
            .bind(draft.filled)
            .bind(draft.remaining)
            .bind(draft.status)
            .bind(draft.created_at)
            .bind(draft.updated_at)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO match_tasks (order_id, market_id, enqueued_at) VALUES ($1, $2, $3)")
            .bind(order.id)
            .bind(order.market_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, order_id, Lock::None).await
    }

    async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let mut order = fetch_order(&mut tx, order_id, Lock::Update).await?;
        order.ensure_owned_by(user_id)?;
        order.cancel(Utc::now())?;
        write_order(&mut tx, &order).await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn resting_orders(
        &self,
        market_id: Uuid,
        outcome_id: Uuid,
        side: Side,
        exclude_user: Uuid,
    ) -> Result<Vec<Order>> {
        let sql = format!(
            r#"SELECT {} FROM orders
               WHERE market_id = $1 AND outcome_id = $2 AND side = $3 AND user_id <> $4
                 AND status IN ('OPEN', 'PARTIALLY_FILLED')
               ORDER BY created_at, seq"#,
            ORDER_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(market_id)
            .bind(outcome_id)
            .bind(side)
            .bind(exclude_user)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn open_orders(&self, market_id: Uuid) -> Result<Vec<Order>> {
        let sql = format!(
            r#"SELECT {} FROM orders
               WHERE market_id = $1 AND status IN ('OPEN', 'PARTIALLY_FILLED')
               ORDER BY seq"#,
            ORDER_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(market_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn user_orders(&self, user_id: Uuid, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let sql = format!(
            r#"SELECT {} FROM orders
               WHERE user_id = $1 AND ($2::order_status IS NULL OR status = $2)
               ORDER BY seq DESC"#,
            ORDER_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(user_id)
            .bind(status)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn execute_trade(&self, request: &TradeRequest) -> Result<Execution> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        // An order never changes market, so this unlocked read only routes the locks
        let routing = fetch_order(&mut tx, request.buy_order_id, Lock::None).await?;
        let market = fetch_market(&mut tx, routing.market_id, Lock::Share).await?;

        let sql = format!(
            "SELECT {} FROM orders WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            ORDER_COLUMNS
        );
        let ids = vec![request.buy_order_id, request.sell_order_id];
        let locked: Vec<Order> = sqlx::query_as(&sql)
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await?;
        let mut buy_order = None;
        let mut sell_order = None;
        for order in locked {
            if order.id == request.buy_order_id {
                buy_order = Some(order);
            } else if order.id == request.sell_order_id {
                sell_order = Some(order);
            }
        }
        let buy_order = buy_order.ok_or_else(|| ExchangeError::not_found("Order not found"))?;
        let sell_order = sell_order.ok_or_else(|| ExchangeError::not_found("Order not found"))?;

        let sql = format!(
            "SELECT {} FROM outcomes WHERE id = $1 FOR UPDATE",
            OUTCOME_COLUMNS
        );
        let outcome: Outcome = sqlx::query_as(&sql)
            .bind(buy_order.outcome_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ExchangeError::not_found("Outcome not found"))?;

        let (buyer_position, seller_position) =
            lock_positions(&mut tx, &buy_order, &sell_order, now).await?;

        let settlement = settle(
            SettlementInput {
                market: market.market,
                outcome,
                buy_order,
                sell_order,
                buyer_position,
                seller_position,
            },
            request,
            now,
        )?;

        let t = &settlement.trade;
        let sql = format!(
            r#"INSERT INTO trades ({})
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
            TRADE_COLUMNS
        );
        sqlx::query(&sql)
            .bind(t.id)
            .bind(t.market_id)
            .bind(t.outcome_id)
            .bind(t.buy_order_id)
            .bind(t.sell_order_id)
            .bind(t.buyer_id)
            .bind(t.seller_id)
            .bind(t.price)
            .bind(t.amount)
            .bind(t.created_at)
            .execute(&mut *tx)
            .await?;

        write_order(&mut tx, &settlement.buy_order).await?;
        write_order(&mut tx, &settlement.sell_order).await?;
        write_outcome(&mut tx, &settlement.outcome).await?;
        write_position(&mut tx, &settlement.buyer_position).await?;
        if let Some(ref seller_position) = settlement.seller_position {
            write_position(&mut tx, seller_position).await?;
        }

        tx.commit().await?;

        if let Some(fill) = settlement.seller_fill {
            if fill.clamped_shares > rust_decimal::Decimal::ZERO {
                tracing::debug!(
                    seller_id = %settlement.sell_order.user_id,
                    clamped = %fill.clamped_shares,
                    "Sell exceeded holding; excess floored"
                );
            }
        }
        Ok(settlement.into())
    }

    async fn claim_winnings(&self, user_id: Uuid, market_id: Uuid) -> Result<Claim> {
        let mut tx = self.pool.begin().await?;

        let market = fetch_market(&mut tx, market_id, Lock::Share).await?;
        let winner = market.market.winning_label()?;
        let winning = market
            .outcome(winner)
            .ok_or_else(|| ExchangeError::not_found("Winning outcome not found"))?;

        let sql = format!(
            r#"SELECT {} FROM positions
               WHERE user_id = $1 AND market_id = $2 AND outcome_id = $3
               FOR UPDATE"#,
            POSITION_COLUMNS
        );
        let mut position: Position = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(market_id)
            .bind(winning.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ExchangeError::not_found("No position found for this market"))?;

        let claim = position.claim(Utc::now())?;
        write_position(&mut tx, &position).await?;

        tx.commit().await?;
        Ok(claim)
    }

    async fn user_positions(&self, user_id: Uuid) -> Result<Vec<Position>> {
        let sql = format!(
            "SELECT {} FROM positions WHERE user_id = $1 ORDER BY updated_at DESC",
            POSITION_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn market_positions(&self, market_id: Uuid) -> Result<Vec<Position>> {
        let sql = format!(
            "SELECT {} FROM positions WHERE market_id = $1",
            POSITION_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(market_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn market_trades(&self, market_id: Uuid, limit: i64) -> Result<Vec<Trade>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE market_id = $1 ORDER BY created_at DESC LIMIT $2",
            TRADE_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(market_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn user_trades(&self, user_id: Uuid, limit: i64) -> Result<Vec<Trade>> {
        let sql = format!(
            r#"SELECT {} FROM trades
               WHERE buyer_id = $1 OR seller_id = $1
               ORDER BY created_at DESC LIMIT $2"#,
            TRADE_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn record_price_snapshots(&self, snapshots: &[PriceSnapshot]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for s in snapshots {
            sqlx::query(
                "INSERT INTO price_history (market_id, outcome_id, price, recorded_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(s.market_id)
            .bind(s.outcome_id)
            .bind(s.price)
            .bind(s.recorded_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn price_history(
        &self,
        market_id: Uuid,
        outcome_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PriceSnapshot>> {
        let mut conn = self.pool.acquire().await?;
        fetch_market(&mut conn, market_id, Lock::None).await?;

        Ok(sqlx::query_as(
            r#"SELECT market_id, outcome_id, price, recorded_at FROM price_history
               WHERE market_id = $1 AND outcome_id = $2
                 AND ($3::timestamptz IS NULL OR recorded_at >= $3)
               ORDER BY recorded_at"#,
        )
        .bind(market_id)
        .bind(outcome_id)
        .bind(since)
        .fetch_all(&mut *conn)
        .await?)
    }

    async fn pending_match_tasks(&self) -> Result<Vec<MatchTask>> {
        Ok(sqlx::query_as(
            "SELECT order_id, market_id, enqueued_at FROM match_tasks ORDER BY enqueued_at, order_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn complete_match_task(&self, order_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM match_tasks WHERE order_id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
