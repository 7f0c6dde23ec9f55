//! Domain Model
//! Markets, orders, trades and the position ledger with their state transitions

pub mod market;
pub mod order;
pub mod position;
pub mod trade;

pub use market::{decide_by_price, Market, MarketStatus, MarketWithOutcomes, Outcome, OutcomeLabel, PriceSnapshot};
pub use order::{NewOrderRequest, Order, OrderStatus, OrderType, Side};
pub use position::{Claim, Holding, PortfolioSummary, Position, PositionPnl, SellFill};
pub use trade::{Trade, TradeRole, UserTrade};
