//! Exchange Core
//! Binary YES/NO prediction-market exchange: order matching, trade settlement,
//! the position ledger, market resolution and claims.

pub mod auth;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod exchange;
pub mod jobs;
pub mod nats_handler;
pub mod observability;
pub mod resilience;
pub mod store;

pub use error::{ExchangeError, Result};
pub use exchange::Exchange;
