//! Error taxonomy shared by the engine, the stores and the message handlers

use thiserror::Error;
use uuid::Uuid;

pub type Result<T, E = ExchangeError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    /// A row changed between the matcher reading it and the settlement
    /// transaction locking it.
    #[error("Stale order {order_id}: {reason}")]
    Conflict { order_id: Uuid, reason: String },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Publish error: {0}")]
    Publish(String),
}

impl ExchangeError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn conflict(order_id: Uuid, reason: impl Into<String>) -> Self {
        Self::Conflict {
            order_id,
            reason: reason.into(),
        }
    }

    /// Stable code surfaced in replies and metric labels
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION",
            Self::Conflict { .. } => "CONFLICT",
            Self::Database(_) | Self::Migration(_) | Self::Publish(_) => "INTERNAL",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
