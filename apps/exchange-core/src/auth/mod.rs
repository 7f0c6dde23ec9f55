//! Actor Context & Permissions
//! Callers are authenticated upstream; requests carry the resulting context
//! and every engine entry point checks it here.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::ExchangeError;

pub mod permissions {
    pub const ORDERS_CREATE: &str = "orders:create";
    pub const ORDERS_READ: &str = "orders:read";
    pub const ORDERS_CANCEL: &str = "orders:cancel";
    pub const POSITIONS_READ: &str = "positions:read";
    pub const POSITIONS_CLAIM: &str = "positions:claim";
    pub const MARKETS_CREATE: &str = "markets:create";
    pub const MARKETS_RESOLVE: &str = "markets:resolve";
    pub const ADMIN_FULL: &str = "admin:full";

    /// Granted to an ordinary trading account
    pub const TRADER: &[&str] = &[
        ORDERS_CREATE,
        ORDERS_READ,
        ORDERS_CANCEL,
        POSITIONS_READ,
        POSITIONS_CLAIM,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    #[serde(alias = "user_id", alias = "sub")]
    pub user_id: Uuid,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub permissions: HashSet<String>,
}

impl AuthContext {
    pub fn new<I, S>(user_id: Uuid, role: &str, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_id,
            username: user_id.to_string(),
            role: role.to_string(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn trader(user_id: Uuid) -> Self {
        Self::new(user_id, "trader", permissions::TRADER.iter().copied())
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self::new(user_id, "admin", [permissions::ADMIN_FULL])
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission) || self.permissions.contains(permissions::ADMIN_FULL)
    }

    pub fn require(&self, permission: &str) -> Result<(), ExchangeError> {
        if !self.has_permission(permission) {
            return Err(ExchangeError::forbidden(format!(
                "{} required",
                permission
            )));
        }
        Ok(())
    }

    pub fn can_access_user(&self, target: &Uuid) -> bool {
        &self.user_id == target || self.has_permission(permissions::ADMIN_FULL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_implies_everything() {
        let admin = AuthContext::admin(Uuid::new_v4());
        assert!(admin.has_permission(permissions::MARKETS_RESOLVE));
        assert!(admin.can_access_user(&Uuid::new_v4()));
    }

    #[test]
    fn test_trader_cannot_resolve() {
        let trader = AuthContext::trader(Uuid::new_v4());
        assert!(trader.require(permissions::ORDERS_CREATE).is_ok());
        assert!(matches!(
            trader.require(permissions::MARKETS_RESOLVE),
            Err(ExchangeError::Forbidden(_))
        ));
    }

    #[test]
    fn test_context_from_message_block() {
        let json = r#"{"userId":"6f1c0f7e-8a8e-4a53-9f38-1f0e1d1f2a3b","permissions":["orders:create"]}"#;
        let ctx: AuthContext = serde_json::from_str(json).unwrap();
        assert!(ctx.has_permission(permissions::ORDERS_CREATE));
        assert!(!ctx.has_permission(permissions::ORDERS_CANCEL));
    }
}
