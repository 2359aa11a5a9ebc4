use crate::config::AccessConfig;
use crate::error::{AppError, Result};
use crate::models::{CurrentUser, Visibility};

/// Ownership and role policy for handles
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessController {
    admin_can_delete_any: bool,
}

impl AccessController {
    pub fn new(config: &AccessConfig) -> Self {
        Self {
            admin_can_delete_any: config.admin_can_delete_any,
        }
    }

    /// Owners and admins read everything; public handles are readable by any
    /// authenticated caller.
    pub fn can_read(&self, caller: &CurrentUser, owner_id: &str, visibility: Visibility) -> bool {
        caller.id == owner_id || caller.is_admin() || visibility == Visibility::Public
    }

    pub fn can_delete(&self, caller: &CurrentUser, owner_id: &str) -> bool {
        caller.id == owner_id || (self.admin_can_delete_any && caller.is_admin())
    }

    pub fn authorize_read(&self, caller: &CurrentUser, owner_id: &str, visibility: Visibility) -> Result<()> {
        if self.can_read(caller, owner_id, visibility) {
            Ok(())
        } else {
            Err(AppError::Forbidden("Access denied".to_string()))
        }
    }

    pub fn authorize_delete(&self, caller: &CurrentUser, owner_id: &str) -> Result<()> {
        if self.can_delete(caller, owner_id) {
            Ok(())
        } else {
            tracing::debug!("User {} denied delete on handle owned by {}", caller.id, owner_id);
            Err(AppError::Forbidden("Access denied".to_string()))
        }
    }

    /// Gate for cross-user listings and statistics
    pub fn require_admin(&self, caller: &CurrentUser) -> Result<()> {
        if caller.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin access required".to_string()))
        }
    }
}
