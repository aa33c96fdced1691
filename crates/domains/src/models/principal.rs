use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, Result};

/// The authenticated actor behind a request, resolved by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub is_admin: bool,
}

impl Principal {
    pub fn can_modify(&self, owner_id: Uuid) -> bool {
        self.is_admin || self.id == owner_id
    }

    /// Owner-or-admin gate used by every mutating operation.
    pub fn ensure_can_modify(&self, owner_id: Uuid, what: &str) -> Result<()> {
        if self.can_modify(owner_id) {
            Ok(())
        } else {
            Err(DomainError::unauthorized(format!("not authorized to modify this {what}")))
        }
    }

    pub fn ensure_admin(&self) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(DomainError::unauthorized("admin privileges required"))
        }
    }
}
