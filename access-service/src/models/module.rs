//! Module model - functional areas that permissions attach to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::PermissionKind;

/// Why a registry or grant row was soft-deleted. Restoring a module only
/// revives rows whose cause is [`DeletionCause::Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionCause {
    /// Cascaded from the owning module's soft delete.
    Module,
    /// The permission was withdrawn from the module's available set.
    Withdrawn,
    /// The grant was revoked from the role directly.
    Revoked,
}

impl DeletionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionCause::Module => "module",
            DeletionCause::Withdrawn => "withdrawn",
            DeletionCause::Revoked => "revoked",
        }
    }
}

/// Module entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Module {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Module {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A permission kind made available on a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ModulePermission {
    pub id: i64,
    pub module_id: i64,
    pub permission_kind_id: i64,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deletion_cause: Option<String>,
}

impl ModulePermission {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Module together with its currently available permission kinds.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleWithPermissions {
    #[serde(flatten)]
    pub module: Module,
    pub permissions: Vec<PermissionKind>,
}

/// Input for bulk module creation.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
}
