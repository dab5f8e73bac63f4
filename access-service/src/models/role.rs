//! Role model and the role → module → permission grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role entity. Roles are hard-deleted; their grants go with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A granted (role, module, permission kind) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Grant {
    pub id: i64,
    pub role_id: i64,
    pub module_id: i64,
    pub permission_kind_id: i64,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deletion_cause: Option<String>,
}

impl Grant {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Active grant joined with its module and permission kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ResolvedGrant {
    pub grant_id: i64,
    pub role_id: i64,
    pub module_id: i64,
    pub module_name: String,
    pub permission_kind_id: i64,
    pub permission_code: String,
    pub permission_name: String,
    pub created_at: DateTime<Utc>,
}

/// One module's worth of a grant request.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantRequest {
    pub module_id: i64,
    pub permission_kind_ids: Vec<i64>,
}

/// Grants of a role collapsed per module, as permission codes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleGrantSummary {
    pub module_id: i64,
    pub module_name: String,
    pub permissions: Vec<String>,
}

impl ModuleGrantSummary {
    /// Group resolved grants by module, keeping first-seen module order.
    pub fn collect(grants: &[ResolvedGrant]) -> Vec<ModuleGrantSummary> {
        let mut summaries: Vec<ModuleGrantSummary> = Vec::new();
        for grant in grants {
            match summaries.iter_mut().find(|s| s.module_id == grant.module_id) {
                Some(summary) => summary.permissions.push(grant.permission_code.clone()),
                None => summaries.push(ModuleGrantSummary {
                    module_id: grant.module_id,
                    module_name: grant.module_name.clone(),
                    permissions: vec![grant.permission_code.clone()],
                }),
            }
        }
        summaries
    }
}
