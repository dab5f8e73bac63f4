//! Authorization decisions: may this principal use this permission on this module?

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::store::AccessStore;
use super::ServiceError;
use crate::models::{PermissionCode, Principal};

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No live grant for the (role, module, permission) triple.
    NoGrant,
    /// The principal tried to move themselves to another role.
    SelfDemotion,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NoGrant => write!(f, "no grant"),
            DenyReason::SelfDemotion => write!(f, "cannot change own role"),
        }
    }
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    fn label(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny(DenyReason::NoGrant) => "deny_no_grant",
            Decision::Deny(DenyReason::SelfDemotion) => "deny_self_demotion",
        }
    }
}

/// A pending role assignment, checked against the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    pub target_user_id: i64,
    pub new_role_id: i64,
}

#[derive(Clone)]
pub struct Authorizer {
    store: Arc<dyn AccessStore>,
    superuser_role: String,
}

impl Authorizer {
    pub fn new(store: Arc<dyn AccessStore>, superuser_role: impl Into<String>) -> Self {
        Self {
            store,
            superuser_role: superuser_role.into(),
        }
    }

    pub fn is_superuser(&self, principal: &Principal) -> bool {
        principal.role_name.eq_ignore_ascii_case(&self.superuser_role)
    }

    pub fn superuser_role(&self) -> &str {
        &self.superuser_role
    }

    /// Decide on a request. Storage failures surface as `Err`; callers must
    /// treat them as a denial.
    #[tracing::instrument(skip(self, principal), fields(user_id = principal.user_id, role = %principal.role_name))]
    pub async fn authorize(
        &self,
        principal: &Principal,
        module: &str,
        code: PermissionCode,
        role_change: Option<&RoleChange>,
    ) -> Result<Decision, ServiceError> {
        let decision = self.decide(principal, module, code, role_change).await;

        let label = match &decision {
            Ok(d) => d.label(),
            Err(_) => "error",
        };
        metrics::counter!("authz_decisions_total", "decision" => label).increment(1);

        if let Ok(Decision::Deny(reason)) = &decision {
            tracing::info!(module, permission = %code, ?reason, "Access denied");
        }
        decision
    }

    /// `true` only for an explicit `Allow`. Storage failures deny.
    pub async fn is_allowed(
        &self,
        principal: &Principal,
        module: &str,
        code: PermissionCode,
    ) -> bool {
        match self.authorize(principal, module, code, None).await {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                tracing::error!(error = %e, module, "Authorization check failed, denying");
                false
            }
        }
    }

    async fn decide(
        &self,
        principal: &Principal,
        module: &str,
        code: PermissionCode,
        role_change: Option<&RoleChange>,
    ) -> Result<Decision, ServiceError> {
        if let Some(change) = role_change {
            if change.target_user_id == principal.user_id && change.new_role_id != principal.role_id
            {
                return Ok(Decision::Deny(DenyReason::SelfDemotion));
            }
        }

        if self.is_superuser(principal) {
            return Ok(Decision::Allow);
        }

        let granted = self
            .store
            .has_grant(principal.role_id, module, code)
            .await?;
        Ok(if granted {
            Decision::Allow
        } else {
            Decision::Deny(DenyReason::NoGrant)
        })
    }
}
