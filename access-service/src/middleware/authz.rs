use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use super::AuditScope;
use crate::models::{AuditAction, PermissionCode, Principal};
use crate::services::{Decision, ServiceError, TokenError};
use crate::AppState;

/// Permission a route requires.
#[derive(Debug, Clone, Copy)]
pub struct Gate {
    pub module: &'static str,
    pub code: PermissionCode,
}

impl Gate {
    pub const fn new(module: &'static str, code: PermissionCode) -> Self {
        Self { module, code }
    }
}

/// Route-level authorization. Runs after [`auth_middleware`](super::auth_middleware).
/// Storage failures deny with 503.
pub async fn permission_gate(
    State((state, gate)): State<(AppState, Gate)>,
    scope: AuditScope,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = req
        .extensions()
        .get::<Principal>()
        .cloned()
        .ok_or(ServiceError::Unauthenticated(TokenError::Missing))?;

    scope.checked(gate.module, gate.code);

    match state
        .authorizer
        .authorize(&principal, gate.module, gate.code, None)
        .await
    {
        Ok(Decision::Allow) => Ok(next.run(req).await),
        Ok(Decision::Deny(_)) => {
            scope.mark(AuditAction::AccessDenied);
            Err(ServiceError::forbidden(format!(
                "{} on {}",
                gate.code, gate.module
            ))
            .into())
        }
        Err(e) => {
            scope.mark(AuditAction::AccessDenied);
            Err(e.into())
        }
    }
}
