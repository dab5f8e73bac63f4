use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use super::USER_DIRECTORY;
use crate::{
    dtos::access::AssignRoleRequest,
    middleware::{AuditScope, AuthUser},
    models::{AuditAction, PermissionCode, User},
    services::{Decision, RoleChange, ServiceError, UserPermissions},
    utils::ValidatedJson,
    AppState,
};

/// Move a user to another role. A caller may never change their own role.
///
/// PUT /users/:id/role
#[tracing::instrument(skip(state, scope, principal, req), fields(actor = principal.user_id))]
pub async fn assign_role(
    State(state): State<AppState>,
    scope: AuditScope,
    AuthUser(principal): AuthUser,
    Path(user_id): Path<i64>,
    ValidatedJson(req): ValidatedJson<AssignRoleRequest>,
) -> Result<Json<User>, AppError> {
    scope.entity("user", user_id);

    let change = RoleChange {
        target_user_id: user_id,
        new_role_id: req.role_id,
    };
    let decision = state
        .authorizer
        .authorize(&principal, USER_DIRECTORY, PermissionCode::Write, Some(&change))
        .await;
    match decision {
        Ok(Decision::Allow) => {}
        Ok(Decision::Deny(reason)) => {
            scope.mark(AuditAction::AccessDenied);
            return Err(ServiceError::forbidden(format!("Role change denied: {}", reason)).into());
        }
        Err(e) => {
            scope.mark(AuditAction::AccessDenied);
            return Err(e.into());
        }
    }

    let before = state.access.find_user(user_id).await?;
    scope.before(&before);

    let user = state.access.assign_user_role(user_id, req.role_id).await?;
    Ok(Json(user))
}

/// GET /users/:id/permissions
pub async fn user_permissions(
    State(state): State<AppState>,
    scope: AuditScope,
    Path(user_id): Path<i64>,
) -> Result<Json<UserPermissions>, AppError> {
    scope.entity("user", user_id);
    Ok(Json(state.access.user_permissions(user_id).await?))
}
