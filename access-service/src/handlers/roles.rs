use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        access::{CreateRoleRequest, GrantPermissionsRequest},
        MessageResponse,
    },
    middleware::AuditScope,
    models::{ResolvedGrant, Role},
    utils::ValidatedJson,
    AppState,
};

/// POST /roles
#[tracing::instrument(skip_all)]
pub async fn create_role(
    State(state): State<AppState>,
    scope: AuditScope,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    let role = state.access.create_role(&req.name, &req.description).await?;
    scope.entity("role", role.id);
    Ok((StatusCode::CREATED, Json(role)))
}

/// GET /roles
pub async fn list_roles(State(state): State<AppState>) -> Result<Json<Vec<Role>>, AppError> {
    Ok(Json(state.access.list_roles().await?))
}

/// DELETE /roles/:id
#[tracing::instrument(skip(state, scope))]
pub async fn delete_role(
    State(state): State<AppState>,
    scope: AuditScope,
    Path(role_id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    scope.entity("role", role_id);
    let grants = state.access.get_role_grants(role_id).await?;
    scope.before(&grants);

    state.access.delete_role(role_id).await?;
    Ok(Json(MessageResponse::new("Role deleted")))
}

/// GET /roles/:id/grants
pub async fn get_role_grants(
    State(state): State<AppState>,
    scope: AuditScope,
    Path(role_id): Path<i64>,
) -> Result<Json<Vec<ResolvedGrant>>, AppError> {
    scope.entity("role", role_id);
    Ok(Json(state.access.get_role_grants(role_id).await?))
}

/// Grant module permissions to a role, all or nothing.
///
/// POST /roles/:id/grants
#[tracing::instrument(skip(state, scope, req))]
pub async fn grant_permissions(
    State(state): State<AppState>,
    scope: AuditScope,
    Path(role_id): Path<i64>,
    ValidatedJson(req): ValidatedJson<GrantPermissionsRequest>,
) -> Result<Json<Vec<ResolvedGrant>>, AppError> {
    scope.entity("role", role_id);
    let before = state.access.get_role_grants(role_id).await?;
    scope.before(&before);

    let grants = state
        .access
        .grant_role_permissions(role_id, &req.requests())
        .await?;
    Ok(Json(grants))
}

/// DELETE /roles/:id/grants/:module_id
#[tracing::instrument(skip(state, scope))]
pub async fn revoke_module(
    State(state): State<AppState>,
    scope: AuditScope,
    Path((role_id, module_id)): Path<(i64, i64)>,
) -> Result<Json<MessageResponse>, AppError> {
    scope.entity("role", role_id);
    let before = state.access.get_role_grants(role_id).await?;
    scope.before(&before);

    state
        .access
        .revoke_module_from_role(role_id, module_id)
        .await?;
    Ok(Json(MessageResponse::new("Module removed from role")))
}

/// DELETE /roles/:id/grants/:module_id/:kind_id
#[tracing::instrument(skip(state, scope))]
pub async fn revoke_permission(
    State(state): State<AppState>,
    scope: AuditScope,
    Path((role_id, module_id, kind_id)): Path<(i64, i64, i64)>,
) -> Result<Json<MessageResponse>, AppError> {
    scope.entity("role", role_id);
    let before = state.access.get_role_grants(role_id).await?;
    scope.before(&before);

    state
        .access
        .revoke_grant(role_id, module_id, kind_id)
        .await?;
    Ok(Json(MessageResponse::new("Permission removed from role")))
}
