use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{models::PermissionKind, AppState};

/// GET /permission-kinds
pub async fn list_permission_kinds(
    State(state): State<AppState>,
) -> Result<Json<Vec<PermissionKind>>, AppError> {
    Ok(Json(state.access.list_permission_kinds().await?))
}
