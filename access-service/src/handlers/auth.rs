use axum::{extract::State, Extension, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{LoginRequest, LoginResponse},
        MessageResponse,
    },
    middleware::{AuditScope, BearerToken},
    models::AuditAction,
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

/// Login with email and password
///
/// POST /auth/login
#[tracing::instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    scope: AuditScope,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    scope.attempted_email(&req.email);

    match state.auth.login(&req.email, &req.password).await {
        Ok(outcome) => {
            scope.set_principal(&outcome.principal);
            scope.entity("user", outcome.principal.user_id);
            scope.mark(AuditAction::Login);

            Ok(Json(LoginResponse {
                token: outcome.token,
                token_type: "Bearer".to_string(),
                expires_at: outcome.expires_at,
                user: outcome.principal,
            }))
        }
        Err(e) => {
            if matches!(e, ServiceError::InvalidCredentials) {
                tracing::info!("Login failed");
                scope.mark(AuditAction::LoginFailed);
            }
            Err(e.into())
        }
    }
}

/// Revoke the presented session token
///
/// POST /auth/logout
#[tracing::instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    scope: AuditScope,
    Extension(BearerToken(token)): Extension<BearerToken>,
) -> Result<Json<MessageResponse>, AppError> {
    state.auth.logout(&token).await?;
    scope.mark(AuditAction::Logout);
    Ok(Json(MessageResponse::new("Logged out successfully")))
}
