use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use super::AuditScope;
use crate::models::Principal;
use crate::services::{ServiceError, TokenError};
use crate::AppState;

/// Raw bearer token of the current request, kept for logout.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Middleware to require a valid, unrevoked session token.
pub async fn auth_middleware(
    State(state): State<AppState>,
    scope: AuditScope,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ServiceError::Unauthenticated(TokenError::Missing))?;

    let principal = state.auth.authenticate(&token).await.map_err(|e| {
        if let ServiceError::Unauthenticated(reason) = &e {
            tracing::debug!(%reason, "Authentication rejected");
        }
        e
    })?;

    scope.set_principal(&principal);

    // Store principal in request extensions so handlers can access it
    req.extensions_mut().insert(principal);
    req.extensions_mut().insert(BearerToken(token));

    Ok(next.run(req).await)
}

/// Extractor to easily get the principal in handlers
pub struct AuthUser(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts.extensions.get::<Principal>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Principal missing from request extensions"
            ))
        })?;

        Ok(AuthUser(principal.clone()))
    }
}
