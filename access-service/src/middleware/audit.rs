//! Audit capture around every request.
//!
//! The capture layer installs an [`AuditScope`] in the request extensions.
//! Authentication, the permission gate and handlers write into it; once the
//! response exists the layer turns it into an event and hands it to the
//! recorder without waiting for persistence.

use axum::{
    async_trait,
    body::{to_bytes, Body},
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use service_core::error::AppError;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::models::{AuditAction, NewAuditEvent, PermissionCode, Principal};
use crate::services::redact;
use crate::AppState;

const MAX_AUDITED_BODY: usize = 1024 * 1024;
const UNAUDITED_PATHS: &[&str] = &["/health", "/metrics"];

/// What the pipeline learned about a request.
#[derive(Debug, Default)]
pub struct AuditContext {
    pub principal: Option<Principal>,
    /// Email given on a login attempt that produced no principal.
    pub attempted_email: Option<String>,
    pub module: Option<String>,
    pub permission: Option<PermissionCode>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub before_state: Option<Value>,
    pub marker: Option<AuditAction>,
}

/// Shared, request-scoped audit slot.
#[derive(Debug, Clone, Default)]
pub struct AuditScope(Arc<Mutex<AuditContext>>);

impl AuditScope {
    fn update(&self, f: impl FnOnce(&mut AuditContext)) {
        match self.0.lock() {
            Ok(mut ctx) => f(&mut ctx),
            Err(_) => tracing::warn!("Audit scope lock poisoned"),
        }
    }

    pub fn set_principal(&self, principal: &Principal) {
        let principal = principal.clone();
        self.update(|ctx| ctx.principal = Some(principal));
    }

    pub fn attempted_email(&self, email: &str) {
        let email = email.trim().to_string();
        self.update(|ctx| ctx.attempted_email = Some(email));
    }

    /// Record the permission the authorizer actually evaluated.
    pub fn checked(&self, module: &str, code: PermissionCode) {
        let module = module.to_string();
        self.update(|ctx| {
            ctx.module = Some(module);
            ctx.permission = Some(code);
        });
    }

    pub fn entity(&self, entity_type: &str, entity_id: impl ToString) {
        let entity_type = entity_type.to_string();
        let entity_id = entity_id.to_string();
        self.update(|ctx| {
            ctx.entity_type = Some(entity_type);
            ctx.entity_id = Some(entity_id);
        });
    }

    /// Snapshot of the entity before a mutation, credential fields masked.
    pub fn before<T: Serialize>(&self, state: &T) {
        match serde_json::to_value(state) {
            Ok(value) => {
                let value = redact(value);
                self.update(|ctx| ctx.before_state = Some(value));
            }
            Err(e) => tracing::warn!(error = %e, "Could not serialize audit before-state"),
        }
    }

    pub fn mark(&self, action: AuditAction) {
        self.update(|ctx| ctx.marker = Some(action));
    }

    fn take(&self) -> AuditContext {
        self.0
            .lock()
            .map(|mut ctx| std::mem::take(&mut *ctx))
            .unwrap_or_default()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuditScope
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    /// Outside the capture layer this yields a detached scope nobody reads.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<AuditScope>().cloned().unwrap_or_default())
    }
}

pub async fn audit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if UNAUDITED_PATHS.contains(&path.as_str()) {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let ip = client_ip(&req);
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let scope = AuditScope::default();
    let (mut parts, body) = req.into_parts();
    parts.extensions.insert(scope.clone());

    let mut after_state = None;
    let response = if is_write(&method) {
        match to_bytes(body, MAX_AUDITED_BODY).await {
            Ok(bytes) => {
                after_state = serde_json::from_slice::<Value>(&bytes).ok().map(redact);
                next.run(Request::from_parts(parts, Body::from(bytes))).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rejected unreadable request body");
                AppError::BadRequest(anyhow::anyhow!("Request body too large or unreadable"))
                    .into_response()
            }
        }
    } else {
        next.run(Request::from_parts(parts, body)).await
    };

    let ctx = scope.take();
    let status = response.status();
    let mut event = NewAuditEvent::request(&method, path.clone(), status.as_u16(), state.clock.now());

    event.action = match ctx.marker {
        Some(marker) => marker,
        None if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
            AuditAction::AccessDenied
        }
        None => AuditAction::from_method(&method),
    };
    event.module = ctx.module.or_else(|| first_segment(&path));
    event.permission_used = ctx
        .permission
        .or_else(|| PermissionCode::from_method(&method))
        .map(|code| code.as_str().to_string());
    match ctx.principal {
        Some(principal) => {
            event.actor_user_id = Some(principal.user_id);
            event.actor_email = Some(principal.email);
            event.actor_role = Some(principal.role_name);
        }
        None => event.actor_email = ctx.attempted_email,
    }
    event.entity_type = ctx.entity_type;
    event.entity_id = ctx.entity_id;
    event.before_state = ctx.before_state;
    event.after_state = after_state;
    event.ip = ip;
    event.user_agent = user_agent;

    state.audit.record(event);
    response
}

fn is_write(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn client_ip(req: &Request) -> Option<String> {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

fn first_segment(path: &str) -> Option<String> {
    path.split('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}
