pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put, MethodRouter},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::{request_id_middleware, RequestId},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AccessConfig;
use crate::handlers::{ROLES_PERMISSIONS, USER_DIRECTORY};
use crate::middleware::{audit_middleware, auth_middleware, permission_gate, Gate};
use crate::models::PermissionCode;
use crate::services::{
    AccessControlService, AccessStore, AuditLogService, AuditRecorder, AuthService, Authorizer,
    Clock, JwtService, SessionAuthority, Stores,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AccessConfig>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn AccessStore>,
    pub sessions: SessionAuthority,
    pub auth: AuthService,
    pub authorizer: Authorizer,
    pub access: AccessControlService,
    pub audit: AuditRecorder,
    pub audit_log: AuditLogService,
}

impl AppState {
    /// Wire the services over one set of stores. Audit workers are not
    /// started here; call [`AuditRecorder::start`] on `state.audit`.
    pub fn new(
        config: AccessConfig,
        stores: Stores,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, anyhow::Error> {
        let jwt = JwtService::new(&config.jwt)?;
        let sessions = SessionAuthority::new(jwt, stores.tokens.clone(), clock.clone());
        let auth = AuthService::new(stores.users.clone(), sessions.clone());

        let superuser_role = config.access.superuser_role.clone();
        let authorizer = Authorizer::new(stores.access.clone(), superuser_role.clone());
        let access = AccessControlService::new(
            stores.access.clone(),
            stores.users.clone(),
            clock.clone(),
            superuser_role,
        );

        let audit = AuditRecorder::new(stores.audit.clone(), &config.audit);
        let audit_log = AuditLogService::new(stores.audit);

        Ok(Self {
            config: Arc::new(config),
            clock,
            store: stores.access,
            sessions,
            auth,
            authorizer,
            access,
            audit,
            audit_log,
        })
    }
}

/// Require `code` on `module` for every method in `route`.
fn gated(
    state: &AppState,
    module: &'static str,
    code: PermissionCode,
    route: MethodRouter<AppState>,
) -> MethodRouter<AppState> {
    route.route_layer(from_fn_with_state(
        (state.clone(), Gate::new(module, code)),
        permission_gate,
    ))
}

pub fn build_router(state: AppState) -> Router {
    use handlers::{audit, auth, catalog, modules, roles, users};
    use PermissionCode::{Delete, Read, Write};

    let admin = |code: PermissionCode, route: MethodRouter<AppState>| {
        gated(&state, ROLES_PERMISSIONS, code, route)
    };

    // Everything here needs a valid session; most routes also pass a gate.
    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route(
            "/permission-kinds",
            admin(Read, get(catalog::list_permission_kinds)),
        )
        .route(
            "/modules",
            admin(Read, get(modules::list_modules))
                .merge(admin(Write, post(modules::create_modules))),
        )
        .route(
            "/modules/deleted",
            admin(Read, get(modules::list_deleted_modules)),
        )
        .route(
            "/modules/:id",
            admin(Read, get(modules::get_module))
                .merge(admin(Delete, delete(modules::delete_module))),
        )
        .route(
            "/modules/:id/restore",
            admin(Write, post(modules::restore_module)),
        )
        .route(
            "/modules/:id/permissions",
            admin(Write, put(modules::set_module_permissions)),
        )
        .route(
            "/modules/:id/permissions/:kind_id",
            admin(Delete, delete(modules::remove_module_permission)),
        )
        .route(
            "/roles",
            admin(Read, get(roles::list_roles)).merge(admin(Write, post(roles::create_role))),
        )
        .route("/roles/:id", admin(Delete, delete(roles::delete_role)))
        .route(
            "/roles/:id/grants",
            admin(Read, get(roles::get_role_grants))
                .merge(admin(Write, post(roles::grant_permissions))),
        )
        .route(
            "/roles/:id/grants/:module_id",
            admin(Delete, delete(roles::revoke_module)),
        )
        .route(
            "/roles/:id/grants/:module_id/:kind_id",
            admin(Delete, delete(roles::revoke_permission)),
        )
        .route(
            "/users/:id/role",
            gated(&state, USER_DIRECTORY, Write, put(users::assign_role)),
        )
        .route(
            "/users/:id/permissions",
            admin(Read, get(users::user_permissions)),
        )
        .route("/audit/logs", admin(Read, get(audit::list_logs)))
        .route("/audit/logs/user/:id", admin(Read, get(audit::logs_by_user)))
        .route(
            "/audit/logs/module/:module",
            admin(Read, get(audit::logs_by_module)),
        )
        .route(
            "/audit/logs/date-range",
            admin(Read, get(audit::logs_by_date_range)),
        )
        .route(
            "/audit/logs/filter",
            admin(Read, get(audit::logs_by_filters)),
        )
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/auth/login", post(auth::login))
        .merge(protected)
        .layer(from_fn_with_state(state.clone(), audit_middleware))
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .extensions()
                    .get::<RequestId>()
                    .map(RequestId::as_str)
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        )
}

/// Service health check
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        e
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": "up"
        }
    })))
}
