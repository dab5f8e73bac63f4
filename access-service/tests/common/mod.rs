//! Test helper module for access-service integration tests.
//!
//! Builds the full router over the in-memory store and a manual clock, with
//! a small seeded organisation: three roles, three modules and one user per
//! role.

#![allow(dead_code)]

use access_service::{
    build_router,
    config::{
        AccessConfig, AccessPolicyConfig, AuditConfig, DatabaseConfig, Environment, JwtConfig,
        SecurityConfig, SessionConfig,
    },
    models::{ModuleDraft, PermissionCode},
    services::{ManualClock, MemoryStore, Stores},
    utils::{hash_password, Password},
    AppState,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use secrecy::Secret;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tower::util::ServiceExt;

pub const PASSWORD: &str = "CorrectHorse1!";
pub const ADMIN_EMAIL: &str = "admin@acme.test";
pub const EMPLOYEE_EMAIL: &str = "ana@acme.test";
pub const AUDITOR_EMAIL: &str = "audit@acme.test";

pub const SUPERUSER_ROLE: &str = "SUPERADMIN";

/// Argon2 is slow in debug builds; hash once per test binary.
fn password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| {
        hash_password(&Password::new(PASSWORD))
            .expect("Failed to hash test password")
            .as_str()
            .to_string()
    })
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
}

pub fn test_config() -> AccessConfig {
    AccessConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "access-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        jwt: JwtConfig {
            secret: Secret::new("integration-test-secret-0123456789abcdef".to_string()),
            expiry_hours: 8,
        },
        access: AccessPolicyConfig {
            superuser_role: SUPERUSER_ROLE.to_string(),
        },
        audit: AuditConfig {
            queue_capacity: 256,
            workers: 2,
            max_retry_seconds: 1,
        },
        sessions: SessionConfig {
            sweep_interval_seconds: 3600,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Roles {
    pub superadmin: i64,
    pub funcionario: i64,
    pub auditor: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct Modules {
    pub reports: i64,
    pub roles_permissions: i64,
    pub user_directory: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct Users {
    pub admin: i64,
    pub employee: i64,
    pub auditor: i64,
}

/// Seeded application with running audit workers.
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub router: Router,
    pub roles: Roles,
    pub modules: Modules,
    pub users: Users,
    workers: Vec<JoinHandle<()>>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let store = Arc::new(MemoryStore::with_catalog());
        let clock = Arc::new(ManualClock::new(start_time()));

        let state = AppState::new(test_config(), Stores::memory(store.clone()), clock.clone())
            .expect("Failed to build application state");
        let workers = state.audit.start();

        let access = &state.access;
        let roles = Roles {
            superadmin: access
                .create_role(SUPERUSER_ROLE, "Full access")
                .await
                .expect("Failed to create superuser role")
                .id,
            funcionario: access
                .create_role("Funcionario", "Staff member")
                .await
                .expect("Failed to create employee role")
                .id,
            auditor: access
                .create_role("Auditor", "Reads the audit trail")
                .await
                .expect("Failed to create auditor role")
                .id,
        };

        let created = access
            .create_modules(&[
                draft("Reports"),
                draft("roles_permissions"),
                draft("user_directory"),
            ])
            .await
            .expect("Failed to create modules");
        let modules = Modules {
            reports: created[0].module.id,
            roles_permissions: created[1].module.id,
            user_directory: created[2].module.id,
        };

        let kind = |code| store.permission_kind_id(code).expect("Permission kind missing");
        let (read, write, export, delete) = (
            kind(PermissionCode::Read),
            kind(PermissionCode::Write),
            kind(PermissionCode::Export),
            kind(PermissionCode::Delete),
        );

        access
            .set_module_available_permissions(modules.reports, &[read, export])
            .await
            .expect("Failed to configure Reports");
        access
            .set_module_available_permissions(modules.roles_permissions, &[read, write, delete])
            .await
            .expect("Failed to configure roles_permissions");
        access
            .set_module_available_permissions(modules.user_directory, &[read, write])
            .await
            .expect("Failed to configure user_directory");

        access
            .grant_role_permissions(
                roles.funcionario,
                &[access_service::models::GrantRequest {
                    module_id: modules.reports,
                    permission_kind_ids: vec![read],
                }],
            )
            .await
            .expect("Failed to grant employee permissions");
        access
            .grant_role_permissions(
                roles.auditor,
                &[access_service::models::GrantRequest {
                    module_id: modules.roles_permissions,
                    permission_kind_ids: vec![read],
                }],
            )
            .await
            .expect("Failed to grant auditor permissions");

        let now = start_time();
        let user = |name: &str, email: &str, role_id: i64| {
            store
                .insert_user(name, email, role_id, password_hash(), now)
                .expect("Failed to insert user")
                .id
        };
        let users = Users {
            admin: user("Admin", ADMIN_EMAIL, roles.superadmin),
            employee: user("Ana Souza", EMPLOYEE_EMAIL, roles.funcionario),
            auditor: user("Carla Auditor", AUDITOR_EMAIL, roles.auditor),
        };

        let router = build_router(state.clone());

        Self {
            state,
            store,
            clock,
            router,
            roles,
            modules,
            users,
            workers,
        }
    }

    pub fn kind(&self, code: PermissionCode) -> i64 {
        self.store
            .permission_kind_id(code)
            .expect("Permission kind missing")
    }

    /// Send a request through the full middleware stack.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.request_from(method, uri, token, body, "203.0.113.7").await
    }

    /// Same as [`TestApp::request`] with an explicit `X-Forwarded-For`.
    pub async fn request_from(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        forwarded_for: &str,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::USER_AGENT, "access-tests/1.0")
            .header("x-forwarded-for", forwarded_for);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, Some(token), None).await
    }

    /// Log in over HTTP and return the bearer token.
    pub async fn login(&self, email: &str) -> String {
        let (status, body) = self
            .request(
                Method::POST,
                "/auth/login",
                None,
                Some(serde_json::json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed for {}: {}", email, body);
        body["token"]
            .as_str()
            .expect("login response without token")
            .to_string()
    }

    /// Persisted audit events, oldest first, after the queue drained.
    pub async fn audit_events(&self) -> Vec<access_service::models::AuditEvent> {
        self.state.audit.flush().await;
        let mut events = self.store.audit_events();
        events.sort_by_key(|e| e.id);
        events
    }

    pub async fn shutdown(self) {
        self.state.audit.shutdown(self.workers).await;
    }
}

fn draft(name: &str) -> ModuleDraft {
    ModuleDraft {
        name: name.to_string(),
        description: String::new(),
    }
}
