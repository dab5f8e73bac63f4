mod common;

use access_service::models::PermissionCode;
use axum::http::{Method, StatusCode};
use common::{TestApp, ADMIN_EMAIL, AUDITOR_EMAIL, EMPLOYEE_EMAIL, PASSWORD};
use serde_json::json;

#[tokio::test]
async fn failed_login_is_recorded_without_the_password() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": EMPLOYEE_EMAIL, "password": "hunter2" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let events = app.audit_events().await;
    let event = events.last().expect("no audit event recorded");
    assert_eq!(event.action, "login_failed");
    assert_eq!(event.actor_email.as_deref(), Some(EMPLOYEE_EMAIL));
    assert_eq!(event.actor_user_id, None);
    assert_eq!(event.status_code, 401);
    assert_eq!(
        event.after_state,
        Some(json!({ "email": EMPLOYEE_EMAIL, "password": "[REDACTED]" }))
    );
    app.shutdown().await;
}

#[tokio::test]
async fn successful_login_names_the_user() {
    let app = TestApp::spawn().await;
    app.login(EMPLOYEE_EMAIL).await;

    let events = app.audit_events().await;
    let event = events.last().expect("no audit event recorded");
    assert_eq!(event.action, "login");
    assert_eq!(event.actor_user_id, Some(app.users.employee));
    assert_eq!(event.actor_role.as_deref(), Some("Funcionario"));
    assert_eq!(event.entity_type.as_deref(), Some("user"));
    assert_eq!(event.ip.as_deref(), Some("203.0.113.7"));
    assert_eq!(event.user_agent.as_deref(), Some("access-tests/1.0"));
    let after = event.after_state.as_ref().expect("login body missing");
    assert_eq!(after["password"], "[REDACTED]");
    app.shutdown().await;
}

#[tokio::test]
async fn denied_requests_are_recorded_with_the_checked_permission() {
    let app = TestApp::spawn().await;
    let token = app.login(EMPLOYEE_EMAIL).await;

    let (status, _) = app
        .delete(&format!("/modules/{}", app.modules.reports), &token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let events = app.audit_events().await;
    let event = events.last().expect("no audit event recorded");
    assert_eq!(event.action, "access_denied");
    assert_eq!(event.module.as_deref(), Some("roles_permissions"));
    assert_eq!(event.permission_used.as_deref(), Some("D"));
    assert_eq!(event.actor_email.as_deref(), Some(EMPLOYEE_EMAIL));
    assert_eq!(event.status_code, 403);
    app.shutdown().await;
}

#[tokio::test]
async fn unauthenticated_requests_are_recorded_as_denied() {
    let app = TestApp::spawn().await;

    let (status, _) = app.request(Method::GET, "/modules", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let events = app.audit_events().await;
    let event = events.last().expect("no audit event recorded");
    assert_eq!(event.action, "access_denied");
    assert_eq!(event.actor_user_id, None);
    assert_eq!(event.module.as_deref(), Some("modules"));
    app.shutdown().await;
}

#[tokio::test]
async fn self_demotion_attempt_is_recorded() {
    let app = TestApp::spawn().await;
    let token = app.login(ADMIN_EMAIL).await;

    let (status, _) = app
        .put(
            &format!("/users/{}/role", app.users.admin),
            &token,
            json!({ "role_id": app.roles.funcionario }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let events = app.audit_events().await;
    let event = events.last().expect("no audit event recorded");
    assert_eq!(event.action, "access_denied");
    assert_eq!(event.module.as_deref(), Some("user_directory"));
    assert_eq!(event.permission_used.as_deref(), Some("W"));
    assert_eq!(event.entity_id, Some(app.users.admin.to_string()));
    app.shutdown().await;
}

#[tokio::test]
async fn mutations_capture_before_and_after_state() {
    let app = TestApp::spawn().await;
    let token = app.login(ADMIN_EMAIL).await;
    let read = app.kind(PermissionCode::Read);

    let (status, _) = app
        .put(
            &format!("/modules/{}/permissions", app.modules.reports),
            &token,
            json!({ "permission_kind_ids": [read] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let events = app.audit_events().await;
    let event = events.last().expect("no audit event recorded");
    assert_eq!(event.action, "update");
    assert_eq!(event.permission_used.as_deref(), Some("W"));
    assert_eq!(event.actor_role.as_deref(), Some("SUPERADMIN"));
    assert_eq!(event.entity_type.as_deref(), Some("module"));
    assert_eq!(event.entity_id, Some(app.modules.reports.to_string()));

    let before = event.before_state.as_ref().expect("before state missing");
    assert_eq!(before["name"], "Reports");
    assert_eq!(before["permissions"].as_array().map(Vec::len), Some(2));
    assert_eq!(
        event.after_state,
        Some(json!({ "permission_kind_ids": [read] }))
    );
    app.shutdown().await;
}

#[tokio::test]
async fn oversized_request_metadata_is_still_recorded() {
    let app = TestApp::spawn().await;
    let forwarded = "198.51.100.23".repeat(20);
    let long_path = format!("/{}", "x".repeat(150));

    let (status, _) = app
        .request_from(Method::GET, &long_path, None, None, &forwarded)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let events = app.audit_events().await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.path, long_path);
    assert_eq!(event.ip.as_deref().map(str::len), Some(64));
    assert!(forwarded.starts_with(event.ip.as_deref().unwrap_or_default()));
    assert_eq!(event.module.as_deref().map(str::len), Some(100));
    assert_eq!(app.state.audit.dropped(), 0);
    app.shutdown().await;
}

#[tokio::test]
async fn filter_accepts_marker_names() {
    let app = TestApp::spawn().await;
    app.request(
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": EMPLOYEE_EMAIL, "password": "wrong" })),
    )
    .await;
    let token = app.login(AUDITOR_EMAIL).await;
    app.audit_events().await;

    let (status, failed) = app
        .get("/audit/logs/filter?action=LoginFailed", &token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed["total"], 1);
    assert_eq!(failed["items"][0]["action"], "login_failed");

    let (status, _) = app.get("/audit/logs/filter?action=teleport", &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    app.shutdown().await;
}

#[tokio::test]
async fn health_and_metrics_are_not_audited() {
    let app = TestApp::spawn().await;

    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    app.request(Method::GET, "/metrics", None, None).await;

    assert!(app.audit_events().await.is_empty());
    app.shutdown().await;
}

#[tokio::test]
async fn transient_write_failures_are_retried() {
    let app = TestApp::spawn().await;
    app.store.fail_audit_writes(2);

    app.request(
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": AUDITOR_EMAIL, "password": PASSWORD })),
    )
    .await;

    let events = app.audit_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, "login");
    assert_eq!(app.state.audit.dropped(), 0);
    app.shutdown().await;
}

#[tokio::test]
async fn audit_log_is_paginated_newest_first() {
    let app = TestApp::spawn().await;
    let token = app.login(AUDITOR_EMAIL).await;
    for _ in 0..3 {
        app.get("/roles", &token).await;
    }
    let recorded = app.audit_events().await.len() as i64;

    let (status, body) = app.get("/audit/logs?page=1&size=2", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], recorded);
    assert_eq!(body["size"], 2);
    let items = body["items"].as_array().expect("items missing");
    assert_eq!(items.len(), 2);
    assert!(items[0]["id"].as_i64() > items[1]["id"].as_i64());

    let (_, capped) = app.get("/audit/logs?size=500", &token).await;
    assert_eq!(capped["size"], 100);
    app.shutdown().await;
}

#[tokio::test]
async fn audit_log_filters_by_user_and_module() {
    let app = TestApp::spawn().await;
    let employee = app.login(EMPLOYEE_EMAIL).await;
    app.get("/roles", &employee).await;
    let token = app.login(AUDITOR_EMAIL).await;
    app.audit_events().await;

    let (status, by_user) = app
        .get(&format!("/audit/logs/user/{}", app.users.employee), &token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let items = by_user["items"].as_array().expect("items missing");
    assert_eq!(items.len(), 2);
    assert!(items
        .iter()
        .all(|e| e["actor_user_id"] == app.users.employee));

    let (_, by_module) = app.get("/audit/logs/module/roles_permissions", &token).await;
    let items = by_module["items"].as_array().expect("items missing");
    assert!(!items.is_empty());
    assert!(items.iter().all(|e| e["module"] == "roles_permissions"));

    let (_, denied) = app
        .get("/audit/logs/filter?action=access_denied&email=ana@acme.test", &token)
        .await;
    assert_eq!(denied["total"], 1);
    assert_eq!(denied["items"][0]["path"], "/roles");
    app.shutdown().await;
}

#[tokio::test]
async fn audit_log_by_date_range() {
    let app = TestApp::spawn().await;
    let token = app.login(AUDITOR_EMAIL).await;
    app.audit_events().await;

    let (status, same_day) = app
        .get(
            "/audit/logs/date-range?start_date=2025-01-15&end_date=2025-01-15",
            &token,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(same_day["total"], 1);

    let (_, next_day) = app
        .get(
            "/audit/logs/date-range?start_date=2025-01-16&end_date=2025-01-20",
            &token,
        )
        .await;
    assert_eq!(next_day["total"], 0);

    let (_, inverted) = app
        .get(
            "/audit/logs/date-range?start_date=2025-01-20&end_date=2025-01-01",
            &token,
        )
        .await;
    assert_eq!(inverted["total"], 0);
    assert_eq!(inverted["items"], json!([]));

    let (missing, _) = app
        .get("/audit/logs/date-range?start_date=2025-01-15", &token)
        .await;
    assert_eq!(missing, StatusCode::BAD_REQUEST);
    app.shutdown().await;
}

#[tokio::test]
async fn employees_cannot_read_the_audit_log() {
    let app = TestApp::spawn().await;
    let token = app.login(EMPLOYEE_EMAIL).await;

    let (status, _) = app.get("/audit/logs", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    app.shutdown().await;
}
