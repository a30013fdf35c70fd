//! Role gate, permission gate and administration endpoint tests.

mod common;

use common::{envelope, TestApp};
use serde_json::{json, Value};
use serial_test::serial;
use warden::rbac::seed::{ADMIN_ROLE, USERS_MANAGE, USERS_VIEW};

async fn permission_id(app: &TestApp, token: &str, name: &str) -> i64 {
    let body = envelope(app.get("/admin/permissions", token).await).await;
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == name)
        .and_then(|p| p["id"].as_i64())
        .unwrap_or_else(|| panic!("permission {name} not seeded"))
}

async fn admin_role_id(app: &TestApp, token: &str) -> i64 {
    let body = envelope(app.get("/admin/roles", token).await).await;
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == ADMIN_ROLE)
        .and_then(|r| r["id"].as_i64())
        .unwrap()
}

fn names(list: &Value) -> Vec<&str> {
    list.as_array()
        .unwrap()
        .iter()
        .filter_map(|item| item["name"].as_str())
        .collect()
}

// ============================================================================
// Role gate
// ============================================================================

#[tokio::test]
#[serial]
async fn role_gate_runs_after_authentication() {
    let app = TestApp::spawn().await;

    let response = app.get_public("/admin/roles").await;
    assert_status!(response, 401);

    let response = app.get("/admin/roles", "1|not-a-real-secret").await;
    assert_status!(response, 401);
}

#[tokio::test]
#[serial]
async fn role_gate_rejects_user_without_role() {
    let app = TestApp::spawn().await;
    let user = app.create_user().await;

    let response = app.get("/admin/roles", &user.token).await;
    assert_status!(response, 403);

    let body = envelope(response).await;
    assert_eq!(body["message"], "Insufficient role");
}

#[tokio::test]
#[serial]
async fn role_gate_admits_user_with_role() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;

    let response = app.get("/admin/roles", &admin.token).await;
    assert_status!(response, 200);

    let body = envelope(response).await;
    assert_eq!(names(&body["data"]), vec!["admin", "user"]);
}

#[tokio::test]
#[serial]
async fn role_gate_sees_role_granted_after_token_issue() {
    let app = TestApp::spawn().await;
    let user = app.create_user().await;
    assert_status!(app.get("/admin/roles", &user.token).await, 403);

    app.state
        .registry
        .assign_role_to_user(user.id, ADMIN_ROLE)
        .await
        .unwrap();

    assert_status!(app.get("/admin/roles", &user.token).await, 200);
}

// ============================================================================
// Permission gate
// ============================================================================

#[tokio::test]
#[serial]
async fn permission_gate_accepts_direct_grant() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let role_id = admin_role_id(&app, &admin.token).await;
    let view = permission_id(&app, &admin.token, USERS_VIEW).await;
    let manage = permission_id(&app, &admin.token, USERS_MANAGE).await;

    for permission in [view, manage] {
        let path = format!("/admin/roles/{role_id}/permissions/{permission}");
        assert_status!(app.delete(&path, &admin.token).await, 200);
    }

    let response = app.get("/admin/users", &admin.token).await;
    assert_status!(response, 403);
    let body = envelope(response).await;
    assert_eq!(body["message"], "Insufficient permissions");

    app.state
        .registry
        .assign_direct_permission_to_user(admin.id, view)
        .await
        .unwrap();

    assert_status!(app.get("/admin/users", &admin.token).await, 200);

    let response = app
        .post(
            &format!("/admin/users/{}/roles", admin.id),
            &admin.token,
            json!({ "role": "user" }),
        )
        .await;
    assert_status!(response, 403);
}

#[tokio::test]
#[serial]
async fn permission_gate_honours_token_abilities() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let user = app
        .state
        .store
        .find_user(admin.id)
        .await
        .unwrap()
        .unwrap();

    let abilities = vec![USERS_VIEW.to_string()];
    let issued = app
        .state
        .tokens
        .issue(&user, "read-only", Some(&abilities))
        .await
        .unwrap();

    assert_status!(app.get("/admin/users", &issued.bearer).await, 200);

    let response = app
        .post(
            &format!("/admin/users/{}/roles", admin.id),
            &issued.bearer,
            json!({ "role": "user" }),
        )
        .await;
    assert_status!(response, 403);

    let response = app
        .post(
            &format!("/admin/users/{}/roles", admin.id),
            &admin.token,
            json!({ "role": "user" }),
        )
        .await;
    assert_status!(response, 200);
}

#[tokio::test]
#[serial]
async fn list_users_is_paginated() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    for _ in 0..3 {
        app.create_user().await;
    }

    let response = app.get("/admin/users?page=2&per_page=3", &admin.token).await;
    assert_status!(response, 200);

    let body = envelope(response).await;
    let page = &body["data"];
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["pagination"]["total"], 4);
    assert_eq!(page["pagination"]["current_page"], 2);
    assert_eq!(page["pagination"]["last_page"], 2);
    assert!(page["items"][0]["roles"].is_array());
}

// ============================================================================
// User administration
// ============================================================================

#[tokio::test]
#[serial]
async fn admin_creates_user_with_default_role() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;

    let response = app
        .post(
            "/admin/users",
            &admin.token,
            json!({ "name": "shiroinu", "email": "Shiroinu@Gmail.com", "password": "secret123" }),
        )
        .await;
    assert_status!(response, 201);

    let body = envelope(response).await;
    assert_eq!(body["data"]["email"], "shiroinu@gmail.com");
    assert_eq!(body["data"]["roles"], json!(["user"]));
    assert!(body["data"].get("password").is_none());

    assert_status!(app.login("shiroinu@gmail.com", "secret123").await, 200);

    let response = app
        .post(
            "/admin/users",
            &admin.token,
            json!({ "name": "again", "email": "shiroinu@gmail.com", "password": "secret123" }),
        )
        .await;
    assert_status!(response, 422);
    let body = envelope(response).await;
    assert_eq!(body["message"], "The email has already been taken.");

    let response = app
        .post(
            "/admin/users",
            &admin.token,
            json!({ "name": "short", "email": "short@example.com", "password": "abc" }),
        )
        .await;
    assert_status!(response, 422);
}

#[tokio::test]
#[serial]
async fn admin_reads_user_with_effective_permissions() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let user = app.create_user().await;

    let response = app.get(&format!("/admin/users/{}", user.id), &admin.token).await;
    assert_status!(response, 200);
    let body = envelope(response).await;
    assert_eq!(body["data"]["id"], user.id);
    assert_eq!(body["data"]["roles"], json!(["user"]));
    assert_eq!(body["data"]["permissions"], json!([]));

    let body = envelope(app.get(&format!("/admin/users/{}", admin.id), &admin.token).await).await;
    assert_eq!(
        body["data"]["permissions"],
        json!(["roles.manage", "users.manage", "users.view"])
    );

    assert_status!(app.get("/admin/users/9999", &admin.token).await, 404);
}

#[tokio::test]
#[serial]
async fn admin_updates_user_and_checks_email() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let user = app.create_user().await;
    let other = app.create_user().await;
    let path = format!("/admin/users/{}", user.id);

    let response = app
        .put(&path, &admin.token, json!({ "email": other.email }))
        .await;
    assert_status!(response, 422);
    let body = envelope(response).await;
    assert_eq!(body["message"], "The email has already been taken.");

    let response = app
        .put(
            &path,
            &admin.token,
            json!({ "name": "renamed", "email": user.email.to_uppercase() }),
        )
        .await;
    assert_status!(response, 200);
    let body = envelope(response).await;
    assert_eq!(body["data"]["name"], "renamed");
    assert_eq!(body["data"]["email"], user.email.as_str());

    assert_status!(
        app.put("/admin/users/9999", &admin.token, json!({ "name": "x" })).await,
        404
    );
}

#[tokio::test]
#[serial]
async fn admin_password_reset_revokes_tokens() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let user = app.create_user().await;

    let response = app
        .put(
            &format!("/admin/users/{}", user.id),
            &admin.token,
            json!({ "password": "reset-secret-789" }),
        )
        .await;
    assert_status!(response, 200);

    assert_status!(app.get("/auth/me", &user.token).await, 401);
    assert_status!(app.login(&user.email, &user.password).await, 422);
    assert_status!(app.login(&user.email, "reset-secret-789").await, 200);
}

#[tokio::test]
#[serial]
async fn admin_deletes_user_and_revokes_tokens() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let user = app.create_user().await;
    let path = format!("/admin/users/{}", user.id);

    assert_status!(app.delete(&path, &admin.token).await, 200);

    assert_status!(app.get("/auth/me", &user.token).await, 401);
    assert_status!(app.login(&user.email, &user.password).await, 422);
    assert_status!(app.get(&path, &admin.token).await, 404);
    assert_status!(app.delete(&path, &admin.token).await, 404);
}

#[tokio::test]
#[serial]
async fn user_administration_is_gated_per_method() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let user = app.create_user().await;
    let role_id = admin_role_id(&app, &admin.token).await;
    let manage = permission_id(&app, &admin.token, USERS_MANAGE).await;

    let path = format!("/admin/roles/{role_id}/permissions/{manage}");
    assert_status!(app.delete(&path, &admin.token).await, 200);

    let detail = format!("/admin/users/{}", user.id);
    assert_status!(app.get("/admin/users", &admin.token).await, 200);
    assert_status!(app.get(&detail, &admin.token).await, 200);

    let response = app
        .post(
            "/admin/users",
            &admin.token,
            json!({ "name": "nope", "email": "nope@example.com", "password": "secret123" }),
        )
        .await;
    assert_status!(response, 403);
    assert_status!(app.put(&detail, &admin.token, json!({ "name": "x" })).await, 403);
    assert_status!(app.delete(&detail, &admin.token).await, 403);

    assert_status!(app.get(&detail, &user.token).await, 403);
}

// ============================================================================
// Role and permission management
// ============================================================================

#[tokio::test]
#[serial]
async fn create_role_and_reject_duplicates() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;

    let response = app
        .post("/admin/roles", &admin.token, json!({ "name": "editor" }))
        .await;
    assert_status!(response, 201);
    let body = envelope(response).await;
    assert_eq!(body["data"]["name"], "editor");
    assert_eq!(body["data"]["guard_name"], "api");

    let response = app
        .post("/admin/roles", &admin.token, json!({ "name": "editor" }))
        .await;
    assert_status!(response, 409);

    let response = app
        .post(
            "/admin/roles",
            &admin.token,
            json!({ "name": "editor", "guard": "web" }),
        )
        .await;
    assert_status!(response, 201);

    let response = app
        .post("/admin/roles", &admin.token, json!({ "name": "   " }))
        .await;
    assert_status!(response, 422);
    let body = envelope(response).await;
    assert_eq!(body["message"], "The name field is required.");
}

#[tokio::test]
#[serial]
async fn roles_are_listed_per_guard() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;

    app.post(
        "/admin/roles",
        &admin.token,
        json!({ "name": "web-editor", "guard": "web" }),
    )
    .await;

    let body = envelope(app.get("/admin/roles?guard=web", &admin.token).await).await;
    assert_eq!(names(&body["data"]), vec!["web-editor"]);

    let body = envelope(app.get("/admin/roles", &admin.token).await).await;
    assert!(!names(&body["data"]).contains(&"web-editor"));
}

#[tokio::test]
#[serial]
async fn role_permission_assignment_round() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;

    let body = envelope(
        app.post("/admin/roles", &admin.token, json!({ "name": "editor" }))
            .await,
    )
    .await;
    let role_id = body["data"]["id"].as_i64().unwrap();

    let body = envelope(
        app.post(
            "/admin/permissions",
            &admin.token,
            json!({ "name": "posts.edit" }),
        )
        .await,
    )
    .await;
    let permission_id = body["data"]["id"].as_i64().unwrap();

    let path = format!("/admin/roles/{role_id}/permissions");
    let response = app
        .post(&path, &admin.token, json!({ "permission_id": permission_id }))
        .await;
    assert_status!(response, 200);

    let body = envelope(app.get(&path, &admin.token).await).await;
    assert_eq!(body["data"]["role"]["name"], "editor");
    assert_eq!(names(&body["data"]["permissions"]), vec!["posts.edit"]);

    let remove = format!("{path}/{permission_id}");
    assert_status!(app.delete(&remove, &admin.token).await, 200);
    assert_status!(app.delete(&remove, &admin.token).await, 404);
}

#[tokio::test]
#[serial]
async fn cross_guard_assignment_is_rejected() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let role_id = admin_role_id(&app, &admin.token).await;

    let body = envelope(
        app.post(
            "/admin/permissions",
            &admin.token,
            json!({ "name": "posts.edit", "guard": "web" }),
        )
        .await,
    )
    .await;
    let permission_id = body["data"]["id"].as_i64().unwrap();

    let response = app
        .post(
            &format!("/admin/roles/{role_id}/permissions"),
            &admin.token,
            json!({ "permission_id": permission_id }),
        )
        .await;
    assert_status!(response, 422);
}

#[tokio::test]
#[serial]
async fn deleting_unknown_role_or_permission_is_404() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;

    assert_status!(app.delete("/admin/roles/9999", &admin.token).await, 404);
    assert_status!(app.delete("/admin/permissions/9999", &admin.token).await, 404);
}

// ============================================================================
// User assignments
// ============================================================================

#[tokio::test]
#[serial]
async fn assign_sync_and_revoke_user_roles() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let user = app.create_user().await;
    app.post("/admin/roles", &admin.token, json!({ "name": "editor" }))
        .await;

    let roles = format!("/admin/users/{}/roles", user.id);

    let response = app.post(&roles, &admin.token, json!({ "role": "editor" })).await;
    assert_status!(response, 200);
    let body = envelope(app.get("/auth/me", &user.token).await).await;
    assert_eq!(body["data"]["roles"], json!(["editor", "user"]));

    let response = app
        .put(&roles, &admin.token, json!({ "roles": ["editor"] }))
        .await;
    assert_status!(response, 200);
    let body = envelope(app.get("/auth/me", &user.token).await).await;
    assert_eq!(body["data"]["roles"], json!(["editor"]));

    let response = app
        .put(&roles, &admin.token, json!({ "roles": ["editor", "ghost"] }))
        .await;
    assert_status!(response, 404);
    let body = envelope(app.get("/auth/me", &user.token).await).await;
    assert_eq!(body["data"]["roles"], json!(["editor"]));

    assert_status!(app.delete(&format!("{roles}/editor"), &admin.token).await, 200);
    assert_status!(app.delete(&format!("{roles}/editor"), &admin.token).await, 404);
}

#[tokio::test]
#[serial]
async fn assigning_to_unknown_user_is_404() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;

    let response = app
        .post("/admin/users/9999/roles", &admin.token, json!({ "role": "user" }))
        .await;

    assert_status!(response, 404);
}

#[tokio::test]
#[serial]
async fn direct_permission_grant_and_revoke() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let user = app.create_user().await;
    let view = permission_id(&app, &admin.token, USERS_VIEW).await;

    let path = format!("/admin/users/{}/permissions", user.id);
    let response = app
        .post(&path, &admin.token, json!({ "permission_id": view }))
        .await;
    assert_status!(response, 200);

    let body = envelope(app.get("/auth/me", &user.token).await).await;
    assert_eq!(body["data"]["permissions"], json!([USERS_VIEW]));

    let revoke = format!("{path}/{view}");
    assert_status!(app.delete(&revoke, &admin.token).await, 200);
    assert_status!(app.delete(&revoke, &admin.token).await, 404);

    let body = envelope(app.get("/auth/me", &user.token).await).await;
    assert_eq!(body["data"]["permissions"], json!([]));
}

#[tokio::test]
#[serial]
async fn sync_direct_permissions_replaces_set() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let user = app.create_user().await;
    let view = permission_id(&app, &admin.token, USERS_VIEW).await;
    let manage = permission_id(&app, &admin.token, USERS_MANAGE).await;
    let path = format!("/admin/users/{}/permissions", user.id);

    app.post(&path, &admin.token, json!({ "permission_id": view }))
        .await;

    let response = app
        .put(&path, &admin.token, json!({ "permission_ids": [manage] }))
        .await;
    assert_status!(response, 200);
    let body = envelope(response).await;
    assert_eq!(names(&body["data"]), vec![USERS_MANAGE]);

    let body = envelope(app.get("/auth/me", &user.token).await).await;
    assert_eq!(body["data"]["permissions"], json!([USERS_MANAGE]));

    let response = app
        .put(&path, &admin.token, json!({ "permission_ids": [view, 9999] }))
        .await;
    assert_status!(response, 404);
    let body = envelope(app.get("/auth/me", &user.token).await).await;
    assert_eq!(body["data"]["permissions"], json!([USERS_MANAGE]));

    let response = app
        .put(&path, &admin.token, json!({ "permission_ids": [] }))
        .await;
    assert_status!(response, 200);
    let body = envelope(app.get("/auth/me", &user.token).await).await;
    assert_eq!(body["data"]["permissions"], json!([]));
}

// ============================================================================
// Permission check
// ============================================================================

#[tokio::test]
#[serial]
async fn check_reports_per_permission_results() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;
    let user = app.create_user().await;
    let view = permission_id(&app, &admin.token, USERS_VIEW).await;
    app.state
        .registry
        .assign_direct_permission_to_user(user.id, view)
        .await
        .unwrap();

    let path = format!("/admin/users/{}/permissions/check", user.id);

    let body = envelope(
        app.post(
            &path,
            &admin.token,
            json!({ "permissions": [USERS_VIEW, USERS_MANAGE] }),
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["granted"], true);
    assert_eq!(body["data"]["results"][USERS_VIEW], true);
    assert_eq!(body["data"]["results"][USERS_MANAGE], false);

    let body = envelope(
        app.post(
            &path,
            &admin.token,
            json!({ "permissions": [USERS_VIEW, USERS_MANAGE], "mode": "all" }),
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["granted"], false);
}

#[tokio::test]
#[serial]
async fn check_unknown_user_is_404_and_empty_list_is_422() {
    let app = TestApp::spawn().await;
    let admin = app.create_admin().await;

    let response = app
        .post(
            "/admin/users/9999/permissions/check",
            &admin.token,
            json!({ "permissions": [USERS_VIEW] }),
        )
        .await;
    assert_status!(response, 404);

    let response = app
        .post(
            &format!("/admin/users/{}/permissions/check", admin.id),
            &admin.token,
            json!({ "permissions": [] }),
        )
        .await;
    assert_status!(response, 422);
}
