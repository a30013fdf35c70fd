//! Shared setup for the HTTP integration tests.
//!
//! Every [`TestApp`] runs the full router on an ephemeral port, backed by its own
//! in-memory store seeded with the default roles and permissions.

#![allow(dead_code)]

use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

use warden::{
    auth::PasswordHasher,
    create_router,
    rbac::seed::{seed_defaults, ADMIN_ROLE},
    store::MemoryStore,
    AppState, Config,
};

pub const PASSWORD: &str = "secret123";

/// A running application with its own HTTP client and store.
pub struct TestApp {
    pub client: Client,
    pub base_url: String,
    pub state: AppState,
}

/// A registered user and the bearer token issued at registration.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password: String,
    pub token: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(Config::default_for_testing()).await
    }

    pub async fn spawn_with(config: Config) -> Self {
        let state = AppState::new(Arc::new(MemoryStore::new()), &config)
            .with_hasher(PasswordHasher::for_testing());

        seed_defaults(&state.registry, &config.auth.default_role)
            .await
            .expect("Failed to seed default roles");

        let app = create_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            client: Client::new(),
            base_url: format!("http://127.0.0.1:{}/api/v1", port),
            state,
        }
    }

    /// Base URL without the `/api/v1` prefix.
    pub fn root_url(&self) -> String {
        self.base_url.trim_end_matches("/api/v1").to_string()
    }

    pub fn unique_name() -> String {
        format!("user_{}", Uuid::new_v4().simple())
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> reqwest::Response {
        self.post_public(
            "/auth/register",
            json!({
                "name": name,
                "email": email,
                "password": password,
                "password_confirmation": password
            }),
        )
        .await
    }

    /// Registers a fresh user and returns its credentials.
    pub async fn create_user(&self) -> TestUser {
        let name = Self::unique_name();
        let email = format!("{}@example.com", name);

        let response = self.register(&name, &email, PASSWORD).await;
        assert_eq!(response.status().as_u16(), 201, "registration failed");
        let body: Value = response.json().await.unwrap();

        TestUser {
            id: body["data"]["user"]["id"].as_i64().unwrap(),
            name,
            email,
            password: PASSWORD.to_string(),
            token: body["data"]["token"].as_str().unwrap().to_string(),
        }
    }

    /// Registers a fresh user holding the seeded `admin` role.
    pub async fn create_admin(&self) -> TestUser {
        let user = self.create_user().await;
        self.state
            .registry
            .assign_role_to_user(user.id, ADMIN_ROLE)
            .await
            .expect("Failed to assign admin role");
        user
    }

    pub async fn login(&self, identifier: &str, password: &str) -> reqwest::Response {
        let field = if identifier.contains('@') {
            "email"
        } else {
            "username"
        };
        let mut body = json!({ "password": password });
        body[field] = json!(identifier);
        self.post_public("/auth/login", body).await
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to send GET request")
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to send POST request")
    }

    pub async fn put(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .put(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to send PUT request")
    }

    pub async fn delete(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to send DELETE request")
    }

    pub async fn get_public(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Failed to send GET request")
    }

    pub async fn post_public(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("Failed to send POST request")
    }
}

/// Reads the response envelope, asserting its shape.
pub async fn envelope(response: reqwest::Response) -> Value {
    let code = response.status().as_u16();
    let body: Value = response.json().await.expect("Response is not JSON");

    assert_eq!(body["code"], code, "envelope code mismatch: {body}");
    let expected_status = if code < 400 { "success" } else { "error" };
    assert_eq!(body["status"], expected_status, "envelope status mismatch: {body}");
    if code >= 400 {
        assert!(body.get("data").is_none(), "error envelope carries data: {body}");
    }

    body
}

/// Flips the last character of a bearer string's secret.
pub fn tamper(bearer: &str) -> String {
    let mut tampered = bearer.to_string();
    let last = tampered.pop().unwrap();
    tampered.push(if last == 'a' { 'b' } else { 'a' });
    tampered
}

#[macro_export]
macro_rules! assert_status {
    ($response:expr, $expected:expr) => {
        assert_eq!(
            $response.status().as_u16(),
            $expected,
            "Expected status {}, got {}",
            $expected,
            $response.status()
        );
    };
}

#[macro_export]
macro_rules! assert_success {
    ($response:expr) => {
        assert!(
            $response.status().is_success(),
            "Expected success, got status {}",
            $response.status()
        );
    };
}
