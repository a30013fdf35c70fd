//! Warden - opaque bearer tokens with guard-scoped roles and permissions.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod openapi;
pub mod pagination;
pub mod rbac;
pub mod schema;
pub mod store;
pub mod telemetry;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;

use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use auth::{PasswordHasher, PasswordPolicy, TokenService};
use error::ApiError;
use middleware::{
    auth_rate_limit_middleware, authenticate, metrics_middleware, rate_limit_middleware,
    request_context_middleware, require_permission, require_role, PermissionGate,
    RateLimitState, RoleGate,
};
use rbac::{
    seed::{ADMIN_ROLE, USERS_MANAGE, USERS_VIEW},
    Authorizer, PermissionCache, RoleRegistry,
};
use store::CredentialStore;
use telemetry::MetricsState;

pub use config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn CredentialStore>,
    pub hasher: PasswordHasher,
    pub password_policy: PasswordPolicy,
    pub tokens: TokenService,
    pub registry: RoleRegistry,
    pub authorizer: Authorizer,
    pub rate_limit: RateLimitState,
    pub metrics: MetricsState,
}

impl AppState {
    pub fn new(store: Arc<dyn CredentialStore>, config: &Config) -> Self {
        let guard = config.auth.default_guard.as_str();

        let password_policy = if config.security.require_password_complexity {
            PasswordPolicy::complex(config.security.min_password_length)
        } else {
            PasswordPolicy::basic(config.security.min_password_length)
        };

        let tokens = TokenService::new(
            store.clone(),
            chrono::Duration::hours(config.auth.token_ttl_hours),
            guard,
        );
        let cache = PermissionCache::new(Duration::from_secs(config.auth.permission_cache_ttl_secs));

        Self {
            config: Arc::new(config.clone()),
            hasher: PasswordHasher::new(),
            password_policy,
            tokens,
            registry: RoleRegistry::new(store.clone(), guard),
            authorizer: Authorizer::new(store.clone(), cache, guard),
            rate_limit: RateLimitState::from_security(&config.security),
            metrics: MetricsState::new(config.telemetry.metrics_enabled),
            store,
        }
    }

    /// Swaps the password hasher, e.g. for a cheaper cost in test suites.
    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }
}

/// Public `/api/v1` routes: probes and credential exchange.
fn public_routes() -> Router<AppState> {
    let credentials = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/register", post(handlers::auth::register))
        .layer(axum_middleware::from_fn(auth_rate_limit_middleware));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/ready", get(handlers::health::ready))
        .route("/health/live", get(handlers::health::live))
        .merge(credentials)
}

/// Routes for the bearer of a valid token.
fn account_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/logout-all", post(handlers::auth::logout_all))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/password", put(handlers::auth::change_password))
        .route("/auth/account", delete(handlers::auth::delete_account))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), authenticate))
}

/// Administration routes. Every request passes authenticate, then the `admin` role gate,
/// then the route's own permission gate, if any.
fn admin_routes(state: &AppState) -> Router<AppState> {
    let view_users = Router::new()
        .route("/admin/users", get(handlers::users::list_users))
        .route("/admin/users/{user_id}", get(handlers::users::get_user))
        .route_layer(axum_middleware::from_fn_with_state(
            PermissionGate::any_of([USERS_VIEW, USERS_MANAGE]),
            require_permission,
        ));

    // Shares paths with `view_users`; merging joins the method routers, each keeping its gate.
    let manage_users = Router::new()
        .route("/admin/users", post(handlers::users::create_user))
        .route(
            "/admin/users/{user_id}",
            put(handlers::users::update_user).delete(handlers::users::delete_user),
        )
        .route(
            "/admin/users/{user_id}/roles",
            post(handlers::users::assign_role).put(handlers::users::sync_roles),
        )
        .route(
            "/admin/users/{user_id}/roles/{role}",
            delete(handlers::users::revoke_role),
        )
        .route(
            "/admin/users/{user_id}/permissions",
            post(handlers::users::grant_permission).put(handlers::users::sync_permissions),
        )
        .route(
            "/admin/users/{user_id}/permissions/{permission_id}",
            delete(handlers::users::revoke_permission),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            PermissionGate::all_of([USERS_MANAGE]),
            require_permission,
        ));

    Router::new()
        .route(
            "/admin/roles",
            get(handlers::roles::list_roles).post(handlers::roles::create_role),
        )
        .route("/admin/roles/{role_id}", delete(handlers::roles::delete_role))
        .route(
            "/admin/roles/{role_id}/permissions",
            get(handlers::roles::list_role_permissions)
                .post(handlers::roles::assign_permission_to_role),
        )
        .route(
            "/admin/roles/{role_id}/permissions/{permission_id}",
            delete(handlers::roles::remove_permission_from_role),
        )
        .route(
            "/admin/permissions",
            get(handlers::permissions::list_permissions)
                .post(handlers::permissions::create_permission),
        )
        .route(
            "/admin/permissions/{permission_id}",
            delete(handlers::permissions::delete_permission),
        )
        .route(
            "/admin/users/{user_id}/permissions/check",
            post(handlers::permissions::check_user_permissions),
        )
        .merge(view_users)
        .merge(manage_users)
        .route_layer(axum_middleware::from_fn_with_state(
            RoleGate::any_of([ADMIN_ROLE]),
            require_role,
        ))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), authenticate))
}

pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();
    let cors = build_cors_layer(&config);
    let body_limit = RequestBodyLimitLayer::new(config.server.max_body_size);

    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let rate_limit_state = state.rate_limit.clone();
    let metrics_state = state.metrics.clone();

    let api = Router::new()
        .merge(public_routes())
        .merge(account_routes(&state))
        .merge(admin_routes(&state))
        .with_state(state.clone());

    let root = Router::new()
        .route("/", get(handlers::health::service_info))
        .with_state(state);

    Router::new()
        .merge(root)
        .nest("/api/v1", api)
        .route(
            "/metrics",
            get(telemetry::metrics::metrics_handler).with_state(metrics_state),
        )
        .merge(openapi::swagger_router())
        .fallback(fallback_handler)
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(axum_middleware::from_fn(rate_limit_middleware))
        .layer(axum::Extension(rate_limit_state))
        .layer(axum_middleware::from_fn(request_context_middleware))
        .layer(trace_layer)
        .layer(timeout)
        .layer(body_limit)
        .layer(cors)
}

async fn fallback_handler() -> ApiError {
    ApiError::not_found("Not found")
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    use axum::http::{header::HeaderName, HeaderValue, Method};

    let is_wildcard_origin = config.cors.allowed_origins.iter().any(|o| o == "*")
        || config.cors.allowed_origins.is_empty();

    let methods: Vec<Method> = config
        .cors
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();

    let headers: Vec<HeaderName> = config
        .cors
        .allowed_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();

    let origins = || -> Vec<HeaderValue> {
        config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect()
    };

    let cors = match (config.cors.allow_credentials, is_wildcard_origin) {
        // A literal `*` is invalid alongside credentials; echo the caller's origin instead.
        (true, true) => CorsLayer::new()
            .allow_origin(tower_http::cors::AllowOrigin::mirror_request())
            .allow_credentials(true),
        (true, false) => CorsLayer::new()
            .allow_origin(origins())
            .allow_credentials(true),
        (false, true) => CorsLayer::new().allow_origin(Any),
        (false, false) => CorsLayer::new().allow_origin(origins()),
    };

    cors.allow_methods(methods)
        .allow_headers(headers)
        .max_age(Duration::from_secs(config.cors.max_age_secs))
}
