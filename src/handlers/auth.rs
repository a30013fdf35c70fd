//! Authentication handlers.

use axum::extract::State;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    auth::{password::PasswordHasher, AuthContext, IssuedToken, TokenRef},
    error::{ApiError, ApiResponse, ApiResult, ErrorBody},
    handlers::ValidJson,
    models::{NewUser, User},
    store::StoreError,
    telemetry::{record_auth_attempt, AuthOutcome},
    AppState,
};

const INVALID_CREDENTIALS: &str = "Invalid credentials";
pub(crate) const EMAIL_TAKEN: &str = "The email has already been taken.";

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    /// Looked up by email when it contains `@`, otherwise by user name.
    #[schema(example = "kuroneko@gmail.com")]
    pub email: Option<String>,
    #[schema(example = "kuroneko")]
    pub username: Option<String>,
    #[validate(length(min = 1, message = "The password field is required."))]
    #[schema(example = "secret123")]
    pub password: String,
    #[validate(length(max = 255))]
    #[schema(example = "cli")]
    pub device_name: Option<String>,
}

impl LoginRequest {
    fn identifier(&self) -> Option<&str> {
        self.email
            .as_deref()
            .or(self.username.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 255, message = "The name field is required."))]
    #[schema(example = "kuroneko")]
    pub name: String,
    #[validate(email(message = "The email must be a valid email address."))]
    #[schema(example = "kuroneko@gmail.com")]
    pub email: String,
    #[schema(example = "secret123")]
    pub password: String,
    #[validate(must_match(other = "password", message = "The password confirmation does not match."))]
    #[schema(example = "secret123")]
    pub password_confirmation: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "The current password field is required."))]
    pub current_password: String,
    pub password: String,
    #[validate(must_match(other = "password", message = "The password confirmation does not match."))]
    pub password_confirmation: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionInfo {
    /// RFC 3339, UTC.
    #[schema(example = "2024-01-16T10:30:00+00:00")]
    pub expires_at: Option<String>,
    /// Token lifetime in hours.
    #[schema(example = 24)]
    pub expired_in: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    #[schema(example = "kuroneko")]
    pub name: String,
    #[schema(example = "kuroneko@gmail.com")]
    pub email: String,
    #[schema(example = "1|Xb3k9...")]
    pub token: String,
    /// First assigned role, empty when the user has none.
    #[schema(example = "admin")]
    pub role: String,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub token: String,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserProfile {
    #[schema(example = 1)]
    pub id: i64,
    #[schema(example = "kuroneko")]
    pub name: String,
    #[schema(example = "kuroneko@gmail.com")]
    pub email: String,
    pub email_verified_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            email_verified_at: user.email_verified_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user: UserProfile,
    pub token: String,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenSummary {
    pub id: i64,
    pub name: String,
    pub abilities: Vec<String>,
    pub last_used_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserProfile,
    #[schema(example = json!(["admin"]))]
    pub roles: Vec<String>,
    #[schema(example = json!(["users.manage", "users.view"]))]
    pub permissions: Vec<String>,
    pub token: TokenSummary,
}

fn session(state: &AppState, issued: &IssuedToken) -> SessionInfo {
    SessionInfo {
        expires_at: issued.token.expires_at.map(|at| at.and_utc().to_rfc3339()),
        expired_in: state.tokens.ttl().num_hours(),
    }
}

pub(crate) async fn hash_password(hasher: PasswordHasher, plaintext: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
        .await
        .map_err(ApiError::internal)?
        .map_err(Into::into)
}

async fn verify_password(
    hasher: PasswordHasher,
    plaintext: String,
    digest: String,
) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &digest))
        .await
        .map_err(ApiError::internal)?
        .map_err(Into::into)
}

fn reject_login(reason: &'static str) -> ApiError {
    warn!(reason, "Failed login attempt");
    record_auth_attempt("login", AuthOutcome::InvalidCredentials);
    ApiError::unprocessable(INVALID_CREDENTIALS)
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "Authentication",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 422, description = "Invalid credentials or validation error", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let identifier = payload
        .identifier()
        .ok_or_else(|| ApiError::unprocessable("The email or username field is required."))?;

    let user = if identifier.contains('@') {
        state
            .store
            .find_user_by_email(&identifier.to_lowercase())
            .await?
    } else {
        state.store.find_user_by_name(identifier).await?
    };

    let Some(user) = user else {
        return Err(reject_login("unknown user"));
    };

    let valid = verify_password(
        state.hasher,
        payload.password.clone(),
        user.password_hash.clone(),
    )
    .await?;
    if !valid {
        return Err(reject_login("wrong password"));
    }

    let token_name = payload
        .device_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(state.config.auth.default_token_name.as_str());

    let issued = state.tokens.issue(&user, token_name, None).await?;
    let grants = state.authorizer.load_grants(user.id).await?;

    record_auth_attempt("login", AuthOutcome::Success);
    info!(user_id = user.id, token_id = issued.token.id, "User logged in");

    Ok(ApiResponse::ok(
        "Login successful",
        LoginResponse {
            session: session(&state, &issued),
            name: user.name,
            email: user.email,
            token: issued.bearer,
            role: grants.primary_role().unwrap_or_default().to_string(),
        },
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "Authentication",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registration successful", body = RegisterResponse),
        (status = 422, description = "Validation error or email taken", body = ErrorBody)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<RegisterRequest>,
) -> ApiResult<RegisterResponse> {
    state
        .password_policy
        .validate(&payload.password)
        .map_err(|violation| ApiError::unprocessable(violation.to_string()))?;

    let email = payload.email.trim().to_lowercase();
    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::unprocessable(EMAIL_TAKEN));
    }

    let password_hash = hash_password(state.hasher, payload.password).await?;

    let user = state
        .store
        .create_user(NewUser {
            name: payload.name.trim().to_string(),
            email,
            password_hash,
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => ApiError::unprocessable(EMAIL_TAKEN),
            other => other.into(),
        })?;

    let default_role = &state.config.auth.default_role;
    if let Err(e) = state.registry.assign_role_to_user(user.id, default_role).await {
        warn!(user_id = user.id, role = %default_role, error = %e, "Default role not assigned");
    }

    let issued = state
        .tokens
        .issue(&user, &state.config.auth.default_token_name, None)
        .await?;

    record_auth_attempt("register", AuthOutcome::Success);
    info!(user_id = user.id, email = %user.email, "User registered");

    Ok(ApiResponse::created(
        "Registration successful",
        RegisterResponse {
            user: UserProfile::from(&user),
            session: session(&state, &issued),
            token: issued.bearer,
        },
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "Authentication",
    responses(
        (status = 200, description = "Current token revoked"),
        (status = 401, description = "Unauthenticated", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout(State(state): State<AppState>, ctx: AuthContext) -> ApiResult<()> {
    state.tokens.revoke(TokenRef::Id(ctx.token.id)).await?;
    info!(user_id = ctx.user.id, token_id = ctx.token.id, "User logged out");

    Ok(ApiResponse::message("Logged out successfully"))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout-all",
    tag = "Authentication",
    responses(
        (status = 200, description = "Every token of the user revoked"),
        (status = 401, description = "Unauthenticated", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_all(State(state): State<AppState>, ctx: AuthContext) -> ApiResult<()> {
    let revoked = state.tokens.revoke_all(ctx.user.id, None).await?;

    Ok(ApiResponse::message(format!(
        "Logged out from {revoked} session(s)"
    )))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "Authentication",
    responses(
        (status = 200, description = "Token replaced", body = RefreshResponse),
        (status = 401, description = "Unauthenticated", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn refresh(State(state): State<AppState>, ctx: AuthContext) -> ApiResult<RefreshResponse> {
    let issued = state.tokens.refresh(&ctx.token, &ctx.user).await?;

    Ok(ApiResponse::ok(
        "Token refreshed",
        RefreshResponse {
            session: session(&state, &issued),
            token: issued.bearer,
        },
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "Authentication",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Unauthenticated", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn me(ctx: AuthContext) -> ApiResult<MeResponse> {
    let token = TokenSummary {
        id: ctx.token.id,
        abilities: ctx.token.abilities(),
        name: ctx.token.name,
        last_used_at: ctx.token.last_used_at,
        expires_at: ctx.token.expires_at,
    };

    Ok(ApiResponse::ok(
        "Current user",
        MeResponse {
            user: UserProfile::from(&ctx.user),
            roles: ctx.grants.role_names(),
            permissions: ctx.grants.permission_names(),
            token,
        },
    ))
}

#[utoipa::path(
    put,
    path = "/api/v1/auth/password",
    tag = "Authentication",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed, other sessions revoked"),
        (status = 401, description = "Unauthenticated", body = ErrorBody),
        (status = 422, description = "Wrong current password or policy violation", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    ctx: AuthContext,
    ValidJson(payload): ValidJson<ChangePasswordRequest>,
) -> ApiResult<()> {
    let valid = verify_password(
        state.hasher,
        payload.current_password,
        ctx.user.password_hash.clone(),
    )
    .await?;
    if !valid {
        return Err(ApiError::unprocessable("The current password is incorrect."));
    }

    state
        .password_policy
        .validate(&payload.password)
        .map_err(|violation| ApiError::unprocessable(violation.to_string()))?;

    let password_hash = hash_password(state.hasher, payload.password).await?;
    state
        .store
        .update_password(ctx.user.id, &password_hash)
        .await?;

    let revoked = state
        .tokens
        .revoke_all(ctx.user.id, Some(ctx.token.id))
        .await?;
    info!(user_id = ctx.user.id, revoked, "Password changed");

    Ok(ApiResponse::message("Password changed successfully"))
}

#[utoipa::path(
    delete,
    path = "/api/v1/auth/account",
    tag = "Authentication",
    responses(
        (status = 200, description = "Account deleted"),
        (status = 401, description = "Unauthenticated", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_account(State(state): State<AppState>, ctx: AuthContext) -> ApiResult<()> {
    state.tokens.revoke_all(ctx.user.id, None).await?;
    state.store.soft_delete_user(ctx.user.id).await?;

    info!(user_id = ctx.user.id, "Account deleted");

    Ok(ApiResponse::message("Account deleted successfully"))
}
