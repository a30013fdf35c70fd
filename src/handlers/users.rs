//! User administration and role/permission assignment handlers.

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::{ApiError, ApiResponse, ApiResult, ErrorBody},
    handlers::{
        auth::{hash_password, UserProfile, EMAIL_TAKEN},
        ValidJson,
    },
    models::{NewUser, Permission, Role, User},
    pagination::{PaginatedResponse, PaginationParams},
    rbac::load_grants,
    store::StoreError,
    AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct UserWithRoles {
    #[serde(flatten)]
    pub user: UserProfile,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: UserProfile,
    #[schema(example = json!(["editor"]))]
    pub roles: Vec<String>,
    /// Effective permissions, role-derived and direct.
    #[schema(example = json!(["posts.edit"]))]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 255, message = "The name field is required."))]
    #[schema(example = "shiroinu")]
    pub name: String,
    #[validate(email(message = "The email must be a valid email address."))]
    #[schema(example = "shiroinu@gmail.com")]
    pub email: String,
    #[schema(example = "secret123")]
    pub password: String,
}

/// Absent fields keep their current value.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 255, message = "The name field is required."))]
    pub name: Option<String>,
    #[validate(email(message = "The email must be a valid email address."))]
    pub email: Option<String>,
    /// Setting a password revokes every token of the user.
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SyncPermissionsRequest {
    #[schema(example = json!([3, 4]))]
    pub permission_ids: Vec<i64>,
}

async fn find_user(state: &AppState, user_id: i64) -> Result<User, ApiError> {
    state
        .store
        .find_user(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

async fn user_detail(state: &AppState, user: &User) -> Result<UserDetail, ApiError> {
    let grants = load_grants(state.store.as_ref(), user.id, state.authorizer.guard()).await?;
    Ok(UserDetail {
        user: UserProfile::from(user),
        roles: grants.role_names(),
        permissions: grants.permission_names(),
    })
}

fn email_taken(err: StoreError) -> ApiError {
    match err {
        StoreError::Conflict(_) => ApiError::unprocessable(EMAIL_TAKEN),
        other => other.into(),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AssignRoleRequest {
    #[validate(length(min = 1, message = "The role field is required."))]
    #[schema(example = "editor")]
    pub role: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SyncRolesRequest {
    #[schema(example = json!(["editor", "user"]))]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct GrantPermissionRequest {
    #[schema(example = 3)]
    pub permission_id: i64,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    tag = "Users",
    params(PaginationParams),
    responses(
        (status = 200, description = "One page of users with their roles", body = PaginatedResponse<UserWithRoles>),
        (status = 403, description = "Missing users.view or users.manage", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<UserWithRoles>> {
    let (limit, offset) = pagination.limit_offset();
    let (users, total) = state.store.list_users(limit, offset).await?;
    let guard = state.authorizer.guard();

    let mut data = Vec::with_capacity(users.len());
    for user in &users {
        let grants = load_grants(state.store.as_ref(), user.id, guard).await?;
        data.push(UserWithRoles {
            user: UserProfile::from(user),
            roles: grants.role_names(),
        });
    }

    Ok(ApiResponse::ok(
        "Users retrieved",
        PaginatedResponse::from_params(data, &pagination, total),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users/{user_id}",
    tag = "Users",
    params(("user_id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User with roles and effective permissions", body = UserDetail),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<UserDetail> {
    let user = find_user(&state, user_id).await?;
    Ok(ApiResponse::ok("User retrieved", user_detail(&state, &user).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users",
    tag = "Users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created with the default role", body = UserDetail),
        (status = 422, description = "Validation error or email taken", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<CreateUserRequest>,
) -> ApiResult<UserDetail> {
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
        .map_err(email_taken)?;

    let default_role = &state.config.auth.default_role;
    if let Err(e) = state.registry.assign_role_to_user(user.id, default_role).await {
        warn!(user_id = user.id, role = %default_role, error = %e, "Default role not assigned");
    }

    info!(user_id = user.id, email = %user.email, "User created by administrator");
    Ok(ApiResponse::created("User created", user_detail(&state, &user).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{user_id}",
    tag = "Users",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = UserDetail),
        (status = 404, description = "User not found", body = ErrorBody),
        (status = 422, description = "Validation error or email taken", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    ValidJson(payload): ValidJson<UpdateUserRequest>,
) -> ApiResult<UserDetail> {
    let user = find_user(&state, user_id).await?;

    if let Some(password) = &payload.password {
        state
            .password_policy
            .validate(password)
            .map_err(|violation| ApiError::unprocessable(violation.to_string()))?;
    }

    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .unwrap_or(&user.name)
        .to_string();
    let email = payload
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .unwrap_or_else(|| user.email.clone());

    if email != user.email && state.store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::unprocessable(EMAIL_TAKEN));
    }

    let updated = state
        .store
        .update_user(user_id, &name, &email)
        .await
        .map_err(email_taken)?;

    if let Some(password) = payload.password {
        let password_hash = hash_password(state.hasher, password).await?;
        state.store.update_password(user_id, &password_hash).await?;

        let revoked = state.tokens.revoke_all(user_id, None).await?;
        info!(user_id, revoked, "Password reset by administrator");
    }

    info!(user_id, "User updated");
    Ok(ApiResponse::ok("User updated", user_detail(&state, &updated).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/users/{user_id}",
    tag = "Users",
    params(("user_id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User soft-deleted and every token revoked"),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<()> {
    find_user(&state, user_id).await?;

    state.tokens.revoke_all(user_id, None).await?;
    state.store.soft_delete_user(user_id).await?;

    info!(user_id, "User deleted by administrator");
    Ok(ApiResponse::message("User deleted"))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{user_id}/roles",
    tag = "Users",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Role assigned", body = Role),
        (status = 404, description = "User or role not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn assign_role(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    ValidJson(payload): ValidJson<AssignRoleRequest>,
) -> ApiResult<Role> {
    let role = state
        .registry
        .assign_role_to_user(user_id, payload.role.trim())
        .await?;
    Ok(ApiResponse::ok("Role assigned", role))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{user_id}/roles",
    tag = "Users",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = SyncRolesRequest,
    responses(
        (status = 200, description = "Role set replaced", body = Vec<Role>),
        (status = 404, description = "User or a role not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn sync_roles(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    ValidJson(payload): ValidJson<SyncRolesRequest>,
) -> ApiResult<Vec<Role>> {
    let roles = state.registry.sync_roles(user_id, &payload.roles).await?;
    Ok(ApiResponse::ok("Roles synced", roles))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/users/{user_id}/roles/{role}",
    tag = "Users",
    params(
        ("user_id" = i64, Path, description = "User ID"),
        ("role" = String, Path, description = "Role name")
    ),
    responses(
        (status = 200, description = "Role revoked"),
        (status = 404, description = "User or role not found, or role not held", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn revoke_role(
    State(state): State<AppState>,
    Path((user_id, role)): Path<(i64, String)>,
) -> ApiResult<()> {
    if !state.registry.revoke_role_from_user(user_id, &role).await? {
        return Err(ApiError::not_found("User does not have this role"));
    }
    Ok(ApiResponse::message("Role revoked"))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{user_id}/permissions",
    tag = "Users",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = GrantPermissionRequest,
    responses(
        (status = 200, description = "Direct permission granted", body = Permission),
        (status = 404, description = "User or permission not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn grant_permission(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    ValidJson(payload): ValidJson<GrantPermissionRequest>,
) -> ApiResult<Permission> {
    let permission = state
        .registry
        .assign_direct_permission_to_user(user_id, payload.permission_id)
        .await?;
    Ok(ApiResponse::ok("Permission granted", permission))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{user_id}/permissions",
    tag = "Users",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = SyncPermissionsRequest,
    responses(
        (status = 200, description = "Direct permission set replaced", body = Vec<Permission>),
        (status = 404, description = "User or a permission not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn sync_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    ValidJson(payload): ValidJson<SyncPermissionsRequest>,
) -> ApiResult<Vec<Permission>> {
    let permissions = state
        .registry
        .sync_direct_permissions(user_id, &payload.permission_ids)
        .await?;
    Ok(ApiResponse::ok("Permissions synced", permissions))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/users/{user_id}/permissions/{permission_id}",
    tag = "Users",
    params(
        ("user_id" = i64, Path, description = "User ID"),
        ("permission_id" = i64, Path, description = "Permission ID")
    ),
    responses(
        (status = 200, description = "Direct permission revoked"),
        (status = 404, description = "User not found or permission not granted directly", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn revoke_permission(
    State(state): State<AppState>,
    Path((user_id, permission_id)): Path<(i64, i64)>,
) -> ApiResult<()> {
    if !state
        .registry
        .revoke_direct_permission_from_user(user_id, permission_id)
        .await?
    {
        return Err(ApiError::not_found(
            "Permission is not granted directly to this user",
        ));
    }
    Ok(ApiResponse::message("Permission revoked"))
}
