//! Permission management and permission check handlers.

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::{ApiResponse, ApiResult, ErrorBody},
    handlers::{roles::GuardQuery, ValidJson},
    middleware::MatchMode,
    models::Permission,
    AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePermissionRequest {
    #[validate(length(max = 125, message = "The name may not be greater than 125 characters."))]
    #[schema(example = "posts.edit")]
    pub name: String,
    #[schema(example = "api")]
    pub guard: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckPermissionsRequest {
    #[validate(length(min = 1, message = "At least one permission is required."))]
    #[schema(example = json!(["users.view", "users.manage"]))]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub mode: MatchMode,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckPermissionsResponse {
    pub user_id: i64,
    /// Overall decision under the requested mode.
    pub granted: bool,
    /// Decision per requested permission.
    pub results: BTreeMap<String, bool>,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/permissions",
    tag = "Permissions",
    params(GuardQuery),
    responses(
        (status = 200, description = "Permissions in the guard", body = Vec<Permission>),
        (status = 403, description = "Insufficient role", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    Query(query): Query<GuardQuery>,
) -> ApiResult<Vec<Permission>> {
    let permissions = state
        .registry
        .list_permissions(query.guard.as_deref())
        .await?;
    Ok(ApiResponse::ok("Permissions retrieved", permissions))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/permissions",
    tag = "Permissions",
    request_body = CreatePermissionRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Permission already exists in the guard", body = ErrorBody),
        (status = 422, description = "Empty name", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<CreatePermissionRequest>,
) -> ApiResult<Permission> {
    let permission = state
        .registry
        .create_permission(&payload.name, payload.guard.as_deref())
        .await?;
    Ok(ApiResponse::created("Permission created", permission))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/permissions/{permission_id}",
    tag = "Permissions",
    params(("permission_id" = i64, Path, description = "Permission ID")),
    responses(
        (status = 200, description = "Permission deleted"),
        (status = 404, description = "Permission not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    Path(permission_id): Path<i64>,
) -> ApiResult<()> {
    state.registry.delete_permission(permission_id).await?;
    Ok(ApiResponse::message("Permission deleted"))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{user_id}/permissions/check",
    tag = "Permissions",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = CheckPermissionsRequest,
    responses(
        (status = 200, description = "Permission decision", body = CheckPermissionsResponse),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn check_user_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    ValidJson(payload): ValidJson<CheckPermissionsRequest>,
) -> ApiResult<CheckPermissionsResponse> {
    let authorizer = &state.authorizer;

    let granted = match (payload.permissions.as_slice(), payload.mode) {
        ([single], _) => authorizer.has_permission(user_id, single).await?,
        (many, MatchMode::Any) => authorizer.has_any_permission(user_id, many).await?,
        (many, MatchMode::All) => authorizer.has_all_permissions(user_id, many).await?,
    };

    let grants = authorizer.grants(user_id).await?;
    let results = payload
        .permissions
        .iter()
        .map(|p| (p.clone(), grants.has_permission(p)))
        .collect();

    Ok(ApiResponse::ok(
        "Permission check completed",
        CheckPermissionsResponse {
            user_id,
            granted,
            results,
        },
    ))
}
