//! Role management handlers.

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    error::{ApiError, ApiResponse, ApiResult, ErrorBody},
    handlers::ValidJson,
    models::{Permission, Role},
    AppState,
};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GuardQuery {
    /// Defaults to the service's guard.
    pub guard: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRoleRequest {
    #[validate(length(max = 125, message = "The name may not be greater than 125 characters."))]
    #[schema(example = "editor")]
    pub name: String,
    #[schema(example = "api")]
    pub guard: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AssignPermissionRequest {
    #[schema(example = 3)]
    pub permission_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RolePermissions {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/roles",
    tag = "Roles",
    params(GuardQuery),
    responses(
        (status = 200, description = "Roles in the guard", body = Vec<Role>),
        (status = 401, description = "Unauthenticated", body = ErrorBody),
        (status = 403, description = "Insufficient role", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    Query(query): Query<GuardQuery>,
) -> ApiResult<Vec<Role>> {
    let roles = state.registry.list_roles(query.guard.as_deref()).await?;
    Ok(ApiResponse::ok("Roles retrieved", roles))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/roles",
    tag = "Roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role already exists in the guard", body = ErrorBody),
        (status = 422, description = "Empty name", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<CreateRoleRequest>,
) -> ApiResult<Role> {
    let role = state
        .registry
        .create_role(&payload.name, payload.guard.as_deref())
        .await?;
    Ok(ApiResponse::created("Role created", role))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/roles/{role_id}",
    tag = "Roles",
    params(("role_id" = i64, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role deleted"),
        (status = 404, description = "Role not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_role(State(state): State<AppState>, Path(role_id): Path<i64>) -> ApiResult<()> {
    state.registry.delete_role(role_id).await?;
    Ok(ApiResponse::message("Role deleted"))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/roles/{role_id}/permissions",
    tag = "Roles",
    params(("role_id" = i64, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Permissions granted to the role", body = RolePermissions),
        (status = 404, description = "Role not found", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_role_permissions(
    State(state): State<AppState>,
    Path(role_id): Path<i64>,
) -> ApiResult<RolePermissions> {
    let role = state.registry.find_role(role_id).await?;
    let permissions = state.registry.role_permissions(role_id).await?;

    Ok(ApiResponse::ok(
        "Role permissions retrieved",
        RolePermissions { role, permissions },
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/roles/{role_id}/permissions",
    tag = "Roles",
    params(("role_id" = i64, Path, description = "Role ID")),
    request_body = AssignPermissionRequest,
    responses(
        (status = 200, description = "Permission granted to role"),
        (status = 404, description = "Role or permission not found", body = ErrorBody),
        (status = 422, description = "Guards differ", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn assign_permission_to_role(
    State(state): State<AppState>,
    Path(role_id): Path<i64>,
    ValidJson(payload): ValidJson<AssignPermissionRequest>,
) -> ApiResult<()> {
    state
        .registry
        .assign_permission_to_role(role_id, payload.permission_id)
        .await?;
    Ok(ApiResponse::message("Permission assigned to role"))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/roles/{role_id}/permissions/{permission_id}",
    tag = "Roles",
    params(
        ("role_id" = i64, Path, description = "Role ID"),
        ("permission_id" = i64, Path, description = "Permission ID")
    ),
    responses(
        (status = 200, description = "Permission removed from role"),
        (status = 404, description = "Role not found or permission not granted", body = ErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn remove_permission_from_role(
    State(state): State<AppState>,
    Path((role_id, permission_id)): Path<(i64, i64)>,
) -> ApiResult<()> {
    if !state
        .registry
        .revoke_permission_from_role(role_id, permission_id)
        .await?
    {
        return Err(ApiError::not_found("Permission is not assigned to this role"));
    }
    Ok(ApiResponse::message("Permission removed from role"))
}
