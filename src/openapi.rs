//! OpenAPI document, served through Swagger UI.

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::{auth, health, permissions, roles, users};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Warden API",
        version = "1.0.0",
        description = "Opaque bearer-token authentication with guard-scoped roles and permissions.\n\n\
        ## Authentication\n\
        1. Log in or register to receive a token of the form `<id>|<secret>`\n\
        2. Send it as `Authorization: Bearer <id>|<secret>`\n\
        3. Tokens expire after the configured TTL; refresh replaces the current token\n\n\
        ## Authorization\n\
        Admin routes require the `admin` role. User management routes additionally require\n\
        `users.view` or `users.manage`, granted through a role or directly.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "/", description = "Current server")),
    tags(
        (name = "Health", description = "Service info and probes"),
        (name = "Authentication", description = "Login, registration and token lifecycle"),
        (name = "Roles", description = "Role management"),
        (name = "Permissions", description = "Permission management and checks"),
        (name = "Users", description = "User administration, role and direct permission assignment")
    ),
    paths(
        health::service_info,
        health::health,
        health::ready,
        health::live,

        auth::login,
        auth::register,
        auth::logout,
        auth::logout_all,
        auth::refresh,
        auth::me,
        auth::change_password,
        auth::delete_account,

        roles::list_roles,
        roles::create_role,
        roles::delete_role,
        roles::list_role_permissions,
        roles::assign_permission_to_role,
        roles::remove_permission_from_role,

        permissions::list_permissions,
        permissions::create_permission,
        permissions::delete_permission,
        permissions::check_user_permissions,

        users::list_users,
        users::get_user,
        users::create_user,
        users::update_user,
        users::delete_user,
        users::assign_role,
        users::sync_roles,
        users::revoke_role,
        users::grant_permission,
        users::sync_permissions,
        users::revoke_permission,
    ),
    components(schemas(crate::error::ErrorBody, crate::models::Role, crate::models::Permission)),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("<id>|<secret>")
                        .description(Some(
                            "Personal access token from /api/v1/auth/login or /api/v1/auth/register.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_router() -> Router {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .into()
}
