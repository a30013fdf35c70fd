//! Authentication and authorization stages of the request gate.
//!
//! Layer order on a route group is authentication outermost, then the role gate, then the
//! permission gate. Each gate reads the [`AuthContext`] the authentication stage inserted.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::{AuthContext, TokenError};
use crate::error::ApiError;
use crate::telemetry::{record_auth_attempt, record_gate_denial, AuthOutcome};
use crate::AppState;

const BEARER_PREFIX: &str = "Bearer ";

fn bearer_token(req: &Request) -> Result<&str, ApiError> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("Authorization header required"))?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Invalid authorization header"))
}

/// Verifies the bearer token and attaches an [`AuthContext`] to the request.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = match bearer_token(&req) {
        Ok(token) => token,
        Err(e) => {
            record_auth_attempt("token", AuthOutcome::MissingCredentials);
            return Err(e);
        }
    };

    let verified = match state.tokens.verify(token).await {
        Ok(verified) => verified,
        Err(e) => {
            let outcome = match &e {
                TokenError::Malformed => Some(AuthOutcome::MalformedToken),
                TokenError::Invalid => Some(AuthOutcome::InvalidToken),
                TokenError::Expired => Some(AuthOutcome::TokenExpired),
                TokenError::Store(_) => None,
            };
            if let Some(outcome) = outcome {
                debug!(reason = %e, "Bearer token rejected");
                record_auth_attempt("token", outcome);
            }
            return Err(e.into());
        }
    };

    record_auth_attempt("token", AuthOutcome::Success);
    req.extensions_mut().insert(AuthContext::from(verified));

    Ok(next.run(req).await)
}

fn context(req: &Request) -> Result<&AuthContext, ApiError> {
    req.extensions()
        .get::<AuthContext>()
        .ok_or_else(|| ApiError::unauthorized("Unauthenticated"))
}

/// Admits a request whose user holds any of the configured roles.
#[derive(Debug, Clone)]
pub struct RoleGate {
    roles: Arc<[String]>,
}

impl RoleGate {
    pub fn any_of<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn admits(&self, ctx: &AuthContext) -> bool {
        ctx.grants.has_any_role(&self.roles[..])
    }
}

pub async fn require_role(
    State(gate): State<RoleGate>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = context(&req)?;
    if !gate.admits(ctx) {
        warn!(user_id = ctx.user.id, required = ?gate.roles, "Role gate denied request");
        record_gate_denial("role");
        return Err(ApiError::forbidden("Insufficient role"));
    }

    Ok(next.run(req).await)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Any,
    All,
}

/// Admits a request whose user holds any, or all, of the configured permissions.
///
/// Direct grants are consulted before role grants. A permission only counts when the
/// bearer token's abilities also cover it; `*` covers everything.
#[derive(Debug, Clone)]
pub struct PermissionGate {
    permissions: Arc<[String]>,
    mode: MatchMode,
}

impl PermissionGate {
    fn new<I, S>(permissions: I, mode: MatchMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            permissions: permissions.into_iter().map(Into::into).collect(),
            mode,
        }
    }

    pub fn any_of<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(permissions, MatchMode::Any)
    }

    pub fn all_of<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(permissions, MatchMode::All)
    }

    pub fn admits(&self, ctx: &AuthContext) -> bool {
        let held = |permission: &String| {
            ctx.grants.has_permission(permission) && ctx.token.can(permission)
        };
        match self.mode {
            MatchMode::Any => self.permissions.iter().any(held),
            MatchMode::All => self.permissions.iter().all(held),
        }
    }
}

pub async fn require_permission(
    State(gate): State<PermissionGate>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = context(&req)?;
    if !gate.admits(ctx) {
        warn!(
            user_id = ctx.user.id,
            required = ?gate.permissions,
            mode = ?gate.mode,
            "Permission gate denied request"
        );
        record_gate_denial("permission");
        return Err(ApiError::forbidden("Insufficient permissions"));
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessToken, User, USER_MODEL};
    use crate::rbac::{Grants, RoleGrant};
    use axum::body::Body;
    use chrono::Utc;

    fn ctx(grants: Grants) -> AuthContext {
        let now = Utc::now().naive_utc();
        AuthContext {
            user: User {
                id: 1,
                name: "kuroneko".into(),
                email: "kuroneko@gmail.com".into(),
                email_verified_at: None,
                password_hash: String::new(),
                remember_token: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
            token: AccessToken {
                id: 1,
                tokenable_type: USER_MODEL.into(),
                tokenable_id: 1,
                name: "cli".into(),
                token_hash: String::new(),
                abilities: None,
                last_used_at: None,
                expires_at: None,
                created_at: now,
                updated_at: now,
            },
            grants,
        }
    }

    fn editor() -> Grants {
        Grants {
            roles: vec![RoleGrant {
                name: "editor".into(),
                permissions: vec!["posts.edit".into()],
            }],
            direct_permissions: vec!["reports.export".into()],
        }
    }

    #[test]
    fn test_bearer_token_extraction() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, "Bearer 1|abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req).unwrap(), "1|abc");

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(
            bearer_token(&req).unwrap_err().message(),
            "Authorization header required"
        );

        let req = Request::builder()
            .header(header::AUTHORIZATION, "Basic a2V5")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            bearer_token(&req).unwrap_err().message(),
            "Invalid authorization header"
        );
    }

    #[test]
    fn test_role_gate() {
        let gate = RoleGate::any_of(["admin", "editor"]);
        assert!(gate.admits(&ctx(editor())));
        assert!(!RoleGate::any_of(["admin"]).admits(&ctx(editor())));
        assert!(!gate.admits(&ctx(Grants::default())));
    }

    #[test]
    fn test_permission_gate_modes() {
        let context = ctx(editor());

        assert!(PermissionGate::any_of(["users.manage", "reports.export"]).admits(&context));
        assert!(PermissionGate::all_of(["posts.edit", "reports.export"]).admits(&context));
        assert!(!PermissionGate::all_of(["posts.edit", "users.manage"]).admits(&context));
    }

    #[test]
    fn test_permission_gate_respects_token_abilities() {
        let mut context = ctx(editor());
        context.token.abilities = Some(r#"["reports.export"]"#.into());

        assert!(PermissionGate::any_of(["posts.edit", "reports.export"]).admits(&context));
        assert!(!PermissionGate::any_of(["posts.edit"]).admits(&context));
        assert!(!PermissionGate::all_of(["posts.edit", "reports.export"]).admits(&context));

        context.token.abilities = Some(r#"["*"]"#.into());
        assert!(PermissionGate::all_of(["posts.edit", "reports.export"]).admits(&context));
    }
}
