use axum::{extract::FromRequestParts, http::request::Parts};

use crate::auth::token::VerifiedToken;
use crate::error::ApiError;
use crate::models::{AccessToken, User};
use crate::rbac::Grants;

/// The authenticated principal for one request.
///
/// Inserted into request extensions by the authentication middleware; handlers behind it
/// take it as an extractor.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub token: AccessToken,
    pub grants: Grants,
}

impl From<VerifiedToken> for AuthContext {
    fn from(verified: VerifiedToken) -> Self {
        Self {
            user: verified.user,
            token: verified.token,
            grants: verified.grants,
        }
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Unauthenticated"))
    }
}
