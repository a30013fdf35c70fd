//! Opaque personal access tokens.
//!
//! A bearer string is `"<row id>|<secret>"`. Only the SHA-256 digest of the secret is
//! stored, so a leaked table cannot be replayed.

use chrono::{Duration, Utc};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::models::{AccessToken, NewAccessToken, User, USER_MODEL};
use crate::rbac::{load_grants, Grants};
use crate::store::{CredentialStore, StoreError};

pub const TOKEN_SECRET_LENGTH: usize = 48;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("bearer token is not of the form <id>|<secret>")]
    Malformed,

    #[error("token does not match any active token")]
    Invalid,

    #[error("token has expired")]
    Expired,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A freshly issued token. `bearer` is the only copy of the plaintext secret.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub bearer: String,
    pub token: AccessToken,
}

#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub user: User,
    pub token: AccessToken,
    pub grants: Grants,
}

#[derive(Debug, Clone, Copy)]
pub enum TokenRef<'a> {
    Bearer(&'a str),
    Id(i64),
}

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn CredentialStore>,
    ttl: Duration,
    guard: String,
}

impl TokenService {
    pub fn new(store: Arc<dyn CredentialStore>, ttl: Duration, guard: impl Into<String>) -> Self {
        Self {
            store,
            ttl,
            guard: guard.into(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn new_row(&self, user_id: i64, name: &str, abilities: Option<&[String]>) -> (String, NewAccessToken) {
        let secret = generate_secret();
        let row = NewAccessToken {
            tokenable_type: USER_MODEL.to_string(),
            tokenable_id: user_id,
            name: name.to_string(),
            token_hash: digest(&secret),
            abilities: abilities.map(|a| serde_json::Value::from(a.to_vec()).to_string()),
            expires_at: Some(Utc::now().naive_utc() + self.ttl),
        };
        (secret, row)
    }

    pub async fn issue(
        &self,
        user: &User,
        name: &str,
        abilities: Option<&[String]>,
    ) -> Result<IssuedToken, TokenError> {
        let (secret, row) = self.new_row(user.id, name, abilities);
        let token = self.store.insert_token(row).await?;

        info!(user_id = user.id, token_id = token.id, name = %token.name, "Access token issued");

        Ok(IssuedToken {
            bearer: format!("{}|{}", token.id, secret),
            token,
        })
    }

    pub async fn verify(&self, bearer: &str) -> Result<VerifiedToken, TokenError> {
        let (id, secret) = parse_bearer(bearer)?;

        let token = self.store.find_token(id).await?.ok_or(TokenError::Invalid)?;
        if !digests_match(&digest(secret), &token.token_hash) {
            return Err(TokenError::Invalid);
        }

        let now = Utc::now().naive_utc();
        if token.is_expired_at(now) {
            // A concurrent request may already have removed the row.
            self.store.delete_token(token.id).await?;
            info!(token_id = token.id, "Expired access token deleted");
            return Err(TokenError::Expired);
        }

        if token.tokenable_type != USER_MODEL {
            return Err(TokenError::Invalid);
        }
        let user = self
            .store
            .find_user(token.tokenable_id)
            .await?
            .ok_or(TokenError::Invalid)?;

        if let Err(e) = self.store.touch_token(token.id, now).await {
            warn!(token_id = token.id, error = %e, "Failed to record token use");
        }

        let grants = load_grants(self.store.as_ref(), user.id, &self.guard).await?;

        Ok(VerifiedToken { user, token, grants })
    }

    /// Returns whether a row was removed. Revoking an absent token is not an error.
    pub async fn revoke(&self, token: TokenRef<'_>) -> Result<bool, TokenError> {
        let id = match token {
            TokenRef::Id(id) => id,
            TokenRef::Bearer(bearer) => {
                let (id, secret) = parse_bearer(bearer)?;
                match self.store.find_token(id).await? {
                    Some(row) if digests_match(&digest(secret), &row.token_hash) => id,
                    _ => return Ok(false),
                }
            }
        };

        let removed = self.store.delete_token(id).await?;
        if removed {
            debug!(token_id = id, "Access token revoked");
        }
        Ok(removed)
    }

    /// Issues a replacement for `current` and deletes `current` in the same transaction.
    pub async fn refresh(&self, current: &AccessToken, user: &User) -> Result<IssuedToken, TokenError> {
        let abilities = current.abilities();
        let (secret, row) = self.new_row(user.id, &current.name, Some(&abilities));
        let token = self.store.replace_token(current.id, row).await?;

        info!(user_id = user.id, old_token_id = current.id, token_id = token.id, "Access token refreshed");

        Ok(IssuedToken {
            bearer: format!("{}|{}", token.id, secret),
            token,
        })
    }

    pub async fn revoke_all(&self, user_id: i64, except: Option<i64>) -> Result<u64, TokenError> {
        let count = self.store.delete_user_tokens(user_id, except).await?;
        info!(user_id, revoked = count, "Access tokens revoked");
        Ok(count)
    }
}

pub fn generate_secret() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_SECRET_LENGTH)
        .map(char::from)
        .collect()
}

/// Lowercase hex SHA-256, the format of the `token` column.
pub fn digest(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn digests_match(computed: &str, stored: &str) -> bool {
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Splits on the first `|`. The id must be a positive decimal integer and the secret non-empty.
pub fn parse_bearer(bearer: &str) -> Result<(i64, &str), TokenError> {
    let (id, secret) = bearer.split_once('|').ok_or(TokenError::Malformed)?;

    if id.is_empty() || secret.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TokenError::Malformed);
    }

    match id.parse::<i64>() {
        Ok(id) if id > 0 => Ok((id, secret)),
        _ => Err(TokenError::Malformed),
    }
}
