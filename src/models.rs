use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

/// Owner-type tag stored on pivot and token rows for user principals.
///
/// Matches the Laravel model class so tables can be shared with a PHP application.
pub const USER_MODEL: &str = "App\\Models\\User";

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub email_verified_at: Option<NaiveDateTime>,
    #[diesel(column_name = password)]
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub remember_token: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(skip_serializing)]
    pub deleted_at: Option<NaiveDateTime>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::users)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    #[diesel(column_name = password)]
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Identifiable, Serialize, ToSchema)]
#[diesel(table_name = crate::schema::roles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Role {
    #[schema(example = 1)]
    pub id: i64,
    #[schema(example = "admin")]
    pub name: String,
    #[schema(example = "api")]
    pub guard_name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::roles)]
pub struct NewRole<'a> {
    pub name: &'a str,
    pub guard_name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Identifiable, Serialize, ToSchema)]
#[diesel(table_name = crate::schema::permissions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Permission {
    #[schema(example = 1)]
    pub id: i64,
    #[schema(example = "users.view")]
    pub name: String,
    #[schema(example = "api")]
    pub guard_name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::permissions)]
pub struct NewPermission<'a> {
    pub name: &'a str,
    pub guard_name: &'a str,
}

/// Persisted bearer token. `token_hash` is the SHA-256 hex digest of the secret.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = crate::schema::personal_access_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AccessToken {
    pub id: i64,
    pub tokenable_type: String,
    pub tokenable_id: i64,
    pub name: String,
    #[diesel(column_name = token)]
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub abilities: Option<String>,
    pub last_used_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl AccessToken {
    /// Abilities decoded from the JSON column. A missing or unreadable column means `["*"]`.
    pub fn abilities(&self) -> Vec<String> {
        self.abilities
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| vec!["*".to_string()])
    }

    /// Whether the token may exercise `ability`. The permission gate checks this next to
    /// the user's grants, so a narrowed token cannot use every permission its user holds.
    pub fn can(&self, ability: &str) -> bool {
        self.abilities()
            .iter()
            .any(|granted| granted == "*" || granted == ability)
    }

    /// A token is still accepted at exactly `expires_at`.
    pub fn is_expired_at(&self, now: NaiveDateTime) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at < now)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::personal_access_tokens)]
pub struct NewAccessToken {
    pub tokenable_type: String,
    pub tokenable_id: i64,
    pub name: String,
    #[diesel(column_name = token)]
    pub token_hash: String,
    pub abilities: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::model_has_roles)]
pub struct ModelHasRole<'a> {
    pub role_id: i64,
    pub model_type: &'a str,
    pub model_id: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::model_has_permissions)]
pub struct ModelHasPermission<'a> {
    pub permission_id: i64,
    pub model_type: &'a str,
    pub model_id: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::role_has_permissions)]
pub struct RoleHasPermission {
    pub permission_id: i64,
    pub role_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn token(abilities: Option<&str>, expires_at: Option<NaiveDateTime>) -> AccessToken {
        let now = Utc::now().naive_utc();
        AccessToken {
            id: 1,
            tokenable_type: USER_MODEL.to_string(),
            tokenable_id: 7,
            name: "cli".to_string(),
            token_hash: "0".repeat(64),
            abilities: abilities.map(str::to_string),
            last_used_at: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_abilities_default_to_wildcard() {
        let t = token(None, None);
        assert_eq!(t.abilities(), vec!["*".to_string()]);
        assert!(t.can("anything"));
    }

    #[test]
    fn test_scoped_abilities() {
        let t = token(Some(r#"["read","write"]"#), None);
        assert!(t.can("read"));
        assert!(!t.can("delete"));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let expires_at = Utc::now().naive_utc();
        let t = token(None, Some(expires_at));

        assert!(!t.is_expired_at(expires_at));
        assert!(t.is_expired_at(expires_at + Duration::milliseconds(1)));
        assert!(!t.is_expired_at(expires_at - Duration::hours(1)));
    }

    #[test]
    fn test_token_without_expiry_never_expires() {
        let t = token(None, None);
        assert!(!t.is_expired_at(Utc::now().naive_utc() + Duration::days(3650)));
    }
}
