//! Persistence for users, access tokens, roles and permissions.
//!
//! [`CredentialStore`] is the only seam handlers and services touch. [`PgStore`] keeps
//! the Laravel/Spatie table layout so a database can be shared with a PHP application;
//! [`MemoryStore`] backs tests and local development.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{create_db_pool, DbPool, PgStore};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::models::{AccessToken, NewAccessToken, NewUser, Permission, Role, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Record not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match err {
            Error::NotFound => StoreError::NotFound,
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict(info.message().to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// User lookups never return soft-deleted rows. Assignment operations are idempotent.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn find_user(&self, id: i64) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>>;
    /// Returns one page of users ordered by id, plus the total count.
    async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<(Vec<User>, i64)>;
    /// Conflicts when `email` belongs to another user.
    async fn update_user(&self, user_id: i64, name: &str, email: &str) -> StoreResult<User>;
    async fn update_password(&self, user_id: i64, password_hash: &str) -> StoreResult<()>;
    async fn soft_delete_user(&self, user_id: i64) -> StoreResult<()>;

    /// Inserts inside a transaction: the row is either committed with its id or absent.
    async fn insert_token(&self, token: NewAccessToken) -> StoreResult<AccessToken>;
    /// Deletes `old_id` and inserts `token` in one transaction.
    async fn replace_token(&self, old_id: i64, token: NewAccessToken) -> StoreResult<AccessToken>;
    async fn find_token(&self, id: i64) -> StoreResult<Option<AccessToken>>;
    async fn touch_token(&self, id: i64, used_at: NaiveDateTime) -> StoreResult<()>;
    /// Returns whether a row was removed.
    async fn delete_token(&self, id: i64) -> StoreResult<bool>;
    async fn delete_user_tokens(&self, user_id: i64, except: Option<i64>) -> StoreResult<u64>;

    async fn create_role(&self, name: &str, guard: &str) -> StoreResult<Role>;
    async fn find_role(&self, id: i64) -> StoreResult<Option<Role>>;
    async fn find_role_by_name(&self, name: &str, guard: &str) -> StoreResult<Option<Role>>;
    async fn list_roles(&self, guard: &str) -> StoreResult<Vec<Role>>;
    /// Pivot rows referencing the role go with it.
    async fn delete_role(&self, id: i64) -> StoreResult<bool>;

    async fn create_permission(&self, name: &str, guard: &str) -> StoreResult<Permission>;
    async fn find_permission(&self, id: i64) -> StoreResult<Option<Permission>>;
    async fn find_permission_by_name(&self, name: &str, guard: &str)
        -> StoreResult<Option<Permission>>;
    async fn list_permissions(&self, guard: &str) -> StoreResult<Vec<Permission>>;
    async fn delete_permission(&self, id: i64) -> StoreResult<bool>;

    async fn attach_role(&self, user_id: i64, role_id: i64) -> StoreResult<()>;
    async fn detach_role(&self, user_id: i64, role_id: i64) -> StoreResult<bool>;
    /// Replaces the user's roles in `guard` with `role_ids`. Roles of other guards stay.
    async fn sync_roles(&self, user_id: i64, guard: &str, role_ids: &[i64]) -> StoreResult<()>;
    async fn attach_role_permission(&self, role_id: i64, permission_id: i64) -> StoreResult<()>;
    async fn detach_role_permission(&self, role_id: i64, permission_id: i64) -> StoreResult<bool>;
    async fn attach_user_permission(&self, user_id: i64, permission_id: i64) -> StoreResult<()>;
    async fn detach_user_permission(&self, user_id: i64, permission_id: i64) -> StoreResult<bool>;
    /// Replaces the user's direct permissions in `guard` with `permission_ids`.
    async fn sync_user_permissions(
        &self,
        user_id: i64,
        guard: &str,
        permission_ids: &[i64],
    ) -> StoreResult<()>;

    async fn user_roles(&self, user_id: i64) -> StoreResult<Vec<Role>>;
    /// `(role_id, permission)` pairs for every role in `role_ids`.
    async fn role_permissions(&self, role_ids: &[i64]) -> StoreResult<Vec<(i64, Permission)>>;
    async fn direct_permissions(&self, user_id: i64) -> StoreResult<Vec<Permission>>;
}
