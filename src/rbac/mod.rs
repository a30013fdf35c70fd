//! Guard-scoped roles and permissions.
//!
//! [`RoleRegistry`] mutates roles, permissions and their assignments. [`Authorizer`]
//! answers role and permission questions for a user id, reading through
//! [`PermissionCache`]. [`Grants`] is the loaded snapshot both of them and the request
//! gate evaluate against.

pub mod cache;
pub mod evaluator;
pub mod registry;
pub mod seed;

pub use cache::PermissionCache;
pub use evaluator::{load_grants, Authorizer, Grants, RoleGrant};
pub use registry::RoleRegistry;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RbacError {
    #[error("The name field is required.")]
    EmptyName,

    #[error("A role `{name}` already exists for guard `{guard}`.")]
    DuplicateRole { name: String, guard: String },

    #[error("A permission `{name}` already exists for guard `{guard}`.")]
    DuplicatePermission { name: String, guard: String },

    #[error("There is no role `{0}`.")]
    RoleNotFound(String),

    #[error("There is no permission `{0}`.")]
    PermissionNotFound(String),

    #[error("User {0} does not exist.")]
    UserNotFound(i64),

    #[error("Role guard `{role_guard}` does not match permission guard `{permission_guard}`.")]
    GuardMismatch {
        role_guard: String,
        permission_guard: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
