use tracing::info;

use super::{RbacError, RoleRegistry};
use crate::auth::{password::PasswordError, PasswordHasher};
use crate::config::AdminSeed;
use crate::models::{NewUser, User};
use crate::store::{CredentialStore, StoreError};

pub const ADMIN_ROLE: &str = "admin";
pub const USERS_VIEW: &str = "users.view";
pub const USERS_MANAGE: &str = "users.manage";
pub const ROLES_MANAGE: &str = "roles.manage";

const ADMIN_PERMISSIONS: [&str; 3] = [USERS_VIEW, USERS_MANAGE, ROLES_MANAGE];

/// Ensures the bootstrap roles and permissions exist in the default guard.
///
/// Safe to run on every start.
pub async fn seed_defaults(registry: &RoleRegistry, default_role: &str) -> Result<(), RbacError> {
    let admin = registry.find_or_create_role(ADMIN_ROLE, None).await?;
    registry.find_or_create_role(default_role, None).await?;

    for name in ADMIN_PERMISSIONS {
        let permission = registry.find_or_create_permission(name, None).await?;
        registry
            .assign_permission_to_role(admin.id, permission.id)
            .await?;
    }

    info!(guard = %registry.default_guard(), "Default roles and permissions seeded");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error(transparent)]
    Rbac(#[from] RbacError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Ensures a user with `admin.email` exists and holds [`ADMIN_ROLE`].
///
/// An existing user keeps its password. Run after [`seed_defaults`] so the role exists.
pub async fn seed_admin(
    registry: &RoleRegistry,
    store: &dyn CredentialStore,
    hasher: PasswordHasher,
    admin: &AdminSeed,
) -> Result<User, SeedError> {
    let user = match store.find_user_by_email(&admin.email).await? {
        Some(user) => user,
        None => {
            let password = admin.password.clone();
            let password_hash =
                tokio::task::spawn_blocking(move || hasher.hash(&password)).await??;

            let user = store
                .create_user(NewUser {
                    name: admin.name.clone(),
                    email: admin.email.clone(),
                    password_hash,
                })
                .await?;
            info!(user_id = user.id, email = %user.email, "Admin user created");
            user
        }
    };

    registry.assign_role_to_user(user.id, ADMIN_ROLE).await?;
    Ok(user)
}
