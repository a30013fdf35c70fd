use std::sync::Arc;
use tracing::info;

use super::RbacError;
use crate::models::{Permission, Role};
use crate::store::{CredentialStore, StoreError};

/// Creates roles and permissions and manages who holds them.
///
/// Every operation that takes an optional guard falls back to the registry's default guard.
#[derive(Clone)]
pub struct RoleRegistry {
    store: Arc<dyn CredentialStore>,
    default_guard: String,
}

fn clean_name(name: &str) -> Result<&str, RbacError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RbacError::EmptyName);
    }
    Ok(name)
}

impl RoleRegistry {
    pub fn new(store: Arc<dyn CredentialStore>, default_guard: impl Into<String>) -> Self {
        Self {
            store,
            default_guard: default_guard.into(),
        }
    }

    pub fn default_guard(&self) -> &str {
        &self.default_guard
    }

    fn guard<'a>(&'a self, guard: Option<&'a str>) -> &'a str {
        guard.unwrap_or(&self.default_guard)
    }

    async fn ensure_user(&self, user_id: i64) -> Result<(), RbacError> {
        match self.store.find_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(RbacError::UserNotFound(user_id)),
        }
    }

    pub async fn create_role(&self, name: &str, guard: Option<&str>) -> Result<Role, RbacError> {
        let name = clean_name(name)?;
        let guard = self.guard(guard);

        match self.store.create_role(name, guard).await {
            Ok(role) => {
                info!(role_id = role.id, name = %role.name, guard = %role.guard_name, "Role created");
                Ok(role)
            }
            Err(StoreError::Conflict(_)) => Err(RbacError::DuplicateRole {
                name: name.to_string(),
                guard: guard.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_permission(
        &self,
        name: &str,
        guard: Option<&str>,
    ) -> Result<Permission, RbacError> {
        let name = clean_name(name)?;
        let guard = self.guard(guard);

        match self.store.create_permission(name, guard).await {
            Ok(permission) => {
                info!(
                    permission_id = permission.id,
                    name = %permission.name,
                    guard = %permission.guard_name,
                    "Permission created"
                );
                Ok(permission)
            }
            Err(StoreError::Conflict(_)) => Err(RbacError::DuplicatePermission {
                name: name.to_string(),
                guard: guard.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_or_create_role(
        &self,
        name: &str,
        guard: Option<&str>,
    ) -> Result<Role, RbacError> {
        let trimmed = clean_name(name)?;
        if let Some(role) = self
            .store
            .find_role_by_name(trimmed, self.guard(guard))
            .await?
        {
            return Ok(role);
        }
        self.create_role(trimmed, guard).await
    }

    pub async fn find_or_create_permission(
        &self,
        name: &str,
        guard: Option<&str>,
    ) -> Result<Permission, RbacError> {
        let trimmed = clean_name(name)?;
        if let Some(permission) = self
            .store
            .find_permission_by_name(trimmed, self.guard(guard))
            .await?
        {
            return Ok(permission);
        }
        self.create_permission(trimmed, guard).await
    }

    pub async fn find_role(&self, role_id: i64) -> Result<Role, RbacError> {
        self.store
            .find_role(role_id)
            .await?
            .ok_or_else(|| RbacError::RoleNotFound(role_id.to_string()))
    }

    pub async fn find_permission(&self, permission_id: i64) -> Result<Permission, RbacError> {
        self.store
            .find_permission(permission_id)
            .await?
            .ok_or_else(|| RbacError::PermissionNotFound(permission_id.to_string()))
    }

    pub async fn find_role_by_name(&self, name: &str, guard: Option<&str>) -> Result<Role, RbacError> {
        let name = name.trim();
        self.store
            .find_role_by_name(name, self.guard(guard))
            .await?
            .ok_or_else(|| RbacError::RoleNotFound(name.to_string()))
    }

    pub async fn find_permission_by_name(
        &self,
        name: &str,
        guard: Option<&str>,
    ) -> Result<Permission, RbacError> {
        let name = name.trim();
        self.store
            .find_permission_by_name(name, self.guard(guard))
            .await?
            .ok_or_else(|| RbacError::PermissionNotFound(name.to_string()))
    }

    pub async fn list_roles(&self, guard: Option<&str>) -> Result<Vec<Role>, RbacError> {
        Ok(self.store.list_roles(self.guard(guard)).await?)
    }

    pub async fn list_permissions(&self, guard: Option<&str>) -> Result<Vec<Permission>, RbacError> {
        Ok(self.store.list_permissions(self.guard(guard)).await?)
    }

    pub async fn delete_role(&self, role_id: i64) -> Result<(), RbacError> {
        if !self.store.delete_role(role_id).await? {
            return Err(RbacError::RoleNotFound(role_id.to_string()));
        }
        info!(role_id, "Role deleted");
        Ok(())
    }

    pub async fn delete_permission(&self, permission_id: i64) -> Result<(), RbacError> {
        if !self.store.delete_permission(permission_id).await? {
            return Err(RbacError::PermissionNotFound(permission_id.to_string()));
        }
        info!(permission_id, "Permission deleted");
        Ok(())
    }

    /// Assigning a role the user already holds is a no-op.
    pub async fn assign_role_to_user(&self, user_id: i64, role_name: &str) -> Result<Role, RbacError> {
        self.ensure_user(user_id).await?;
        let role = self.find_role_by_name(role_name, None).await?;

        self.store.attach_role(user_id, role.id).await?;
        info!(user_id, role = %role.name, "Role assigned");
        Ok(role)
    }

    /// Returns whether the user held the role.
    pub async fn revoke_role_from_user(&self, user_id: i64, role_name: &str) -> Result<bool, RbacError> {
        self.ensure_user(user_id).await?;
        let role = self.find_role_by_name(role_name, None).await?;

        let removed = self.store.detach_role(user_id, role.id).await?;
        if removed {
            info!(user_id, role = %role.name, "Role revoked");
        }
        Ok(removed)
    }

    /// Replaces the user's default-guard roles with exactly `role_names`. Roles held in
    /// other guards are untouched. Unknown names abort before any change.
    pub async fn sync_roles(&self, user_id: i64, role_names: &[String]) -> Result<Vec<Role>, RbacError> {
        self.ensure_user(user_id).await?;

        let mut roles = Vec::with_capacity(role_names.len());
        for name in role_names {
            roles.push(self.find_role_by_name(name, None).await?);
        }
        let ids: Vec<i64> = roles.iter().map(|r| r.id).collect();

        self.store
            .sync_roles(user_id, &self.default_guard, &ids)
            .await?;
        info!(user_id, roles = ?role_names, "Roles synced");
        Ok(roles)
    }

    pub async fn assign_permission_to_role(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<(), RbacError> {
        let role = self.find_role(role_id).await?;
        let permission = self.find_permission(permission_id).await?;

        if role.guard_name != permission.guard_name {
            return Err(RbacError::GuardMismatch {
                role_guard: role.guard_name,
                permission_guard: permission.guard_name,
            });
        }

        self.store.attach_role_permission(role.id, permission.id).await?;
        info!(role = %role.name, permission = %permission.name, "Permission granted to role");
        Ok(())
    }

    pub async fn revoke_permission_from_role(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<bool, RbacError> {
        self.find_role(role_id).await?;
        Ok(self
            .store
            .detach_role_permission(role_id, permission_id)
            .await?)
    }

    pub async fn assign_direct_permission_to_user(
        &self,
        user_id: i64,
        permission_id: i64,
    ) -> Result<Permission, RbacError> {
        self.ensure_user(user_id).await?;
        let permission = self.find_permission(permission_id).await?;

        self.store
            .attach_user_permission(user_id, permission.id)
            .await?;
        info!(user_id, permission = %permission.name, "Direct permission granted");
        Ok(permission)
    }

    pub async fn revoke_direct_permission_from_user(
        &self,
        user_id: i64,
        permission_id: i64,
    ) -> Result<bool, RbacError> {
        self.ensure_user(user_id).await?;
        Ok(self
            .store
            .detach_user_permission(user_id, permission_id)
            .await?)
    }

    /// Replaces the user's direct default-guard permissions with exactly `permission_ids`.
    /// A permission from another guard counts as unknown; unknown ids abort before any change.
    pub async fn sync_direct_permissions(
        &self,
        user_id: i64,
        permission_ids: &[i64],
    ) -> Result<Vec<Permission>, RbacError> {
        self.ensure_user(user_id).await?;

        let mut permissions = Vec::with_capacity(permission_ids.len());
        for &permission_id in permission_ids {
            let permission = self.find_permission(permission_id).await?;
            if permission.guard_name != self.default_guard {
                return Err(RbacError::PermissionNotFound(permission_id.to_string()));
            }
            permissions.push(permission);
        }
        let ids: Vec<i64> = permissions.iter().map(|p| p.id).collect();

        self.store
            .sync_user_permissions(user_id, &self.default_guard, &ids)
            .await?;
        info!(user_id, permissions = ?ids, "Direct permissions synced");
        Ok(permissions)
    }

    pub async fn role_permissions(&self, role_id: i64) -> Result<Vec<Permission>, RbacError> {
        self.find_role(role_id).await?;
        Ok(self
            .store
            .role_permissions(&[role_id])
            .await?
            .into_iter()
            .map(|(_, permission)| permission)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::rbac::load_grants;
    use crate::store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, RoleRegistry, i64) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(NewUser {
                name: "kuroneko".into(),
                email: "kuroneko@gmail.com".into(),
                password_hash: "x".into(),
            })
            .await
            .unwrap();
        let registry = RoleRegistry::new(store.clone(), "api");
        (store, registry, user.id)
    }

    #[tokio::test]
    async fn test_create_role_uses_default_guard() {
        let (_, registry, _) = setup().await;
        let role = registry.create_role("  editor ", None).await.unwrap();

        assert_eq!(role.name, "editor");
        assert_eq!(role.guard_name, "api");
    }

    #[tokio::test]
    async fn test_duplicate_role_per_guard() {
        let (_, registry, _) = setup().await;
        registry.create_role("admin", None).await.unwrap();

        assert!(matches!(
            registry.create_role("admin", None).await,
            Err(RbacError::DuplicateRole { .. })
        ));
        assert!(registry.create_role("admin", Some("web")).await.is_ok());
    }

    #[tokio::test]
    async fn test_find_by_name_is_guard_scoped() {
        let (_, registry, _) = setup().await;
        registry.create_permission("posts.edit", Some("web")).await.unwrap();

        assert!(matches!(
            registry.find_permission_by_name("posts.edit", None).await,
            Err(RbacError::PermissionNotFound(_))
        ));
        let found = registry
            .find_permission_by_name(" posts.edit ", Some("web"))
            .await
            .unwrap();
        assert_eq!(found.guard_name, "web");
        assert!(matches!(
            registry.find_role_by_name("ghost", None).await,
            Err(RbacError::RoleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let (_, registry, _) = setup().await;

        assert!(matches!(
            registry.create_role("   ", None).await,
            Err(RbacError::EmptyName)
        ));
        assert!(matches!(
            registry.create_permission("", None).await,
            Err(RbacError::EmptyName)
        ));
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let (_, registry, _) = setup().await;
        let first = registry.find_or_create_permission("posts.edit", None).await.unwrap();
        let second = registry.find_or_create_permission("posts.edit", None).await.unwrap();

        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_assign_unknown_role() {
        let (_, registry, user_id) = setup().await;

        assert!(matches!(
            registry.assign_role_to_user(user_id, "ghost").await,
            Err(RbacError::RoleNotFound(_))
        ));
        assert!(matches!(
            registry.assign_role_to_user(404, "ghost").await,
            Err(RbacError::UserNotFound(404))
        ));
    }

    #[tokio::test]
    async fn test_assign_role_twice_is_noop() {
        let (store, registry, user_id) = setup().await;
        registry.create_role("editor", None).await.unwrap();

        registry.assign_role_to_user(user_id, "editor").await.unwrap();
        registry.assign_role_to_user(user_id, "editor").await.unwrap();

        assert_eq!(store.user_roles(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_replaces_role_set() {
        let (store, registry, user_id) = setup().await;
        for name in ["a", "b", "c"] {
            registry.create_role(name, None).await.unwrap();
        }
        registry.assign_role_to_user(user_id, "a").await.unwrap();

        registry
            .sync_roles(user_id, &["b".to_string(), "c".to_string()])
            .await
            .unwrap();

        let mut names: Vec<String> = store
            .user_roles(user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_sync_with_unknown_role_changes_nothing() {
        let (store, registry, user_id) = setup().await;
        registry.create_role("a", None).await.unwrap();
        registry.assign_role_to_user(user_id, "a").await.unwrap();

        let result = registry.sync_roles(user_id, &["ghost".to_string()]).await;

        assert!(matches!(result, Err(RbacError::RoleNotFound(_))));
        assert_eq!(store.user_roles(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_leaves_other_guard_roles() {
        let (store, registry, user_id) = setup().await;
        let web_admin = registry.create_role("admin", Some("web")).await.unwrap();
        registry.create_role("editor", None).await.unwrap();
        store.attach_role(user_id, web_admin.id).await.unwrap();

        registry
            .sync_roles(user_id, &["editor".to_string()])
            .await
            .unwrap();

        let held: Vec<String> = store
            .user_roles(user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| format!("{}:{}", r.guard_name, r.name))
            .collect();
        assert_eq!(held, vec!["web:admin", "api:editor"]);
    }

    #[tokio::test]
    async fn test_sync_direct_permissions() {
        let (store, registry, user_id) = setup().await;
        let edit = registry.create_permission("posts.edit", None).await.unwrap();
        let view = registry.create_permission("posts.view", None).await.unwrap();
        let web = registry.create_permission("posts.view", Some("web")).await.unwrap();
        registry
            .assign_direct_permission_to_user(user_id, edit.id)
            .await
            .unwrap();

        let synced = registry
            .sync_direct_permissions(user_id, &[view.id])
            .await
            .unwrap();
        assert_eq!(synced.len(), 1);

        let names: Vec<String> = store
            .direct_permissions(user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["posts.view"]);

        assert!(matches!(
            registry.sync_direct_permissions(user_id, &[edit.id, web.id]).await,
            Err(RbacError::PermissionNotFound(_))
        ));
        assert_eq!(store.direct_permissions(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_guard_mismatch() {
        let (_, registry, _) = setup().await;
        let role = registry.create_role("admin", Some("web")).await.unwrap();
        let permission = registry.create_permission("users.manage", None).await.unwrap();

        assert!(matches!(
            registry.assign_permission_to_role(role.id, permission.id).await,
            Err(RbacError::GuardMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_role_and_direct_grants_flow_into_snapshot() {
        let (store, registry, user_id) = setup().await;
        let role = registry.create_role("editor", None).await.unwrap();
        let edit = registry.create_permission("posts.edit", None).await.unwrap();
        let export = registry.create_permission("reports.export", None).await.unwrap();

        registry.assign_permission_to_role(role.id, edit.id).await.unwrap();
        registry.assign_role_to_user(user_id, "editor").await.unwrap();
        registry
            .assign_direct_permission_to_user(user_id, export.id)
            .await
            .unwrap();

        let grants = load_grants(store.as_ref(), user_id, "api").await.unwrap();
        assert!(grants.has_permission("posts.edit"));
        assert!(grants.has_permission("reports.export"));

        registry.revoke_permission_from_role(role.id, edit.id).await.unwrap();
        registry
            .revoke_direct_permission_from_user(user_id, export.id)
            .await
            .unwrap();

        let grants = load_grants(store.as_ref(), user_id, "api").await.unwrap();
        assert!(grants.permission_names().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_role() {
        let (_, registry, _) = setup().await;
        assert!(matches!(
            registry.delete_role(77).await,
            Err(RbacError::RoleNotFound(_))
        ));
    }
}
