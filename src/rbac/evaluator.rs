use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use super::{PermissionCache, RbacError};
use crate::models::{Permission, Role};
use crate::store::{CredentialStore, StoreResult};
use crate::telemetry::record_permission_check;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleGrant {
    pub name: String,
    pub permissions: Vec<String>,
}

/// A user's roles and permissions within one guard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Grants {
    pub roles: Vec<RoleGrant>,
    pub direct_permissions: Vec<String>,
}

impl Grants {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.name == role)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|r| self.has_role(r.as_ref()))
    }

    pub fn has_all_roles<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().all(|r| self.has_role(r.as_ref()))
    }

    /// Direct grants are checked first; roles are walked only when no direct grant matches.
    pub fn has_permission(&self, permission: &str) -> bool {
        if self.direct_permissions.iter().any(|p| p == permission) {
            return true;
        }

        self.roles
            .iter()
            .any(|role| role.permissions.iter().any(|p| p == permission))
    }

    pub fn has_any_permission<S: AsRef<str>>(&self, permissions: &[S]) -> bool {
        permissions.iter().any(|p| self.has_permission(p.as_ref()))
    }

    pub fn has_all_permissions<S: AsRef<str>>(&self, permissions: &[S]) -> bool {
        permissions.iter().all(|p| self.has_permission(p.as_ref()))
    }

    pub fn primary_role(&self) -> Option<&str> {
        self.roles.first().map(|r| r.name.as_str())
    }

    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.name.clone()).collect()
    }

    /// Direct and role-derived permission names, deduplicated and sorted.
    pub fn permission_names(&self) -> Vec<String> {
        self.direct_permissions
            .iter()
            .chain(self.roles.iter().flat_map(|r| r.permissions.iter()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn assemble(
    direct: Vec<Permission>,
    roles: Vec<Role>,
    role_permissions: &[(i64, Permission)],
    guard: &str,
) -> Grants {
    let roles = roles
        .into_iter()
        .filter(|role| role.guard_name == guard)
        .map(|role| RoleGrant {
            permissions: role_permissions
                .iter()
                .filter(|(role_id, p)| *role_id == role.id && p.guard_name == guard)
                .map(|(_, p)| p.name.clone())
                .collect(),
            name: role.name,
        })
        .collect();

    Grants {
        roles,
        direct_permissions: direct
            .into_iter()
            .filter(|p| p.guard_name == guard)
            .map(|p| p.name)
            .collect(),
    }
}

/// Loads a user's grants in `guard` straight from the store.
pub async fn load_grants(
    store: &dyn CredentialStore,
    user_id: i64,
    guard: &str,
) -> StoreResult<Grants> {
    let direct = store.direct_permissions(user_id).await?;
    let roles = store.user_roles(user_id).await?;
    let role_ids: Vec<i64> = roles
        .iter()
        .filter(|r| r.guard_name == guard)
        .map(|r| r.id)
        .collect();
    let role_permissions = store.role_permissions(&role_ids).await?;

    Ok(assemble(direct, roles, &role_permissions, guard))
}

/// Answers role and permission questions by user id.
///
/// Unknown users are `RbacError::UserNotFound`, never `Ok(false)`.
#[derive(Clone)]
pub struct Authorizer {
    store: Arc<dyn CredentialStore>,
    cache: PermissionCache,
    guard: String,
}

impl Authorizer {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: PermissionCache,
        guard: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cache,
            guard: guard.into(),
        }
    }

    pub fn guard(&self) -> &str {
        &self.guard
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    async fn ensure_user(&self, user_id: i64) -> Result<(), RbacError> {
        match self.store.find_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(RbacError::UserNotFound(user_id)),
        }
    }

    /// Bypasses the cache.
    pub async fn load_grants(&self, user_id: i64) -> Result<Grants, RbacError> {
        self.ensure_user(user_id).await?;
        Ok(load_grants(self.store.as_ref(), user_id, &self.guard).await?)
    }

    /// The user is looked up on every call; only the grants themselves come from the cache.
    pub async fn grants(&self, user_id: i64) -> Result<Grants, RbacError> {
        self.ensure_user(user_id).await?;
        if let Some(grants) = self.cache.get(user_id).await {
            return Ok(grants);
        }

        let grants = load_grants(self.store.as_ref(), user_id, &self.guard).await?;
        self.cache.insert(user_id, grants.clone()).await;
        Ok(grants)
    }

    pub async fn has_role(&self, user_id: i64, role: &str) -> Result<bool, RbacError> {
        Ok(self.grants(user_id).await?.has_role(role))
    }

    pub async fn has_any_role<S: AsRef<str> + Sync>(
        &self,
        user_id: i64,
        roles: &[S],
    ) -> Result<bool, RbacError> {
        Ok(self.grants(user_id).await?.has_any_role(roles))
    }

    pub async fn has_all_roles<S: AsRef<str> + Sync>(
        &self,
        user_id: i64,
        roles: &[S],
    ) -> Result<bool, RbacError> {
        Ok(self.grants(user_id).await?.has_all_roles(roles))
    }

    pub async fn has_permission(&self, user_id: i64, permission: &str) -> Result<bool, RbacError> {
        let started = Instant::now();
        self.ensure_user(user_id).await?;

        if let Some(grants) = self.cache.get(user_id).await {
            let granted = grants.has_permission(permission);
            record_permission_check(true, granted, started.elapsed());
            return Ok(granted);
        }

        let direct = self.store.direct_permissions(user_id).await?;
        if direct
            .iter()
            .any(|p| p.guard_name == self.guard && p.name == permission)
        {
            record_permission_check(false, true, started.elapsed());
            return Ok(true);
        }

        let roles = self.store.user_roles(user_id).await?;
        let role_ids: Vec<i64> = roles
            .iter()
            .filter(|r| r.guard_name == self.guard)
            .map(|r| r.id)
            .collect();
        let role_permissions = self.store.role_permissions(&role_ids).await?;

        let grants = assemble(direct, roles, &role_permissions, &self.guard);
        let granted = grants.has_permission(permission);
        self.cache.insert(user_id, grants).await;

        record_permission_check(false, granted, started.elapsed());
        Ok(granted)
    }

    pub async fn has_any_permission<S: AsRef<str> + Sync>(
        &self,
        user_id: i64,
        permissions: &[S],
    ) -> Result<bool, RbacError> {
        Ok(self.grants(user_id).await?.has_any_permission(permissions))
    }

    pub async fn has_all_permissions<S: AsRef<str> + Sync>(
        &self,
        user_id: i64,
        permissions: &[S],
    ) -> Result<bool, RbacError> {
        Ok(self.grants(user_id).await?.has_all_permissions(permissions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::store::MemoryStore;

    fn snapshot() -> Grants {
        Grants {
            roles: vec![
                RoleGrant {
                    name: "editor".into(),
                    permissions: vec!["posts.edit".into(), "posts.view".into()],
                },
                RoleGrant {
                    name: "viewer".into(),
                    permissions: vec!["posts.view".into()],
                },
            ],
            direct_permissions: vec!["reports.export".into()],
        }
    }

    #[test]
    fn test_direct_grant_without_role() {
        let grants = snapshot();
        assert!(grants.has_permission("reports.export"));
    }

    #[test]
    fn test_role_derived_grant() {
        let grants = snapshot();
        assert!(grants.has_permission("posts.edit"));
        assert!(!grants.has_permission("posts.delete"));
    }

    #[test]
    fn test_role_predicates() {
        let grants = snapshot();
        assert!(grants.has_role("editor"));
        assert!(grants.has_any_role(&["admin", "viewer"]));
        assert!(!grants.has_any_role(&["admin"]));
        assert!(grants.has_all_roles(&["editor", "viewer"]));
        assert!(!grants.has_all_roles(&["editor", "admin"]));
    }

    #[test]
    fn test_permission_set_predicates() {
        let grants = snapshot();
        assert!(grants.has_any_permission(&["nope", "posts.view"]));
        assert!(grants.has_all_permissions(&["reports.export", "posts.view"]));
        assert!(!grants.has_all_permissions(&["reports.export", "posts.delete"]));
    }

    #[test]
    fn test_permission_names_are_deduplicated() {
        assert_eq!(
            snapshot().permission_names(),
            vec!["posts.edit", "posts.view", "reports.export"]
        );
    }

    async fn seeded() -> (Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(NewUser {
                name: "kuroneko".into(),
                email: "kuroneko@gmail.com".into(),
                password_hash: "x".into(),
            })
            .await
            .unwrap();
        (store, user.id)
    }

    #[tokio::test]
    async fn test_authorizer_direct_then_role() {
        let (store, user_id) = seeded().await;
        let role = store.create_role("editor", "api").await.unwrap();
        let edit = store.create_permission("posts.edit", "api").await.unwrap();
        let export = store.create_permission("reports.export", "api").await.unwrap();
        store.attach_role(user_id, role.id).await.unwrap();
        store.attach_role_permission(role.id, edit.id).await.unwrap();
        store.attach_user_permission(user_id, export.id).await.unwrap();

        let authorizer = Authorizer::new(store.clone(), PermissionCache::disabled(), "api");

        assert!(authorizer.has_permission(user_id, "reports.export").await.unwrap());
        assert!(authorizer.has_permission(user_id, "posts.edit").await.unwrap());
        assert!(!authorizer.has_permission(user_id, "posts.delete").await.unwrap());
        assert!(authorizer.has_role(user_id, "editor").await.unwrap());
    }

    #[tokio::test]
    async fn test_other_guard_is_ignored() {
        let (store, user_id) = seeded().await;
        let web_role = store.create_role("admin", "web").await.unwrap();
        store.attach_role(user_id, web_role.id).await.unwrap();

        let authorizer = Authorizer::new(store.clone(), PermissionCache::disabled(), "api");

        assert!(!authorizer.has_role(user_id, "admin").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_user_is_an_error() {
        let (store, _) = seeded().await;
        let authorizer = Authorizer::new(store, PermissionCache::disabled(), "api");

        assert!(matches!(
            authorizer.has_permission(999, "anything").await,
            Err(RbacError::UserNotFound(999))
        ));
        assert!(matches!(
            authorizer.has_role(999, "admin").await,
            Err(RbacError::UserNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_cached_grants_tolerate_staleness() {
        let (store, user_id) = seeded().await;
        let role = store.create_role("editor", "api").await.unwrap();
        store.attach_role(user_id, role.id).await.unwrap();

        let authorizer = Authorizer::new(store.clone(), PermissionCache::default(), "api");
        assert!(authorizer.has_role(user_id, "editor").await.unwrap());

        store.detach_role(user_id, role.id).await.unwrap();

        assert!(authorizer.has_role(user_id, "editor").await.unwrap());
        assert!(!authorizer.load_grants(user_id).await.unwrap().has_role("editor"));
    }

    #[tokio::test]
    async fn test_deleted_user_is_an_error_despite_cache() {
        let (store, user_id) = seeded().await;
        let authorizer = Authorizer::new(store.clone(), PermissionCache::default(), "api");

        assert!(!authorizer.has_permission(user_id, "posts.edit").await.unwrap());
        assert!(authorizer.grants(user_id).await.is_ok());

        store.soft_delete_user(user_id).await.unwrap();

        assert!(matches!(
            authorizer.has_permission(user_id, "posts.edit").await,
            Err(RbacError::UserNotFound(id)) if id == user_id
        ));
        assert!(matches!(
            authorizer.has_role(user_id, "editor").await,
            Err(RbacError::UserNotFound(id)) if id == user_id
        ));
    }
}
