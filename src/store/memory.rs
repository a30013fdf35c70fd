use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{CredentialStore, StoreError, StoreResult};
use crate::models::{AccessToken, NewAccessToken, NewUser, Permission, Role, User, USER_MODEL};

#[derive(Default)]
struct Sequences {
    users: i64,
    tokens: i64,
    roles: i64,
    permissions: i64,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

#[derive(Default)]
struct MemoryState {
    seq: Sequences,
    users: BTreeMap<i64, User>,
    tokens: BTreeMap<i64, AccessToken>,
    roles: BTreeMap<i64, Role>,
    permissions: BTreeMap<i64, Permission>,
    /// (user_id, role_id)
    user_roles: BTreeSet<(i64, i64)>,
    /// (user_id, permission_id)
    user_permissions: BTreeSet<(i64, i64)>,
    /// (role_id, permission_id)
    role_permissions: BTreeSet<(i64, i64)>,
}

impl MemoryState {
    fn active_user(&self, id: i64) -> Option<&User> {
        self.users.get(&id).filter(|u| !u.is_deleted())
    }

    fn push_token(&mut self, token: NewAccessToken) -> StoreResult<AccessToken> {
        if self.tokens.values().any(|t| t.token_hash == token.token_hash) {
            return Err(StoreError::Conflict(
                "personal_access_tokens_token_unique".to_string(),
            ));
        }

        let now = Utc::now().naive_utc();
        let row = AccessToken {
            id: next(&mut self.seq.tokens),
            tokenable_type: token.tokenable_type,
            tokenable_id: token.tokenable_id,
            name: token.name,
            token_hash: token.token_hash,
            abilities: token.abilities,
            last_used_at: None,
            expires_at: token.expires_at,
            created_at: now,
            updated_at: now,
        };
        self.tokens.insert(row.id, row.clone());
        Ok(row)
    }
}

/// In-process store with the same uniqueness and cascade rules as the SQL schema.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn foreign_key(table: &str) -> StoreError {
    StoreError::Database(format!("insert violates foreign key constraint on {table}"))
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("users_email_unique".to_string()));
        }

        let now = Utc::now().naive_utc();
        let row = User {
            id: next(&mut state.seq.users),
            name: user.name,
            email: user.email,
            email_verified_at: None,
            password_hash: user.password_hash,
            remember_token: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_user(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.active_user(id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| !u.is_deleted() && u.email == email)
            .cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| !u.is_deleted() && u.name == name)
            .cloned())
    }

    async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<(Vec<User>, i64)> {
        let state = self.state.read().await;
        let active: Vec<&User> = state.users.values().filter(|u| !u.is_deleted()).collect();
        let total = active.len() as i64;
        let page = active
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn update_user(&self, user_id: i64, name: &str, email: &str) -> StoreResult<User> {
        let mut state = self.state.write().await;
        if state
            .users
            .values()
            .any(|u| u.id != user_id && u.email == email)
        {
            return Err(StoreError::Conflict("users_email_unique".to_string()));
        }
        let user = state
            .users
            .get_mut(&user_id)
            .filter(|u| !u.is_deleted())
            .ok_or(StoreError::NotFound)?;
        user.name = name.to_string();
        user.email = email.to_string();
        user.updated_at = Utc::now().naive_utc();
        Ok(user.clone())
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .filter(|u| !u.is_deleted())
            .ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now().naive_utc();
        Ok(())
    }

    async fn soft_delete_user(&self, user_id: i64) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .filter(|u| !u.is_deleted())
            .ok_or(StoreError::NotFound)?;
        let now = Utc::now().naive_utc();
        user.deleted_at = Some(now);
        user.updated_at = now;
        Ok(())
    }

    async fn insert_token(&self, token: NewAccessToken) -> StoreResult<AccessToken> {
        self.state.write().await.push_token(token)
    }

    async fn replace_token(&self, old_id: i64, token: NewAccessToken) -> StoreResult<AccessToken> {
        let mut state = self.state.write().await;
        // Both steps happen under one write guard, so no reader sees the gap.
        let previous = state.tokens.remove(&old_id);
        match state.push_token(token) {
            Ok(row) => Ok(row),
            Err(e) => {
                if let Some(previous) = previous {
                    state.tokens.insert(previous.id, previous);
                }
                Err(e)
            }
        }
    }

    async fn find_token(&self, id: i64) -> StoreResult<Option<AccessToken>> {
        Ok(self.state.read().await.tokens.get(&id).cloned())
    }

    async fn touch_token(&self, id: i64, used_at: NaiveDateTime) -> StoreResult<()> {
        if let Some(token) = self.state.write().await.tokens.get_mut(&id) {
            token.last_used_at = Some(used_at);
        }
        Ok(())
    }

    async fn delete_token(&self, id: i64) -> StoreResult<bool> {
        Ok(self.state.write().await.tokens.remove(&id).is_some())
    }

    async fn delete_user_tokens(&self, user_id: i64, except: Option<i64>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let before = state.tokens.len();
        state.tokens.retain(|id, t| {
            let owned = t.tokenable_type == USER_MODEL && t.tokenable_id == user_id;
            !owned || Some(*id) == except
        });
        Ok((before - state.tokens.len()) as u64)
    }

    async fn create_role(&self, name: &str, guard: &str) -> StoreResult<Role> {
        let mut state = self.state.write().await;
        if state
            .roles
            .values()
            .any(|r| r.name == name && r.guard_name == guard)
        {
            return Err(StoreError::Conflict("roles_name_guard_name_unique".to_string()));
        }

        let now = Utc::now().naive_utc();
        let role = Role {
            id: next(&mut state.seq.roles),
            name: name.to_string(),
            guard_name: guard.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn find_role(&self, id: i64) -> StoreResult<Option<Role>> {
        Ok(self.state.read().await.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str, guard: &str) -> StoreResult<Option<Role>> {
        let state = self.state.read().await;
        Ok(state
            .roles
            .values()
            .find(|r| r.name == name && r.guard_name == guard)
            .cloned())
    }

    async fn list_roles(&self, guard: &str) -> StoreResult<Vec<Role>> {
        let state = self.state.read().await;
        let mut roles: Vec<Role> = state
            .roles
            .values()
            .filter(|r| r.guard_name == guard)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn delete_role(&self, id: i64) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.roles.remove(&id).is_none() {
            return Ok(false);
        }
        state.user_roles.retain(|&(_, role_id)| role_id != id);
        state.role_permissions.retain(|&(role_id, _)| role_id != id);
        Ok(true)
    }

    async fn create_permission(&self, name: &str, guard: &str) -> StoreResult<Permission> {
        let mut state = self.state.write().await;
        if state
            .permissions
            .values()
            .any(|p| p.name == name && p.guard_name == guard)
        {
            return Err(StoreError::Conflict(
                "permissions_name_guard_name_unique".to_string(),
            ));
        }

        let now = Utc::now().naive_utc();
        let permission = Permission {
            id: next(&mut state.seq.permissions),
            name: name.to_string(),
            guard_name: guard.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn find_permission(&self, id: i64) -> StoreResult<Option<Permission>> {
        Ok(self.state.read().await.permissions.get(&id).cloned())
    }

    async fn find_permission_by_name(
        &self,
        name: &str,
        guard: &str,
    ) -> StoreResult<Option<Permission>> {
        let state = self.state.read().await;
        Ok(state
            .permissions
            .values()
            .find(|p| p.name == name && p.guard_name == guard)
            .cloned())
    }

    async fn list_permissions(&self, guard: &str) -> StoreResult<Vec<Permission>> {
        let state = self.state.read().await;
        let mut permissions: Vec<Permission> = state
            .permissions
            .values()
            .filter(|p| p.guard_name == guard)
            .cloned()
            .collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn delete_permission(&self, id: i64) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.permissions.remove(&id).is_none() {
            return Ok(false);
        }
        state.user_permissions.retain(|&(_, pid)| pid != id);
        state.role_permissions.retain(|&(_, pid)| pid != id);
        Ok(true)
    }

    async fn attach_role(&self, user_id: i64, role_id: i64) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.roles.contains_key(&role_id) {
            return Err(foreign_key("model_has_roles"));
        }
        state.user_roles.insert((user_id, role_id));
        Ok(())
    }

    async fn detach_role(&self, user_id: i64, role_id: i64) -> StoreResult<bool> {
        Ok(self.state.write().await.user_roles.remove(&(user_id, role_id)))
    }

    async fn sync_roles(&self, user_id: i64, guard: &str, role_ids: &[i64]) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(missing) = role_ids.iter().find(|id| !state.roles.contains_key(*id)) {
            return Err(foreign_key(&format!("model_has_roles (role_id {missing})")));
        }
        let MemoryState {
            roles, user_roles, ..
        } = &mut *state;
        user_roles.retain(|&(uid, role_id)| {
            uid != user_id || roles.get(&role_id).is_some_and(|r| r.guard_name != guard)
        });
        for &role_id in role_ids {
            user_roles.insert((user_id, role_id));
        }
        Ok(())
    }

    async fn attach_role_permission(&self, role_id: i64, permission_id: i64) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.roles.contains_key(&role_id) || !state.permissions.contains_key(&permission_id) {
            return Err(foreign_key("role_has_permissions"));
        }
        state.role_permissions.insert((role_id, permission_id));
        Ok(())
    }

    async fn detach_role_permission(&self, role_id: i64, permission_id: i64) -> StoreResult<bool> {
        Ok(self
            .state
            .write()
            .await
            .role_permissions
            .remove(&(role_id, permission_id)))
    }

    async fn attach_user_permission(&self, user_id: i64, permission_id: i64) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.permissions.contains_key(&permission_id) {
            return Err(foreign_key("model_has_permissions"));
        }
        state.user_permissions.insert((user_id, permission_id));
        Ok(())
    }

    async fn detach_user_permission(&self, user_id: i64, permission_id: i64) -> StoreResult<bool> {
        Ok(self
            .state
            .write()
            .await
            .user_permissions
            .remove(&(user_id, permission_id)))
    }

    async fn sync_user_permissions(
        &self,
        user_id: i64,
        guard: &str,
        permission_ids: &[i64],
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(missing) = permission_ids
            .iter()
            .find(|id| !state.permissions.contains_key(*id))
        {
            return Err(foreign_key(&format!(
                "model_has_permissions (permission_id {missing})"
            )));
        }
        let MemoryState {
            permissions,
            user_permissions,
            ..
        } = &mut *state;
        user_permissions.retain(|&(uid, pid)| {
            uid != user_id || permissions.get(&pid).is_some_and(|p| p.guard_name != guard)
        });
        for &permission_id in permission_ids {
            user_permissions.insert((user_id, permission_id));
        }
        Ok(())
    }

    async fn user_roles(&self, user_id: i64) -> StoreResult<Vec<Role>> {
        let state = self.state.read().await;
        let mut roles: Vec<Role> = state
            .user_roles
            .iter()
            .filter(|&&(uid, _)| uid == user_id)
            .filter_map(|(_, role_id)| state.roles.get(role_id).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn role_permissions(&self, role_ids: &[i64]) -> StoreResult<Vec<(i64, Permission)>> {
        let state = self.state.read().await;
        let mut pairs: Vec<(i64, Permission)> = state
            .role_permissions
            .iter()
            .filter(|(role_id, _)| role_ids.contains(role_id))
            .filter_map(|&(role_id, pid)| {
                state.permissions.get(&pid).map(|p| (role_id, p.clone()))
            })
            .collect();
        pairs.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        Ok(pairs)
    }

    async fn direct_permissions(&self, user_id: i64) -> StoreResult<Vec<Permission>> {
        let state = self.state.read().await;
        let mut permissions: Vec<Permission> = state
            .user_permissions
            .iter()
            .filter(|&&(uid, _)| uid == user_id)
            .filter_map(|(_, pid)| state.permissions.get(pid).cloned())
            .collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$placeholder".to_string(),
        }
    }

    fn new_token(user_id: i64, hash: &str) -> NewAccessToken {
        NewAccessToken {
            tokenable_type: USER_MODEL.to_string(),
            tokenable_id: user_id,
            name: "test".to_string(),
            token_hash: hash.to_string(),
            abilities: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_is_conflict() {
        let store = MemoryStore::new();
        store
            .create_user(new_user("a", "a@example.com"))
            .await
            .expect("first insert");

        let err = store
            .create_user(new_user("b", "a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_soft_deleted_user_is_invisible() {
        let store = MemoryStore::new();
        let user = store
            .create_user(new_user("gone", "gone@example.com"))
            .await
            .unwrap();

        store.soft_delete_user(user.id).await.unwrap();

        assert!(store.find_user(user.id).await.unwrap().is_none());
        assert!(store
            .find_user_by_email("gone@example.com")
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            store.soft_delete_user(user.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_user_tokens_keeps_exception() {
        let store = MemoryStore::new();
        let a = store.insert_token(new_token(1, "a")).await.unwrap();
        let b = store.insert_token(new_token(1, "b")).await.unwrap();
        let other = store.insert_token(new_token(2, "c")).await.unwrap();

        let removed = store.delete_user_tokens(1, Some(b.id)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.find_token(a.id).await.unwrap().is_none());
        assert!(store.find_token(b.id).await.unwrap().is_some());
        assert!(store.find_token(other.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replace_token_restores_old_row_on_conflict() {
        let store = MemoryStore::new();
        let old = store.insert_token(new_token(1, "old")).await.unwrap();
        store.insert_token(new_token(1, "taken")).await.unwrap();

        let result = store.replace_token(old.id, new_token(1, "taken")).await;

        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(store.find_token(old.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_role_cascades_pivots() {
        let store = MemoryStore::new();
        let role = store.create_role("editor", "api").await.unwrap();
        let perm = store.create_permission("posts.edit", "api").await.unwrap();
        store.attach_role(9, role.id).await.unwrap();
        store.attach_role_permission(role.id, perm.id).await.unwrap();

        assert!(store.delete_role(role.id).await.unwrap());

        assert!(store.user_roles(9).await.unwrap().is_empty());
        assert!(store.role_permissions(&[role.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_roles_keeps_other_guards() {
        let store = MemoryStore::new();
        let web_admin = store.create_role("admin", "web").await.unwrap();
        let api_admin = store.create_role("admin", "api").await.unwrap();
        let editor = store.create_role("editor", "api").await.unwrap();
        store.attach_role(3, web_admin.id).await.unwrap();
        store.attach_role(3, api_admin.id).await.unwrap();

        store.sync_roles(3, "api", &[editor.id]).await.unwrap();

        let held: Vec<(String, String)> = store
            .user_roles(3)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.guard_name, r.name))
            .collect();
        assert_eq!(
            held,
            vec![
                ("web".to_string(), "admin".to_string()),
                ("api".to_string(), "editor".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_sync_user_permissions_keeps_other_guards() {
        let store = MemoryStore::new();
        let web = store.create_permission("posts.edit", "web").await.unwrap();
        let old = store.create_permission("posts.edit", "api").await.unwrap();
        let new = store.create_permission("posts.view", "api").await.unwrap();
        store.attach_user_permission(4, web.id).await.unwrap();
        store.attach_user_permission(4, old.id).await.unwrap();

        store.sync_user_permissions(4, "api", &[new.id]).await.unwrap();

        let ids: Vec<i64> = store
            .direct_permissions(4)
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![web.id, new.id]);
    }

    #[tokio::test]
    async fn test_update_user_rejects_taken_email() {
        let store = MemoryStore::new();
        store
            .create_user(new_user("a", "a@example.com"))
            .await
            .unwrap();
        let b = store
            .create_user(new_user("b", "b@example.com"))
            .await
            .unwrap();

        assert!(matches!(
            store.update_user(b.id, "b", "a@example.com").await,
            Err(StoreError::Conflict(_))
        ));

        let renamed = store.update_user(b.id, "bee", "b@example.com").await.unwrap();
        assert_eq!(renamed.name, "bee");
        assert_eq!(renamed.email, "b@example.com");
    }

    #[tokio::test]
    async fn test_attach_unknown_role_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.attach_role(1, 42).await,
            Err(StoreError::Database(_))
        ));
    }
}
