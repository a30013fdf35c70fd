use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::PgConnection;
use std::time::Duration;
use tracing::debug;

use super::{CredentialStore, StoreError, StoreResult};
use crate::config::DatabaseConfig;
use crate::models::{
    AccessToken, ModelHasPermission, ModelHasRole, NewAccessToken, NewPermission, NewRole,
    NewUser, Permission, Role, RoleHasPermission, User, USER_MODEL,
};
use crate::schema::{
    model_has_permissions, model_has_roles, permissions, personal_access_tokens,
    role_has_permissions, roles, users,
};

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub fn create_db_pool(url: &str, config: &DatabaseConfig) -> Result<DbPool, r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(url);
    r2d2::Pool::builder()
        .max_size(config.max_connections)
        .min_idle(Some(config.min_connections))
        .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .build(manager)
}

/// Diesel-backed store. Every query runs on the blocking pool, bounded by the r2d2 size.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            op(&mut conn)
        })
        .await?
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        self.run(|conn| {
            diesel::sql_query("SELECT 1").execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.run(move |conn| {
            Ok(diesel::insert_into(users::table)
                .values(&user)
                .returning(User::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn find_user(&self, id: i64) -> StoreResult<Option<User>> {
        self.run(move |conn| {
            Ok(users::table
                .filter(users::id.eq(id))
                .filter(users::deleted_at.is_null())
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.to_owned();
        self.run(move |conn| {
            Ok(users::table
                .filter(users::email.eq(email))
                .filter(users::deleted_at.is_null())
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        let name = name.to_owned();
        self.run(move |conn| {
            Ok(users::table
                .filter(users::name.eq(name))
                .filter(users::deleted_at.is_null())
                .order(users::id.asc())
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn list_users(&self, limit: i64, offset: i64) -> StoreResult<(Vec<User>, i64)> {
        self.run(move |conn| {
            let total: i64 = users::table
                .filter(users::deleted_at.is_null())
                .count()
                .get_result(conn)?;

            let page = users::table
                .filter(users::deleted_at.is_null())
                .order(users::id.asc())
                .limit(limit)
                .offset(offset)
                .select(User::as_select())
                .load(conn)?;

            Ok((page, total))
        })
        .await
    }

    async fn update_user(&self, user_id: i64, name: &str, email: &str) -> StoreResult<User> {
        let (name, email) = (name.to_owned(), email.to_owned());
        self.run(move |conn| {
            Ok(diesel::update(
                users::table
                    .filter(users::id.eq(user_id))
                    .filter(users::deleted_at.is_null()),
            )
            .set((
                users::name.eq(name),
                users::email.eq(email),
                users::updated_at.eq(now()),
            ))
            .returning(User::as_returning())
            .get_result(conn)?)
        })
        .await
    }

    async fn update_password(&self, user_id: i64, password_hash: &str) -> StoreResult<()> {
        let password_hash = password_hash.to_owned();
        self.run(move |conn| {
            let updated = diesel::update(
                users::table
                    .filter(users::id.eq(user_id))
                    .filter(users::deleted_at.is_null()),
            )
            .set((
                users::password.eq(password_hash),
                users::updated_at.eq(now()),
            ))
            .execute(conn)?;

            if updated == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn soft_delete_user(&self, user_id: i64) -> StoreResult<()> {
        self.run(move |conn| {
            let stamp = now();
            let updated = diesel::update(
                users::table
                    .filter(users::id.eq(user_id))
                    .filter(users::deleted_at.is_null()),
            )
            .set((users::deleted_at.eq(Some(stamp)), users::updated_at.eq(stamp)))
            .execute(conn)?;

            if updated == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn insert_token(&self, token: NewAccessToken) -> StoreResult<AccessToken> {
        self.run(move |conn| {
            let row = conn.transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::insert_into(personal_access_tokens::table)
                    .values(&token)
                    .returning(AccessToken::as_returning())
                    .get_result(conn)
            })?;
            Ok(row)
        })
        .await
    }

    async fn replace_token(&self, old_id: i64, token: NewAccessToken) -> StoreResult<AccessToken> {
        self.run(move |conn| {
            let row = conn.transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::delete(personal_access_tokens::table.find(old_id)).execute(conn)?;
                diesel::insert_into(personal_access_tokens::table)
                    .values(&token)
                    .returning(AccessToken::as_returning())
                    .get_result(conn)
            })?;
            debug!(old_token_id = old_id, new_token_id = row.id, "Replaced access token");
            Ok(row)
        })
        .await
    }

    async fn find_token(&self, id: i64) -> StoreResult<Option<AccessToken>> {
        self.run(move |conn| {
            Ok(personal_access_tokens::table
                .find(id)
                .select(AccessToken::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn touch_token(&self, id: i64, used_at: NaiveDateTime) -> StoreResult<()> {
        self.run(move |conn| {
            diesel::update(personal_access_tokens::table.find(id))
                .set(personal_access_tokens::last_used_at.eq(Some(used_at)))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn delete_token(&self, id: i64) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(personal_access_tokens::table.find(id)).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn delete_user_tokens(&self, user_id: i64, except: Option<i64>) -> StoreResult<u64> {
        self.run(move |conn| {
            let owned = personal_access_tokens::table
                .filter(personal_access_tokens::tokenable_type.eq(USER_MODEL))
                .filter(personal_access_tokens::tokenable_id.eq(user_id));

            let deleted = match except {
                Some(keep) => diesel::delete(owned.filter(personal_access_tokens::id.ne(keep)))
                    .execute(conn)?,
                None => diesel::delete(owned).execute(conn)?,
            };
            Ok(deleted as u64)
        })
        .await
    }

    async fn create_role(&self, name: &str, guard: &str) -> StoreResult<Role> {
        let (name, guard) = (name.to_owned(), guard.to_owned());
        self.run(move |conn| {
            Ok(diesel::insert_into(roles::table)
                .values(&NewRole {
                    name: &name,
                    guard_name: &guard,
                })
                .returning(Role::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn find_role(&self, id: i64) -> StoreResult<Option<Role>> {
        self.run(move |conn| {
            Ok(roles::table
                .find(id)
                .select(Role::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn find_role_by_name(&self, name: &str, guard: &str) -> StoreResult<Option<Role>> {
        let (name, guard) = (name.to_owned(), guard.to_owned());
        self.run(move |conn| {
            Ok(roles::table
                .filter(roles::name.eq(name))
                .filter(roles::guard_name.eq(guard))
                .select(Role::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn list_roles(&self, guard: &str) -> StoreResult<Vec<Role>> {
        let guard = guard.to_owned();
        self.run(move |conn| {
            Ok(roles::table
                .filter(roles::guard_name.eq(guard))
                .order(roles::name.asc())
                .select(Role::as_select())
                .load(conn)?)
        })
        .await
    }

    async fn delete_role(&self, id: i64) -> StoreResult<bool> {
        // model_has_roles and role_has_permissions cascade on the foreign key.
        self.run(move |conn| Ok(diesel::delete(roles::table.find(id)).execute(conn)? > 0))
            .await
    }

    async fn create_permission(&self, name: &str, guard: &str) -> StoreResult<Permission> {
        let (name, guard) = (name.to_owned(), guard.to_owned());
        self.run(move |conn| {
            Ok(diesel::insert_into(permissions::table)
                .values(&NewPermission {
                    name: &name,
                    guard_name: &guard,
                })
                .returning(Permission::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    async fn find_permission(&self, id: i64) -> StoreResult<Option<Permission>> {
        self.run(move |conn| {
            Ok(permissions::table
                .find(id)
                .select(Permission::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn find_permission_by_name(
        &self,
        name: &str,
        guard: &str,
    ) -> StoreResult<Option<Permission>> {
        let (name, guard) = (name.to_owned(), guard.to_owned());
        self.run(move |conn| {
            Ok(permissions::table
                .filter(permissions::name.eq(name))
                .filter(permissions::guard_name.eq(guard))
                .select(Permission::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    async fn list_permissions(&self, guard: &str) -> StoreResult<Vec<Permission>> {
        let guard = guard.to_owned();
        self.run(move |conn| {
            Ok(permissions::table
                .filter(permissions::guard_name.eq(guard))
                .order(permissions::name.asc())
                .select(Permission::as_select())
                .load(conn)?)
        })
        .await
    }

    async fn delete_permission(&self, id: i64) -> StoreResult<bool> {
        self.run(move |conn| Ok(diesel::delete(permissions::table.find(id)).execute(conn)? > 0))
            .await
    }

    async fn attach_role(&self, user_id: i64, role_id: i64) -> StoreResult<()> {
        self.run(move |conn| {
            diesel::insert_into(model_has_roles::table)
                .values(&ModelHasRole {
                    role_id,
                    model_type: USER_MODEL,
                    model_id: user_id,
                })
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn detach_role(&self, user_id: i64, role_id: i64) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(
                model_has_roles::table
                    .filter(model_has_roles::role_id.eq(role_id))
                    .filter(model_has_roles::model_type.eq(USER_MODEL))
                    .filter(model_has_roles::model_id.eq(user_id)),
            )
            .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn sync_roles(&self, user_id: i64, guard: &str, role_ids: &[i64]) -> StoreResult<()> {
        let guard = guard.to_owned();
        let mut role_ids = role_ids.to_vec();
        role_ids.sort_unstable();
        role_ids.dedup();

        self.run(move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let guard_roles = roles::table
                    .filter(roles::guard_name.eq(guard))
                    .select(roles::id);
                diesel::delete(
                    model_has_roles::table
                        .filter(model_has_roles::model_type.eq(USER_MODEL))
                        .filter(model_has_roles::model_id.eq(user_id))
                        .filter(model_has_roles::role_id.eq_any(guard_roles)),
                )
                .execute(conn)?;

                let rows: Vec<ModelHasRole> = role_ids
                    .iter()
                    .map(|&role_id| ModelHasRole {
                        role_id,
                        model_type: USER_MODEL,
                        model_id: user_id,
                    })
                    .collect();

                if !rows.is_empty() {
                    diesel::insert_into(model_has_roles::table)
                        .values(&rows)
                        .execute(conn)?;
                }
                Ok(())
            })?;
            Ok(())
        })
        .await
    }

    async fn attach_role_permission(&self, role_id: i64, permission_id: i64) -> StoreResult<()> {
        self.run(move |conn| {
            diesel::insert_into(role_has_permissions::table)
                .values(&RoleHasPermission {
                    permission_id,
                    role_id,
                })
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn detach_role_permission(&self, role_id: i64, permission_id: i64) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(
                role_has_permissions::table
                    .filter(role_has_permissions::role_id.eq(role_id))
                    .filter(role_has_permissions::permission_id.eq(permission_id)),
            )
            .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn attach_user_permission(&self, user_id: i64, permission_id: i64) -> StoreResult<()> {
        self.run(move |conn| {
            diesel::insert_into(model_has_permissions::table)
                .values(&ModelHasPermission {
                    permission_id,
                    model_type: USER_MODEL,
                    model_id: user_id,
                })
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn detach_user_permission(&self, user_id: i64, permission_id: i64) -> StoreResult<bool> {
        self.run(move |conn| {
            let deleted = diesel::delete(
                model_has_permissions::table
                    .filter(model_has_permissions::permission_id.eq(permission_id))
                    .filter(model_has_permissions::model_type.eq(USER_MODEL))
                    .filter(model_has_permissions::model_id.eq(user_id)),
            )
            .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn sync_user_permissions(
        &self,
        user_id: i64,
        guard: &str,
        permission_ids: &[i64],
    ) -> StoreResult<()> {
        let guard = guard.to_owned();
        let mut permission_ids = permission_ids.to_vec();
        permission_ids.sort_unstable();
        permission_ids.dedup();

        self.run(move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let guard_permissions = permissions::table
                    .filter(permissions::guard_name.eq(guard))
                    .select(permissions::id);
                diesel::delete(
                    model_has_permissions::table
                        .filter(model_has_permissions::model_type.eq(USER_MODEL))
                        .filter(model_has_permissions::model_id.eq(user_id))
                        .filter(model_has_permissions::permission_id.eq_any(guard_permissions)),
                )
                .execute(conn)?;

                let rows: Vec<ModelHasPermission> = permission_ids
                    .iter()
                    .map(|&permission_id| ModelHasPermission {
                        permission_id,
                        model_type: USER_MODEL,
                        model_id: user_id,
                    })
                    .collect();

                if !rows.is_empty() {
                    diesel::insert_into(model_has_permissions::table)
                        .values(&rows)
                        .execute(conn)?;
                }
                Ok(())
            })?;
            Ok(())
        })
        .await
    }

    async fn user_roles(&self, user_id: i64) -> StoreResult<Vec<Role>> {
        self.run(move |conn| {
            Ok(model_has_roles::table
                .inner_join(roles::table)
                .filter(model_has_roles::model_type.eq(USER_MODEL))
                .filter(model_has_roles::model_id.eq(user_id))
                .order(roles::name.asc())
                .select(Role::as_select())
                .load(conn)?)
        })
        .await
    }

    async fn role_permissions(&self, role_ids: &[i64]) -> StoreResult<Vec<(i64, Permission)>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let role_ids = role_ids.to_vec();

        self.run(move |conn| {
            Ok(role_has_permissions::table
                .inner_join(permissions::table)
                .filter(role_has_permissions::role_id.eq_any(role_ids))
                .order(permissions::name.asc())
                .select((role_has_permissions::role_id, Permission::as_select()))
                .load::<(i64, Permission)>(conn)?)
        })
        .await
    }

    async fn direct_permissions(&self, user_id: i64) -> StoreResult<Vec<Permission>> {
        self.run(move |conn| {
            Ok(model_has_permissions::table
                .inner_join(permissions::table)
                .filter(model_has_permissions::model_type.eq(USER_MODEL))
                .filter(model_has_permissions::model_id.eq(user_id))
                .order(permissions::name.asc())
                .select(Permission::as_select())
                .load(conn)?)
        })
        .await
    }
}
