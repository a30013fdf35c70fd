//! Read-through cache of per-user grants.
//!
//! Entries expire by TTL only. Role and permission mutations do not evict anything, so a
//! reader may see grants up to one TTL old.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use super::Grants;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CachedGrants {
    grants: Grants,
    cached_at: Instant,
}

#[derive(Clone)]
pub struct PermissionCache {
    entries: Arc<RwLock<HashMap<i64, CachedGrants>>>,
    ttl: Option<Duration>,
}

impl PermissionCache {
    /// A zero TTL yields a disabled cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: (!ttl.is_zero()).then_some(ttl),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    pub async fn get(&self, user_id: i64) -> Option<Grants> {
        let ttl = self.ttl?;
        let entries = self.entries.read().await;
        entries
            .get(&user_id)
            .filter(|entry| entry.cached_at.elapsed() < ttl)
            .map(|entry| entry.grants.clone())
    }

    pub async fn insert(&self, user_id: i64, grants: Grants) {
        let Some(ttl) = self.ttl else {
            return;
        };

        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.cached_at.elapsed() < ttl);
        if entries.len() < before {
            debug!(evicted = before - entries.len(), "Dropped stale grant entries");
        }

        entries.insert(
            user_id,
            CachedGrants {
                grants,
                cached_at: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for PermissionCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
