//! Process-wide role cache.
//!
//! The cache holds an immutable [`RoleSnapshot`] behind a reader/writer lock.
//! A refresh builds a new snapshot off-lock and swaps the pointer; readers
//! clone the `Arc` and never observe a half-loaded state.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::clock::Clock;
use super::metrics;
use super::store::{AuthzStore, StorageDeadline};
use super::AuthzError;
use crate::models::role::role_index_key;
use crate::models::{ResourceType, Role, RolePermissionSet};

/// Immutable projection of all roles and their permission sets.
#[derive(Debug, Default)]
pub struct RoleSnapshot {
    roles: HashMap<Uuid, Role>,
    role_permissions: HashMap<Uuid, RolePermissionSet>,
    code_index: HashMap<String, Uuid>,
    last_loaded_at: Option<DateTime<Utc>>,
}

impl RoleSnapshot {
    pub fn role(&self, role_id: Uuid) -> Option<&Role> {
        self.roles.get(&role_id)
    }

    pub fn role_by_code(&self, resource_type: ResourceType, code: &str) -> Option<&Role> {
        self.code_index
            .get(&role_index_key(resource_type, code))
            .and_then(|id| self.roles.get(id))
    }

    /// Permission set of a cached role. A role without permission rows has an
    /// empty set; `None` means the role itself is unknown to this snapshot.
    pub fn permissions(&self, role_id: Uuid) -> Option<&RolePermissionSet> {
        self.role_permissions.get(&role_id)
    }

    pub fn last_loaded_at(&self) -> Option<DateTime<Utc>> {
        self.last_loaded_at
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

pub struct RoleCache {
    store: Arc<dyn AuthzStore>,
    clock: Arc<dyn Clock>,
    deadline: StorageDeadline,
    ttl: chrono::Duration,
    snapshot: RwLock<Arc<RoleSnapshot>>,
    refresh_guard: Mutex<()>,
}

impl RoleCache {
    pub fn new(
        store: Arc<dyn AuthzStore>,
        clock: Arc<dyn Clock>,
        deadline: StorageDeadline,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            deadline,
            ttl: chrono::Duration::from_std(refresh_interval)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            snapshot: RwLock::new(Arc::new(RoleSnapshot::default())),
            refresh_guard: Mutex::new(()),
        }
    }

    /// Reload now, waiting for any in-flight load to finish first.
    pub async fn refresh(&self) -> Result<(), AuthzError> {
        let _guard = self.refresh_guard.lock().await;
        self.reload().await
    }

    /// Reload unless another load is already running. Returns whether this
    /// call performed the load.
    pub async fn try_refresh(&self) -> Result<bool, AuthzError> {
        match self.refresh_guard.try_lock() {
            Ok(_guard) => self.reload().await.map(|_| true),
            Err(_) => {
                tracing::debug!("Role cache refresh already in flight");
                Ok(false)
            }
        }
    }

    async fn reload(&self) -> Result<(), AuthzError> {
        match self.load_snapshot().await {
            Ok(next) => {
                let roles = next.len();
                *self.snapshot.write().await = Arc::new(next);
                metrics::record_cache_refresh("success", roles);
                tracing::info!(roles, "Role cache refreshed");
                Ok(())
            }
            Err(e) => {
                metrics::record_cache_refresh("failure", 0);
                tracing::warn!(error = %e, "Role cache refresh failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    async fn load_snapshot(&self) -> Result<RoleSnapshot, AuthzError> {
        let roles = self
            .deadline
            .run("get_all_roles", self.store.get_all_roles())
            .await?;
        let links = self
            .deadline
            .run("get_all_role_permissions", self.store.get_all_role_permissions())
            .await?;
        let actions: HashMap<Uuid, _> = self
            .deadline
            .run("get_all_actions", self.store.get_all_actions())
            .await?
            .into_iter()
            .map(|a| (a.id, a.action_code()))
            .collect();

        let mut role_permissions: HashMap<Uuid, RolePermissionSet> = roles
            .iter()
            .map(|r| (r.id, RolePermissionSet::new()))
            .collect();
        for link in links {
            let Some(set) = role_permissions.get_mut(&link.role_id) else {
                continue;
            };
            match actions.get(&link.action_id) {
                Some(code) => set.insert(*code),
                None => tracing::warn!(
                    role_id = %link.role_id,
                    action_id = %link.action_id,
                    "Role permission references unknown action"
                ),
            }
        }

        let code_index = roles.iter().map(|r| (r.index_key(), r.id)).collect();
        let roles = roles.into_iter().map(|r| (r.id, r)).collect();

        Ok(RoleSnapshot {
            roles,
            role_permissions,
            code_index,
            last_loaded_at: Some(self.clock.now()),
        })
    }

    /// Current snapshot, refreshed first when older than the refresh interval.
    pub async fn snapshot(&self) -> Arc<RoleSnapshot> {
        let current = self.snapshot.read().await.clone();
        let expired = current
            .last_loaded_at
            .is_none_or(|at| self.clock.now() - at >= self.ttl);
        if !expired {
            return current;
        }
        match self.try_refresh().await {
            Ok(true) => self.snapshot.read().await.clone(),
            _ => current,
        }
    }

    pub async fn get_role(&self, role_id: Uuid) -> Option<Role> {
        self.snapshot().await.role(role_id).cloned()
    }

    pub async fn get_role_by_code(&self, resource_type: ResourceType, code: &str) -> Option<Role> {
        self.snapshot()
            .await
            .role_by_code(resource_type, code)
            .cloned()
    }

    /// Cached roles, optionally restricted to one primary resource type,
    /// ordered by resource type then code.
    pub async fn list_roles(&self, resource_type: Option<ResourceType>) -> Vec<Role> {
        let snapshot = self.snapshot().await;
        let mut roles: Vec<Role> = snapshot
            .roles
            .values()
            .filter(|r| resource_type.is_none_or(|rt| r.resource_type == rt))
            .cloned()
            .collect();
        roles.sort_by(|a, b| {
            a.resource_type
                .cmp(&b.resource_type)
                .then_with(|| a.code.cmp(&b.code))
        });
        roles
    }

    pub async fn permissions_of(&self, role_id: Uuid) -> Option<RolePermissionSet> {
        self.snapshot().await.permissions(role_id).cloned()
    }

    pub async fn last_loaded_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.read().await.last_loaded_at
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot.read().await.is_empty()
    }

    /// Periodic refresh until `shutdown` is cancelled.
    pub fn spawn_refresher(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; startup already loaded.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Role cache refresher shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.try_refresh().await {
                            tracing::error!(error = %e, "Periodic role cache refresh failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, ActionCode, ActionType, Role};
    use crate::services::clock::FixedClock;
    use crate::services::MemoryStore;

    async fn seeded_store() -> (Arc<MemoryStore>, Role) {
        let store = Arc::new(MemoryStore::new());
        let read = store
            .upsert_action(&Action::system(ActionCode::new(
                ResourceType::Table,
                ActionType::Read,
            )))
            .await
            .unwrap();
        let role = Role::new(
            "Table Viewer".to_string(),
            "viewer".to_string(),
            ResourceType::Table,
            None,
            "system".to_string(),
        );
        store.create_role(&role, &[read.id]).await.unwrap();
        (store, role)
    }

    fn cache(store: Arc<MemoryStore>, clock: Arc<FixedClock>) -> RoleCache {
        RoleCache::new(
            store,
            clock,
            StorageDeadline::default(),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_refresh_indexes_by_type_and_code() {
        let (store, role) = seeded_store().await;
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = cache(store, clock);
        cache.refresh().await.unwrap();

        assert_eq!(cache.len().await, 1);
        let found = cache
            .get_role_by_code(ResourceType::Table, "viewer")
            .await
            .unwrap();
        assert_eq!(found.id, role.id);
        assert!(cache
            .get_role_by_code(ResourceType::Form, "viewer")
            .await
            .is_none());

        let perms = cache.permissions_of(role.id).await.unwrap();
        assert!(perms.contains(&ActionCode::new(ResourceType::Table, ActionType::Read)));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let (store, role) = seeded_store().await;
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = cache(store.clone(), clock);
        cache.refresh().await.unwrap();

        store.set_unavailable(true);
        assert!(cache.refresh().await.is_err());
        store.set_unavailable(false);

        assert_eq!(cache.len().await, 1);
        assert!(cache.get_role(role.id).await.is_some());
    }

    #[tokio::test]
    async fn test_expired_snapshot_reloads_on_access() {
        let (store, _) = seeded_store().await;
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = cache(store.clone(), clock.clone());
        cache.refresh().await.unwrap();
        let first = cache.last_loaded_at().await.unwrap();

        let other = Role::new(
            "Form Viewer".to_string(),
            "viewer".to_string(),
            ResourceType::Form,
            None,
            "system".to_string(),
        );
        store.create_role(&other, &[]).await.unwrap();

        // Within the interval the stale snapshot is served.
        assert_eq!(cache.list_roles(None).await.len(), 1);

        clock.advance(chrono::Duration::minutes(6));
        assert_eq!(cache.list_roles(None).await.len(), 2);
        assert!(cache.last_loaded_at().await.unwrap() > first);
        assert_eq!(
            cache.list_roles(Some(ResourceType::Form)).await[0].id,
            other.id
        );
    }

    #[tokio::test]
    async fn test_try_refresh_skips_while_a_load_is_in_flight() {
        let (store, _) = seeded_store().await;
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = cache(store.clone(), clock);
        cache.refresh().await.unwrap();
        let loaded_at = cache.last_loaded_at().await;

        let extra = Role::new(
            "Chart Viewer".to_string(),
            "viewer".to_string(),
            ResourceType::Chart,
            None,
            "system".to_string(),
        );
        store.create_role(&extra, &[]).await.unwrap();

        let held = cache.refresh_guard.lock().await;
        assert!(matches!(cache.try_refresh().await, Ok(false)));
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.last_loaded_at().await, loaded_at);
        drop(held);

        assert!(matches!(cache.try_refresh().await, Ok(true)));
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_refresher_stops_on_cancel() {
        let (store, _) = seeded_store().await;
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = Arc::new(cache(store, clock));
        cache.refresh().await.unwrap();

        let token = CancellationToken::new();
        let handle = cache
            .clone()
            .spawn_refresher(Duration::from_millis(10), token.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        handle.await.unwrap();
        assert_eq!(cache.len().await, 1);
    }
}
