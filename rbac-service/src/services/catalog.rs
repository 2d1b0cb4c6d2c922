use std::collections::HashMap;
use std::sync::Arc;

use super::store::{AuthzStore, StorageDeadline};
use super::AuthzError;
use crate::models::action::canonical_codes;
use crate::models::Action;

/// Persistent view of the permission-point catalog.
#[derive(Clone)]
pub struct ActionCatalog {
    store: Arc<dyn AuthzStore>,
    deadline: StorageDeadline,
}

impl ActionCatalog {
    pub fn new(store: Arc<dyn AuthzStore>, deadline: StorageDeadline) -> Self {
        Self { store, deadline }
    }

    /// Persist every canonical code that is not stored yet and return the
    /// full `code -> Action` map. Safe to call on every startup.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_actions_seeded(&self) -> Result<HashMap<String, Action>, AuthzError> {
        let mut by_code: HashMap<String, Action> = self
            .deadline
            .run("get_all_actions", self.store.get_all_actions())
            .await?
            .into_iter()
            .map(|a| (a.code.clone(), a))
            .collect();

        let mut inserted = 0usize;
        for code in canonical_codes() {
            let key = code.to_string();
            if by_code.contains_key(&key) {
                continue;
            }
            let action = Action::system(code);
            let stored = self
                .deadline
                .run("upsert_action", self.store.upsert_action(&action))
                .await?;
            by_code.insert(key, stored);
            inserted += 1;
        }

        tracing::info!(
            total = by_code.len(),
            inserted,
            "Action catalog seeded"
        );
        Ok(by_code)
    }

    pub async fn list_actions(&self) -> Result<Vec<Action>, AuthzError> {
        self.deadline
            .run("get_all_actions", self.store.get_all_actions())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryStore;

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let catalog = ActionCatalog::new(store.clone(), StorageDeadline::default());

        let first = catalog.ensure_actions_seeded().await.unwrap();
        let second = catalog.ensure_actions_seeded().await.unwrap();

        assert_eq!(first.len(), 20);
        assert_eq!(second.len(), 20);
        assert_eq!(first["form:read"].id, second["form:read"].id);
        assert_eq!(catalog.list_actions().await.unwrap().len(), 20);
    }
}
