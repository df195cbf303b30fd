//! Progress store with persistent database storage.

use std::collections::HashMap;
use std::sync::RwLock;

use super::publisher::{ProgressPublisher, PublishError};
use super::state::{ProgressState, TaskKind};
use crate::db::{progress_repo, Database, DatabaseError};
use crate::services::TenantId;

type Key = (TenantId, TaskKind);

/// Latest progress state per tenant and task kind.
///
/// Reads are served from an in-memory cache; when a database is attached
/// every published state is also written to `task_progress`, and cache
/// misses fall back to it.
pub struct ProgressStore {
    db: Option<Database>,
    cache: RwLock<HashMap<Key, ProgressState>>,
}

impl ProgressStore {
    pub fn new(db: Option<Database>) -> Self {
        Self {
            db,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, kind: TaskKind) -> Option<ProgressState> {
        let cached = match self.cache.read() {
            Ok(guard) => guard.get(&(tenant_id, kind)).cloned(),
            Err(poisoned) => {
                log::warn!("Progress store cache lock was poisoned, recovering");
                poisoned.into_inner().get(&(tenant_id, kind)).cloned()
            }
        };
        if cached.is_some() {
            return cached;
        }

        let db = self.db.as_ref()?;
        match progress_repo::find(db, tenant_id, kind) {
            Ok(state) => state,
            Err(e) => {
                log::warn!(
                    "Failed to load {} progress of tenant {}: {}",
                    kind,
                    tenant_id,
                    e
                );
                None
            }
        }
    }

    /// Forgets the state of a finished run.
    pub fn remove(&self, tenant_id: TenantId, kind: TaskKind) -> Result<(), DatabaseError> {
        match self.cache.write() {
            Ok(mut guard) => {
                guard.remove(&(tenant_id, kind));
            }
            Err(poisoned) => {
                log::warn!("Progress store cache lock was poisoned, recovering");
                poisoned.into_inner().remove(&(tenant_id, kind));
            }
        }
        if let Some(db) = &self.db {
            progress_repo::delete(db, tenant_id, kind)?;
        }
        Ok(())
    }

    /// Runs recorded as unfinished in the database, e.g. after a restart.
    pub fn unfinished(&self) -> Vec<ProgressState> {
        let Some(db) = &self.db else {
            return Vec::new();
        };
        progress_repo::list_running(db).unwrap_or_else(|e| {
            log::warn!("Failed to list unfinished runs: {}", e);
            Vec::new()
        })
    }

    fn cache_state(&self, state: &ProgressState) {
        let key = (state.tenant_id, state.kind);
        match self.cache.write() {
            Ok(mut guard) => {
                guard.insert(key, state.clone());
            }
            Err(poisoned) => {
                log::warn!("Progress store cache lock was poisoned, recovering");
                poisoned.into_inner().insert(key, state.clone());
            }
        }
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProgressPublisher for ProgressStore {
    fn publish(&self, state: &ProgressState) -> Result<(), PublishError> {
        self.cache_state(state);
        if let Some(db) = &self.db {
            progress_repo::upsert(db, state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_updates_cache() {
        let store = ProgressStore::default();
        let mut state = ProgressState::new(TaskKind::Backup, 1);
        store.publish(&state).unwrap();
        state.advance(60.0);
        store.publish(&state).unwrap();

        assert_eq!(store.get(1, TaskKind::Backup).unwrap().percentage, 60.0);
        assert!(store.get(1, TaskKind::Restore).is_none());
    }

    #[test]
    fn test_falls_back_to_database() {
        let db = Database::open_in_memory().unwrap();
        let writer = ProgressStore::new(Some(db.clone()));
        let state = ProgressState::new(TaskKind::Restore, 2);
        writer.publish(&state).unwrap();

        let reader = ProgressStore::new(Some(db));
        assert_eq!(reader.get(2, TaskKind::Restore).unwrap().id, state.id);
        assert_eq!(reader.unfinished().len(), 1);
    }

    #[test]
    fn test_remove() {
        let db = Database::open_in_memory().unwrap();
        let store = ProgressStore::new(Some(db));
        store
            .publish(&ProgressState::new(TaskKind::Transfer, 3))
            .unwrap();
        store.remove(3, TaskKind::Transfer).unwrap();
        assert!(store.get(3, TaskKind::Transfer).is_none());
    }
}
