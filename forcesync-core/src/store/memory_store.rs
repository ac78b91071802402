/*
    memory_store.rs - Volatile force store

    Keeps snapshots in a map. Used by tests and by the CLI when no data
    directory is configured.
*/

use super::errors::{StoreError, StoreResult};
use super::ForceStore;
use crate::model::{ForceId, ForceSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Helper to convert poison errors into StoreError
fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Internal("Lock poisoned: a thread panicked while holding the lock".to_string())
}

#[derive(Debug, Default)]
pub struct MemoryForceStore {
    forces: RwLock<HashMap<ForceId, ForceSnapshot>>,
}

impl MemoryForceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.forces.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ForceStore for MemoryForceStore {
    async fn get_force(&self, id: &ForceId) -> StoreResult<Option<ForceSnapshot>> {
        Ok(self.forces.read().map_err(handle_poison)?.get(id).cloned())
    }

    async fn save_force(&self, snapshot: &ForceSnapshot) -> StoreResult<()> {
        let id = snapshot.instance_id.clone().ok_or(StoreError::MissingInstanceId)?;
        self.forces
            .write()
            .map_err(handle_poison)?
            .insert(id, snapshot.clone());
        Ok(())
    }

    async fn delete_force(&self, id: &ForceId) -> StoreResult<bool> {
        Ok(self.forces.write().map_err(handle_poison)?.remove(id).is_some())
    }

    async fn list_forces(&self) -> StoreResult<Vec<ForceSnapshot>> {
        let forces = self.forces.read().map_err(handle_poison)?;
        let mut list: Vec<_> = forces.values().cloned().collect();
        list.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GameSystem;

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryForceStore::new();
        let mut force = GameSystem::Classic.new_force("Stored");
        let snapshot = force.to_snapshot();
        let id = snapshot.instance_id.clone().unwrap();

        store.save_force(&snapshot).await.unwrap();
        assert_eq!(store.get_force(&id).await.unwrap(), Some(snapshot));
        assert_eq!(store.list_forces().await.unwrap().len(), 1);

        assert!(store.delete_force(&id).await.unwrap());
        assert!(!store.delete_force(&id).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_poisoned_lock_is_a_store_error() {
        let store = std::sync::Arc::new(MemoryForceStore::new());
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.forces.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        let result = store.list_forces().await;
        assert!(matches!(result, Err(StoreError::Internal(_))));
    }

    #[tokio::test]
    async fn test_save_requires_identity() {
        let store = MemoryForceStore::new();
        let force = GameSystem::Classic.new_force("Anonymous");
        let result = store.save_force(&force.build_snapshot()).await;
        assert!(matches!(result, Err(StoreError::MissingInstanceId)));
    }
}
