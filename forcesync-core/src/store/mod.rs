/*
    store - Local-first durable copy of every force

    The sync engine writes here before anything goes to the network, and
    reads here first when loading. Implementations:
    - MemoryForceStore: volatile, for tests and ephemeral sessions
    - FileForceStore: one JSON file per force
*/

pub mod errors;
pub mod file_store;
pub mod memory_store;

pub use errors::{StoreError, StoreResult};
pub use file_store::FileForceStore;
pub use memory_store::MemoryForceStore;

use crate::model::{ForceId, ForceSnapshot};
use async_trait::async_trait;

/// Durable storage for force snapshots, keyed by instance id
#[async_trait]
pub trait ForceStore: Send + Sync {
    async fn get_force(&self, id: &ForceId) -> StoreResult<Option<ForceSnapshot>>;

    /// Fails with `MissingInstanceId` if the snapshot was never assigned one
    async fn save_force(&self, snapshot: &ForceSnapshot) -> StoreResult<()>;

    /// Returns whether a copy existed
    async fn delete_force(&self, id: &ForceId) -> StoreResult<bool>;

    async fn list_forces(&self) -> StoreResult<Vec<ForceSnapshot>>;
}
