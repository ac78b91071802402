/*
    errors.rs - Error types for the local force store

    Defines the failures of the durable local copy:
    - I/O while reading or writing snapshot files
    - snapshots that cannot be encoded or decoded
    - snapshots that cannot be stored (no instance id)
*/

use thiserror::Error;

/// Errors that can occur in the local store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage I/O error
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot has no instance id yet
    #[error("Snapshot has no instance id")]
    MissingInstanceId,

    /// Snapshot on disk is unusable
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// Lock poisoned or similar internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
