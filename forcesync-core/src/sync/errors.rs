use crate::config::ConfigError;
use crate::model::ModelError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Force has no instance id")]
    MissingInstanceId,
}

pub type SyncResult<T> = Result<T, SyncError>;
