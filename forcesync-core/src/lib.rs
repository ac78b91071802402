//! ForceSync core
//!
//! Local-first persistence and cloud replication for wargame rosters ("forces").
//! The crate owns the duplex channel to the sync service, request/response
//! correlation on top of it, debounced replication of force snapshots and the
//! timestamp-based reconciliation between local and remote copies.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod reconcile;
pub mod replication;
pub mod rpc;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod sync;
pub mod test_utils;
pub mod transport;

pub use config::SyncConfig;
pub use logging::{init_logging, LogLevel};
pub use model::{Force, ForceHandle, ForceId, ForceSnapshot, GameSystem};
pub use sync::{ForceSummary, ForceSyncEngine, SyncError, SyncResult};
