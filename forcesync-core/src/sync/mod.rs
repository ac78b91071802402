/*
    sync - The force sync engine

    Ties the transport, correlator, registrar, store and replication
    coordinator into the surface an application uses: save, load, list,
    delete, clone, live updates and teardown.
*/

pub mod engine;
pub mod errors;
pub mod summary;

pub use engine::ForceSyncEngine;
pub use errors::{SyncError, SyncResult};
pub use summary::ForceSummary;
