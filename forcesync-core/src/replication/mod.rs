/*
    replication - Getting local force state to the sync service

    Saves are debounced per instance id and coalesced; ownership conflicts
    are recovered by re-keying; teardown flushes whatever is pending.
*/

pub mod coordinator;

pub use coordinator::{
    RekeyEvent, ReplicationCoordinator, ReplicationSettings, SaveOutcome, SaveTicket,
};
