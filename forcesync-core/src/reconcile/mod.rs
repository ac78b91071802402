/*
    reconcile - Comparing, validating and cloning force snapshots

    - merge: timestamp last-writer-wins between two copies of one force
    - validator: duplicate id detection before replication
    - clone: identity-remapping copy
*/

pub mod clone;
pub mod merge;
pub mod validator;

pub use clone::remap_identities;
pub use merge::{is_newer, pick_latest, reconcile, Winner};
pub use validator::{find_duplicate_ids, DuplicateId};
