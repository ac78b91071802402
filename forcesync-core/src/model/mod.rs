/*
    model - Force aggregate and its wire shape

    Submodules:
    - types: identifiers and timestamp helpers
    - unit / group / c3: parts of a force
    - force: the aggregate, its mutation API and snapshot conversion
    - game_system: factory for forces and units per rules system
    - snapshot: serializable form used by storage and the wire
    - changes: debounced mutation feed
*/

pub mod c3;
pub mod changes;
pub mod errors;
pub mod force;
pub mod game_system;
pub mod group;
pub mod snapshot;
pub mod types;
pub mod unit;

pub use c3::C3Network;
pub use changes::ChangeFeed;
pub use errors::{ModelError, ModelResult};
pub use force::{Force, ForceHandle, WeakForceHandle};
pub use game_system::GameSystem;
pub use group::Group;
pub use snapshot::{ForceSnapshot, GroupSnapshot, SNAPSHOT_VERSION};
pub use types::{format_timestamp, parse_timestamp, ForceId, GroupId, UnitId};
pub use unit::{Crew, Unit, UnitRuntime, MAX_SKILL};
