/*
    clone.rs - Copy a force under brand-new identities

    The copy gets a fresh instance id, fresh group ids and fresh unit ids.
    C3 references are rewritten through the old -> new unit mapping so the
    copy's networks point at the copy's units.
*/

use crate::model::{
    format_timestamp, Force, ForceId, ForceSnapshot, GroupId, ModelResult, UnitId,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Rewrite every identity in a snapshot. The result is owned and stamped now.
pub fn remap_identities(source: &ForceSnapshot) -> ForceSnapshot {
    let mut snapshot = source.clone();
    let mut mapping: HashMap<UnitId, UnitId> = HashMap::new();

    snapshot.instance_id = Some(ForceId::generate());
    snapshot.owned = Some(true);
    snapshot.timestamp = Some(format_timestamp(&Utc::now()));

    for group in &mut snapshot.groups {
        group.id = GroupId::generate();
        for unit in &mut group.units {
            let new_id = UnitId::generate();
            if let Some(old_id) = ForceSnapshot::unit_id_of(unit) {
                mapping.insert(UnitId::new(old_id), new_id.clone());
            }
            if let Value::Object(fields) = unit {
                fields.insert("id".to_string(), Value::String(new_id.0));
            }
        }
    }

    if let Some(networks) = snapshot.c3_networks.as_mut() {
        for network in networks {
            network.remap_units(&mapping);
        }
    }
    snapshot
}

impl Force {
    /// Independent copy of this force with fresh identities
    pub fn clone_with_new_identity(&self) -> ModelResult<Force> {
        let snapshot = remap_identities(&self.build_snapshot());
        debug!(
            source = ?self.instance_id(),
            clone = ?snapshot.instance_id,
            "cloned force"
        );
        Force::from_snapshot(snapshot)
    }
}
