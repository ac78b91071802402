//! Test fixtures for creating common force objects

use crate::model::{C3Network, Force, ForceSnapshot, GameSystem};
use serde_json::json;

/// A classic force with two groups, three units and one C3 network
pub fn sample_force(name: &str) -> Force {
    let system = GameSystem::Classic;
    let mut force = system.new_force(name);

    let command = force.add_group("Command");
    let fire = force.add_group("Fire");
    let mut ids = Vec::new();
    for (group, unit) in [(&command, "Atlas AS7-D"), (&command, "Marauder MAD-3R"), (&fire, "Catapult CPLT-C1")] {
        if let Ok(id) = force.add_unit(group, system.new_unit(unit)) {
            ids.push(id);
        }
    }
    if let [master, peer, ..] = ids.as_slice() {
        let _ = force.set_c3_network(C3Network {
            id: "c3-command".to_string(),
            kind: "c3m".to_string(),
            master_id: Some(master.clone()),
            peer_ids: vec![peer.clone()],
            members: vec![],
        });
    }
    force
}

/// A minimal snapshot with a given identity and timestamp
pub fn sample_snapshot(instance_id: &str, timestamp: &str) -> ForceSnapshot {
    serde_json::from_value(json!({
        "version": 1,
        "instanceId": instance_id,
        "timestamp": timestamp,
        "type": "classic",
        "name": format!("Force {}", instance_id),
        "groups": [{
            "id": format!("{}-g1", instance_id),
            "name": "Main",
            "units": [{ "id": format!("{}-u1", instance_id), "unit": "Wasp WSP-1A" }]
        }]
    }))
    .unwrap_or_else(|e| panic!("invalid fixture snapshot: {}", e))
}
