/*
    snapshot.rs - Versioned wire/storage shape of a force

    ```json
    {
        "version": 1,
        "timestamp": "2024-03-01T12:30:00.250Z",
        "instanceId": "…",
        "type": "classic",
        "name": "Lance",
        "nameLock": false,
        "groups": [{ "id": "…", "name": "Fire", "nameLock": false, "color": "#aa0000", "units": [ … ] }],
        "c3Networks": [ … ]
    }
    ```

    Units stay as raw JSON values here so one corrupt unit can be skipped
    without rejecting the whole snapshot.
*/

use super::c3::C3Network;
use super::game_system::GameSystem;
use super::types::{timestamp_millis, ForceId, GroupId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<ForceId>,
    #[serde(rename = "type", default)]
    pub game_system: GameSystem,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_lock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned: Option<bool>,
    #[serde(default)]
    pub groups: Vec<GroupSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c3_networks: Option<Vec<C3Network>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    #[serde(default = "GroupId::generate")]
    pub id: GroupId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_lock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub units: Vec<Value>,
}

impl ForceSnapshot {
    /// Milliseconds since epoch of the last mutation; 0 when absent
    pub fn timestamp_millis(&self) -> i64 {
        timestamp_millis(self.timestamp.as_deref())
    }

    pub fn unit_count(&self) -> usize {
        self.groups.iter().map(|g| g.units.len()).sum()
    }

    /// Unit id carried by a raw unit payload, if any
    pub fn unit_id_of(value: &Value) -> Option<&str> {
        value.get("id").and_then(Value::as_str)
    }
}
