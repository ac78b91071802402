use crate::model::{ForceId, ForceSnapshot, GameSystem};
use serde::Serialize;

/// One row of a force listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceSummary {
    pub instance_id: ForceId,
    pub name: String,
    pub game_system: GameSystem,
    pub timestamp: Option<String>,
    pub unit_count: usize,
    pub owned: bool,
    /// A local copy exists
    pub local: bool,
    /// The service listed this force
    pub remote: bool,
}

impl ForceSummary {
    pub(crate) fn from_snapshot(snapshot: &ForceSnapshot, local: bool, remote: bool) -> Option<Self> {
        Some(ForceSummary {
            instance_id: snapshot.instance_id.clone()?,
            name: snapshot.name.clone(),
            game_system: snapshot.game_system,
            timestamp: snapshot.timestamp.clone(),
            unit_count: snapshot.unit_count(),
            owned: snapshot.owned.unwrap_or(true),
            local,
            remote,
        })
    }

    pub fn timestamp_millis(&self) -> i64 {
        crate::model::parse_timestamp(self.timestamp.as_deref()).timestamp_millis()
    }
}
