/*
    c3.rs - C3 network descriptors

    A C3 network links units of one force (a master with slaves, or a ring
    of peers). Networks only reference units by id, so every operation that
    changes unit ids has to rewrite these references.
*/

use super::types::UnitId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct C3Network {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_id: Option<UnitId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peer_ids: Vec<UnitId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<UnitId>,
}

impl C3Network {
    /// Every unit id this network points at
    pub fn referenced_units(&self) -> impl Iterator<Item = &UnitId> {
        self.master_id
            .iter()
            .chain(self.peer_ids.iter())
            .chain(self.members.iter())
    }

    pub fn references(&self, unit: &UnitId) -> bool {
        self.referenced_units().any(|id| id == unit)
    }

    /// Rewrite unit references through `mapping`. Ids without a mapping stay as they are.
    pub fn remap_units(&mut self, mapping: &HashMap<UnitId, UnitId>) {
        let remap = |id: &mut UnitId| {
            if let Some(new_id) = mapping.get(id) {
                *id = new_id.clone();
            }
        };
        if let Some(master) = self.master_id.as_mut() {
            remap(master);
        }
        self.peer_ids.iter_mut().for_each(remap);
        self.members.iter_mut().for_each(remap);
    }

    /// Drop references to a unit that left the force
    pub fn forget_unit(&mut self, unit: &UnitId) {
        if self.master_id.as_ref() == Some(unit) {
            self.master_id = None;
        }
        self.peer_ids.retain(|id| id != unit);
        self.members.retain(|id| id != unit);
    }

    pub fn is_empty(&self) -> bool {
        self.referenced_units().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> C3Network {
        C3Network {
            id: "net-1".to_string(),
            kind: "c3m".to_string(),
            master_id: Some(UnitId::new("a")),
            peer_ids: vec![UnitId::new("b")],
            members: vec![UnitId::new("b"), UnitId::new("c")],
        }
    }

    #[test]
    fn test_remap_leaves_unknown_ids() {
        let mut net = network();
        let mapping = HashMap::from([
            (UnitId::new("a"), UnitId::new("a2")),
            (UnitId::new("b"), UnitId::new("b2")),
        ]);
        net.remap_units(&mapping);

        assert_eq!(net.master_id, Some(UnitId::new("a2")));
        assert_eq!(net.peer_ids, vec![UnitId::new("b2")]);
        assert_eq!(net.members, vec![UnitId::new("b2"), UnitId::new("c")]);
    }

    #[test]
    fn test_forget_unit() {
        let mut net = network();
        net.forget_unit(&UnitId::new("a"));
        net.forget_unit(&UnitId::new("b"));
        assert!(net.master_id.is_none());
        assert!(net.peer_ids.is_empty());
        assert_eq!(net.members, vec![UnitId::new("c")]);
        assert!(!net.is_empty());

        net.forget_unit(&UnitId::new("c"));
        assert!(net.is_empty());
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(network()).unwrap();
        assert_eq!(value["type"], "c3m");
        assert_eq!(value["masterId"], "a");
        assert_eq!(value["peerIds"][0], "b");

        let sparse: C3Network =
            serde_json::from_value(serde_json::json!({ "id": "n", "type": "c3i" })).unwrap();
        assert!(sparse.is_empty());
    }
}
