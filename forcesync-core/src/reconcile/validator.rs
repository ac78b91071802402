/*
    validator.rs - Pre-sync structural checks

    Group ids and unit ids must be unique inside a force. A snapshot that
    breaks this is never replicated.
*/

use crate::model::{ForceSnapshot, GroupId, UnitId};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateId {
    Group(GroupId),
    Unit(UnitId),
}

impl fmt::Display for DuplicateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateId::Group(id) => write!(f, "duplicate group id {}", id),
            DuplicateId::Unit(id) => write!(f, "duplicate unit id {}", id),
        }
    }
}

/// Every id that appears more than once, reported once each
pub fn find_duplicate_ids(snapshot: &ForceSnapshot) -> Vec<DuplicateId> {
    let mut duplicates = Vec::new();
    let mut groups = HashSet::new();
    let mut units = HashSet::new();
    let mut reported = HashSet::new();

    for group in &snapshot.groups {
        if !groups.insert(group.id.as_str()) && reported.insert(("g", group.id.as_str())) {
            duplicates.push(DuplicateId::Group(group.id.clone()));
        }
        for unit in &group.units {
            let Some(id) = ForceSnapshot::unit_id_of(unit) else {
                continue;
            };
            if !units.insert(id) && reported.insert(("u", id)) {
                duplicates.push(DuplicateId::Unit(UnitId::new(id)));
            }
        }
    }
    duplicates
}
