/*
    group.rs - Named, ordered subdivision of a force
*/

use super::types::{GroupId, UnitId};
use super::unit::Unit;

#[derive(Debug, Clone)]
pub struct Group {
    pub(crate) id: GroupId,
    pub(crate) name: String,
    pub(crate) name_lock: bool,
    pub(crate) color: Option<String>,
    pub(crate) units: Vec<Unit>,
}

impl Group {
    pub fn new(id: GroupId, name: impl Into<String>) -> Self {
        Group {
            id,
            name: name.into(),
            name_lock: false,
            color: None,
            units: Vec::new(),
        }
    }

    pub fn id(&self) -> &GroupId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_lock(&self) -> bool {
        self.name_lock
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit(&self, id: &UnitId) -> Option<&Unit> {
        self.units.iter().find(|u| u.id() == id)
    }

    pub(crate) fn position_of(&self, id: &UnitId) -> Option<usize> {
        self.units.iter().position(|u| u.id() == id)
    }
}
