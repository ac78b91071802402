/*
    unit.rs - A single game piece inside a force

    A unit carries its serialized state (designation, alias, crew skills,
    destroyed flag, and any payload fields this client does not model, kept
    verbatim so they survive a round trip) plus runtime-only state that never leaves the process
    (selection, cached battle value). Updating a unit in place from a wire
    payload replaces the former and keeps the latter.
*/

use super::errors::{ModelError, ModelResult};
use super::game_system::GameSystem;
use super::types::UnitId;
use serde_json::{json, Map, Value};
use tracing::trace;

/// Highest skill rating accepted for any crew value
pub const MAX_SKILL: u8 = 8;

/// Crew skills, shaped by the game system the unit belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Crew {
    Classic { gunnery: u8, piloting: u8 },
    AlphaStrike { skill: u8 },
}

impl Crew {
    /// Reject out-of-range skill values
    pub fn validate(&self) -> ModelResult<()> {
        let check = |field: &'static str, value: u8| {
            if value > MAX_SKILL {
                Err(ModelError::InvalidSkill { field, value, max: MAX_SKILL })
            } else {
                Ok(())
            }
        };
        match self {
            Crew::Classic { gunnery, piloting } => {
                check("gunnery", *gunnery)?;
                check("piloting", *piloting)
            }
            Crew::AlphaStrike { skill } => check("skill", *skill),
        }
    }
}

/// State that only exists in memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitRuntime {
    pub selected: bool,
    pub battle_value: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Unit {
    id: UnitId,
    name: String,
    alias: Option<String>,
    crew: Crew,
    destroyed: bool,
    extra: Map<String, Value>,
    runtime: UnitRuntime,
}

impl Unit {
    pub fn new(id: UnitId, name: impl Into<String>, crew: Crew) -> Self {
        Unit {
            id,
            name: name.into(),
            alias: None,
            crew,
            destroyed: false,
            extra: Map::new(),
            runtime: UnitRuntime::default(),
        }
    }

    pub fn id(&self) -> &UnitId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn crew(&self) -> &Crew {
        &self.crew
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Payload fields outside the modelled ones
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn runtime(&self) -> &UnitRuntime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut UnitRuntime {
        &mut self.runtime
    }

    pub(crate) fn set_id(&mut self, id: UnitId) {
        self.id = id;
    }

    pub(crate) fn set_alias(&mut self, alias: Option<String>) {
        self.alias = alias;
    }

    pub(crate) fn set_crew(&mut self, crew: Crew) -> ModelResult<()> {
        crew.validate()?;
        self.crew = crew;
        Ok(())
    }

    pub(crate) fn set_destroyed(&mut self, destroyed: bool) {
        self.destroyed = destroyed;
    }

    pub(crate) fn set_extra(&mut self, extra: Map<String, Value>) {
        self.extra = extra;
    }

    /// Game system this unit's crew shape belongs to
    pub fn game_system(&self) -> GameSystem {
        match self.crew {
            Crew::Classic { .. } => GameSystem::Classic,
            Crew::AlphaStrike { .. } => GameSystem::AlphaStrike,
        }
    }

    /// Wire form of the unit. Runtime state is not included; modelled
    /// fields take precedence over same-named extra fields.
    pub fn to_value(&self) -> Value {
        let mut value = Value::Object(self.extra.clone());
        value["id"] = json!(self.id);
        value["unit"] = json!(self.name);
        if let Some(alias) = &self.alias {
            value["alias"] = json!(alias);
        }
        match self.crew {
            Crew::Classic { gunnery, piloting } => {
                value["crew"] = json!({ "gunnery": gunnery, "piloting": piloting });
            }
            Crew::AlphaStrike { skill } => {
                value["skill"] = json!(skill);
            }
        }
        if self.destroyed {
            value["destroyed"] = json!(true);
        }
        value
    }

    /// Replace serialized state from a wire payload, keeping runtime state
    pub fn apply_value(&mut self, system: GameSystem, value: &Value) -> ModelResult<()> {
        let incoming = system.unit_from_value(value)?;
        if incoming.id != self.id {
            return Err(ModelError::InvalidUnit(format!(
                "payload id {} does not match unit {}",
                incoming.id, self.id
            )));
        }
        self.name = incoming.name;
        self.alias = incoming.alias;
        self.crew = incoming.crew;
        self.destroyed = incoming.destroyed;
        self.extra = incoming.extra;
        Ok(())
    }

    /// Release the unit when it leaves its force for good
    pub fn release(self) {
        trace!(unit_id = %self.id, unit = %self.name, "unit released");
    }
}
