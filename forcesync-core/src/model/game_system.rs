/*
    game_system.rs - Game-system discriminator and factory

    Every force belongs to exactly one game system. The system decides the
    crew shape of its units and is the single place where forces and units
    are constructed from scratch or from wire payloads.
*/

use super::errors::{ModelError, ModelResult};
use super::force::Force;
use super::types::UnitId;
use super::unit::{Crew, Unit};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

const DEFAULT_GUNNERY: u8 = 4;
const DEFAULT_PILOTING: u8 = 5;
const DEFAULT_SKILL: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameSystem {
    /// Classic tabletop rules (gunnery/piloting crews)
    #[default]
    #[serde(rename = "classic")]
    Classic,
    /// Alpha Strike rules (single skill rating)
    #[serde(rename = "as")]
    AlphaStrike,
}

#[derive(Deserialize)]
struct ClassicCrewRecord {
    #[serde(default = "default_gunnery")]
    gunnery: u8,
    #[serde(default = "default_piloting")]
    piloting: u8,
}

impl Default for ClassicCrewRecord {
    fn default() -> Self {
        ClassicCrewRecord { gunnery: DEFAULT_GUNNERY, piloting: DEFAULT_PILOTING }
    }
}

#[derive(Deserialize)]
struct ClassicUnitRecord {
    #[serde(default = "UnitId::generate")]
    id: UnitId,
    unit: String,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    crew: ClassicCrewRecord,
    #[serde(default)]
    destroyed: bool,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct AlphaStrikeUnitRecord {
    #[serde(default = "UnitId::generate")]
    id: UnitId,
    unit: String,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default = "default_skill")]
    skill: u8,
    #[serde(default)]
    destroyed: bool,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn default_gunnery() -> u8 {
    DEFAULT_GUNNERY
}

fn default_piloting() -> u8 {
    DEFAULT_PILOTING
}

fn default_skill() -> u8 {
    DEFAULT_SKILL
}

impl GameSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameSystem::Classic => "classic",
            GameSystem::AlphaStrike => "as",
        }
    }

    /// New empty force of this system, owned by the local user
    pub fn new_force(self, name: impl Into<String>) -> Force {
        Force::new(self, name)
    }

    /// New unit with the system's default crew
    pub fn new_unit(self, name: impl Into<String>) -> Unit {
        let crew = match self {
            GameSystem::Classic => Crew::Classic {
                gunnery: DEFAULT_GUNNERY,
                piloting: DEFAULT_PILOTING,
            },
            GameSystem::AlphaStrike => Crew::AlphaStrike { skill: DEFAULT_SKILL },
        };
        Unit::new(UnitId::generate(), name, crew)
    }

    /// Decode one unit payload
    pub fn unit_from_value(self, value: &Value) -> ModelResult<Unit> {
        if !value.is_object() {
            return Err(ModelError::InvalidUnit("unit payload is not an object".to_string()));
        }

        let unit = match self {
            GameSystem::Classic => {
                let record: ClassicUnitRecord = serde_json::from_value(value.clone())
                    .map_err(|e| ModelError::InvalidUnit(e.to_string()))?;
                let mut unit = Unit::new(
                    record.id,
                    record.unit,
                    Crew::Classic {
                        gunnery: record.crew.gunnery,
                        piloting: record.crew.piloting,
                    },
                );
                unit.set_alias(record.alias);
                unit.set_destroyed(record.destroyed);
                unit.set_extra(record.extra);
                unit
            }
            GameSystem::AlphaStrike => {
                let record: AlphaStrikeUnitRecord = serde_json::from_value(value.clone())
                    .map_err(|e| ModelError::InvalidUnit(e.to_string()))?;
                let mut unit =
                    Unit::new(record.id, record.unit, Crew::AlphaStrike { skill: record.skill });
                unit.set_alias(record.alias);
                unit.set_destroyed(record.destroyed);
                unit.set_extra(record.extra);
                unit
            }
        };

        if unit.name().trim().is_empty() {
            return Err(ModelError::InvalidUnit(format!("unit {} has no designation", unit.id())));
        }
        unit.crew().validate()?;
        Ok(unit)
    }
}

impl FromStr for GameSystem {
    type Err = String;

    /// Parse a system name (wire names and a few aliases)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "classic" | "bt" | "battletech" => Ok(GameSystem::Classic),
            "as" | "alpha" | "alphastrike" | "alpha-strike" => Ok(GameSystem::AlphaStrike),
            other => Err(format!("unknown game system: {}", other)),
        }
    }
}

impl fmt::Display for GameSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_game_system_names() {
        assert_eq!("classic".parse::<GameSystem>(), Ok(GameSystem::Classic));
        assert_eq!("BT".parse::<GameSystem>(), Ok(GameSystem::Classic));
        assert_eq!("as".parse::<GameSystem>(), Ok(GameSystem::AlphaStrike));
        assert_eq!("Alpha-Strike".parse::<GameSystem>(), Ok(GameSystem::AlphaStrike));
        assert!("chess".parse::<GameSystem>().is_err());
        assert_eq!(serde_json::to_string(&GameSystem::AlphaStrike).unwrap(), "\"as\"");
    }

    #[test]
    fn test_classic_unit_defaults() {
        let unit = GameSystem::Classic
            .unit_from_value(&json!({ "id": "u1", "unit": "Hunchback HBK-4G" }))
            .unwrap();
        assert_eq!(unit.crew(), &Crew::Classic { gunnery: 4, piloting: 5 });
        assert_eq!(unit.game_system(), GameSystem::Classic);
    }

    #[test]
    fn test_alpha_strike_unit() {
        let unit = GameSystem::AlphaStrike
            .unit_from_value(&json!({ "id": "u9", "unit": "Commando", "skill": 2, "alias": "Scout" }))
            .unwrap();
        assert_eq!(unit.crew(), &Crew::AlphaStrike { skill: 2 });
        assert_eq!(unit.alias(), Some("Scout"));
    }

    #[test]
    fn test_unit_without_id_gets_one() {
        let unit = GameSystem::Classic.unit_from_value(&json!({ "unit": "Wasp" })).unwrap();
        assert!(!unit.id().as_str().is_empty());
    }

    #[test]
    fn test_invalid_unit_payloads() {
        let system = GameSystem::Classic;
        assert!(system.unit_from_value(&json!("Atlas")).is_err());
        assert!(system.unit_from_value(&json!({ "id": "u1" })).is_err());
        assert!(system.unit_from_value(&json!({ "id": "u1", "unit": "  " })).is_err());
        assert!(system
            .unit_from_value(&json!({ "id": "u1", "unit": "Atlas", "crew": { "gunnery": 11 } }))
            .is_err());
    }
}
