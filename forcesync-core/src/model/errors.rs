/*
    errors.rs - Error types for the force model

    Covers snapshot decoding, per-unit validation and structural edits
    (unknown group/unit ids).
*/

use super::types::{GroupId, UnitId};
use thiserror::Error;

/// Errors raised while building or editing a force
#[derive(Debug, Error)]
pub enum ModelError {
    /// Snapshot was written by a newer client
    #[error("Unsupported snapshot version: {found} (max {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Incoming snapshot belongs to another game system
    #[error("Game system mismatch: expected {expected}, got {actual}")]
    GameSystemMismatch { expected: String, actual: String },

    /// A single unit payload could not be decoded
    #[error("Invalid unit payload: {0}")]
    InvalidUnit(String),

    /// A crew skill is outside the allowed range
    #[error("Invalid skill value for {field}: {value} (allowed 0..={max})")]
    InvalidSkill { field: &'static str, value: u8, max: u8 },

    /// Group not present in the force
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    /// Unit not present in the force
    #[error("Unit not found: {0}")]
    UnitNotFound(UnitId),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_display() {
        let err = ModelError::UnsupportedVersion { found: 9, supported: 1 };
        assert_eq!(err.to_string(), "Unsupported snapshot version: 9 (max 1)");

        let err = ModelError::InvalidSkill { field: "gunnery", value: 12, max: 8 };
        assert!(err.to_string().contains("gunnery"));
        assert!(err.to_string().contains("12"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: ModelError = json_err.into();
        assert!(matches!(err, ModelError::Serialization(_)));
    }
}
