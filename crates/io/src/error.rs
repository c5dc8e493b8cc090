// Codec errors

use profilestack_engine::LoadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("line {line}: {reason}")]
    Ini { line: usize, reason: String },

    #[error("missing field '{field}'")]
    MissingField { field: String },

    #[error("field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("unknown container type '{name}'")]
    UnknownContainerType { name: String },

    #[error("invalid extruder position '{value}'")]
    InvalidPosition { value: String },
}

impl FormatError {
    pub(crate) fn missing(field: &str) -> Self {
        FormatError::MissingField { field: field.to_string() }
    }

    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        FormatError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Report this failure as a malformed document for the engine.
    pub fn into_load_error(self, id: &str) -> LoadError {
        LoadError::Malformed {
            id: id.to_string(),
            reason: self.to_string(),
        }
    }
}
