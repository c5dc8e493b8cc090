use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::document::{Category, Context};
use crate::value::SettingType;

/// Failure reported by a `DocumentSource`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("document '{id}' not found")]
    NotFound { id: String },
    #[error("document '{id}' is malformed: {reason}")]
    Malformed { id: String, reason: String },
}

impl LoadError {
    pub fn id(&self) -> &str {
        match self {
            LoadError::NotFound { id } | LoadError::Malformed { id, .. } => id,
        }
    }
}

/// Structural failure. Aborts the whole resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Parent references loop. Members are listed in traversal order.
    #[error("inheritance cycle: {}", describe_cycle(.members))]
    InheritanceCycle { members: Vec<String> },
    #[error("inheritance chain of '{id}' is deeper than {limit} documents")]
    InheritanceTooDeep { id: String, limit: usize },
    #[error("document '{id}' (parent of '{referenced_by}') does not exist")]
    MissingDocument { id: String, referenced_by: String },
    /// Settings whose formulas reference each other, in evaluation order.
    #[error("setting dependency cycle ({context}): {}", describe_cycle(.keys))]
    DependencyCycle { keys: Vec<String>, context: Context },
    #[error("stack has no definition layer")]
    NoBaseLayer,
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// `A → B → A`, or a shortened form for long cycles.
fn describe_cycle(members: &[String]) -> String {
    match (members.first(), members.last()) {
        (Some(first), Some(last)) if members.len() > 5 => {
            format!("{} members: {} → ... → {} → {}", members.len(), first, last, first)
        }
        (Some(first), _) => format!("{} → {}", members.join(" → "), first),
        _ => String::new(),
    }
}

/// Which constraint a resolved value violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    Minimum,
    Maximum,
    Enabled,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Constraint::Minimum => "minimum_value",
            Constraint::Maximum => "maximum_value",
            Constraint::Enabled => "enabled",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettingErrorKind {
    /// Key set by a more specific layer but absent from the base layer.
    UnknownKey { category: Category, document: String },
    /// Formula references a key outside the base universe.
    UnknownDependency { dependency: String },
    TypeMismatch { expected: SettingType, found: String },
    ConstraintViolation { constraint: Constraint, detail: String },
    EvaluationFailed { message: String },
    /// Formula text that failed to parse.
    InvalidExpression { expression: String, message: String },
    /// No layer provides a value.
    NoValue,
}

impl fmt::Display for SettingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey { category, document } => {
                write!(f, "unknown key set by {} '{}'", category, document)
            }
            Self::UnknownDependency { dependency } => {
                write!(f, "formula references unknown setting '{}'", dependency)
            }
            Self::TypeMismatch { expected, found } => {
                write!(f, "expected {}, found {}", expected, found)
            }
            Self::ConstraintViolation { constraint, detail } => {
                write!(f, "violates {}: {}", constraint, detail)
            }
            Self::EvaluationFailed { message } => write!(f, "evaluation failed: {}", message),
            Self::InvalidExpression { expression, message } => {
                write!(f, "invalid formula '{}': {}", expression, message)
            }
            Self::NoValue => f.write_str("no layer provides a value"),
        }
    }
}

/// Recoverable failure attached to one setting. The pass continues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Error)]
#[error("{key} ({context}): {kind}")]
pub struct PerSettingError {
    pub key: String,
    pub context: Context,
    pub kind: SettingErrorKind,
}

impl PerSettingError {
    pub fn new(key: impl Into<String>, context: Context, kind: SettingErrorKind) -> Self {
        Self {
            key: key.into(),
            context,
            kind,
        }
    }
}
