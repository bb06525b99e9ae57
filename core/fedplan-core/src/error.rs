//! Error types for the fedplan optimizer.
//!
//! All public APIs return `PlanResult<T>`: no panics in library code.

use thiserror::Error;

use crate::metadata::MetadataError;

/// Unified error type for all planning operations.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A group with mandatory bound columns could not get them from
    /// criteria or a dependent join.
    #[error("access pattern not satisfied for group '{group}': requires bound columns [{}]", columns.join(", "))]
    AccessPatternNotSatisfied { group: String, columns: Vec<String> },

    /// Two nodes with conflicting operator roles were merged.
    #[error("incompatible merge of {from} into {into}: {reason}")]
    IncompatibleMerge {
        into: String,
        from: String,
        reason: String,
    },

    /// The rule engine did not reach quiescence within the configured ceiling.
    #[error("rule iteration ceiling of {ceiling} exceeded (last rule: {rule})")]
    RuleIterationCeilingExceeded { ceiling: usize, rule: String },

    /// No valid strategy exists under the current capabilities.
    #[error("unplannable construct '{construct}': {reason}")]
    UnplannableConstruct { construct: String, reason: String },

    /// Plan tree misuse (dangling handle, arity violation, cycle)
    #[error("invalid plan tree: {0}")]
    InvalidTree(String),

    /// Metadata or capability lookup failure, passed through unchanged
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// SQL parsing error
    #[error("SQL parse error: {message}\nSQL: {sql}")]
    SqlParse { message: String, sql: String },

    /// Unsupported SQL feature
    #[error("SQL feature not supported: {feature}\nHint: {hint}")]
    SqlNotSupported { feature: String, hint: String },

    /// Name or type resolution error
    #[error("resolve error: {0}")]
    Resolve(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl PlanError {
    /// Internal errors indicate a defect in a rule rather than bad input.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            PlanError::IncompatibleMerge { .. }
                | PlanError::RuleIterationCeilingExceeded { .. }
                | PlanError::InvalidTree(_)
        )
    }

    pub(crate) fn unplannable(construct: impl Into<String>, reason: impl Into<String>) -> Self {
        PlanError::UnplannableConstruct {
            construct: construct.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for PlanError {
    fn from(err: serde_json::Error) -> Self {
        PlanError::Config(err.to_string())
    }
}

/// Result type alias for all planning operations.
pub type PlanResult<T> = Result<T, PlanError>;
