//! Engine error taxonomy
//!
//! Every engine computation returns `EngineResult`. Errors are raised to the
//! immediate caller; nothing inside the engine swallows or defaults them.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Requested dimension or column is not part of the table schema
    #[error("schema error: {reason}")]
    Schema { reason: String },

    /// Threshold rule was never declared in the policy
    #[error("unknown rule: {rule}")]
    UnknownRule { rule: String },

    /// Threshold (or level band) ordering is malformed
    #[error("invalid policy for '{rule}': {reason}")]
    InvalidPolicy { rule: String, reason: String },

    /// No indicator value was available to score
    #[error("insufficient data: {reason}")]
    InsufficientData { reason: String },

    /// Gap ratio requested on a grouping without exactly two categories
    #[error("gap ratio over '{dimension}' needs exactly 2 categories, found {found}")]
    InsufficientCategories { dimension: String, found: usize },

    /// Category aggregate that cannot enter a ratio (negative or NaN)
    #[error("category '{category}' of '{dimension}' aggregates to {value}, expected a non-negative total")]
    NegativeAggregate {
        dimension: String,
        category: String,
        value: f64,
    },

    /// Entity lookup with no matching row
    #[error("no {dimension} named '{name}'")]
    UnknownEntity { dimension: String, name: String },

    #[error("division by zero: {reason}")]
    DivisionByZero { reason: String },

    #[error("insufficient history: need at least {required} points, got {actual}")]
    InsufficientHistory { required: usize, actual: usize },
}

impl EngineError {
    pub(crate) fn missing_column(column: &str, schema: &[String]) -> Self {
        EngineError::Schema {
            reason: format!(
                "column '{}' not in schema [{}]",
                column,
                schema.join(", ")
            ),
        }
    }

    pub(crate) fn unknown_rule(rule: &str) -> Self {
        EngineError::UnknownRule {
            rule: rule.to_string(),
        }
    }

    pub(crate) fn invalid_policy(rule: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidPolicy {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn division_by_zero(reason: impl Into<String>) -> Self {
        EngineError::DivisionByZero {
            reason: reason.into(),
        }
    }
}
