use thiserror::Error;

/// A request that breaks the caller contract, as opposed to one the rules deny.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
}

/// Failures while turning a rules configuration into a [`crate::Ruleset`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse rules: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Schema declares no fields")]
    EmptySchema,
    #[error("Collection name must not be empty")]
    EmptyCollection,
    #[error("Field '{0}' is declared more than once")]
    DuplicateField(String),
    #[error("Constraint '{constraint}' does not apply to {field_type} field '{field}'")]
    ConstraintTypeMismatch {
        field: String,
        field_type: String,
        constraint: &'static str,
    },
    #[error("Invalid bounds on field '{field}': min {min} is greater than max {max}")]
    InvalidBounds { field: String, min: String, max: String },
    #[error("Invalid pattern on field '{field}': {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid check expression on field '{field}': {message}")]
    InvalidScript { field: String, message: String },
}
