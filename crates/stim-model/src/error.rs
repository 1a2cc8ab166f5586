use thiserror::Error;

/// Violations of the session configuration invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration field `{0}`")]
    MissingField(&'static str),
    #[error("configuration field `{field}` must not be empty")]
    EmptyField { field: &'static str },
    #[error("invalid save format: {0} (expected: csv|tsv|json)")]
    InvalidSaveFormat(String),
    #[error("configuration field `{field}` is invalid: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}
