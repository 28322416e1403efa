//! Error types for request normalization and validation.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while turning a client request into a desired alias.
///
/// These are always detected before any external system is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field} {value:?}: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("malformed alarm {0:?}, expected kind:recipient:threshold")]
    MalformedAlarm(String),

    #[error("node {0} is listed as both allowed and forbidden")]
    ConflictingPrivilege(String),
}

impl CoreError {
    pub(crate) fn invalid(field: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
