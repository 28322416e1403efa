//! Orchestration error taxonomy.
//!
//! Validation and conflict errors are raised before any external system
//! is touched. A failed stage is either fully compensated (`Aborted`) or
//! leaves a known inconsistency behind (`RollbackFailed`).

use std::fmt;

use ermis_core::CoreError;
use serde::Serialize;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Result type alias for orchestrator operations.
pub type SagaResult<T> = Result<T, SagaError>;

/// One of the independent systems an alias lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
    Database,
    Dns,
    Vault,
    Mail,
}

impl System {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Dns => "dns",
            Self::Vault => "vault",
            Self::Mail => "mail",
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single external call that failed, forward or compensating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: &'static str,
    pub system: System,
    pub reason: String,
    /// The failure was a uniqueness violation in the database.
    #[serde(skip)]
    pub conflict: bool,
}

impl StageFailure {
    pub fn new(stage: &'static str, err: &GatewayError) -> Self {
        Self {
            stage,
            system: err.system(),
            reason: err.to_string(),
            conflict: err.is_conflict(),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.stage, self.system, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("validation failed: {0}")]
    Validation(#[from] CoreError),

    #[error("alias {alias} already exists in {}", system_list(.systems))]
    Conflict { alias: String, systems: Vec<System> },

    #[error("alias {alias} not found")]
    NotFound { alias: String },

    #[error("alias {alias} is inconsistent: missing from {}", system_list(.missing))]
    Inconsistent { alias: String, missing: Vec<System> },

    #[error("operation on {alias} failed at {failure}; changes were rolled back")]
    Aborted { alias: String, failure: StageFailure },

    #[error(
        "operation on {alias} failed at {failure} and rollback failed ({}); manual reconciliation required",
        failure_list(.rollback)
    )]
    RollbackFailed {
        alias: String,
        failure: StageFailure,
        rollback: Vec<StageFailure>,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl SagaError {
    /// Whether an operator has to repair state by hand.
    pub fn needs_manual_intervention(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }
}

fn system_list(systems: &[System]) -> String {
    systems
        .iter()
        .map(System::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn failure_list(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
