//! Generic saga runner.
//!
//! A saga is an ordered list of stages, each a forward action paired with
//! an optional compensating action. Stages run in order; the first
//! failure stops the run and the compensations of every completed stage
//! run in reverse order:
//!
//! ```text
//! Stages:        [database] → [dns] → [vault] → [mail: FAIL]
//! Compensation:                        [vault] → [dns] → [database]
//! ```
//!
//! Compensation failures do not stop the unwinding; they are collected
//! and returned next to the original failure.

use tracing::{debug, error, info, warn};

use crate::error::{SagaError, StageFailure};
use crate::gateway::GatewayResult;

type Action<'a> = Box<dyn FnOnce() -> GatewayResult<()> + 'a>;

struct Stage<'a> {
    name: &'static str,
    forward: Action<'a>,
    compensate: Option<Action<'a>>,
    /// Run `compensate` even when `forward` itself fails.
    compensate_own_failure: bool,
}

/// Why a saga stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaFailure {
    pub failure: StageFailure,
    pub rollback_errors: Vec<StageFailure>,
}

impl SagaFailure {
    /// Map onto the caller-facing taxonomy.
    ///
    /// A failed rollback always wins; otherwise a uniqueness violation is
    /// a conflict and anything else a cleanly aborted operation.
    pub fn into_error(self, alias: &str) -> SagaError {
        let alias = alias.to_string();
        if !self.rollback_errors.is_empty() {
            SagaError::RollbackFailed {
                alias,
                failure: self.failure,
                rollback: self.rollback_errors,
            }
        } else if self.failure.conflict {
            SagaError::Conflict {
                alias,
                systems: vec![self.failure.system],
            }
        } else {
            SagaError::Aborted {
                alias,
                failure: self.failure,
            }
        }
    }
}

/// Builder and runner for one saga execution.
pub struct Saga<'a> {
    alias: String,
    stages: Vec<Stage<'a>>,
}

impl<'a> Saga<'a> {
    pub fn new(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
            stages: Vec::new(),
        }
    }

    /// A stage with nothing to undo.
    pub fn stage(mut self, name: &'static str, forward: impl FnOnce() -> GatewayResult<()> + 'a) -> Self {
        self.stages.push(Stage {
            name,
            forward: Box::new(forward),
            compensate: None,
            compensate_own_failure: false,
        });
        self
    }

    /// A stage undone by `compensate` if a later stage fails.
    pub fn compensated(
        mut self,
        name: &'static str,
        forward: impl FnOnce() -> GatewayResult<()> + 'a,
        compensate: impl FnOnce() -> GatewayResult<()> + 'a,
    ) -> Self {
        self.stages.push(Stage {
            name,
            forward: Box::new(forward),
            compensate: Some(Box::new(compensate)),
            compensate_own_failure: false,
        });
        self
    }

    /// Like [`Saga::compensated`], but also undone when the stage itself
    /// fails part-way through.
    pub fn self_compensated(
        mut self,
        name: &'static str,
        forward: impl FnOnce() -> GatewayResult<()> + 'a,
        compensate: impl FnOnce() -> GatewayResult<()> + 'a,
    ) -> Self {
        self.stages.push(Stage {
            name,
            forward: Box::new(forward),
            compensate: Some(Box::new(compensate)),
            compensate_own_failure: true,
        });
        self
    }

    /// Run every stage in order, unwinding on the first failure.
    pub fn run(self) -> Result<(), SagaFailure> {
        let alias = self.alias;
        let mut completed: Vec<(&'static str, Action<'a>)> = Vec::new();

        for stage in self.stages {
            debug!(alias = %alias, stage = stage.name, "stage started");
            match (stage.forward)() {
                Ok(()) => {
                    debug!(alias = %alias, stage = stage.name, "stage completed");
                    if let Some(compensate) = stage.compensate {
                        completed.push((stage.name, compensate));
                    }
                }
                Err(e) => {
                    let failure = StageFailure::new(stage.name, &e);
                    warn!(alias = %alias, stage = stage.name, error = %e, "stage failed, compensating");
                    if stage.compensate_own_failure {
                        if let Some(compensate) = stage.compensate {
                            completed.push((stage.name, compensate));
                        }
                    }
                    let rollback_errors = unwind(&alias, completed);
                    return Err(SagaFailure {
                        failure,
                        rollback_errors,
                    });
                }
            }
        }
        Ok(())
    }
}

fn unwind(alias: &str, completed: Vec<(&'static str, Action<'_>)>) -> Vec<StageFailure> {
    let mut errors = Vec::new();
    for (name, compensate) in completed.into_iter().rev() {
        match compensate() {
            Ok(()) => info!(alias = %alias, stage = name, "stage compensated"),
            Err(e) => {
                error!(
                    alias = %alias,
                    stage = name,
                    error = %e,
                    "compensation failed, manual reconciliation required"
                );
                errors.push(StageFailure::new(name, &e));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::System;
    use crate::gateway::GatewayError;
    use ermis_state::StateError;
    use std::cell::RefCell;

    fn dns_down() -> GatewayError {
        GatewayError::Dns("unreachable".to_string())
    }

    #[test]
    fn all_stages_run_in_order() {
        let log = RefCell::new(Vec::new());
        let result = Saga::new("svc")
            .compensated("a", || Ok(log.borrow_mut().push("a")), || Ok(log.borrow_mut().push("undo a")))
            .stage("b", || Ok(log.borrow_mut().push("b")))
            .run();

        assert!(result.is_ok());
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn failure_unwinds_completed_stages_in_reverse() {
        let log = RefCell::new(Vec::new());
        let failure = Saga::new("svc")
            .compensated("a", || Ok(log.borrow_mut().push("a")), || Ok(log.borrow_mut().push("undo a")))
            .compensated("b", || Ok(log.borrow_mut().push("b")), || Ok(log.borrow_mut().push("undo b")))
            .compensated("c", || Err(dns_down()), || Ok(log.borrow_mut().push("undo c")))
            .stage("d", || Ok(log.borrow_mut().push("d")))
            .run()
            .unwrap_err();

        assert_eq!(*log.borrow(), vec!["a", "b", "undo b", "undo a"]);
        assert_eq!(failure.failure.stage, "c");
        assert_eq!(failure.failure.system, System::Dns);
        assert!(failure.rollback_errors.is_empty());
    }

    #[test]
    fn self_compensated_stage_undoes_itself() {
        let log = RefCell::new(Vec::new());
        Saga::new("svc")
            .self_compensated("a", || Err(dns_down()), || Ok(log.borrow_mut().push("undo a")))
            .run()
            .unwrap_err();
        assert_eq!(*log.borrow(), vec!["undo a"]);
    }

    #[test]
    fn rollback_errors_are_collected_and_unwinding_continues() {
        let log = RefCell::new(Vec::new());
        let failure = Saga::new("svc")
            .compensated("a", || Ok(()), || Ok(log.borrow_mut().push("undo a")))
            .compensated(
                "b",
                || Ok(()),
                || Err(GatewayError::Vault("sealed".to_string())),
            )
            .stage("c", || Err(dns_down()))
            .run()
            .unwrap_err();

        assert_eq!(*log.borrow(), vec!["undo a"]);
        assert_eq!(failure.rollback_errors.len(), 1);
        assert_eq!(failure.rollback_errors[0].system, System::Vault);

        let err = failure.into_error("svc");
        assert!(err.needs_manual_intervention());
        assert!(err.to_string().contains("manual reconciliation"));
    }

    #[test]
    fn failure_maps_to_taxonomy() {
        let aborted = SagaFailure {
            failure: StageFailure::new("dns", &dns_down()),
            rollback_errors: Vec::new(),
        };
        assert!(matches!(aborted.into_error("svc"), SagaError::Aborted { .. }));

        let taken = GatewayError::Database(StateError::AlreadyExists("alias svc".to_string()));
        let conflict = SagaFailure {
            failure: StageFailure::new("database", &taken),
            rollback_errors: Vec::new(),
        };
        match conflict.into_error("svc") {
            SagaError::Conflict { systems, .. } => assert_eq!(systems, vec![System::Database]),
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
