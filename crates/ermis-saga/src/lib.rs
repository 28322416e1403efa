//! ermis-saga — alias orchestration.
//!
//! An alias lives in three systems that share no transaction: the alias
//! database, the delegated DNS zone and the secret vault. The
//! [`Orchestrator`] sequences every create, update and delete as a
//! [`saga::Saga`]: ordered stages, each paired with a compensating action
//! that runs in reverse order when a later stage fails.
//!
//! Collections (cnames, nodes, alarms) are always resubmitted in full and
//! diffed by [`reconcile`]; nodes shared between aliases are created and
//! garbage-collected by [`nodes`].

pub mod create;
pub mod delete;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod nodes;
pub mod orchestrator;
pub mod reconcile;
pub mod report;
pub mod saga;
pub mod secret;
pub mod update;

pub use error::{SagaError, SagaResult, StageFailure, System};
pub use gateway::{AliasDatabase, DnsEntry, DnsGateway, GatewayError, GatewayResult, Mailer, SecretVault};
pub use orchestrator::{NameCheck, Orchestrator};
pub use report::{NodeReport, ReportOutcome};
