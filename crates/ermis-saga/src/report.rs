//! Node status reports.
//!
//! Load-balancer clients authenticate with the alias secret and report
//! their load. Unknown nodes are registered on their first report.

use ermis_core::CoreError;
use ermis_core::types::Privilege;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SagaError, SagaResult};
use crate::nodes;
use crate::orchestrator::Orchestrator;
use crate::secret::{hash_secret, secret_matches};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub alias_name: String,
    pub node_name: String,
    pub load: i64,
    pub secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportOutcome {
    /// The node was attached to the alias by this report.
    Registered,
    Updated,
}

impl Orchestrator {
    pub fn report_status(&self, report: &NodeReport) -> SagaResult<ReportOutcome> {
        if report.node_name.is_empty() {
            return Err(CoreError::MissingField("node_name").into());
        }
        let alias = self
            .find_alias(&report.alias_name)?
            .ok_or_else(|| SagaError::NotFound {
                alias: report.alias_name.clone(),
            })?;

        let stored = self.vault.get(&alias.name)?;
        if !secret_matches(&stored, &report.secret) {
            warn!(alias = %alias.name, node = %report.node_name, "report with a wrong secret");
            return Err(SagaError::Unauthorized(format!(
                "node {} may not report for {}",
                report.node_name, alias.name
            )));
        }

        let db = self.db.as_ref();
        let existing = match db.find_node(&report.node_name)? {
            Some(node) => db.find_relation(alias.id, node.id)?,
            None => None,
        };
        let (relation, outcome, secret_hash) = match existing {
            Some(relation) => (relation, ReportOutcome::Updated, None),
            None => {
                let relation = nodes::register(db, alias.id, &report.node_name, Privilege::Allowed)?;
                info!(alias = %alias.name, node = %report.node_name, "node registered by report");
                (relation, ReportOutcome::Registered, Some(hash_secret(&report.secret)))
            }
        };

        db.update_relation_status(alias.id, relation.node_id, report.load, secret_hash)?;
        debug!(
            alias = %alias.name,
            node = %report.node_name,
            load = report.load,
            "node status recorded"
        );
        Ok(outcome)
    }
}
