//! Gateways to the systems an alias lives in.
//!
//! Each gateway exposes simple, independently-failing calls. The
//! orchestrators hold them as `Arc<dyn ...>` so the daemon and the tests
//! can plug in different backends.

use ermis_core::types::*;
use ermis_state::{AliasQuery, StateError, StateStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::System;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("database: {0}")]
    Database(#[from] StateError),

    #[error("dns: {0}")]
    Dns(String),

    #[error("vault: {0}")]
    Vault(String),

    #[error("mail: {0}")]
    Mail(String),
}

impl GatewayError {
    pub fn system(&self) -> System {
        match self {
            Self::Database(_) => System::Database,
            Self::Dns(_) => System::Dns,
            Self::Vault(_) => System::Vault,
            Self::Mail(_) => System::Mail,
        }
    }

    /// A uniqueness violation reported by the database.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Database(StateError::AlreadyExists(_)))
    }
}

/// Turn a DNS call's success flag into a result.
pub(crate) fn dns_ok(done: bool, call: impl FnOnce() -> String) -> GatewayResult<()> {
    if done {
        Ok(())
    } else {
        Err(GatewayError::Dns(format!("{} was refused", call())))
    }
}

// ── Database ──────────────────────────────────────────────────────

/// The authoritative alias record. Every call is atomic on its own.
pub trait AliasDatabase: Send + Sync {
    fn find_aliases(&self, query: &AliasQuery) -> GatewayResult<Vec<Alias>>;
    fn create_alias(&self, alias: &Alias) -> GatewayResult<Alias>;
    fn update_alias_scalars(&self, id: AliasId, scalars: &AliasScalars) -> GatewayResult<()>;
    /// Cascades to cnames, alarms and relations; orphaned nodes go too.
    fn delete_alias(&self, id: AliasId) -> GatewayResult<()>;

    fn add_cname(&self, alias_id: AliasId, name: &str) -> GatewayResult<()>;
    fn delete_cname(&self, alias_id: AliasId, name: &str) -> GatewayResult<()>;
    fn cname_exists(&self, name: &str) -> GatewayResult<bool>;

    fn add_alarm(&self, alias_id: AliasId, alarm: &Alarm) -> GatewayResult<()>;
    fn delete_alarm(&self, alias_id: AliasId, alarm_id: u64) -> GatewayResult<()>;

    fn find_node(&self, name: &str) -> GatewayResult<Option<Node>>;
    fn create_node(&self, name: &str) -> GatewayResult<Node>;
    /// Delete-if-exists.
    fn delete_node(&self, name: &str) -> GatewayResult<()>;

    fn find_relation(&self, alias_id: AliasId, node_id: NodeId) -> GatewayResult<Option<Relation>>;
    fn create_relation(&self, relation: &Relation) -> GatewayResult<()>;
    fn delete_relation(&self, alias_id: AliasId, node_id: NodeId) -> GatewayResult<()>;
    fn update_privilege(
        &self,
        alias_id: AliasId,
        node_id: NodeId,
        privilege: Privilege,
    ) -> GatewayResult<()>;
    fn update_relation_status(
        &self,
        alias_id: AliasId,
        node_id: NodeId,
        load: i64,
        secret_hash: Option<String>,
    ) -> GatewayResult<()>;
    fn count_relations_for_node(&self, node_id: NodeId) -> GatewayResult<usize>;
}

impl AliasDatabase for StateStore {
    fn find_aliases(&self, query: &AliasQuery) -> GatewayResult<Vec<Alias>> {
        Ok(StateStore::find_aliases(self, query)?)
    }

    fn create_alias(&self, alias: &Alias) -> GatewayResult<Alias> {
        Ok(StateStore::create_alias(self, alias)?)
    }

    fn update_alias_scalars(&self, id: AliasId, scalars: &AliasScalars) -> GatewayResult<()> {
        Ok(StateStore::update_alias_scalars(self, id, scalars)?)
    }

    fn delete_alias(&self, id: AliasId) -> GatewayResult<()> {
        if StateStore::delete_alias(self, id)? {
            Ok(())
        } else {
            Err(StateError::NotFound(format!("alias id {id}")).into())
        }
    }

    fn add_cname(&self, alias_id: AliasId, name: &str) -> GatewayResult<()> {
        StateStore::add_cname(self, alias_id, name)?;
        Ok(())
    }

    fn delete_cname(&self, alias_id: AliasId, name: &str) -> GatewayResult<()> {
        StateStore::delete_cname(self, alias_id, name)?;
        Ok(())
    }

    fn cname_exists(&self, name: &str) -> GatewayResult<bool> {
        Ok(StateStore::cname_exists(self, name)?)
    }

    fn add_alarm(&self, alias_id: AliasId, alarm: &Alarm) -> GatewayResult<()> {
        StateStore::add_alarm(self, alias_id, alarm)?;
        Ok(())
    }

    fn delete_alarm(&self, alias_id: AliasId, alarm_id: u64) -> GatewayResult<()> {
        StateStore::delete_alarm(self, alias_id, alarm_id)?;
        Ok(())
    }

    fn find_node(&self, name: &str) -> GatewayResult<Option<Node>> {
        Ok(StateStore::find_node(self, name)?)
    }

    fn create_node(&self, name: &str) -> GatewayResult<Node> {
        Ok(StateStore::create_node(self, name)?)
    }

    fn delete_node(&self, name: &str) -> GatewayResult<()> {
        StateStore::delete_node(self, name)?;
        Ok(())
    }

    fn find_relation(&self, alias_id: AliasId, node_id: NodeId) -> GatewayResult<Option<Relation>> {
        Ok(StateStore::find_relation(self, alias_id, node_id)?)
    }

    fn create_relation(&self, relation: &Relation) -> GatewayResult<()> {
        Ok(StateStore::create_relation(self, relation)?)
    }

    fn delete_relation(&self, alias_id: AliasId, node_id: NodeId) -> GatewayResult<()> {
        StateStore::delete_relation(self, alias_id, node_id)?;
        Ok(())
    }

    fn update_privilege(
        &self,
        alias_id: AliasId,
        node_id: NodeId,
        privilege: Privilege,
    ) -> GatewayResult<()> {
        Ok(StateStore::update_privilege(self, alias_id, node_id, privilege)?)
    }

    fn update_relation_status(
        &self,
        alias_id: AliasId,
        node_id: NodeId,
        load: i64,
        secret_hash: Option<String>,
    ) -> GatewayResult<()> {
        Ok(StateStore::update_relation_status(
            self,
            alias_id,
            node_id,
            load,
            secret_hash,
        )?)
    }

    fn count_relations_for_node(&self, node_id: NodeId) -> GatewayResult<usize> {
        Ok(StateStore::count_relations_for_node(self, node_id)?)
    }
}

// ── DNS ───────────────────────────────────────────────────────────

/// A delegated DNS entry in one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsEntry {
    pub domain: String,
    pub view: View,
    pub key_name: String,
    pub description: String,
    /// Cnames published on this entry.
    pub aliases: Vec<String>,
}

/// Delegated-zone service. Mutating calls only report success or failure.
pub trait DnsGateway: Send + Sync {
    /// Entries whose domain matches `pattern`; a trailing `*` matches any suffix.
    fn search(&self, pattern: &str) -> GatewayResult<Vec<DnsEntry>>;
    fn add_entry(&self, domain: &str, view: View, key_name: &str, description: &str) -> bool;
    fn remove_entry(&self, domain: &str, view: View) -> bool;
    fn add_alias(&self, domain: &str, view: View, alias: &str) -> bool;
    fn remove_alias(&self, domain: &str, view: View, alias: &str) -> bool;
}

/// The entries of exactly `domain`, found through a prefix search on its
/// first label.
pub(crate) fn dns_entries_for(dns: &dyn DnsGateway, domain: &str) -> GatewayResult<Vec<DnsEntry>> {
    let short = domain.split('.').next().unwrap_or(domain);
    Ok(dns
        .search(&format!("{short}*"))?
        .into_iter()
        .filter(|e| e.domain == domain)
        .collect())
}

// ── Secrets and mail ──────────────────────────────────────────────

/// Per-alias secret storage.
pub trait SecretVault: Send + Sync {
    /// Secrets stored for an alias; empty if none.
    fn get(&self, alias: &str) -> GatewayResult<Vec<String>>;
    fn put(&self, alias: &str, secret: &str) -> GatewayResult<()>;
    fn delete(&self, alias: &str) -> GatewayResult<()>;
}

pub trait Mailer: Send + Sync {
    fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> GatewayResult<()>;
}
