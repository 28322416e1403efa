//! In-memory gateways.
//!
//! Used by the daemon in standalone mode and by tests. Every gateway can
//! be told to fail specific operations, which is how compensation paths
//! are exercised.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ermis_core::types::*;
use ermis_state::{AliasQuery, StateError, StateStore};
use tracing::info;

use crate::gateway::*;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── DNS ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsOp {
    Search,
    AddEntry,
    RemoveEntry,
    AddAlias,
    RemoveAlias,
}

/// Delegated zone held in memory.
#[derive(Default)]
pub struct MemoryDns {
    entries: Mutex<Vec<DnsEntry>>,
    /// `None` view means every view.
    faults: Mutex<HashSet<(DnsOp, Option<View>)>>,
}

impl MemoryDns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail in every view.
    pub fn fail_on(&self, op: DnsOp) {
        lock(&self.faults).insert((op, None));
    }

    /// Make `op` fail in one view only.
    pub fn fail_on_view(&self, op: DnsOp, view: View) {
        lock(&self.faults).insert((op, Some(view)));
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    pub fn entry(&self, domain: &str, view: View) -> Option<DnsEntry> {
        lock(&self.entries)
            .iter()
            .find(|e| e.domain == domain && e.view == view)
            .cloned()
    }

    pub fn entries(&self) -> Vec<DnsEntry> {
        lock(&self.entries).clone()
    }

    fn faulty(&self, op: DnsOp, view: Option<View>) -> bool {
        let faults = lock(&self.faults);
        faults.contains(&(op, None)) || view.is_some_and(|v| faults.contains(&(op, Some(v))))
    }

    fn with_entry(&self, domain: &str, view: View, f: impl FnOnce(&mut DnsEntry) -> bool) -> bool {
        let mut entries = lock(&self.entries);
        match entries
            .iter_mut()
            .find(|e| e.domain == domain && e.view == view)
        {
            Some(entry) => f(entry),
            None => false,
        }
    }
}

impl DnsGateway for MemoryDns {
    fn search(&self, pattern: &str) -> GatewayResult<Vec<DnsEntry>> {
        if self.faulty(DnsOp::Search, None) {
            return Err(GatewayError::Dns(format!("search {pattern} failed")));
        }
        let matches = |domain: &str| match pattern.strip_suffix('*') {
            Some(prefix) => domain.starts_with(prefix),
            None => domain == pattern,
        };
        Ok(lock(&self.entries)
            .iter()
            .filter(|e| matches(e.domain.as_str()))
            .cloned()
            .collect())
    }

    fn add_entry(&self, domain: &str, view: View, key_name: &str, description: &str) -> bool {
        if self.faulty(DnsOp::AddEntry, Some(view)) {
            return false;
        }
        let mut entries = lock(&self.entries);
        if entries.iter().any(|e| e.domain == domain && e.view == view) {
            return false;
        }
        entries.push(DnsEntry {
            domain: domain.to_string(),
            view,
            key_name: key_name.to_string(),
            description: description.to_string(),
            aliases: Vec::new(),
        });
        true
    }

    fn remove_entry(&self, domain: &str, view: View) -> bool {
        if self.faulty(DnsOp::RemoveEntry, Some(view)) {
            return false;
        }
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|e| !(e.domain == domain && e.view == view));
        entries.len() < before
    }

    fn add_alias(&self, domain: &str, view: View, alias: &str) -> bool {
        if self.faulty(DnsOp::AddAlias, Some(view)) {
            return false;
        }
        self.with_entry(domain, view, |entry| {
            if !entry.aliases.iter().any(|a| a == alias) {
                entry.aliases.push(alias.to_string());
            }
            true
        })
    }

    fn remove_alias(&self, domain: &str, view: View, alias: &str) -> bool {
        if self.faulty(DnsOp::RemoveAlias, Some(view)) {
            return false;
        }
        self.with_entry(domain, view, |entry| {
            let before = entry.aliases.len();
            entry.aliases.retain(|a| a != alias);
            entry.aliases.len() < before
        })
    }
}

// ── Vault ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultOp {
    Get,
    Put,
    Delete,
}

/// Secret store held in memory.
#[derive(Default)]
pub struct MemoryVault {
    secrets: Mutex<HashMap<String, Vec<String>>>,
    faults: Mutex<HashSet<VaultOp>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, op: VaultOp) {
        lock(&self.faults).insert(op);
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    pub fn contains(&self, alias: &str) -> bool {
        lock(&self.secrets).contains_key(alias)
    }

    fn check(&self, op: VaultOp, alias: &str) -> GatewayResult<()> {
        if lock(&self.faults).contains(&op) {
            return Err(GatewayError::Vault(format!("{op:?} {alias} failed")));
        }
        Ok(())
    }
}

impl SecretVault for MemoryVault {
    fn get(&self, alias: &str) -> GatewayResult<Vec<String>> {
        self.check(VaultOp::Get, alias)?;
        Ok(lock(&self.secrets).get(alias).cloned().unwrap_or_default())
    }

    fn put(&self, alias: &str, secret: &str) -> GatewayResult<()> {
        self.check(VaultOp::Put, alias)?;
        lock(&self.secrets).insert(alias.to_string(), vec![secret.to_string()]);
        Ok(())
    }

    fn delete(&self, alias: &str) -> GatewayResult<()> {
        self.check(VaultOp::Delete, alias)?;
        lock(&self.secrets).remove(alias);
        Ok(())
    }
}

// ── Mail ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mailer that logs and records every message instead of sending it.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<SentMail>>,
    failing: Mutex<bool>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn sent(&self) -> Vec<SentMail> {
        lock(&self.sent).clone()
    }
}

impl Mailer for MemoryMailer {
    fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> GatewayResult<()> {
        if *lock(&self.failing) {
            return Err(GatewayError::Mail(format!("cannot reach relay for {to}")));
        }
        info!(%from, %to, %subject, "mail queued");
        lock(&self.sent).push(SentMail {
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

// ── Database with fault injection ─────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbOp {
    CreateAlias,
    UpdateScalars,
    DeleteAlias,
    AddCname,
    DeleteCname,
    AddAlarm,
    DeleteAlarm,
    CreateRelation,
    DeleteRelation,
    UpdatePrivilege,
}

/// A [`StateStore`] whose individual operations can be made to fail.
pub struct FaultyDatabase {
    store: StateStore,
    faults: Mutex<HashSet<DbOp>>,
}

impl FaultyDatabase {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            faults: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn fail_on(&self, op: DbOp) {
        lock(&self.faults).insert(op);
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    fn check(&self, op: DbOp) -> GatewayResult<()> {
        if lock(&self.faults).contains(&op) {
            return Err(StateError::Write(format!("{op:?} failed")).into());
        }
        Ok(())
    }
}

impl AliasDatabase for FaultyDatabase {
    fn find_aliases(&self, query: &AliasQuery) -> GatewayResult<Vec<Alias>> {
        AliasDatabase::find_aliases(&self.store, query)
    }

    fn create_alias(&self, alias: &Alias) -> GatewayResult<Alias> {
        self.check(DbOp::CreateAlias)?;
        AliasDatabase::create_alias(&self.store, alias)
    }

    fn update_alias_scalars(&self, id: AliasId, scalars: &AliasScalars) -> GatewayResult<()> {
        self.check(DbOp::UpdateScalars)?;
        AliasDatabase::update_alias_scalars(&self.store, id, scalars)
    }

    fn delete_alias(&self, id: AliasId) -> GatewayResult<()> {
        self.check(DbOp::DeleteAlias)?;
        AliasDatabase::delete_alias(&self.store, id)
    }

    fn add_cname(&self, alias_id: AliasId, name: &str) -> GatewayResult<()> {
        self.check(DbOp::AddCname)?;
        AliasDatabase::add_cname(&self.store, alias_id, name)
    }

    fn delete_cname(&self, alias_id: AliasId, name: &str) -> GatewayResult<()> {
        self.check(DbOp::DeleteCname)?;
        AliasDatabase::delete_cname(&self.store, alias_id, name)
    }

    fn cname_exists(&self, name: &str) -> GatewayResult<bool> {
        AliasDatabase::cname_exists(&self.store, name)
    }

    fn add_alarm(&self, alias_id: AliasId, alarm: &Alarm) -> GatewayResult<()> {
        self.check(DbOp::AddAlarm)?;
        AliasDatabase::add_alarm(&self.store, alias_id, alarm)
    }

    fn delete_alarm(&self, alias_id: AliasId, alarm_id: u64) -> GatewayResult<()> {
        self.check(DbOp::DeleteAlarm)?;
        AliasDatabase::delete_alarm(&self.store, alias_id, alarm_id)
    }

    fn find_node(&self, name: &str) -> GatewayResult<Option<Node>> {
        AliasDatabase::find_node(&self.store, name)
    }

    fn create_node(&self, name: &str) -> GatewayResult<Node> {
        AliasDatabase::create_node(&self.store, name)
    }

    fn delete_node(&self, name: &str) -> GatewayResult<()> {
        AliasDatabase::delete_node(&self.store, name)
    }

    fn find_relation(&self, alias_id: AliasId, node_id: NodeId) -> GatewayResult<Option<Relation>> {
        AliasDatabase::find_relation(&self.store, alias_id, node_id)
    }

    fn create_relation(&self, relation: &Relation) -> GatewayResult<()> {
        self.check(DbOp::CreateRelation)?;
        AliasDatabase::create_relation(&self.store, relation)
    }

    fn delete_relation(&self, alias_id: AliasId, node_id: NodeId) -> GatewayResult<()> {
        self.check(DbOp::DeleteRelation)?;
        AliasDatabase::delete_relation(&self.store, alias_id, node_id)
    }

    fn update_privilege(
        &self,
        alias_id: AliasId,
        node_id: NodeId,
        privilege: Privilege,
    ) -> GatewayResult<()> {
        self.check(DbOp::UpdatePrivilege)?;
        AliasDatabase::update_privilege(&self.store, alias_id, node_id, privilege)
    }

    fn update_relation_status(
        &self,
        alias_id: AliasId,
        node_id: NodeId,
        load: i64,
        secret_hash: Option<String>,
    ) -> GatewayResult<()> {
        AliasDatabase::update_relation_status(&self.store, alias_id, node_id, load, secret_hash)
    }

    fn count_relations_for_node(&self, node_id: NodeId) -> GatewayResult<usize> {
        AliasDatabase::count_relations_for_node(&self.store, node_id)
    }
}
