//! StateStore — redb-backed alias database.
//!
//! Provides typed CRUD over aliases and their cnames, alarms and node
//! relations, plus the shared node records. Values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing and standalone mode).

use std::path::Path;
use std::sync::Arc;

use ermis_core::types::*;
use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Which aliases to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasQuery {
    All,
    ById(AliasId),
    ByName(String),
}

/// Stored form of an alias: identity plus scalars, children live in
/// their own tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AliasRow {
    id: AliasId,
    name: String,
    #[serde(flatten)]
    scalars: AliasScalars,
}

impl AliasRow {
    fn from_alias(alias: &Alias) -> Self {
        Self {
            id: alias.id,
            name: alias.name.clone(),
            scalars: alias.scalars(),
        }
    }
}

/// Thread-safe alias database backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "alias database opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory alias database opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ALIASES).map_err(map_err!(Table))?;
        txn.open_table(ALIAS_IDS).map_err(map_err!(Table))?;
        txn.open_table(CNAMES).map_err(map_err!(Table))?;
        txn.open_table(ALARMS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(RELATIONS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` in a write transaction, committing on success and
    /// aborting on error.
    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> StateResult<T>) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        match f(&txn) {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }

    // ── Aliases ────────────────────────────────────────────────────

    /// Load aliases, children included.
    pub fn find_aliases(&self, query: &AliasQuery) -> StateResult<Vec<Alias>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let aliases = txn.open_table(ALIASES).map_err(map_err!(Table))?;
        let cnames = txn.open_table(CNAMES).map_err(map_err!(Table))?;
        let relations = txn.open_table(RELATIONS).map_err(map_err!(Table))?;
        let alarms = txn.open_table(ALARMS).map_err(map_err!(Table))?;

        let rows: Vec<AliasRow> = match query {
            AliasQuery::All => load_all(&aliases)?.into_iter().map(|(_, r)| r).collect(),
            AliasQuery::ByName(name) => load(&aliases, name)?.into_iter().collect(),
            AliasQuery::ById(id) => {
                let ids = txn.open_table(ALIAS_IDS).map_err(map_err!(Table))?;
                let name = ids
                    .get(*id)
                    .map_err(map_err!(Read))?
                    .map(|g| g.value().to_string());
                match name {
                    Some(name) => load(&aliases, &name)?.into_iter().collect(),
                    None => Vec::new(),
                }
            }
        };

        rows.into_iter()
            .map(|row| assemble(row, &cnames, &relations, &alarms))
            .collect()
    }

    /// Get an alias by name.
    pub fn get_alias_by_name(&self, name: &str) -> StateResult<Option<Alias>> {
        Ok(self
            .find_aliases(&AliasQuery::ByName(name.to_string()))?
            .into_iter()
            .next())
    }

    /// Get an alias by id.
    pub fn get_alias(&self, id: AliasId) -> StateResult<Option<Alias>> {
        Ok(self.find_aliases(&AliasQuery::ById(id))?.into_iter().next())
    }

    /// Insert an alias together with its cnames, relations and alarms.
    ///
    /// Nonzero ids on the alias and its children are kept, so a snapshot
    /// taken before a delete can be restored as it was. Nodes referenced by
    /// the relations are found by name or created. Fails with
    /// `AlreadyExists` if the name, the id or any cname is taken.
    pub fn create_alias(&self, alias: &Alias) -> StateResult<Alias> {
        let stored = self.write(|txn| {
            {
                let aliases = txn.open_table(ALIASES).map_err(map_err!(Table))?;
                if aliases
                    .get(alias.name.as_str())
                    .map_err(map_err!(Read))?
                    .is_some()
                {
                    return Err(StateError::AlreadyExists(format!("alias {}", alias.name)));
                }
            }
            if alias.id != 0 {
                let ids = txn.open_table(ALIAS_IDS).map_err(map_err!(Table))?;
                if ids.get(alias.id).map_err(map_err!(Read))?.is_some() {
                    return Err(StateError::AlreadyExists(format!("alias id {}", alias.id)));
                }
            }

            let mut stored = alias.clone();
            stored.id = reserve_id(txn, ALIAS_SEQ, alias.id)?;

            for cname in &mut stored.cnames {
                cname.alias_id = stored.id;
                insert_cname(txn, cname)?;
            }
            for relation in &mut stored.relations {
                let node = resolve_node(txn, &relation.node_name, relation.node_id)?;
                relation.alias_id = stored.id;
                relation.node_id = node.id;
                let mut table = txn.open_table(RELATIONS).map_err(map_err!(Table))?;
                store_json(&mut table, &relation.table_key(), relation)?;
            }
            for alarm in &mut stored.alarms {
                alarm.alias_id = stored.id;
                alarm.alias_name = stored.name.clone();
                insert_alarm(txn, alarm)?;
            }

            {
                let mut aliases = txn.open_table(ALIASES).map_err(map_err!(Table))?;
                store_json(&mut aliases, &stored.name, &AliasRow::from_alias(&stored))?;
                let mut ids = txn.open_table(ALIAS_IDS).map_err(map_err!(Table))?;
                ids.insert(stored.id, stored.name.as_str())
                    .map_err(map_err!(Write))?;
            }
            Ok(stored)
        })?;

        // Children come back in table order.
        let stored = self.get_alias(stored.id)?.unwrap_or(stored);
        debug!(alias = %stored.name, id = stored.id, "alias created");
        Ok(stored)
    }

    /// Overwrite the scalar columns of an alias.
    pub fn update_alias_scalars(&self, id: AliasId, scalars: &AliasScalars) -> StateResult<()> {
        self.write(|txn| {
            let name = alias_name(txn, id)?;
            let mut aliases = txn.open_table(ALIASES).map_err(map_err!(Table))?;
            let mut row: AliasRow = load(&aliases, &name)?
                .ok_or_else(|| StateError::NotFound(format!("alias {name}")))?;
            row.scalars = scalars.clone();
            store_json(&mut aliases, &name, &row)
        })?;
        debug!(id, "alias scalars updated");
        Ok(())
    }

    /// Delete an alias and everything it owns.
    ///
    /// Nodes left without any relation are removed in the same
    /// transaction. Returns true if the alias existed.
    pub fn delete_alias(&self, id: AliasId) -> StateResult<bool> {
        let existed = self.write(|txn| {
            let removed = {
                let mut ids = txn.open_table(ALIAS_IDS).map_err(map_err!(Table))?;
                ids.remove(id)
                    .map_err(map_err!(Write))?
                    .map(|g| g.value().to_string())
            };
            let Some(name) = removed else {
                return Ok(false);
            };

            let mut aliases = txn.open_table(ALIASES).map_err(map_err!(Table))?;
            aliases.remove(name.as_str()).map_err(map_err!(Write))?;

            let mut cnames = txn.open_table(CNAMES).map_err(map_err!(Table))?;
            let owned: Vec<String> = load_all::<Cname>(&cnames)?
                .into_iter()
                .filter(|(_, c)| c.alias_id == id)
                .map(|(key, _)| key)
                .collect();
            for key in &owned {
                cnames.remove(key.as_str()).map_err(map_err!(Write))?;
            }

            let prefix = format!("{id}:");
            let mut alarms = txn.open_table(ALARMS).map_err(map_err!(Table))?;
            for (key, _) in load_prefixed::<Alarm>(&alarms, &prefix)? {
                alarms.remove(key.as_str()).map_err(map_err!(Write))?;
            }

            let mut relations = txn.open_table(RELATIONS).map_err(map_err!(Table))?;
            let released = load_prefixed::<Relation>(&relations, &prefix)?;
            for (key, _) in &released {
                relations.remove(key.as_str()).map_err(map_err!(Write))?;
            }

            let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            for (_, relation) in &released {
                if count_for_node(&relations, relation.node_id)? == 0 {
                    nodes
                        .remove(relation.node_name.as_str())
                        .map_err(map_err!(Write))?;
                    debug!(node = %relation.node_name, "orphaned node removed");
                }
            }
            Ok(true)
        })?;
        debug!(id, existed, "alias deleted");
        Ok(existed)
    }

    // ── Cnames ─────────────────────────────────────────────────────

    /// Attach a cname to an alias.
    pub fn add_cname(&self, alias_id: AliasId, name: &str) -> StateResult<Cname> {
        let cname = self.write(|txn| {
            alias_name(txn, alias_id)?;
            let mut cname = Cname::new(name);
            cname.alias_id = alias_id;
            insert_cname(txn, &mut cname)?;
            Ok(cname)
        })?;
        debug!(alias_id, cname = %name, "cname added");
        Ok(cname)
    }

    /// Detach a cname from an alias. Returns true if the alias owned it.
    pub fn delete_cname(&self, alias_id: AliasId, name: &str) -> StateResult<bool> {
        self.write(|txn| {
            let mut cnames = txn.open_table(CNAMES).map_err(map_err!(Table))?;
            match load::<Cname>(&cnames, name)? {
                Some(c) if c.alias_id == alias_id => {
                    cnames.remove(name).map_err(map_err!(Write))?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    /// Whether `name` is used as a cname by any alias.
    pub fn cname_exists(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let cnames = txn.open_table(CNAMES).map_err(map_err!(Table))?;
        Ok(cnames.get(name).map_err(map_err!(Read))?.is_some())
    }

    // ── Alarms ─────────────────────────────────────────────────────

    /// Attach an alarm to an alias; the stored copy gets a fresh id.
    pub fn add_alarm(&self, alias_id: AliasId, alarm: &Alarm) -> StateResult<Alarm> {
        self.write(|txn| {
            let name = alias_name(txn, alias_id)?;
            let mut stored = alarm.clone();
            stored.id = 0;
            stored.alias_id = alias_id;
            stored.alias_name = name;
            insert_alarm(txn, &mut stored)?;
            Ok(stored)
        })
    }

    /// Returns true if the alarm existed.
    pub fn delete_alarm(&self, alias_id: AliasId, alarm_id: u64) -> StateResult<bool> {
        self.write(|txn| {
            let mut alarms = txn.open_table(ALARMS).map_err(map_err!(Table))?;
            let key = format!("{alias_id}:{alarm_id}");
            Ok(alarms.remove(key.as_str()).map_err(map_err!(Write))?.is_some())
        })
    }

    // ── Nodes ──────────────────────────────────────────────────────

    pub fn find_node(&self, name: &str) -> StateResult<Option<Node>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
        load(&nodes, name)
    }

    /// Create a node with a fresh id. Fails if the name is taken.
    pub fn create_node(&self, name: &str) -> StateResult<Node> {
        let node = self.write(|txn| {
            {
                let nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
                if nodes.get(name).map_err(map_err!(Read))?.is_some() {
                    return Err(StateError::AlreadyExists(format!("node {name}")));
                }
            }
            resolve_node(txn, name, 0)
        })?;
        debug!(node = %name, id = node.id, "node created");
        Ok(node)
    }

    /// Delete a node if it exists. Returns true if it did.
    pub fn delete_node(&self, name: &str) -> StateResult<bool> {
        let existed = self.write(|txn| {
            let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            Ok(nodes.remove(name).map_err(map_err!(Write))?.is_some())
        })?;
        debug!(node = %name, existed, "node deleted");
        Ok(existed)
    }

    // ── Relations ──────────────────────────────────────────────────

    /// Insert a relation. Alias and node must exist.
    pub fn create_relation(&self, relation: &Relation) -> StateResult<()> {
        self.write(|txn| {
            alias_name(txn, relation.alias_id)?;
            let mut relations = txn.open_table(RELATIONS).map_err(map_err!(Table))?;
            let key = relation.table_key();
            if relations
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::AlreadyExists(format!("relation {key}")));
            }
            store_json(&mut relations, &key, relation)
        })?;
        debug!(
            alias_id = relation.alias_id,
            node = %relation.node_name,
            privilege = ?relation.privilege,
            "relation created"
        );
        Ok(())
    }

    pub fn find_relation(&self, alias_id: AliasId, node_id: NodeId) -> StateResult<Option<Relation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let relations = txn.open_table(RELATIONS).map_err(map_err!(Table))?;
        load(&relations, &relation_key(alias_id, node_id))
    }

    /// Returns true if the relation existed.
    pub fn delete_relation(&self, alias_id: AliasId, node_id: NodeId) -> StateResult<bool> {
        let existed = self.write(|txn| {
            let mut relations = txn.open_table(RELATIONS).map_err(map_err!(Table))?;
            let key = relation_key(alias_id, node_id);
            Ok(relations
                .remove(key.as_str())
                .map_err(map_err!(Write))?
                .is_some())
        })?;
        debug!(alias_id, node_id, existed, "relation deleted");
        Ok(existed)
    }

    pub fn update_privilege(
        &self,
        alias_id: AliasId,
        node_id: NodeId,
        privilege: Privilege,
    ) -> StateResult<()> {
        self.modify_relation(alias_id, node_id, |r| r.privilege = privilege)
    }

    /// Record a status report on a relation.
    pub fn update_relation_status(
        &self,
        alias_id: AliasId,
        node_id: NodeId,
        load: i64,
        secret_hash: Option<String>,
    ) -> StateResult<()> {
        let now = epoch_secs();
        self.modify_relation(alias_id, node_id, move |r| {
            r.load = load;
            r.last_check = Some(now);
            if secret_hash.is_some() {
                r.secret_hash = secret_hash;
            }
        })
    }

    fn modify_relation(
        &self,
        alias_id: AliasId,
        node_id: NodeId,
        f: impl FnOnce(&mut Relation),
    ) -> StateResult<()> {
        self.write(|txn| {
            let mut relations = txn.open_table(RELATIONS).map_err(map_err!(Table))?;
            let key = relation_key(alias_id, node_id);
            let mut relation: Relation = load(&relations, &key)?
                .ok_or_else(|| StateError::NotFound(format!("relation {key}")))?;
            f(&mut relation);
            store_json(&mut relations, &key, &relation)
        })
    }

    /// Number of relations, across all aliases, that reference a node.
    pub fn count_relations_for_node(&self, node_id: NodeId) -> StateResult<usize> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let relations = txn.open_table(RELATIONS).map_err(map_err!(Table))?;
        count_for_node(&relations, node_id)
    }
}

// ── Transaction helpers ────────────────────────────────────────────

type JsonTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

fn store_json<T: Serialize>(table: &mut JsonTable<'_>, key: &str, value: &T) -> StateResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn load<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn load_all<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StateResult<Vec<(String, T)>> {
    load_prefixed(table, "")
}

fn load_prefixed<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<Vec<(String, T)>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push((key.value().to_string(), item));
        }
    }
    Ok(results)
}

fn count_for_node(
    relations: &impl ReadableTable<&'static str, &'static [u8]>,
    node_id: NodeId,
) -> StateResult<usize> {
    Ok(load_all::<Relation>(relations)?
        .iter()
        .filter(|(_, r)| r.node_id == node_id)
        .count())
}

fn assemble(
    row: AliasRow,
    cnames: &impl ReadableTable<&'static str, &'static [u8]>,
    relations: &impl ReadableTable<&'static str, &'static [u8]>,
    alarms: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StateResult<Alias> {
    let prefix = format!("{}:", row.id);
    let mut alias = Alias::named(&row.name);
    alias.id = row.id;
    alias.set_scalars(row.scalars);
    alias.cnames = load_all::<Cname>(cnames)?
        .into_iter()
        .map(|(_, c)| c)
        .filter(|c| c.alias_id == row.id)
        .collect();
    alias.relations = load_prefixed::<Relation>(relations, &prefix)?
        .into_iter()
        .map(|(_, r)| r)
        .collect();
    alias.alarms = load_prefixed::<Alarm>(alarms, &prefix)?
        .into_iter()
        .map(|(_, a)| a)
        .collect();
    Ok(alias)
}

fn alias_name(txn: &WriteTransaction, id: AliasId) -> StateResult<String> {
    let ids = txn.open_table(ALIAS_IDS).map_err(map_err!(Table))?;
    let name = ids
        .get(id)
        .map_err(map_err!(Read))?
        .map(|g| g.value().to_string());
    name.ok_or_else(|| StateError::NotFound(format!("alias id {id}")))
}

/// Hand out the next id of a sequence, or keep `requested` (nonzero) and
/// advance the sequence past it.
fn reserve_id(txn: &WriteTransaction, sequence: &str, requested: u64) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table
        .get(sequence)
        .map_err(map_err!(Read))?
        .map(|g| g.value())
        .unwrap_or(0);
    let id = if requested == 0 { current + 1 } else { requested };
    if id > current {
        table.insert(sequence, id).map_err(map_err!(Write))?;
    }
    Ok(id)
}

fn insert_cname(txn: &WriteTransaction, cname: &mut Cname) -> StateResult<()> {
    {
        let cnames = txn.open_table(CNAMES).map_err(map_err!(Table))?;
        if cnames
            .get(cname.name.as_str())
            .map_err(map_err!(Read))?
            .is_some()
        {
            return Err(StateError::AlreadyExists(format!("cname {}", cname.name)));
        }
    }
    cname.id = reserve_id(txn, CNAME_SEQ, cname.id)?;
    let mut cnames = txn.open_table(CNAMES).map_err(map_err!(Table))?;
    store_json(&mut cnames, &cname.name, cname)
}

fn insert_alarm(txn: &WriteTransaction, alarm: &mut Alarm) -> StateResult<()> {
    alarm.id = reserve_id(txn, ALARM_SEQ, alarm.id)?;
    let mut alarms = txn.open_table(ALARMS).map_err(map_err!(Table))?;
    store_json(&mut alarms, &alarm.table_key(), alarm)
}

/// Find a node by name, or create it. A nonzero `requested` id is kept
/// unless another node already holds it.
fn resolve_node(txn: &WriteTransaction, name: &str, requested: NodeId) -> StateResult<Node> {
    let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
    if let Some(node) = load::<Node>(&nodes, name)? {
        return Ok(node);
    }
    let taken = requested != 0
        && load_all::<Node>(&nodes)?
            .iter()
            .any(|(_, n)| n.id == requested);
    let mut node = Node::new(name);
    node.id = reserve_id(txn, NODE_SEQ, if taken { 0 } else { requested })?;
    store_json(&mut nodes, name, &node)?;
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_alias(name: &str) -> Alias {
        let mut alias = Alias::named(name);
        alias.best_hosts = 2;
        alias.hostgroup = "lb/test".to_string();
        alias.user = "alice".to_string();
        alias.metric = "cmsfrontier".to_string();
        alias.polling_interval = 300;
        alias.ttl = 60;
        alias.cnames = vec![Cname::new("c1"), Cname::new("c2")];
        alias.relations = vec![
            Relation::new("node-a", Privilege::Allowed),
            Relation::new("node-b", Privilege::Blacklisted),
        ];
        alias.alarms = vec![Alarm::new(AlarmKind::Minimum, "ops@example.org", 1)];
        alias
    }

    // ── Alias CRUD ─────────────────────────────────────────────────

    #[test]
    fn alias_create_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store.create_alias(&test_alias("svc1.example")).unwrap();

        assert_ne!(created.id, 0);
        assert_eq!(created.cname_names(), vec!["c1", "c2"]);
        assert_eq!(created.relations.len(), 2);
        assert!(created.relations.iter().all(|r| r.alias_id == created.id));
        assert_eq!(created.alarms[0].alias_name, "svc1.example");

        let by_name = store.get_alias_by_name("svc1.example").unwrap();
        let by_id = store.get_alias(created.id).unwrap();
        assert_eq!(by_name, Some(created.clone()));
        assert_eq!(by_id, Some(created));
    }

    #[test]
    fn alias_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_alias_by_name("nope.example").unwrap().is_none());
        assert!(store.get_alias(99).unwrap().is_none());
    }

    #[test]
    fn alias_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_alias(&Alias::named("a.example")).unwrap();
        store.create_alias(&Alias::named("b.example")).unwrap();
        let all = store.find_aliases(&AliasQuery::All).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn duplicate_alias_name_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_alias(&Alias::named("svc1.example")).unwrap();
        let err = store.create_alias(&Alias::named("svc1.example")).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[test]
    fn taken_cname_rejects_whole_create() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_alias(&test_alias("svc1.example")).unwrap();

        let mut other = Alias::named("svc2.example");
        other.cnames = vec![Cname::new("fresh"), Cname::new("c1")];
        let err = store.create_alias(&other).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));

        assert!(store.get_alias_by_name("svc2.example").unwrap().is_none());
        assert!(!store.cname_exists("fresh").unwrap());
    }

    #[test]
    fn update_scalars_keeps_children() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store.create_alias(&test_alias("svc1.example")).unwrap();

        let mut scalars = created.scalars();
        scalars.ttl = 120;
        scalars.external = External::Yes;
        store.update_alias_scalars(created.id, &scalars).unwrap();

        let updated = store.get_alias(created.id).unwrap().unwrap();
        assert_eq!(updated.ttl, 120);
        assert_eq!(updated.external, External::Yes);
        assert_eq!(updated.cnames, created.cnames);
    }

    #[test]
    fn update_scalars_unknown_alias_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let scalars = Alias::named("x").scalars();
        let err = store.update_alias_scalars(5, &scalars).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn delete_alias_cascades_and_collects_nodes() {
        let store = StateStore::open_in_memory().unwrap();
        let first = store.create_alias(&test_alias("svc1.example")).unwrap();

        let mut second = Alias::named("svc2.example");
        second.relations = vec![Relation::new("node-a", Privilege::Allowed)];
        let second = store.create_alias(&second).unwrap();

        assert!(store.delete_alias(first.id).unwrap());
        assert!(store.get_alias(first.id).unwrap().is_none());
        assert!(!store.cname_exists("c1").unwrap());

        // node-a is still referenced by svc2; node-b is not.
        assert!(store.find_node("node-a").unwrap().is_some());
        assert!(store.find_node("node-b").unwrap().is_none());
        assert_eq!(store.get_alias(second.id).unwrap().unwrap().relations.len(), 1);
    }

    #[test]
    fn delete_alias_nonexistent_returns_false() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(!store.delete_alias(42).unwrap());
    }

    #[test]
    fn snapshot_restores_identically() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store.create_alias(&test_alias("svc1.example")).unwrap();
        store.delete_alias(created.id).unwrap();

        let restored = store.create_alias(&created).unwrap();
        assert_eq!(restored, created);

        // Fresh ids continue past the restored ones.
        let next = store.create_alias(&Alias::named("svc2.example")).unwrap();
        assert!(next.id > created.id);
    }

    // ── Children ───────────────────────────────────────────────────

    #[test]
    fn cname_add_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let alias = store.create_alias(&Alias::named("svc1.example")).unwrap();

        let cname = store.add_cname(alias.id, "www").unwrap();
        assert_eq!(cname.alias_id, alias.id);
        assert!(store.cname_exists("www").unwrap());

        let err = store.add_cname(alias.id, "www").unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));

        assert!(!store.delete_cname(alias.id + 1, "www").unwrap());
        assert!(store.delete_cname(alias.id, "www").unwrap());
        assert!(!store.cname_exists("www").unwrap());
    }

    #[test]
    fn cname_add_to_unknown_alias_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.add_cname(7, "www").unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn alarm_add_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let alias = store.create_alias(&Alias::named("svc1.example")).unwrap();

        let alarm = store
            .add_alarm(alias.id, &Alarm::new(AlarmKind::Minimum, "ops@example.org", 3))
            .unwrap();
        assert_ne!(alarm.id, 0);
        assert_eq!(alarm.alias_name, "svc1.example");
        assert_eq!(store.get_alias(alias.id).unwrap().unwrap().alarms, vec![alarm.clone()]);

        assert!(store.delete_alarm(alias.id, alarm.id).unwrap());
        assert!(!store.delete_alarm(alias.id, alarm.id).unwrap());
    }

    #[test]
    fn node_create_find_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let node = store.create_node("node-a").unwrap();
        assert_eq!(store.find_node("node-a").unwrap(), Some(node));

        assert!(matches!(
            store.create_node("node-a").unwrap_err(),
            StateError::AlreadyExists(_)
        ));

        assert!(store.delete_node("node-a").unwrap());
        assert!(!store.delete_node("node-a").unwrap());
    }

    #[test]
    fn relation_lifecycle() {
        let store = StateStore::open_in_memory().unwrap();
        let alias = store.create_alias(&Alias::named("svc1.example")).unwrap();
        let node = store.create_node("node-a").unwrap();

        let mut relation = Relation::new("node-a", Privilege::Allowed);
        relation.alias_id = alias.id;
        relation.node_id = node.id;
        store.create_relation(&relation).unwrap();
        assert!(matches!(
            store.create_relation(&relation).unwrap_err(),
            StateError::AlreadyExists(_)
        ));
        assert_eq!(store.count_relations_for_node(node.id).unwrap(), 1);

        store
            .update_privilege(alias.id, node.id, Privilege::Blacklisted)
            .unwrap();
        store
            .update_relation_status(alias.id, node.id, 17, Some("abc".to_string()))
            .unwrap();
        let stored = store.find_relation(alias.id, node.id).unwrap().unwrap();
        assert_eq!(stored.privilege, Privilege::Blacklisted);
        assert_eq!(stored.load, 17);
        assert_eq!(stored.secret_hash.as_deref(), Some("abc"));
        assert!(stored.last_check.is_some());

        assert!(store.delete_relation(alias.id, node.id).unwrap());
        assert_eq!(store.count_relations_for_node(node.id).unwrap(), 0);
        assert!(matches!(
            store
                .update_privilege(alias.id, node.id, Privilege::Allowed)
                .unwrap_err(),
            StateError::NotFound(_)
        ));
    }

    #[test]
    fn status_update_without_hash_keeps_hash() {
        let store = StateStore::open_in_memory().unwrap();
        let mut alias = Alias::named("svc1.example");
        alias.relations = vec![Relation {
            secret_hash: Some("h1".to_string()),
            ..Relation::new("node-a", Privilege::Allowed)
        }];
        let alias = store.create_alias(&alias).unwrap();
        let node_id = alias.relations[0].node_id;

        store.update_relation_status(alias.id, node_id, 3, None).unwrap();
        let stored = store.find_relation(alias.id, node_id).unwrap().unwrap();
        assert_eq!(stored.load, 3);
        assert_eq!(stored.secret_hash.as_deref(), Some("h1"));
    }

    // ── Persistence ────────────────────────────────────────────────

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ermis.redb");

        let created = {
            let store = StateStore::open(&path).unwrap();
            store.create_alias(&test_alias("svc1.example")).unwrap()
        };

        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.get_alias(created.id).unwrap(), Some(created));
    }
}
