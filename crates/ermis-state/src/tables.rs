//! redb table definitions for the alias database.
//!
//! Row tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Child rows use `{alias_id}:{child_id}` keys so an alias's
//! children can be found with a prefix scan.

use redb::TableDefinition;

/// Alias rows (scalars only) keyed by alias name.
pub const ALIASES: TableDefinition<&str, &[u8]> = TableDefinition::new("aliases");

/// Alias id → alias name.
pub const ALIAS_IDS: TableDefinition<u64, &str> = TableDefinition::new("alias_ids");

/// Cnames keyed by cname (globally unique).
pub const CNAMES: TableDefinition<&str, &[u8]> = TableDefinition::new("cnames");

/// Alarms keyed by `{alias_id}:{alarm_id}`.
pub const ALARMS: TableDefinition<&str, &[u8]> = TableDefinition::new("alarms");

/// Nodes keyed by node name.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Relations keyed by `{alias_id}:{node_id}`.
pub const RELATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("relations");

/// Last id handed out, per sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub const ALIAS_SEQ: &str = "alias";
pub const CNAME_SEQ: &str = "cname";
pub const ALARM_SEQ: &str = "alarm";
pub const NODE_SEQ: &str = "node";
