//! Domain types for Ermis aliases.
//!
//! An alias is a named, load-balanced endpoint. It owns its cnames and
//! alarms outright and shares nodes with other aliases through
//! [`Relation`] join records. All types serialize to JSON, both for the
//! database tables and for the raw read view.

use serde::{Deserialize, Serialize};

/// Numeric identifier of an alias row.
pub type AliasId = u64;

/// Numeric identifier of a node row.
pub type NodeId = u64;

// ── Visibility ────────────────────────────────────────────────────

/// External-visibility flag of an alias, stored as `"yes"` / `"no"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum External {
    Yes,
    #[default]
    No,
}

impl External {
    /// Parse the loose spellings accepted from clients.
    ///
    /// `yes`/`external` and `no`/`internal`, case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yes" | "external" => Some(Self::Yes),
            "no" | "internal" => Some(Self::No),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }

    /// DNS views an alias with this flag must have.
    pub fn views(&self) -> &'static [View] {
        match self {
            Self::Yes => &[View::Internal, View::External],
            Self::No => &[View::Internal],
        }
    }
}

impl std::fmt::Display for External {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DNS visibility scope of a delegated entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Internal,
    External,
}

impl View {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Alias ─────────────────────────────────────────────────────────

/// A load-balanced alias with its owned collections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alias {
    /// Zero until the database assigns one.
    pub id: AliasId,
    /// Fully-qualified, globally unique DNS name.
    pub name: String,
    /// Number of best nodes published in DNS; -1 means all.
    pub best_hosts: i32,
    pub external: External,
    pub metric: String,
    /// Seconds between load-balancer polls.
    pub polling_interval: u32,
    pub statistics: String,
    pub clusters: String,
    pub tenant: String,
    pub hostgroup: String,
    /// Owner (on create) or last modifier (on update).
    pub user: String,
    pub ttl: u32,
    pub behaviour: String,
    /// Unix timestamp of the last create/update.
    pub last_modification: Option<u64>,
    pub cnames: Vec<Cname>,
    pub relations: Vec<Relation>,
    pub alarms: Vec<Alarm>,
}

/// The scalar columns of an alias row, without identity or children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AliasScalars {
    pub best_hosts: i32,
    pub external: External,
    pub metric: String,
    pub polling_interval: u32,
    pub statistics: String,
    pub clusters: String,
    pub tenant: String,
    pub hostgroup: String,
    pub user: String,
    pub ttl: u32,
    pub behaviour: String,
    pub last_modification: Option<u64>,
}

impl Alias {
    /// Create an empty alias with the given name; every other field zeroed.
    pub fn named(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            best_hosts: 0,
            external: External::No,
            metric: String::new(),
            polling_interval: 0,
            statistics: String::new(),
            clusters: String::new(),
            tenant: String::new(),
            hostgroup: String::new(),
            user: String::new(),
            ttl: 0,
            behaviour: String::new(),
            last_modification: None,
            cnames: Vec::new(),
            relations: Vec::new(),
            alarms: Vec::new(),
        }
    }

    pub fn scalars(&self) -> AliasScalars {
        AliasScalars {
            best_hosts: self.best_hosts,
            external: self.external,
            metric: self.metric.clone(),
            polling_interval: self.polling_interval,
            statistics: self.statistics.clone(),
            clusters: self.clusters.clone(),
            tenant: self.tenant.clone(),
            hostgroup: self.hostgroup.clone(),
            user: self.user.clone(),
            ttl: self.ttl,
            behaviour: self.behaviour.clone(),
            last_modification: self.last_modification,
        }
    }

    pub fn set_scalars(&mut self, scalars: AliasScalars) {
        self.best_hosts = scalars.best_hosts;
        self.external = scalars.external;
        self.metric = scalars.metric;
        self.polling_interval = scalars.polling_interval;
        self.statistics = scalars.statistics;
        self.clusters = scalars.clusters;
        self.tenant = scalars.tenant;
        self.hostgroup = scalars.hostgroup;
        self.user = scalars.user;
        self.ttl = scalars.ttl;
        self.behaviour = scalars.behaviour;
        self.last_modification = scalars.last_modification;
    }

    /// DNS views this alias must exist in.
    pub fn views(&self) -> &'static [View] {
        self.external.views()
    }

    pub fn cname_names(&self) -> Vec<&str> {
        self.cnames.iter().map(|c| c.name.as_str()).collect()
    }
}

// ── Children ──────────────────────────────────────────────────────

/// A DNS cname owned by one alias.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cname {
    pub id: u64,
    pub alias_id: AliasId,
    /// Globally unique.
    pub name: String,
}

impl Cname {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            alias_id: 0,
            name: name.to_string(),
        }
    }
}

/// A backend host, shared between every alias that references it.
///
/// Exists only while at least one [`Relation`] points at it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    /// Globally unique.
    pub name: String,
    pub last_modification: Option<u64>,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            last_modification: Some(epoch_secs()),
        }
    }
}

/// Whether a node may serve an alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    #[default]
    Allowed,
    Blacklisted,
}

impl Privilege {
    pub fn from_blacklist(blacklisted: bool) -> Self {
        if blacklisted {
            Self::Blacklisted
        } else {
            Self::Allowed
        }
    }

    pub fn is_blacklisted(&self) -> bool {
        matches!(self, Self::Blacklisted)
    }
}

/// Alias ↔ node membership, carrying the per-membership attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relation {
    pub alias_id: AliasId,
    pub node_id: NodeId,
    pub node_name: String,
    pub privilege: Privilege,
    /// Last load value reported by the node.
    pub load: i64,
    /// Unix timestamp of the last status report.
    pub last_check: Option<u64>,
    /// SHA-256 hex digest of the secret the node reported with.
    pub secret_hash: Option<String>,
}

impl Relation {
    /// A not-yet-persisted membership for the given node name.
    pub fn new(node_name: &str, privilege: Privilege) -> Self {
        Self {
            alias_id: 0,
            node_id: 0,
            node_name: node_name.to_string(),
            privilege,
            load: 0,
            last_check: None,
            secret_hash: None,
        }
    }

    /// Composite key used by the relations table.
    pub fn table_key(&self) -> String {
        relation_key(self.alias_id, self.node_id)
    }
}

/// Build the `{alias_id}:{node_id}` relation key.
pub fn relation_key(alias_id: AliasId, node_id: NodeId) -> String {
    format!("{alias_id}:{node_id}")
}

/// Kind of alarm check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmKind {
    /// Fires when fewer than `threshold` nodes resolve.
    Minimum,
}

impl AlarmKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "minimum" => Some(Self::Minimum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimum => "minimum",
        }
    }
}

/// An alarm rule owned by an alias.
///
/// `active`, `last_check` and `last_active` belong to the polling job and
/// never take part in comparisons made by the orchestrators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alarm {
    pub id: u64,
    pub alias_id: AliasId,
    pub alias_name: String,
    pub kind: AlarmKind,
    pub recipient: String,
    pub threshold: u32,
    pub active: bool,
    pub last_check: Option<u64>,
    pub last_active: Option<u64>,
}

impl Alarm {
    pub fn new(kind: AlarmKind, recipient: &str, threshold: u32) -> Self {
        Self {
            id: 0,
            alias_id: 0,
            alias_name: String::new(),
            kind,
            recipient: recipient.to_string(),
            threshold,
            active: false,
            last_check: None,
            last_active: None,
        }
    }

    /// `kind:recipient:threshold`, the form clients submit alarms in.
    pub fn descriptor(&self) -> String {
        format!("{}:{}:{}", self.kind.as_str(), self.recipient, self.threshold)
    }

    /// Composite key used by the alarms table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.alias_id, self.id)
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
