//! Desired-state snapshots and read views.
//!
//! Clients never send deltas. Every create or modify request carries the
//! full set of cnames, allowed/forbidden nodes and alarms the alias should
//! end up with; [`AliasResource`] is that request-scoped snapshot. It is
//! hydrated into an [`Alias`] here and diffed against the stored alias by
//! the orchestration layer. [`AliasSummary`] is the condensed read view.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{AliasDefaults, DnsConfig};
use crate::error::{CoreError, CoreResult};
use crate::types::*;

static DNS_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(([a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\-]*[a-zA-Z0-9])\.)*([A-Za-z0-9]|[A-Za-z0-9][A-Za-z0-9\-]*[A-Za-z0-9])$")
        .expect("static regex")
});

static NODE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9\-]*[a-z0-9]$").expect("static regex"));

static HOSTGROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_/]*[a-z0-9]$").expect("static regex"));

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"));

/// Upper bound on an alarm threshold.
pub const MAX_ALARM_THRESHOLD: u32 = 1000;

// ── Principal ─────────────────────────────────────────────────────

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Principal {
    pub username: String,
    pub admin: bool,
    /// Hostgroups this user may manage.
    pub hostgroups: Vec<String>,
}

impl Principal {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            admin: false,
            hostgroups: Vec::new(),
        }
    }

    pub fn admin(username: &str) -> Self {
        Self {
            admin: true,
            ..Self::new(username)
        }
    }

    pub fn with_hostgroups(mut self, hostgroups: Vec<String>) -> Self {
        self.hostgroups = hostgroups;
        self
    }

    /// Whether this principal may modify aliases of `hostgroup`.
    ///
    /// A grant on `a/b` also covers every sub-hostgroup `a/b/...`.
    pub fn can_manage(&self, hostgroup: &str) -> bool {
        self.admin
            || self.hostgroups.iter().any(|granted| {
                hostgroup == granted
                    || hostgroup
                        .strip_prefix(granted.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
    }
}

// ── Desired state ─────────────────────────────────────────────────

/// Full desired state of an alias as submitted by a client.
///
/// Scalars left at zero/empty mean "not sent". Collections are always
/// complete replacements: an empty list purges.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AliasResource {
    pub alias_name: String,
    pub behaviour: String,
    pub best_hosts: i32,
    pub clusters: String,
    pub external: String,
    pub hostgroup: String,
    pub metric: String,
    pub polling_interval: u32,
    pub tenant: String,
    pub ttl: u32,
    pub statistics: String,
    pub cnames: Vec<String>,
    #[serde(rename = "AllowedNodes")]
    pub allowed_nodes: Vec<String>,
    #[serde(rename = "ForbiddenNodes")]
    pub forbidden_nodes: Vec<String>,
    /// `kind:recipient:threshold` descriptors.
    pub alarms: Vec<String>,
}

/// Append the canonical domain suffix unless the name is numeric or
/// already carries it.
pub fn canonical_name(name: &str, suffix: &str) -> String {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() || name.parse::<u64>().is_ok() || suffix.is_empty() {
        return name.to_string();
    }
    if name == suffix || name.ends_with(&format!(".{suffix}")) {
        name.to_string()
    } else {
        format!("{name}.{suffix}")
    }
}

/// Parse a `kind:recipient:threshold` alarm descriptor.
pub fn parse_alarm(descriptor: &str) -> CoreResult<Alarm> {
    let parts: Vec<&str> = descriptor
        .split(':')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let [kind, recipient, threshold] = parts.as_slice() else {
        return Err(CoreError::MalformedAlarm(descriptor.to_string()));
    };
    let kind = AlarmKind::parse(kind)
        .ok_or_else(|| CoreError::invalid("alarm kind", kind, "only `minimum` is supported"))?;
    if !EMAIL.is_match(recipient) {
        return Err(CoreError::invalid("alarm recipient", recipient, "not an e-mail address"));
    }
    let threshold: u32 = threshold
        .parse()
        .map_err(|_| CoreError::invalid("alarm threshold", threshold, "not an integer"))?;
    if threshold > MAX_ALARM_THRESHOLD {
        return Err(CoreError::invalid(
            "alarm threshold",
            &threshold.to_string(),
            format!("must be at most {MAX_ALARM_THRESHOLD}"),
        ));
    }
    Ok(Alarm::new(kind, recipient, threshold))
}

impl AliasResource {
    /// Hydrate a brand-new alias: defaults applied, name canonicalized,
    /// every collection taken as submitted.
    pub fn to_new_alias(
        &self,
        defaults: &AliasDefaults,
        dns: &DnsConfig,
        owner: &Principal,
    ) -> CoreResult<Alias> {
        if self.alias_name.trim().is_empty() {
            return Err(CoreError::MissingField("alias_name"));
        }
        if self.hostgroup.is_empty() {
            return Err(CoreError::MissingField("hostgroup"));
        }
        if self.best_hosts == 0 {
            return Err(CoreError::MissingField("best_hosts"));
        }
        let external = External::parse(&self.external)
            .ok_or_else(|| CoreError::invalid("external", &self.external, "expected yes or no"))?;

        let name = canonical_name(&self.alias_name, &dns.domain_suffix);
        let mut alias = Alias::named(&name);
        alias.best_hosts = self.best_hosts;
        alias.external = external;
        alias.hostgroup = self.hostgroup.clone();
        alias.user = owner.username.clone();
        alias.behaviour = defaults.behaviour.clone();
        alias.metric = defaults.metric.clone();
        alias.polling_interval = defaults.polling_interval;
        alias.statistics = defaults.statistics.clone();
        alias.clusters = defaults.clusters.clone();
        alias.tenant = defaults.tenant.clone();
        alias.ttl = defaults.ttl;
        alias.last_modification = Some(epoch_secs());
        alias.cnames = self.desired_cnames();
        alias.relations = self.desired_relations(&[])?;
        alias.alarms = self.desired_alarms(&name, &[])?;

        validate(&alias)?;
        Ok(alias)
    }

    /// Merge this request onto the stored alias.
    ///
    /// Returns the complete state the alias should have afterwards.
    /// Attributes the caller cannot set (relation load, alarm state) are
    /// carried over from `current` for items that survive.
    pub fn apply_to(&self, current: &Alias, actor: &Principal) -> CoreResult<Alias> {
        let mut alias = current.clone();

        if !self.external.is_empty() {
            alias.external = External::parse(&self.external).ok_or_else(|| {
                CoreError::invalid("external", &self.external, "expected yes or no")
            })?;
        }
        if self.best_hosts != 0 {
            alias.best_hosts = self.best_hosts;
        }
        if !self.metric.is_empty() {
            alias.metric = self.metric.clone();
        }
        if self.polling_interval != 0 {
            alias.polling_interval = self.polling_interval;
        }
        if !self.hostgroup.is_empty() {
            alias.hostgroup = self.hostgroup.clone();
        }
        if !self.tenant.is_empty() {
            alias.tenant = self.tenant.clone();
        }
        if self.ttl != 0 {
            alias.ttl = self.ttl;
        }
        alias.user = actor.username.clone();
        alias.last_modification = Some(epoch_secs());

        alias.cnames = self
            .desired_cnames()
            .into_iter()
            .map(|mut c| {
                c.alias_id = current.id;
                c
            })
            .collect();
        alias.relations = self
            .desired_relations(&current.relations)?
            .into_iter()
            .map(|mut r| {
                r.alias_id = current.id;
                r
            })
            .collect();
        alias.alarms = self
            .desired_alarms(&current.name, &current.alarms)?
            .into_iter()
            .map(|mut a| {
                a.alias_id = current.id;
                a
            })
            .collect();

        validate(&alias)?;
        Ok(alias)
    }

    fn desired_cnames(&self) -> Vec<Cname> {
        dedup(&self.cnames).into_iter().map(Cname::new).collect()
    }

    fn desired_relations(&self, existing: &[Relation]) -> CoreResult<Vec<Relation>> {
        let allowed = dedup(&self.allowed_nodes);
        let forbidden = dedup(&self.forbidden_nodes);
        if let Some(both) = allowed.iter().find(|n| forbidden.contains(n)) {
            return Err(CoreError::ConflictingPrivilege(both.to_string()));
        }

        let with_privilege = allowed
            .into_iter()
            .map(|n| (n, Privilege::Allowed))
            .chain(forbidden.into_iter().map(|n| (n, Privilege::Blacklisted)));

        Ok(with_privilege
            .map(|(name, privilege)| {
                match existing.iter().find(|r| r.node_name == name) {
                    Some(known) => Relation {
                        privilege,
                        ..known.clone()
                    },
                    None => Relation::new(name, privilege),
                }
            })
            .collect())
    }

    fn desired_alarms(&self, alias_name: &str, existing: &[Alarm]) -> CoreResult<Vec<Alarm>> {
        let mut alarms: Vec<Alarm> = Vec::new();
        for descriptor in dedup(&self.alarms) {
            let parsed = parse_alarm(descriptor)?;
            if alarms.iter().any(|a| a.descriptor() == parsed.descriptor()) {
                continue;
            }
            let alarm = match existing.iter().find(|a| a.descriptor() == parsed.descriptor()) {
                Some(known) => known.clone(),
                None => Alarm {
                    alias_name: alias_name.to_string(),
                    ..parsed
                },
            };
            alarms.push(alarm);
        }
        Ok(alarms)
    }
}

/// Trimmed, non-empty, first-occurrence-wins view of a string list.
fn dedup(values: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && seen.insert(*v))
        .collect()
}

/// Field-level checks on a hydrated alias.
pub fn validate(alias: &Alias) -> CoreResult<()> {
    if alias.name.len() > 255 || !DNS_NAME.is_match(&alias.name) {
        return Err(CoreError::invalid("alias_name", &alias.name, "not a DNS name"));
    }
    if alias.best_hosts < -1 {
        return Err(CoreError::invalid(
            "best_hosts",
            &alias.best_hosts.to_string(),
            "must be -1 or greater",
        ));
    }
    if !(2..=50).contains(&alias.hostgroup.len()) || !HOSTGROUP.is_match(&alias.hostgroup) {
        return Err(CoreError::invalid("hostgroup", &alias.hostgroup, "not a hostgroup path"));
    }
    for cname in &alias.cnames {
        if !(2..=511).contains(&cname.name.len()) || !DNS_NAME.is_match(&cname.name) {
            return Err(CoreError::invalid("cname", &cname.name, "not a DNS name"));
        }
    }
    for relation in &alias.relations {
        let valid = relation
            .node_name
            .split('.')
            .all(|label| (2..=40).contains(&label.len()) && NODE_LABEL.is_match(label));
        if !valid {
            return Err(CoreError::invalid("node", &relation.node_name, "not a host name"));
        }
    }
    Ok(())
}

// ── Read views ────────────────────────────────────────────────────

/// Condensed representation of an alias: children flattened to strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AliasSummary {
    pub alias_id: AliasId,
    pub alias_name: String,
    pub behaviour: String,
    pub best_hosts: i32,
    pub clusters: String,
    pub external: External,
    pub hostgroup: String,
    pub last_modification: Option<u64>,
    pub metric: String,
    pub polling_interval: u32,
    pub tenant: String,
    pub ttl: u32,
    pub user: String,
    pub statistics: String,
    pub resource_uri: String,
    /// Whether the requesting principal may modify this alias.
    pub pwned: bool,
    pub cnames: Vec<String>,
    /// `kind:recipient:threshold:active[:last_active]`.
    pub alarms: Vec<String>,
    /// `node:load`.
    #[serde(rename = "AllowedNodes")]
    pub allowed_nodes: Vec<String>,
    /// `node:load`.
    #[serde(rename = "ForbiddenNodes")]
    pub forbidden_nodes: Vec<String>,
}

impl AliasSummary {
    pub fn condensed(alias: &Alias, viewer: &Principal) -> Self {
        let alarms = alias
            .alarms
            .iter()
            .map(|a| {
                let mut s = format!("{}:{}", a.descriptor(), a.active);
                if let Some(at) = a.last_active {
                    s.push_str(&format!(":{at}"));
                }
                s
            })
            .collect();

        let (forbidden, allowed): (Vec<&Relation>, Vec<&Relation>) = alias
            .relations
            .iter()
            .partition(|r| r.privilege.is_blacklisted());
        let name_load = |r: &&Relation| format!("{}:{}", r.node_name, r.load);

        Self {
            alias_id: alias.id,
            alias_name: alias.name.clone(),
            behaviour: alias.behaviour.clone(),
            best_hosts: alias.best_hosts,
            clusters: alias.clusters.clone(),
            external: alias.external,
            hostgroup: alias.hostgroup.clone(),
            last_modification: alias.last_modification,
            metric: alias.metric.clone(),
            polling_interval: alias.polling_interval,
            tenant: alias.tenant.clone(),
            ttl: alias.ttl,
            user: alias.user.clone(),
            statistics: alias.statistics.clone(),
            resource_uri: format!("/api/v1/alias/{}", alias.id),
            pwned: viewer.can_manage(&alias.hostgroup),
            cnames: alias.cnames.iter().map(|c| c.name.clone()).collect(),
            alarms,
            allowed_nodes: allowed.iter().map(name_load).collect(),
            forbidden_nodes: forbidden.iter().map(name_load).collect(),
        }
    }
}
