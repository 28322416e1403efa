//! The alias orchestrator.
//!
//! Owns the gateways and the configuration. The create, update and
//! delete sagas live in their own modules as further `impl` blocks.

use std::sync::Arc;

use ermis_core::config::ErmisConfig;
use ermis_core::resource::{Principal, canonical_name};
use ermis_core::types::Alias;
use ermis_state::AliasQuery;
use serde::Serialize;

use crate::error::{SagaResult, System};
use crate::gateway::*;

/// Sequences alias operations across the database, DNS and the vault.
pub struct Orchestrator {
    pub(crate) db: Arc<dyn AliasDatabase>,
    pub(crate) dns: Arc<dyn DnsGateway>,
    pub(crate) vault: Arc<dyn SecretVault>,
    pub(crate) mailer: Arc<dyn Mailer>,
    pub(crate) config: ErmisConfig,
}

/// Where an alias currently exists.
#[derive(Debug, Clone)]
pub(crate) struct Presence {
    pub database: Option<Alias>,
    pub dns: Vec<DnsEntry>,
    pub vault: bool,
}

impl Presence {
    pub fn found_in(&self) -> Vec<System> {
        let mut systems = Vec::new();
        if self.database.is_some() {
            systems.push(System::Database);
        }
        if !self.dns.is_empty() {
            systems.push(System::Dns);
        }
        if self.vault {
            systems.push(System::Vault);
        }
        systems
    }

    pub fn missing_from(&self) -> Vec<System> {
        let found = self.found_in();
        [System::Database, System::Dns, System::Vault]
            .into_iter()
            .filter(|s| !found.contains(s))
            .collect()
    }
}

/// Whether a hostname is already in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCheck {
    pub hostname: String,
    /// Used as an alias or a cname.
    pub in_database: bool,
    pub in_dns: bool,
}

impl NameCheck {
    pub fn available(&self) -> bool {
        !self.in_database && !self.in_dns
    }
}

impl Orchestrator {
    pub fn new(
        db: Arc<dyn AliasDatabase>,
        dns: Arc<dyn DnsGateway>,
        vault: Arc<dyn SecretVault>,
        mailer: Arc<dyn Mailer>,
        config: ErmisConfig,
    ) -> Self {
        Self {
            db,
            dns,
            vault,
            mailer,
            config,
        }
    }

    pub fn config(&self) -> &ErmisConfig {
        &self.config
    }

    /// Append the configured domain suffix where missing.
    pub fn canonical(&self, name: &str) -> String {
        canonical_name(name, &self.config.dns.domain_suffix)
    }

    pub fn get_aliases(&self, query: &AliasQuery) -> SagaResult<Vec<Alias>> {
        Ok(self.db.find_aliases(query)?)
    }

    /// Look an alias up by numeric id or by name.
    pub fn find_alias(&self, key: &str) -> SagaResult<Option<Alias>> {
        let query = match key.parse::<u64>() {
            Ok(id) => AliasQuery::ById(id),
            Err(_) => AliasQuery::ByName(self.canonical(key)),
        };
        Ok(self.db.find_aliases(&query)?.into_iter().next())
    }

    pub fn check_name(&self, hostname: &str) -> SagaResult<NameCheck> {
        let hostname = hostname.trim().trim_end_matches('.');
        let canonical = self.canonical(hostname);
        let in_database = self.db.cname_exists(hostname)?
            || !self
                .db
                .find_aliases(&AliasQuery::ByName(canonical.clone()))?
                .is_empty();
        let in_dns = !dns_entries_for(self.dns.as_ref(), &canonical)?.is_empty();
        Ok(NameCheck {
            hostname: hostname.to_string(),
            in_database,
            in_dns,
        })
    }

    pub(crate) fn presence(&self, name: &str) -> SagaResult<Presence> {
        let database = self
            .db
            .find_aliases(&AliasQuery::ByName(name.to_string()))?
            .into_iter()
            .next();
        let dns = dns_entries_for(self.dns.as_ref(), name)?;
        let vault = !self.vault.get(name)?.is_empty();
        Ok(Presence {
            database,
            dns,
            vault,
        })
    }

    /// Description written on delegated entries.
    pub(crate) fn description(&self, principal: &Principal) -> String {
        format!("{} {}", self.config.dns.description_prefix, principal.username)
    }
}

/// Delete whatever row currently carries `name`.
pub(crate) fn delete_by_name(db: &dyn AliasDatabase, name: &str) -> GatewayResult<()> {
    if let Some(alias) = db
        .find_aliases(&AliasQuery::ByName(name.to_string()))?
        .into_iter()
        .next()
    {
        db.delete_alias(alias.id)?;
    }
    Ok(())
}

/// Replace whatever the database holds for `snapshot.id` with `snapshot`.
pub(crate) fn restore_snapshot(db: &dyn AliasDatabase, snapshot: &Alias) -> GatewayResult<()> {
    if !db.find_aliases(&AliasQuery::ById(snapshot.id))?.is_empty() {
        db.delete_alias(snapshot.id)?;
    }
    db.create_alias(snapshot)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::memory::*;
    use ermis_state::StateStore;

    /// Orchestrator over in-memory gateways, with handles to each.
    pub struct Harness {
        pub orchestrator: Orchestrator,
        pub db: Arc<FaultyDatabase>,
        pub dns: Arc<MemoryDns>,
        pub vault: Arc<MemoryVault>,
        pub mailer: Arc<MemoryMailer>,
    }

    impl Harness {
        pub fn new() -> Self {
            let mut config = ErmisConfig::default();
            config.dns.domain_suffix = "example".to_string();
            config.secret.mail_domain = "example.org".to_string();

            let db = Arc::new(FaultyDatabase::new(StateStore::open_in_memory().unwrap()));
            let dns = Arc::new(MemoryDns::new());
            let vault = Arc::new(MemoryVault::new());
            let mailer = Arc::new(MemoryMailer::new());
            let orchestrator = Orchestrator::new(
                db.clone(),
                dns.clone(),
                vault.clone(),
                mailer.clone(),
                config,
            );
            Self {
                orchestrator,
                db,
                dns,
                vault,
                mailer,
            }
        }

        pub fn alias(&self, name: &str) -> Option<Alias> {
            self.db.store().get_alias_by_name(name).unwrap()
        }
    }

    pub fn owner() -> Principal {
        Principal::new("alice").with_hostgroups(vec!["lb".to_string()])
    }
}
