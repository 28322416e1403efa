//! End-to-end alias lifecycle over in-memory gateways.

use std::sync::Arc;

use ermis_core::config::ErmisConfig;
use ermis_core::resource::{AliasResource, Principal};
use ermis_core::types::View;
use ermis_saga::memory::{DnsOp, MemoryDns, MemoryMailer, MemoryVault};
use ermis_saga::{AliasDatabase, Orchestrator, SagaError};
use ermis_state::{AliasQuery, StateStore};

struct Setup {
    orchestrator: Orchestrator,
    store: StateStore,
    dns: Arc<MemoryDns>,
    vault: Arc<MemoryVault>,
}

fn setup() -> Setup {
    let mut config = ErmisConfig::default();
    config.dns.domain_suffix = "example".to_string();

    let store = StateStore::open_in_memory().unwrap();
    let dns = Arc::new(MemoryDns::new());
    let vault = Arc::new(MemoryVault::new());
    let orchestrator = Orchestrator::new(
        Arc::new(store.clone()),
        dns.clone(),
        vault.clone(),
        Arc::new(MemoryMailer::new()),
        config,
    );
    Setup {
        orchestrator,
        store,
        dns,
        vault,
    }
}

fn owner() -> Principal {
    Principal::new("alice").with_hostgroups(vec!["lb".to_string()])
}

fn svc1(external: &str) -> AliasResource {
    AliasResource {
        alias_name: "svc1".to_string(),
        best_hosts: 1,
        external: external.to_string(),
        hostgroup: "lb/web".to_string(),
        cnames: vec!["c1".to_string()],
        ..Default::default()
    }
}

#[test]
fn create_go_external_then_delete() {
    let s = setup();

    let created = s.orchestrator.create_alias(&svc1("no"), &owner()).unwrap();
    assert_eq!(created.name, "svc1.example");
    assert_eq!(s.dns.entries().len(), 1);
    let internal = s.dns.entry("svc1.example", View::Internal).unwrap();
    assert_eq!(internal.aliases, vec!["c1"]);
    assert!(s.vault.contains("svc1.example"));

    let updated = s
        .orchestrator
        .modify_alias(&created.id.to_string(), &svc1("yes"), &owner())
        .unwrap();
    assert_eq!(updated.id, created.id);
    let external = s.dns.entry("svc1.example", View::External).unwrap();
    assert_eq!(external.aliases, vec!["c1"]);
    assert_eq!(s.dns.entry("svc1.example", View::Internal).unwrap(), internal);

    s.orchestrator.delete_alias("svc1", &owner()).unwrap();
    assert!(s.dns.entries().is_empty());
    assert!(!s.vault.contains("svc1.example"));
    assert!(s
        .store
        .find_aliases(&AliasQuery::ByName("svc1.example".to_string()))
        .unwrap()
        .is_empty());
}

#[test]
fn aborted_create_leaves_nothing_and_can_be_resubmitted() {
    let s = setup();
    s.dns.fail_on(DnsOp::AddAlias);

    let err = s.orchestrator.create_alias(&svc1("yes"), &owner()).unwrap_err();
    assert!(matches!(err, SagaError::Aborted { .. }));
    assert!(!err.needs_manual_intervention());
    assert!(s.dns.entries().is_empty());
    assert!(AliasDatabase::find_aliases(&s.store, &AliasQuery::All).unwrap().is_empty());

    s.dns.clear_faults();
    s.orchestrator.create_alias(&svc1("yes"), &owner()).unwrap();
    assert_eq!(s.dns.entries().len(), 2);
}

#[test]
fn delete_twice_is_not_found() {
    let s = setup();
    s.orchestrator.create_alias(&svc1("no"), &owner()).unwrap();
    s.orchestrator.delete_alias("svc1.example", &owner()).unwrap();

    let err = s.orchestrator.delete_alias("svc1.example", &owner()).unwrap_err();
    assert!(matches!(err, SagaError::NotFound { .. }));
}
