//! Update saga.
//!
//! The database is brought to the desired state first (scalars, then the
//! reconciled cnames, relations and alarms), then DNS: the external view
//! is added or removed when the external flag flips, and the cname diff is
//! applied to every view the alias keeps. Either stage restores its own
//! partial work when it fails.

use std::cell::{Cell, RefCell};

use ermis_core::resource::{AliasResource, Principal};
use ermis_core::types::{Alarm, Alias, Cname, Relation, View};
use ermis_state::AliasQuery;
use tracing::{debug, info, warn};

use crate::error::{SagaError, SagaResult, System};
use crate::gateway::{AliasDatabase, GatewayError, GatewayResult, dns_entries_for, dns_ok};
use crate::nodes;
use crate::orchestrator::{Orchestrator, restore_snapshot};
use crate::reconcile::{Changes, reconcile};
use crate::saga::Saga;

/// Database-side changes of one update.
struct Plan {
    cnames: Changes<Cname>,
    relations: Changes<Relation>,
    alarms: Changes<Alarm>,
}

impl Plan {
    fn new(current: &Alias, desired: &Alias) -> Self {
        Self {
            cnames: reconcile(&current.cnames, &desired.cnames),
            relations: reconcile(&current.relations, &desired.relations),
            alarms: reconcile(&current.alarms, &desired.alarms),
        }
    }

    fn apply(&self, db: &dyn AliasDatabase, desired: &Alias) -> GatewayResult<()> {
        let id = desired.id;
        db.update_alias_scalars(id, &desired.scalars())?;

        for cname in &self.cnames.to_delete {
            db.delete_cname(id, &cname.name)?;
        }
        for cname in &self.cnames.to_add {
            db.add_cname(id, &cname.name)?;
        }

        for relation in &self.relations.to_delete {
            nodes::release(db, id, &relation.node_name)?;
        }
        for relation in &self.relations.to_add {
            nodes::register(db, id, &relation.node_name, relation.privilege)?;
        }
        for relation in &self.relations.to_update {
            nodes::update_privilege(db, id, &relation.node_name, relation.privilege)?;
        }

        for alarm in &self.alarms.to_delete {
            db.delete_alarm(id, alarm.id)?;
        }
        for alarm in &self.alarms.to_add {
            db.add_alarm(id, alarm)?;
        }
        Ok(())
    }
}

/// One cname change made on a DNS view.
#[derive(Debug, Clone, Copy)]
enum CnameEdit<'a> {
    Added(View, &'a str),
    Removed(View, &'a str),
}

impl Orchestrator {
    /// Merge a client request onto the alias `key` (id or name) and apply it.
    pub fn modify_alias(
        &self,
        key: &str,
        resource: &AliasResource,
        principal: &Principal,
    ) -> SagaResult<Alias> {
        let current = self.find_alias(key)?.ok_or_else(|| SagaError::NotFound {
            alias: key.to_string(),
        })?;
        let desired = resource.apply_to(&current, principal)?;
        self.run_update(&current, &desired, principal)
    }

    /// Move an alias from `current` to `desired` in the database and DNS.
    pub fn run_update(&self, current: &Alias, desired: &Alias, principal: &Principal) -> SagaResult<Alias> {
        let name = current.name.as_str();

        if self.db.find_aliases(&AliasQuery::ById(current.id))?.is_empty() {
            return Err(SagaError::NotFound {
                alias: name.to_string(),
            });
        }
        let entries = dns_entries_for(self.dns.as_ref(), name)?;
        let missing_views: Vec<View> = current
            .views()
            .iter()
            .copied()
            .filter(|v| !entries.iter().any(|e| e.view == *v))
            .collect();
        if !missing_views.is_empty() {
            warn!(alias = %name, views = ?missing_views, "alias missing from DNS");
            return Err(SagaError::Inconsistent {
                alias: name.to_string(),
                missing: vec![System::Dns],
            });
        }

        let plan = Plan::new(current, desired);
        let gains_external = !current.views().contains(&View::External)
            && desired.views().contains(&View::External);
        let loses_external = current.views().contains(&View::External)
            && !desired.views().contains(&View::External);
        info!(
            alias = %name,
            user = %principal.username,
            cnames = plan.cnames.to_add.len() + plan.cnames.to_delete.len(),
            relations = plan.relations.to_add.len()
                + plan.relations.to_delete.len()
                + plan.relations.to_update.len(),
            alarms = plan.alarms.to_add.len() + plan.alarms.to_delete.len(),
            gains_external,
            loses_external,
            "updating alias"
        );

        let db = self.db.as_ref();
        let dns = self.dns.as_ref();
        let plan = &plan;
        let external_key = self.config.dns.keyname(View::External);
        let description = self.description(principal);
        let description = description.as_str();
        let added_external = Cell::new(false);
        let removed_external = Cell::new(false);
        let edits: RefCell<Vec<CnameEdit<'_>>> = RefCell::new(Vec::new());
        let (added_external, removed_external, edits) = (&added_external, &removed_external, &edits);

        // Put the external entry back with the cnames it carried.
        let restore_external = move || -> GatewayResult<()> {
            dns_ok(
                dns.add_entry(name, View::External, external_key, description),
                || format!("add entry {name} (external)"),
            )?;
            for cname in &current.cnames {
                dns_ok(dns.add_alias(name, View::External, &cname.name), || {
                    format!("add cname {} to {name} (external)", cname.name)
                })?;
            }
            Ok(())
        };

        Saga::new(name)
            .self_compensated(
                "database",
                move || plan.apply(db, desired),
                move || restore_snapshot(db, current),
            )
            .self_compensated(
                "dns",
                move || {
                    if gains_external {
                        dns_ok(
                            dns.add_entry(name, View::External, external_key, description),
                            || format!("add entry {name} (external)"),
                        )?;
                        added_external.set(true);
                        for cname in &current.cnames {
                            dns_ok(dns.add_alias(name, View::External, &cname.name), || {
                                format!("add cname {} to {name} (external)", cname.name)
                            })?;
                        }
                    }
                    if loses_external {
                        if !dns.remove_entry(name, View::External) {
                            if let Err(e) = restore_external() {
                                warn!(alias = %name, error = %e, "could not re-assert external entry");
                            }
                            return Err(GatewayError::Dns(format!(
                                "remove entry {name} (external) was refused"
                            )));
                        }
                        removed_external.set(true);
                    }
                    for &view in desired.views() {
                        for cname in &plan.cnames.to_delete {
                            dns_ok(dns.remove_alias(name, view, &cname.name), || {
                                format!("remove cname {} from {name} ({view})", cname.name)
                            })?;
                            edits.borrow_mut().push(CnameEdit::Removed(view, &cname.name));
                        }
                        for cname in &plan.cnames.to_add {
                            dns_ok(dns.add_alias(name, view, &cname.name), || {
                                format!("add cname {} to {name} ({view})", cname.name)
                            })?;
                            edits.borrow_mut().push(CnameEdit::Added(view, &cname.name));
                        }
                    }
                    Ok(())
                },
                move || {
                    for edit in edits.borrow().iter().rev() {
                        match *edit {
                            CnameEdit::Added(view, cname) => {
                                dns_ok(dns.remove_alias(name, view, cname), || {
                                    format!("remove cname {cname} from {name} ({view})")
                                })?
                            }
                            CnameEdit::Removed(view, cname) => {
                                dns_ok(dns.add_alias(name, view, cname), || {
                                    format!("add cname {cname} to {name} ({view})")
                                })?
                            }
                        }
                    }
                    if added_external.get() {
                        dns_ok(dns.remove_entry(name, View::External), || {
                            format!("remove entry {name} (external)")
                        })?;
                    }
                    if removed_external.get() {
                        restore_external()?;
                    }
                    debug!(alias = %name, "dns changes reverted");
                    Ok(())
                },
            )
            .run()
            .map_err(|failure| failure.into_error(name))?;

        let updated = self
            .db
            .find_aliases(&AliasQuery::ById(current.id))?
            .into_iter()
            .next()
            .ok_or_else(|| SagaError::NotFound {
                alias: name.to_string(),
            })?;
        info!(alias = %name, id = updated.id, "alias updated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{SagaError, System};
    use crate::gateway::DnsGateway;
    use crate::memory::*;
    use crate::orchestrator::testing::*;
    use ermis_core::resource::AliasResource;
    use ermis_core::types::{Privilege, View};

    fn base() -> AliasResource {
        AliasResource {
            alias_name: "svc1".to_string(),
            best_hosts: 2,
            external: "no".to_string(),
            hostgroup: "lb/web".to_string(),
            cnames: vec!["aa".to_string(), "bb".to_string()],
            allowed_nodes: vec!["node-a".to_string(), "node-b".to_string()],
            alarms: vec!["minimum:ops@example.org:1".to_string()],
            ..Default::default()
        }
    }

    fn setup() -> Harness {
        let h = Harness::new();
        h.orchestrator.create_alias(&base(), &owner()).unwrap();
        h
    }

    fn modify(h: &Harness, resource: &AliasResource) -> Result<ermis_core::types::Alias, SagaError> {
        h.orchestrator.modify_alias("svc1", resource, &owner())
    }

    fn names(aliases: &[String]) -> Vec<&str> {
        let mut names: Vec<&str> = aliases.iter().map(String::as_str).collect();
        names.sort();
        names
    }

    #[test]
    fn going_external_copies_cnames() {
        let h = setup();
        let updated = modify(&h, &AliasResource { external: "yes".to_string(), ..base() }).unwrap();

        assert_eq!(updated.external.as_str(), "yes");
        let external = h.dns.entry("svc1.example", View::External).unwrap();
        assert_eq!(names(&external.aliases), vec!["aa", "bb"]);
        let internal = h.dns.entry("svc1.example", View::Internal).unwrap();
        assert_eq!(names(&internal.aliases), vec!["aa", "bb"]);
    }

    #[test]
    fn going_internal_drops_external_view() {
        let h = setup();
        modify(&h, &AliasResource { external: "yes".to_string(), ..base() }).unwrap();
        modify(&h, &base()).unwrap();

        assert!(h.dns.entry("svc1.example", View::External).is_none());
        assert!(h.dns.entry("svc1.example", View::Internal).is_some());
    }

    #[test]
    fn cname_diff_reaches_database_and_dns() {
        let h = setup();
        let updated = modify(
            &h,
            &AliasResource {
                cnames: vec!["bb".to_string(), "cc".to_string()],
                ..base()
            },
        )
        .unwrap();

        let cnames: Vec<&str> = updated.cname_names();
        assert_eq!(cnames.len(), 2);
        assert!(cnames.contains(&"bb") && cnames.contains(&"cc"));
        let internal = h.dns.entry("svc1.example", View::Internal).unwrap();
        assert_eq!(names(&internal.aliases), vec!["bb", "cc"]);
    }

    #[test]
    fn privilege_flip_updates_in_place() {
        let h = setup();
        let before = h.alias("svc1.example").unwrap();
        let updated = modify(
            &h,
            &AliasResource {
                allowed_nodes: vec!["node-a".to_string()],
                forbidden_nodes: vec!["node-b".to_string()],
                ..base()
            },
        )
        .unwrap();

        let b_before = before.relations.iter().find(|r| r.node_name == "node-b").unwrap();
        let b_after = updated.relations.iter().find(|r| r.node_name == "node-b").unwrap();
        assert_eq!(b_after.privilege, Privilege::Blacklisted);
        assert_eq!(b_after.node_id, b_before.node_id);
    }

    #[test]
    fn dropped_node_is_garbage_collected() {
        let h = setup();
        modify(
            &h,
            &AliasResource {
                allowed_nodes: vec!["node-a".to_string()],
                ..base()
            },
        )
        .unwrap();
        assert!(h.db.store().find_node("node-b").unwrap().is_none());
        assert!(h.db.store().find_node("node-a").unwrap().is_some());
    }

    #[test]
    fn alarm_change_replaces_alarm() {
        let h = setup();
        let updated = modify(
            &h,
            &AliasResource {
                alarms: vec!["minimum:ops@example.org:3".to_string()],
                ..base()
            },
        )
        .unwrap();
        assert_eq!(updated.alarms.len(), 1);
        assert_eq!(updated.alarms[0].threshold, 3);
    }

    #[test]
    fn unknown_alias_not_found() {
        let h = Harness::new();
        let err = h.orchestrator.modify_alias("ghost", &base(), &owner()).unwrap_err();
        assert!(matches!(err, SagaError::NotFound { .. }));
    }

    #[test]
    fn missing_dns_view_is_inconsistent() {
        let h = setup();
        h.dns.remove_entry("svc1.example", View::Internal);
        let err = modify(&h, &base()).unwrap_err();
        match err {
            SagaError::Inconsistent { missing, .. } => assert_eq!(missing, vec![System::Dns]),
            other => panic!("expected inconsistency, got {other:?}"),
        }
    }

    #[test]
    fn dns_failure_restores_database_snapshot() {
        let h = setup();
        let before = h.alias("svc1.example").unwrap();
        h.dns.fail_on(DnsOp::RemoveAlias);

        let err = modify(
            &h,
            &AliasResource {
                best_hosts: 5,
                cnames: vec!["aa".to_string(), "cc".to_string()],
                allowed_nodes: vec!["node-a".to_string(), "node-z".to_string()],
                ..base()
            },
        )
        .unwrap_err();
        assert!(matches!(err, SagaError::Aborted { .. }));
        assert_eq!(h.alias("svc1.example").unwrap(), before);
        assert!(h.db.store().find_node("node-z").unwrap().is_none());
        let internal = h.dns.entry("svc1.example", View::Internal).unwrap();
        assert_eq!(names(&internal.aliases), vec!["aa", "bb"]);
    }

    #[test]
    fn database_failure_midway_restores_snapshot() {
        let h = setup();
        let before = h.alias("svc1.example").unwrap();
        h.db.fail_on(DbOp::AddAlarm);

        let err = modify(
            &h,
            &AliasResource {
                cnames: vec!["cc".to_string()],
                alarms: vec!["minimum:ops@example.org:9".to_string()],
                ..base()
            },
        )
        .unwrap_err();
        match err {
            SagaError::Aborted { failure, .. } => assert_eq!(failure.system, System::Database),
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(h.alias("svc1.example").unwrap(), before);
        let internal = h.dns.entry("svc1.example", View::Internal).unwrap();
        assert_eq!(names(&internal.aliases), vec!["aa", "bb"]);
    }

    #[test]
    fn failed_external_removal_is_reasserted() {
        let h = setup();
        modify(&h, &AliasResource { external: "yes".to_string(), ..base() }).unwrap();
        let before = h.alias("svc1.example").unwrap();
        h.dns.fail_on_view(DnsOp::RemoveEntry, View::External);

        let err = modify(&h, &base()).unwrap_err();
        assert!(matches!(err, SagaError::Aborted { .. }));
        let external = h.dns.entry("svc1.example", View::External).unwrap();
        assert_eq!(names(&external.aliases), vec!["aa", "bb"]);
        assert_eq!(h.alias("svc1.example").unwrap(), before);
    }

    #[test]
    fn failed_external_add_leaves_internal_only() {
        let h = setup();
        h.dns.fail_on_view(DnsOp::AddAlias, View::External);

        modify(&h, &AliasResource { external: "yes".to_string(), ..base() }).unwrap_err();
        assert!(h.dns.entry("svc1.example", View::External).is_none());
        assert_eq!(h.alias("svc1.example").unwrap().external.as_str(), "no");
    }

    fn assert_restored(h: &Harness, before: &ermis_core::types::Alias, err: SagaError) {
        match err {
            SagaError::Aborted { failure, .. } => assert_eq!(failure.system, System::Database),
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(&h.alias("svc1.example").unwrap(), before);
    }

    #[test]
    fn failed_node_registration_leaves_no_orphan() {
        let h = setup();
        let before = h.alias("svc1.example").unwrap();
        h.db.fail_on(DbOp::CreateRelation);

        let err = modify(
            &h,
            &AliasResource {
                allowed_nodes: vec!["node-a".to_string(), "node-b".to_string(), "node-z".to_string()],
                ..base()
            },
        )
        .unwrap_err();
        assert_restored(&h, &before, err);
        assert!(h.db.store().find_node("node-z").unwrap().is_none());
    }

    #[test]
    fn failed_node_release_restores_snapshot() {
        let h = setup();
        let before = h.alias("svc1.example").unwrap();
        h.db.fail_on(DbOp::DeleteRelation);

        let err = modify(
            &h,
            &AliasResource {
                allowed_nodes: vec!["node-a".to_string()],
                ..base()
            },
        )
        .unwrap_err();
        assert_restored(&h, &before, err);
        assert!(h.db.store().find_node("node-b").unwrap().is_some());
    }

    #[test]
    fn failed_privilege_flip_restores_snapshot() {
        let h = setup();
        let before = h.alias("svc1.example").unwrap();
        h.db.fail_on(DbOp::UpdatePrivilege);

        let err = modify(
            &h,
            &AliasResource {
                allowed_nodes: vec!["node-a".to_string()],
                forbidden_nodes: vec!["node-b".to_string()],
                ..base()
            },
        )
        .unwrap_err();
        assert_restored(&h, &before, err);
        let after = h.alias("svc1.example").unwrap();
        let b = after.relations.iter().find(|r| r.node_name == "node-b").unwrap();
        assert_eq!(b.privilege, Privilege::Allowed);
    }

    #[test]
    fn cname_failure_on_new_external_view_reverts_both_views() {
        let h = setup();
        let before = h.alias("svc1.example").unwrap();
        h.dns.fail_on_view(DnsOp::RemoveAlias, View::External);

        let err = modify(
            &h,
            &AliasResource {
                external: "yes".to_string(),
                cnames: vec!["aa".to_string(), "cc".to_string()],
                ..base()
            },
        )
        .unwrap_err();
        match err {
            SagaError::Aborted { failure, .. } => assert_eq!(failure.system, System::Dns),
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(h.dns.entry("svc1.example", View::External).is_none());
        let internal = h.dns.entry("svc1.example", View::Internal).unwrap();
        assert_eq!(names(&internal.aliases), vec!["aa", "bb"]);
        assert_eq!(h.alias("svc1.example").unwrap(), before);
    }
}
