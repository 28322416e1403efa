//! Delete saga.
//!
//! database row → DNS entries → vault secret. The pre-delete snapshot is
//! held for the whole run so earlier stages can be restored.

use std::cell::RefCell;

use ermis_core::resource::Principal;
use ermis_core::types::Alias;
use tracing::{info, warn};

use crate::error::{SagaError, SagaResult};
use crate::gateway::{DnsEntry, dns_ok};
use crate::orchestrator::Orchestrator;
use crate::saga::Saga;

impl Orchestrator {
    /// Delete an alias from every system. Returns the removed snapshot.
    pub fn delete_alias(&self, name: &str, principal: &Principal) -> SagaResult<Alias> {
        let name = self.canonical(name);
        let name = name.as_str();

        let presence = self.presence(name)?;
        let missing = presence.missing_from();
        if missing.len() == 3 {
            return Err(SagaError::NotFound {
                alias: name.to_string(),
            });
        }
        let Some(snapshot) = presence.database.filter(|_| missing.is_empty()) else {
            warn!(alias = %name, missing = ?missing, "alias only partially present");
            return Err(SagaError::Inconsistent {
                alias: name.to_string(),
                missing,
            });
        };
        info!(alias = %name, user = %principal.username, "deleting alias");

        let db = self.db.as_ref();
        let dns = self.dns.as_ref();
        let vault = self.vault.as_ref();
        let snapshot = &snapshot;
        let entries = presence.dns.as_slice();
        let removed: RefCell<Vec<&DnsEntry>> = RefCell::new(Vec::new());
        let removed = &removed;

        Saga::new(name)
            .compensated(
                "database",
                move || db.delete_alias(snapshot.id),
                move || db.create_alias(snapshot).map(|_| ()),
            )
            .self_compensated(
                "dns",
                move || {
                    for entry in entries {
                        dns_ok(dns.remove_entry(&entry.domain, entry.view), || {
                            format!("remove entry {} ({})", entry.domain, entry.view)
                        })?;
                        removed.borrow_mut().push(entry);
                    }
                    Ok(())
                },
                move || {
                    for entry in removed.borrow().iter() {
                        dns_ok(
                            dns.add_entry(&entry.domain, entry.view, &entry.key_name, &entry.description),
                            || format!("add entry {} ({})", entry.domain, entry.view),
                        )?;
                        for alias in &entry.aliases {
                            dns_ok(dns.add_alias(&entry.domain, entry.view, alias), || {
                                format!("add cname {alias} to {} ({})", entry.domain, entry.view)
                            })?;
                        }
                    }
                    Ok(())
                },
            )
            .stage("vault", move || {
                if !vault.get(name)?.is_empty() {
                    vault.delete(name)?;
                }
                Ok(())
            })
            .run()
            .map_err(|failure| failure.into_error(name))?;

        info!(alias = %name, id = snapshot.id, "alias deleted");
        Ok(snapshot.clone())
    }
}
