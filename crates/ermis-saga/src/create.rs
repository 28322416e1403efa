//! Create saga.
//!
//! database row → one DNS entry per view (with every cname) → vault
//! secret → mail to the owner. Each completed stage is undone if a later
//! one fails.

use std::cell::RefCell;

use ermis_core::resource::{AliasResource, Principal};
use ermis_core::types::{Alias, View};
use ermis_state::AliasQuery;
use tracing::{info, warn};

use crate::error::{SagaError, SagaResult};
use crate::gateway::dns_ok;
use crate::orchestrator::{Orchestrator, delete_by_name};
use crate::saga::Saga;
use crate::secret::generate_secret;

impl Orchestrator {
    /// Hydrate a client request and create the alias.
    pub fn create_alias(&self, resource: &AliasResource, principal: &Principal) -> SagaResult<Alias> {
        let desired = resource.to_new_alias(&self.config.defaults, &self.config.dns, principal)?;
        self.run_create(&desired, principal)
    }

    /// Create a fully hydrated alias in every system.
    pub fn run_create(&self, desired: &Alias, principal: &Principal) -> SagaResult<Alias> {
        let name = desired.name.as_str();

        let found = self.presence(name)?.found_in();
        if !found.is_empty() {
            warn!(alias = %name, systems = ?found, "alias already exists");
            return Err(SagaError::Conflict {
                alias: name.to_string(),
                systems: found,
            });
        }
        info!(
            alias = %name,
            user = %principal.username,
            external = %desired.external,
            "creating alias"
        );

        let db = self.db.as_ref();
        let dns = self.dns.as_ref();
        let vault = self.vault.as_ref();
        let mailer = self.mailer.as_ref();
        let dns_config = &self.config.dns;
        let description = self.description(principal);
        let description = description.as_str();
        let secret = generate_secret(self.config.secret.length);
        let secret = secret.as_str();
        let owner_mail = format!("{}@{}", principal.username, self.config.secret.mail_domain);
        let sender = self.config.secret.sender.as_str();
        let created_views: RefCell<Vec<View>> = RefCell::new(Vec::new());
        let created_views = &created_views;

        let mut saga = Saga::new(name).compensated(
            "database",
            move || db.create_alias(desired).map(|_| ()),
            move || delete_by_name(db, name),
        );

        for &view in desired.views() {
            saga = saga.self_compensated(
                "dns",
                move || {
                    dns_ok(
                        dns.add_entry(name, view, dns_config.keyname(view), description),
                        || format!("add entry {name} ({view})"),
                    )?;
                    created_views.borrow_mut().push(view);
                    for cname in &desired.cnames {
                        dns_ok(dns.add_alias(name, view, &cname.name), || {
                            format!("add cname {} to {name} ({view})", cname.name)
                        })?;
                    }
                    Ok(())
                },
                move || {
                    if created_views.borrow().contains(&view) {
                        dns_ok(dns.remove_entry(name, view), || {
                            format!("remove entry {name} ({view})")
                        })?;
                    }
                    Ok(())
                },
            );
        }

        saga.compensated(
            "vault",
            move || vault.put(name, secret),
            move || vault.delete(name),
        )
        .stage("mail", || {
            mailer.send(
                sender,
                &owner_mail,
                &format!("Secret for alias {name}"),
                &format!(
                    "The alias {name} has been created.\n\
                     Configure the following secret on every node serving it:\n\n{secret}\n"
                ),
            )
        })
        .run()
        .map_err(|failure| failure.into_error(name))?;

        let created = self
            .db
            .find_aliases(&AliasQuery::ByName(name.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| SagaError::NotFound {
                alias: name.to_string(),
            })?;
        info!(alias = %name, id = created.id, "alias created");
        Ok(created)
    }
}
