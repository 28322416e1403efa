//! Node lifecycle.
//!
//! Nodes are shared between aliases and exist only while some relation
//! references them. Registration creates them on demand; releasing the
//! last relation deletes them.

use ermis_core::types::{AliasId, Node, Privilege, Relation};
use ermis_state::StateError;
use tracing::{debug, warn};

use crate::gateway::{AliasDatabase, GatewayError, GatewayResult};

/// Find a node by name or create it.
fn find_or_create(db: &dyn AliasDatabase, name: &str) -> GatewayResult<Node> {
    if let Some(node) = db.find_node(name)? {
        return Ok(node);
    }
    match db.create_node(name) {
        Ok(node) => Ok(node),
        // Lost a race with a concurrent registration.
        Err(e) if e.is_conflict() => db
            .find_node(name)?
            .ok_or_else(|| StateError::NotFound(format!("node {name}")).into()),
        Err(e) => Err(e),
    }
}

/// Attach a node to an alias, creating the node if needed. An existing
/// relation is returned unchanged.
pub fn register(
    db: &dyn AliasDatabase,
    alias_id: AliasId,
    node_name: &str,
    privilege: Privilege,
) -> GatewayResult<Relation> {
    let node = find_or_create(db, node_name)?;
    if let Some(existing) = db.find_relation(alias_id, node.id)? {
        return Ok(existing);
    }
    let relation = Relation {
        alias_id,
        node_id: node.id,
        ..Relation::new(node_name, privilege)
    };
    if let Err(e) = db.create_relation(&relation) {
        discard_if_unreferenced(db, &node);
        return Err(e);
    }
    debug!(alias_id, node = %node_name, ?privilege, "node registered");
    Ok(relation)
}

/// Drop a node left without relations by a failed registration.
fn discard_if_unreferenced(db: &dyn AliasDatabase, node: &Node) {
    let dropped = match db.count_relations_for_node(node.id) {
        Ok(0) => db.delete_node(&node.name).map(|()| true),
        Ok(_) => Ok(false),
        Err(e) => Err(e),
    };
    match dropped {
        Ok(true) => debug!(node = %node.name, "unreferenced node dropped"),
        Ok(false) => {}
        Err(e) => warn!(node = %node.name, error = %e, "could not drop unreferenced node"),
    }
}

/// Detach a node from an alias and drop the node once nothing references
/// it. Safe to re-run. Returns false if the node was unknown.
pub fn release(db: &dyn AliasDatabase, alias_id: AliasId, node_name: &str) -> GatewayResult<bool> {
    let Some(node) = db.find_node(node_name)? else {
        return Ok(false);
    };
    db.delete_relation(alias_id, node.id)?;
    if db.count_relations_for_node(node.id)? == 0 {
        db.delete_node(node_name)?;
        debug!(node = %node_name, "node garbage-collected");
    }
    debug!(alias_id, node = %node_name, "node released");
    Ok(true)
}

pub fn update_privilege(
    db: &dyn AliasDatabase,
    alias_id: AliasId,
    node_name: &str,
    privilege: Privilege,
) -> GatewayResult<()> {
    let node = db
        .find_node(node_name)?
        .ok_or_else(|| GatewayError::from(StateError::NotFound(format!("node {node_name}"))))?;
    db.update_privilege(alias_id, node.id, privilege)?;
    debug!(alias_id, node = %node_name, ?privilege, "privilege updated");
    Ok(())
}
