//! Collection reconciliation.
//!
//! Clients resubmit complete collections. [`reconcile`] turns the current
//! and desired collections into the minimal set of deletes, adds and
//! in-place updates, using a per-type identity predicate and an attribute
//! predicate for items whose identity matches.

use ermis_core::types::{Alarm, Cname, Relation};

/// Item that can be diffed against another of its kind.
pub trait Reconcilable: Clone {
    /// Whether two items denote the same thing.
    fn same_identity(&self, other: &Self) -> bool;

    /// Whether two items with the same identity also agree on every
    /// attribute the caller can change.
    fn same_attributes(&self, _other: &Self) -> bool {
        true
    }
}

impl Reconcilable for Cname {
    fn same_identity(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Reconcilable for Alarm {
    /// Alarm state (active flag, timestamps) never takes part.
    fn same_identity(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.recipient == other.recipient
            && self.threshold == other.threshold
    }
}

impl Reconcilable for Relation {
    fn same_identity(&self, other: &Self) -> bool {
        self.node_name == other.node_name
    }

    fn same_attributes(&self, other: &Self) -> bool {
        self.privilege == other.privilege
    }
}

/// Operations that turn a current collection into a desired one.
#[derive(Debug, Clone, PartialEq)]
pub struct Changes<T> {
    /// Current items with no counterpart in the desired collection.
    pub to_delete: Vec<T>,
    /// Desired items with no counterpart in the current collection.
    pub to_add: Vec<T>,
    /// Desired items whose identity matches but whose attributes differ.
    pub to_update: Vec<T>,
}

impl<T> Changes<T> {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_add.is_empty() && self.to_update.is_empty()
    }
}

/// Diff two collections with caller-supplied predicates.
///
/// An empty `desired` deletes everything. Repeated identities in
/// `desired` count once.
pub fn reconcile_by<T: Clone>(
    current: &[T],
    desired: &[T],
    same_identity: impl Fn(&T, &T) -> bool,
    same_attributes: impl Fn(&T, &T) -> bool,
) -> Changes<T> {
    let to_delete = current
        .iter()
        .filter(|c| !desired.iter().any(|d| same_identity(*c, d)))
        .cloned()
        .collect();

    let mut to_add = Vec::new();
    let mut to_update = Vec::new();
    for (i, wanted) in desired.iter().enumerate() {
        if desired[..i].iter().any(|earlier| same_identity(earlier, wanted)) {
            continue;
        }
        match current.iter().find(|c| same_identity(*c, wanted)) {
            None => to_add.push(wanted.clone()),
            Some(existing) if !same_attributes(existing, wanted) => to_update.push(wanted.clone()),
            Some(_) => {}
        }
    }

    Changes {
        to_delete,
        to_add,
        to_update,
    }
}

/// Diff two collections using the item type's own predicates.
pub fn reconcile<T: Reconcilable>(current: &[T], desired: &[T]) -> Changes<T> {
    reconcile_by(current, desired, T::same_identity, T::same_attributes)
}
