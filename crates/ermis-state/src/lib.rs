//! ermis-state — the alias database.
//!
//! Backed by [redb](https://docs.rs/redb). Aliases, cnames, alarms, nodes
//! and alias↔node relations live in separate tables; every public
//! operation runs in its own write transaction, so each call is atomic
//! but no transaction spans several calls.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across request handlers.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{AliasQuery, StateStore};
