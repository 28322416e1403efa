pub mod config;
pub mod error;
pub mod resource;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use resource::{AliasResource, AliasSummary, Principal};
