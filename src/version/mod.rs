//! Template version lifecycle
//!
//! Within a non-empty family exactly one version is stable and exactly one is
//! last-updated, and all versions share one entity type. Every transition keeps that
//! true: it is planned as a list of ops, checked as a whole, then committed atomically.

mod error;
mod family;
mod manager;
mod store;

pub use error::VersionError;
pub use family::{Family, FamilyOp};
pub use manager::{Committed, VersionManager};
pub use store::{InMemoryTemplateStore, TemplateStore, Transaction};
