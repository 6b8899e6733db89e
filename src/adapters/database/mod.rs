//! Backend abstraction layer
//!
//! Traits for the document store, the identifier registry and the commit boundary,
//! the [`ChangeSet`] they commit, and a factory that picks an implementation from
//! configuration.

pub mod changeset;
pub mod factory;
pub mod traits;

pub use changeset::{ChangeSet, DocumentDeletion, DocumentWrite, PidOp};
pub use factory::{create_backend, create_task_runtime};
pub use traits::{DocumentFilter, DocumentStore, IdentifierRegistry, MigrationBackend, UnitOfWork};
