//! External system integrations for Lineage.
//!
//! - [`database`] - Backend traits, the commit [`ChangeSet`](database::ChangeSet) and
//!   the factory
//! - [`memory`] - In-process backend
//! - [`postgresql`] - PostgreSQL backend
//! - [`tasks`] - Task runtime used to dispatch one migration per document
//!
//! # Example
//!
//! ```rust
//! use lineage::adapters::database::{ChangeSet, DocumentStore, UnitOfWork};
//! use lineage::adapters::memory::MemoryBackend;
//! use lineage::domain::{DocumentId, DocumentKind};
//!
//! # async fn example() -> lineage::domain::Result<()> {
//! let backend = MemoryBackend::new();
//! let id = DocumentId::generate();
//! let mut changes = ChangeSet::new();
//! changes.put_document(id, DocumentKind::Record, None, serde_json::Map::new());
//! backend.commit(changes).await?;
//! assert!(backend.get_document(&id).await?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod memory;
pub mod postgresql;
pub mod tasks;
