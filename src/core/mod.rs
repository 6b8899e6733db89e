//! Core business logic for Lineage.
//!
//! # Modules
//!
//! - [`transform`] - Field transforms shared by records, deposits and drafts
//! - [`classifier`] - Deposit classification (published, draft, new)
//! - [`identifiers`] - Persistent identifier lifecycle
//! - [`pipeline`] - Per-document migration with a single commit
//! - [`versioning`] - Concept groups linking versions of a work
//! - [`migrate`] - Batch orchestration, dump loading and checks
//!
//! # Migration Workflow
//!
//! 1. **Load**: stream legacy dumps into the store, one PID per document
//! 2. **Migrate records**: transform published records and register their identifiers
//! 3. **Migrate deposits**: classify, transform and sync with the published records
//! 4. **Version**: give every record and draft deposit a concept
//! 5. **Report**: log a summary naming every failed document

pub mod classifier;
pub mod identifiers;
pub mod migrate;
pub mod pipeline;
pub mod transform;
pub mod versioning;
