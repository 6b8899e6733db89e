//! Transformation Pipeline
//!
//! Turns one stored legacy document into its migrated form and commits it together
//! with the identifiers it implies.
//!
//! # Example
//!
//! ```rust,no_run
//! use lineage::adapters::memory::MemoryBackend;
//! use lineage::config::MigrationConfig;
//! use lineage::core::pipeline::{MigrationOutcome, Pipeline};
//! use lineage::domain::DocumentId;
//! use std::sync::Arc;
//!
//! # async fn example(id: DocumentId) -> lineage::domain::Result<()> {
//! let pipeline = Pipeline::new(Arc::new(MemoryBackend::new()), MigrationConfig::default());
//! match pipeline.migrate(&id).await? {
//!     MigrationOutcome::AlreadyMigrated => println!("nothing to do"),
//!     outcome => println!("{outcome:?}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod runner;
pub mod steps;

pub use context::{MigrationContext, MigrationOutcome, PipelineState};
pub use runner::{MigrationPlan, Pipeline};
