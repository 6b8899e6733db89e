//! Version-Linking Engine
//!
//! - [`group`] - the concept group model and its invariants
//! - [`linker`] - registry-backed operations on concept groups
//!
//! ```rust,no_run
//! use lineage::adapters::memory::MemoryBackend;
//! use lineage::config::VersioningConfig;
//! use lineage::core::versioning::VersionLinker;
//! use lineage::domain::Recid;
//! use std::sync::Arc;
//!
//! # async fn example() -> lineage::domain::Result<()> {
//! let linker = VersionLinker::new(Arc::new(MemoryBackend::new()), VersioningConfig::default());
//! let outcome = linker.link_records(&[Recid::new(1), Recid::new(2)]).await?;
//! println!("{} -> {:?}", outcome.concept, outcome.children);
//! # Ok(())
//! # }
//! ```

pub mod group;
pub mod linker;

pub use group::{ConceptGroup, ConceptState};
pub use linker::{LinkOutcome, VersionLinker};
