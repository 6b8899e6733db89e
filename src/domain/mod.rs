//! Domain models and types for Lineage.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`DocumentId`], [`Recid`])
//! - **Persistent identifiers** ([`PersistentIdentifier`], [`PidKey`], [`PidStatus`], [`Lookup`])
//! - **Documents** ([`LegacyDocument`], [`TargetDocument`], [`StoredDocument`])
//! - **Error types** ([`LineageError`], [`PidError`], [`StoreError`])
//! - **Result type alias** ([`Result`])
//!
//! # Explicit presence
//!
//! Legacy documents are loose JSON. Fields the migration branches on are lifted into
//! `Option`s so that transforms match on presence instead of probing maps:
//!
//! ```rust
//! use lineage::domain::LegacyDocument;
//! use serde_json::json;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let doc = LegacyDocument::from_value(json!({"owner": {"id": "7"}, "recid": "42"}))?;
//! assert_eq!(doc.owner_id(), Some(7));
//! assert!(doc.deposit.is_none());
//! # Ok(())
//! # }
//! ```
//!
//! # Lookups
//!
//! Registry lookups return [`Lookup`] so that "never existed" and "retracted" are
//! branched on explicitly:
//!
//! ```rust
//! use lineage::domain::{Lookup, PidKey};
//!
//! let lookup: Lookup<u32> = Lookup::Deleted;
//! match lookup {
//!     Lookup::Found(_) => {}
//!     Lookup::NotFound => {}
//!     Lookup::Deleted => {}
//! }
//! ```

pub mod document;
pub mod errors;
pub mod ids;
pub mod pid;
pub mod result;

// Re-export commonly used types for convenience
pub use document::{
    Document, DocumentKind, DraftBlock, LegacyDocument, StoredDocument, SubmissionPackage,
    TargetDocument, SCHEMA_KEY,
};
pub use errors::{LineageError, MigrationErrorDetail, PidError, StoreError};
pub use ids::{DocumentId, Recid};
pub use pid::{Lookup, PersistentIdentifier, PidKey, PidStatus, PidType, VersionEntry};
pub use result::Result;
