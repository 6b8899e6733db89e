//! Backend abstraction traits
//!
//! The document store, the identifier registry and the commit boundary are external
//! collaborators. Lineage only talks to them through these traits.

use super::changeset::ChangeSet;
use crate::domain::{
    DocumentId, DocumentKind, PersistentIdentifier, PidKey, PidStatus, PidType, Result,
    StoredDocument, VersionEntry,
};
use async_trait::async_trait;

/// Filter used to enumerate documents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    /// Restrict to one kind
    pub kind: Option<DocumentKind>,
    /// Restrict to documents with (`true`) or without (`false`) the schema marker
    pub migrated: Option<bool>,
}

impl DocumentFilter {
    /// Documents of one kind
    pub fn of_kind(kind: DocumentKind) -> Self {
        Self {
            kind: Some(kind),
            migrated: None,
        }
    }

    /// Restricts to migrated or unmigrated documents
    pub fn migrated(mut self, migrated: bool) -> Self {
        self.migrated = Some(migrated);
        self
    }

    /// Whether a stored document passes the filter
    pub fn matches(&self, doc: &StoredDocument) -> bool {
        self.kind.map_or(true, |k| k == doc.kind)
            && self.migrated.map_or(true, |m| m == doc.is_migrated())
    }
}

/// Read access to stored documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads one document
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend fails; absence is `Ok(None)`.
    async fn get_document(&self, id: &DocumentId) -> Result<Option<StoredDocument>>;

    /// Enumerates document identifiers matching `filter`, in a stable order
    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<DocumentId>>;
}

/// Read access to the identifier registry
#[async_trait]
pub trait IdentifierRegistry: Send + Sync {
    /// Reads one PID by key, whatever its status
    async fn get_pid(&self, key: &PidKey) -> Result<Option<PersistentIdentifier>>;

    /// PIDs bound to a stored object
    async fn pids_for_object(&self, object: &DocumentId) -> Result<Vec<PersistentIdentifier>>;

    /// PIDs of a type, optionally restricted to one status, ordered by value
    async fn list_pids(
        &self,
        pid_type: PidType,
        status: Option<PidStatus>,
    ) -> Result<Vec<PersistentIdentifier>>;

    /// Concept a version belongs to
    async fn parent_of(&self, child: &PidKey) -> Result<Option<PidKey>>;

    /// Ordered versions of a concept
    async fn children_of(&self, parent: &PidKey) -> Result<Vec<VersionEntry>>;

    /// Allocates the next unused numeric value for a type
    ///
    /// Values increase monotonically and are never handed out twice, even to
    /// concurrent callers. A value is allocated whether or not a PID is ever created
    /// with it.
    async fn next_value(&self, pid_type: PidType) -> Result<u64>;
}

/// Atomic commit boundary
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Applies every staged write or none of them
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`](crate::domain::StoreError::Conflict) when a revision
    ///   check fails, a created PID already exists, or a child already has a parent
    /// - [`PidError`](crate::domain::PidError) for operations on missing PIDs or
    ///   forbidden status transitions
    async fn commit(&self, changes: ChangeSet) -> Result<()>;
}

/// Everything the migration needs from a backend
pub trait MigrationBackend: DocumentStore + IdentifierRegistry + UnitOfWork {}

impl<T> MigrationBackend for T where T: DocumentStore + IdentifierRegistry + UnitOfWork + ?Sized {}
