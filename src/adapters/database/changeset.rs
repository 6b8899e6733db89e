//! Staged mutations applied as one commit
//!
//! Every mutating operation in Lineage first reads current state, stages its writes in
//! a [`ChangeSet`], and hands the set to [`UnitOfWork::commit`](super::UnitOfWork::commit).
//! Backends apply a change set atomically: either every document write and PID
//! operation lands, or none does.

use crate::domain::{
    Document, DocumentId, DocumentKind, PersistentIdentifier, PidKey, PidStatus, VersionEntry,
};

/// Insert or update of one document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWrite {
    /// Target document
    pub id: DocumentId,
    /// Record or deposit
    pub kind: DocumentKind,
    /// Revision the writer read; `None` inserts a new document
    pub expected_revision: Option<u64>,
    /// New body
    pub body: Document,
}

/// Removal of one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDeletion {
    /// Target document
    pub id: DocumentId,
    /// Revision the writer read
    pub expected_revision: u64,
}

/// One identifier registry mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidOp {
    /// Create a PID; the commit fails if `(type, value)` exists
    Create(PersistentIdentifier),
    /// Change the status; leaving `Redirected` clears the redirect target
    SetStatus {
        /// PID to change
        key: PidKey,
        /// New status
        status: PidStatus,
    },
    /// Bind the PID to a stored object
    Bind {
        /// PID to bind
        key: PidKey,
        /// Object kind
        kind: DocumentKind,
        /// Object
        object: DocumentId,
    },
    /// Mark the PID redirected to `target`
    Redirect {
        /// PID to redirect
        key: PidKey,
        /// Resolution target
        target: PidKey,
    },
    /// Replace the ordered children of `parent`
    ///
    /// The commit fails with a conflict if the current children differ from
    /// `expected` or a child already belongs to another parent.
    SetChildren {
        /// Concept PID
        parent: PidKey,
        /// Children the writer read
        expected: Vec<VersionEntry>,
        /// New ordered children
        children: Vec<VersionEntry>,
    },
}

/// Document writes, deletions and PID operations committed together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Document inserts and updates
    pub documents: Vec<DocumentWrite>,
    /// Document removals
    pub deletions: Vec<DocumentDeletion>,
    /// Registry operations, applied in order
    pub pid_ops: Vec<PidOp>,
}

impl ChangeSet {
    /// Creates an empty change set
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.deletions.is_empty() && self.pid_ops.is_empty()
    }

    /// Stages a document insert or update, replacing an earlier write of the same id
    pub fn put_document(
        &mut self,
        id: DocumentId,
        kind: DocumentKind,
        expected_revision: Option<u64>,
        body: Document,
    ) {
        if let Some(existing) = self.documents.iter_mut().find(|w| w.id == id) {
            existing.body = body;
            return;
        }
        self.documents.push(DocumentWrite {
            id,
            kind,
            expected_revision,
            body,
        });
    }

    /// Stages a document removal and drops any staged write of it
    pub fn delete_document(&mut self, id: DocumentId, expected_revision: u64) {
        self.documents.retain(|w| w.id != id);
        self.deletions.push(DocumentDeletion {
            id,
            expected_revision,
        });
    }

    /// Stages a registry operation
    pub fn push_pid(&mut self, op: PidOp) {
        self.pid_ops.push(op);
    }

    /// Staged body of a document, if written in this set
    pub fn staged_body(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.iter().find(|w| &w.id == id).map(|w| &w.body)
    }

    /// Keys of PIDs created in this set
    pub fn created_pids(&self) -> impl Iterator<Item = PidKey> + '_ {
        self.pid_ops.iter().filter_map(|op| match op {
            PidOp::Create(pid) => Some(pid.key()),
            _ => None,
        })
    }

    /// Appends everything staged in `other`
    pub fn merge(&mut self, other: ChangeSet) {
        for write in other.documents {
            self.put_document(write.id, write.kind, write.expected_revision, write.body);
        }
        for deletion in other.deletions {
            self.delete_document(deletion.id, deletion.expected_revision);
        }
        self.pid_ops.extend(other.pid_ops);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(title: &str) -> Document {
        let mut map = Document::new();
        map.insert("title".into(), json!(title));
        map
    }

    #[test]
    fn test_put_document_replaces_staged_write() {
        let id = DocumentId::generate();
        let mut changes = ChangeSet::new();
        changes.put_document(id, DocumentKind::Record, Some(3), body("a"));
        changes.put_document(id, DocumentKind::Record, Some(3), body("b"));

        assert_eq!(changes.documents.len(), 1);
        assert_eq!(changes.staged_body(&id), Some(&body("b")));
        assert_eq!(changes.documents[0].expected_revision, Some(3));
    }

    #[test]
    fn test_delete_drops_staged_write() {
        let id = DocumentId::generate();
        let mut changes = ChangeSet::new();
        changes.put_document(id, DocumentKind::Deposit, Some(1), body("a"));
        changes.delete_document(id, 1);

        assert!(changes.documents.is_empty());
        assert_eq!(changes.deletions.len(), 1);
    }

    #[test]
    fn test_created_pids() {
        let mut changes = ChangeSet::new();
        assert!(changes.is_empty());
        changes.push_pid(PidOp::Create(PersistentIdentifier::new(
            PidKey::recid(5),
            PidStatus::Reserved,
        )));
        changes.push_pid(PidOp::SetStatus {
            key: PidKey::recid(6),
            status: PidStatus::Registered,
        });

        let created: Vec<_> = changes.created_pids().collect();
        assert_eq!(created, vec![PidKey::recid(5)]);
    }
}
