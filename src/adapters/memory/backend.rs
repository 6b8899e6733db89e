//! In-process backend
//!
//! Holds documents, PIDs and version relations in maps behind a mutex. Commits apply
//! operations in order while recording an undo log, and roll back on the first
//! failure, so a failed commit leaves no trace.

use crate::adapters::database::changeset::{ChangeSet, DocumentWrite, PidOp};
use crate::adapters::database::traits::{
    DocumentFilter, DocumentStore, IdentifierRegistry, UnitOfWork,
};
use crate::domain::{
    DocumentId, LineageError, PersistentIdentifier, PidError, PidKey, PidStatus, PidType,
    Result, StoreError, StoredDocument, VersionEntry,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    documents: BTreeMap<DocumentId, StoredDocument>,
    pids: BTreeMap<PidKey, PersistentIdentifier>,
    parents: HashMap<PidKey, PidKey>,
    children: HashMap<PidKey, Vec<VersionEntry>>,
    sequences: HashMap<PidType, u64>,
}

enum Undo {
    Document(DocumentId, Option<StoredDocument>),
    Pid(PidKey, Option<PersistentIdentifier>),
    Children(PidKey, Option<Vec<VersionEntry>>),
    Parent(PidKey, Option<PidKey>),
}

impl MemoryState {
    fn rollback(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Document(id, previous) => restore(&mut self.documents, id, previous),
                Undo::Pid(key, previous) => restore(&mut self.pids, key, previous),
                Undo::Children(key, previous) => match previous {
                    Some(children) => {
                        self.children.insert(key, children);
                    }
                    None => {
                        self.children.remove(&key);
                    }
                },
                Undo::Parent(key, previous) => match previous {
                    Some(parent) => {
                        self.parents.insert(key, parent);
                    }
                    None => {
                        self.parents.remove(&key);
                    }
                },
            }
        }
    }

    fn apply(&mut self, changes: ChangeSet, undo: &mut Vec<Undo>) -> Result<()> {
        for op in changes.pid_ops {
            self.apply_pid_op(op, undo)?;
        }
        for write in changes.documents {
            self.apply_write(write, undo)?;
        }
        for deletion in changes.deletions {
            let current = self.documents.get(&deletion.id).ok_or_else(|| {
                StoreError::NotFound(deletion.id.to_string())
            })?;
            if current.revision != deletion.expected_revision {
                return Err(StoreError::Conflict(format!(
                    "document {} is at revision {}, expected {}",
                    deletion.id, current.revision, deletion.expected_revision
                ))
                .into());
            }
            let previous = self.documents.remove(&deletion.id);
            undo.push(Undo::Document(deletion.id, previous));
        }
        Ok(())
    }

    fn apply_write(&mut self, write: DocumentWrite, undo: &mut Vec<Undo>) -> Result<()> {
        let current = self.documents.get(&write.id);
        let revision = match (current, write.expected_revision) {
            (None, None) => 1,
            (Some(doc), Some(expected)) if doc.revision == expected => expected + 1,
            (Some(doc), expected) => {
                return Err(StoreError::Conflict(format!(
                    "document {} is at revision {}, expected {:?}",
                    write.id, doc.revision, expected
                ))
                .into())
            }
            (None, Some(_)) => return Err(StoreError::NotFound(write.id.to_string()).into()),
        };
        let previous = self.documents.insert(
            write.id,
            StoredDocument {
                id: write.id,
                kind: write.kind,
                revision,
                body: write.body,
            },
        );
        undo.push(Undo::Document(write.id, previous));
        Ok(())
    }

    fn pid_mut(&mut self, key: &PidKey, undo: &mut Vec<Undo>) -> Result<&mut PersistentIdentifier> {
        let current = self
            .pids
            .get(key)
            .cloned()
            .ok_or_else(|| PidError::NotFound(key.to_string()))?;
        undo.push(Undo::Pid(key.clone(), Some(current)));
        self.pids
            .get_mut(key)
            .ok_or_else(|| PidError::NotFound(key.to_string()).into())
    }

    fn apply_pid_op(&mut self, op: PidOp, undo: &mut Vec<Undo>) -> Result<()> {
        match op {
            PidOp::Create(pid) => {
                let key = pid.key();
                if self.pids.contains_key(&key) {
                    return Err(StoreError::Conflict(format!("PID {key} already exists")).into());
                }
                self.pids.insert(key.clone(), pid);
                undo.push(Undo::Pid(key, None));
            }
            PidOp::SetStatus { key, status } => {
                let pid = self.pid_mut(&key, undo)?;
                pid.check_transition(status)?;
                pid.status = status;
                if status != PidStatus::Redirected {
                    pid.redirect = None;
                }
            }
            PidOp::Bind { key, kind, object } => {
                let pid = self.pid_mut(&key, undo)?;
                pid.object_type = Some(kind);
                pid.object_uuid = Some(object);
            }
            PidOp::Redirect { key, target } => {
                match self.pids.get(&target) {
                    None => return Err(PidError::NotFound(target.to_string()).into()),
                    Some(t) if t.status == PidStatus::Deleted => {
                        return Err(PidError::Deleted(target.to_string()).into())
                    }
                    Some(_) => {}
                }
                let pid = self.pid_mut(&key, undo)?;
                pid.check_transition(PidStatus::Redirected)?;
                pid.status = PidStatus::Redirected;
                pid.redirect = Some(target);
            }
            PidOp::SetChildren {
                parent,
                expected,
                children,
            } => self.set_children(parent, expected, children, undo)?,
        }
        Ok(())
    }

    fn set_children(
        &mut self,
        parent: PidKey,
        expected: Vec<VersionEntry>,
        children: Vec<VersionEntry>,
        undo: &mut Vec<Undo>,
    ) -> Result<()> {
        if !self.pids.contains_key(&parent) {
            return Err(PidError::NotFound(parent.to_string()).into());
        }
        let current = self.children.get(&parent).cloned().unwrap_or_default();
        if current != expected {
            return Err(StoreError::Conflict(format!(
                "children of {parent} changed since they were read"
            ))
            .into());
        }
        for (i, child) in children.iter().enumerate() {
            if !self.pids.contains_key(&child.pid) {
                return Err(PidError::NotFound(child.pid.to_string()).into());
            }
            if children[..i].iter().any(|c| c.pid == child.pid) {
                return Err(LineageError::IdentifierConflict(format!(
                    "{} listed twice under {parent}",
                    child.pid
                )));
            }
            if let Some(owner) = self.parents.get(&child.pid) {
                if owner != &parent {
                    return Err(StoreError::Conflict(format!(
                        "{} already belongs to {owner}",
                        child.pid
                    ))
                    .into());
                }
            }
        }

        for old in &current {
            let previous = self.parents.remove(&old.pid);
            undo.push(Undo::Parent(old.pid.clone(), previous));
        }
        for child in &children {
            let previous = self.parents.insert(child.pid.clone(), parent.clone());
            undo.push(Undo::Parent(child.pid.clone(), previous));
        }
        let previous = if children.is_empty() {
            self.children.remove(&parent)
        } else {
            self.children.insert(parent.clone(), children)
        };
        undo.push(Undo::Children(parent, previous));
        Ok(())
    }
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

/// In-process implementation of every backend trait
///
/// Used by tests and by the dry-run `check` command. State is lost on drop.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Creates an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| LineageError::Database("memory backend lock poisoned".to_string()))
    }

    /// Number of stored documents
    pub fn document_count(&self) -> usize {
        self.lock().map(|s| s.documents.len()).unwrap_or(0)
    }

    /// Number of registered PIDs of any status
    pub fn pid_count(&self) -> usize {
        self.lock().map(|s| s.pids.len()).unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<StoredDocument>> {
        Ok(self.lock()?.documents.get(id).cloned())
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<DocumentId>> {
        Ok(self
            .lock()?
            .documents
            .values()
            .filter(|doc| filter.matches(doc))
            .map(|doc| doc.id)
            .collect())
    }
}

#[async_trait]
impl IdentifierRegistry for MemoryBackend {
    async fn get_pid(&self, key: &PidKey) -> Result<Option<PersistentIdentifier>> {
        Ok(self.lock()?.pids.get(key).cloned())
    }

    async fn pids_for_object(&self, object: &DocumentId) -> Result<Vec<PersistentIdentifier>> {
        Ok(self
            .lock()?
            .pids
            .values()
            .filter(|pid| pid.object_uuid.as_ref() == Some(object))
            .cloned()
            .collect())
    }

    async fn list_pids(
        &self,
        pid_type: PidType,
        status: Option<PidStatus>,
    ) -> Result<Vec<PersistentIdentifier>> {
        let state = self.lock()?;
        let mut pids: Vec<_> = state
            .pids
            .values()
            .filter(|pid| pid.pid_type == pid_type && status.map_or(true, |s| s == pid.status))
            .cloned()
            .collect();
        pids.sort_by(|a, b| natural_order(&a.value, &b.value));
        Ok(pids)
    }

    async fn parent_of(&self, child: &PidKey) -> Result<Option<PidKey>> {
        Ok(self.lock()?.parents.get(child).cloned())
    }

    async fn children_of(&self, parent: &PidKey) -> Result<Vec<VersionEntry>> {
        Ok(self
            .lock()?
            .children
            .get(parent)
            .cloned()
            .unwrap_or_default())
    }

    async fn next_value(&self, pid_type: PidType) -> Result<u64> {
        let mut state = self.lock()?;
        let floor = match state.sequences.get(&pid_type) {
            Some(last) => *last,
            None => state
                .pids
                .keys()
                .filter(|key| key.pid_type == pid_type)
                .filter_map(|key| key.value.parse::<u64>().ok())
                .max()
                .unwrap_or(0),
        };
        let mut candidate = floor + 1;
        while state
            .pids
            .contains_key(&PidKey::new(pid_type, candidate.to_string()))
        {
            candidate += 1;
        }
        state.sequences.insert(pid_type, candidate);
        Ok(candidate)
    }
}

#[async_trait]
impl UnitOfWork for MemoryBackend {
    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let mut state = self.lock()?;
        let mut undo = Vec::new();
        match state.apply(changes, &mut undo) {
            Ok(()) => Ok(()),
            Err(e) => {
                state.rollback(undo);
                Err(e)
            }
        }
    }
}

/// Numeric values sort numerically, everything else lexically after them
fn natural_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
