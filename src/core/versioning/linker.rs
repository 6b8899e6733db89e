//! Version-linking engine
//!
//! Every operation reads the current groups, computes the new state and commits
//! the whole change set at once, guarded by the children each group had when it
//! was read. A concurrent writer makes the commit fail with a conflict instead of
//! leaving two concepts claiming the same record.

use super::group::{ConceptGroup, ConceptState};
use crate::adapters::database::{ChangeSet, DocumentFilter, MigrationBackend, PidOp};
use crate::config::VersioningConfig;
use crate::core::identifiers::IdentifierManager;
use crate::core::transform::normalize::{set_to_json, string_set};
use crate::domain::{
    Document, DocumentId, DocumentKind, LineageError, Lookup, PersistentIdentifier, PidError,
    PidKey, PidStatus, PidType, Recid, Result, StoreError, StoredDocument, VersionEntry,
};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Result of [`VersionLinker::link_records`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Concept the records now belong to
    pub concept: PidKey,
    /// Concept DOI
    pub conceptdoi: String,
    /// Published versions, oldest first
    pub children: Vec<PidKey>,
    /// Whether anything was written
    pub changed: bool,
}

/// A record taking part in a link
struct Member {
    key: PidKey,
    record: StoredDocument,
    parent: Option<PidKey>,
}

/// Maintains concept groups
#[derive(Clone)]
pub struct VersionLinker {
    backend: Arc<dyn MigrationBackend>,
    ids: IdentifierManager,
    config: Arc<VersioningConfig>,
}

impl VersionLinker {
    /// Creates a linker over a backend
    pub fn new(backend: Arc<dyn MigrationBackend>, config: VersioningConfig) -> Self {
        Self {
            ids: IdentifierManager::new(Arc::clone(&backend)),
            backend,
            config: Arc::new(config),
        }
    }

    /// Reads the current group of a concept
    pub async fn group(&self, concept: &PidKey) -> Result<ConceptGroup> {
        let children = self.backend.children_of(concept).await?;
        ConceptGroup::with_children(concept.clone(), children)
    }

    /// Appends a published version to a concept
    ///
    /// # Errors
    ///
    /// [`LineageError::IdentifierConflict`] if the record belongs to another concept.
    pub async fn insert_child(&self, concept: &PidKey, child: &PidKey) -> Result<ConceptGroup> {
        self.update_group(concept, child, false, |group| Ok(group.insert_child(child.clone())))
            .await
    }

    /// Appends an unpublished draft version to a concept
    ///
    /// The draft does not move the concept's redirect.
    pub async fn insert_draft_child(&self, concept: &PidKey, child: &PidKey) -> Result<ConceptGroup> {
        self.update_group(concept, child, false, |group| group.insert_draft_child(child.clone()))
            .await
    }

    /// Detaches a version from a concept, retiring the concept if it empties
    ///
    /// The version's record and deposit lose their `conceptrecid` and
    /// `conceptdoi` in the same commit.
    pub async fn remove_child(&self, concept: &PidKey, child: &PidKey) -> Result<ConceptGroup> {
        self.update_group(concept, child, true, |group| Ok(group.remove_child(child)))
            .await
    }

    async fn update_group<F>(
        &self,
        concept: &PidKey,
        child: &PidKey,
        detach: bool,
        edit: F,
    ) -> Result<ConceptGroup>
    where
        F: FnOnce(&mut ConceptGroup) -> Result<bool>,
    {
        let concept_pid = self.ids.lookup(concept).await?.into_result(concept)?;
        let child_pid = self.ids.lookup(child).await?.into_result(child)?;
        if let Some(owner) = self.backend.parent_of(child).await? {
            if &owner != concept {
                return Err(LineageError::IdentifierConflict(format!(
                    "{child} belongs to {owner}, not {concept}"
                )));
            }
        }

        let mut group = self.group(concept).await?;
        let expected = group.children().to_vec();
        if !edit(&mut group)? {
            return Ok(group);
        }

        let mut changes = ChangeSet::new();
        changes.push_pid(PidOp::SetChildren {
            parent: concept.clone(),
            expected,
            children: group.children().to_vec(),
        });
        stage_concept_state(&mut changes, &concept_pid, group.state());
        if detach {
            for doc in self.version_documents(&child_pid).await? {
                stage_cleared_fields(&mut changes, &doc, &concept.value);
            }
        }
        self.backend.commit(changes).await?;
        tracing::debug!(concept = %concept, child = %child, state = ?group.state(), "Concept updated");
        Ok(group)
    }

    /// Links records, oldest first, into one concept
    ///
    /// The base concept is the one held by the earliest record that has one; every
    /// other concept involved is emptied and retired. Every published member of an
    /// involved concept must be part of the input, in the same relative order. The
    /// concept DOI is minted on the first link and reused afterwards. Every member
    /// record and its deposit get `conceptrecid`, `conceptdoi` and the union of the
    /// members' communities.
    ///
    /// # Errors
    ///
    /// - [`LineageError::Validation`] for empty or repeated input, or records that
    ///   are not migrated
    /// - [`LineageError::IdentifierConflict`] when the input would drop or reorder
    ///   members of an existing concept
    /// - store conflicts when a group changed concurrently; nothing is written
    pub async fn link_records(&self, recids: &[Recid]) -> Result<LinkOutcome> {
        let mut seen = HashSet::new();
        if recids.is_empty() {
            return Err(LineageError::Validation("no records to link".to_string()));
        }
        if let Some(dup) = recids.iter().find(|r| !seen.insert(**r)) {
            return Err(LineageError::Validation(format!(
                "record {dup} listed more than once"
            )));
        }

        let mut members = Vec::with_capacity(recids.len());
        for recid in recids {
            members.push(self.load_member(*recid).await?);
        }
        let positions: HashMap<&PidKey, usize> =
            members.iter().enumerate().map(|(i, m)| (&m.key, i)).collect();

        let mut concepts: Vec<PidKey> = Vec::new();
        for parent in members.iter().filter_map(|m| m.parent.as_ref()) {
            if !concepts.contains(parent) {
                concepts.push(parent.clone());
            }
        }
        let mut groups = Vec::with_capacity(concepts.len());
        for concept in &concepts {
            let group = self.group(concept).await?;
            check_members_kept(&group, &positions)?;
            groups.push(group);
        }

        let mut changes = ChangeSet::new();
        let (base_pid, base_group) = match groups.first() {
            Some(group) => {
                let key = group.concept();
                (self.ids.lookup(key).await?.into_result(key)?, group.clone())
            }
            None => {
                let key = self.ids.reserve_next(PidType::Recid).await?;
                let pid = PersistentIdentifier::new(key.clone(), PidStatus::Reserved);
                changes.push_pid(PidOp::Create(pid.clone()));
                (pid, ConceptGroup::new(key))
            }
        };
        let base = base_pid.key();

        for retired in groups.iter().skip(1) {
            if let Some(draft) = retired.draft().filter(|d| !positions.contains_key(d)) {
                return Err(LineageError::IdentifierConflict(format!(
                    "{} cannot be merged while it has the draft {draft}",
                    retired.concept()
                )));
            }
            changes.push_pid(PidOp::SetChildren {
                parent: retired.concept().clone(),
                expected: retired.children().to_vec(),
                children: Vec::new(),
            });
            changes.push_pid(PidOp::SetStatus {
                key: retired.concept().clone(),
                status: PidStatus::Deleted,
            });
            if let Some(doi) = self.retired_concept_doi(retired.concept(), &members).await? {
                tracing::info!(concept = %retired.concept(), conceptdoi = %doi.value, "Retiring merged concept DOI");
                changes.push_pid(PidOp::SetStatus {
                    key: doi,
                    status: PidStatus::Deleted,
                });
            }
            tracing::info!(concept = %retired.concept(), into = %base, "Retiring merged concept");
        }

        let mut linked = ConceptGroup::new(base.clone());
        for member in &members {
            linked.insert_child(member.key.clone());
        }
        if let Some(draft) = base_group.draft().filter(|d| !positions.contains_key(d)) {
            linked.insert_draft_child(draft.clone())?;
        }
        if linked.children() != base_group.children() {
            changes.push_pid(PidOp::SetChildren {
                parent: base.clone(),
                expected: base_group.children().to_vec(),
                children: linked.children().to_vec(),
            });
        }
        stage_concept_state(&mut changes, &base_pid, linked.state());

        let conceptdoi = self.stage_concept_doi(&base, &members, &mut changes).await?;

        let communities: BTreeSet<String> = members
            .iter()
            .flat_map(|m| string_set(m.record.body.get("communities").cloned().unwrap_or(Value::Null)))
            .collect();
        for member in &members {
            stage_version_fields(&mut changes, &member.record, &base.value, &conceptdoi, &communities);
            if let Some(deposit) = self.linked_deposit(&member.record).await? {
                stage_version_fields(&mut changes, &deposit, &base.value, &conceptdoi, &communities);
            }
        }

        let changed = !changes.is_empty();
        if changed {
            self.backend.commit(changes).await?;
            tracing::info!(
                concept = %base,
                conceptdoi = %conceptdoi,
                versions = members.len(),
                "Linked records"
            );
        }

        Ok(LinkOutcome {
            concept: base,
            conceptdoi,
            children: linked.published().cloned().collect(),
            changed,
        })
    }

    /// Gives a published record a concept if it has none
    ///
    /// A record that is the pending draft of a concept is published into it.
    /// Returns `None` when the record is already versioned.
    pub async fn version_published_record(&self, recid: Recid) -> Result<Option<LinkOutcome>> {
        let key = PidKey::recid(recid);
        let Some(parent) = self.backend.parent_of(&key).await? else {
            return self.link_records(&[recid]).await.map(Some);
        };

        let group = self.group(&parent).await?;
        if group.draft() != Some(&key) {
            tracing::debug!(recid = %recid, concept = %parent, "Record already versioned");
            return Ok(None);
        }
        let mut ordered = group
            .published()
            .map(|pid| pid.value.parse::<Recid>().map_err(LineageError::Database))
            .collect::<Result<Vec<_>>>()?;
        ordered.push(recid);
        self.link_records(&ordered).await.map(Some)
    }

    /// Gives an unpublished deposit a fresh concept with its record number as draft
    ///
    /// Only draft deposits whose record number is still reserved qualify; anything
    /// else, including an already versioned deposit, returns `None`.
    pub async fn version_new_deposit(&self, id: &DocumentId) -> Result<Option<PidKey>> {
        let deposit = self
            .backend
            .get_document(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if deposit.kind != DocumentKind::Deposit || !deposit.is_migrated() {
            return Err(LineageError::Validation(format!(
                "{id} is not a migrated deposit"
            )));
        }

        let status = deposit
            .body
            .get("_deposit")
            .and_then(|d| d.get("status"))
            .and_then(Value::as_str);
        if status != Some("draft") || has_text(deposit.body.get("conceptrecid")) {
            return Ok(None);
        }

        let recid = deposit
            .body
            .get("recid")
            .and_then(Recid::from_json)
            .ok_or_else(|| LineageError::Validation(format!("deposit {id} has no recid")))?;
        let key = PidKey::recid(recid);
        let pid = self.ids.lookup(&key).await?.into_result(&key)?;
        if pid.status != PidStatus::Reserved || self.backend.parent_of(&key).await?.is_some() {
            return Ok(None);
        }

        let concept = self.ids.reserve_next(PidType::Recid).await?;
        let mut changes = ChangeSet::new();
        changes.push_pid(PidOp::Create(PersistentIdentifier::new(
            concept.clone(),
            PidStatus::Reserved,
        )));
        changes.push_pid(PidOp::SetChildren {
            parent: concept.clone(),
            expected: Vec::new(),
            children: vec![VersionEntry::draft(key)],
        });
        let mut body = deposit.body.clone();
        body.insert("conceptrecid".into(), json!(concept.value));
        changes.put_document(deposit.id, DocumentKind::Deposit, Some(deposit.revision), body);
        self.backend.commit(changes).await?;

        tracing::info!(deposit = %id, recid = %recid, concept = %concept, "Versioned new deposit");
        Ok(Some(concept))
    }

    async fn load_member(&self, recid: Recid) -> Result<Member> {
        let key = PidKey::recid(recid);
        let pid = self.ids.lookup(&key).await?.into_result(&key)?;
        let object = match (pid.object_type, pid.object_uuid) {
            (Some(DocumentKind::Record), Some(object)) => object,
            _ => {
                return Err(LineageError::Validation(format!(
                    "{key} is not bound to a record"
                )))
            }
        };
        let record = self
            .backend
            .get_document(&object)
            .await?
            .ok_or_else(|| StoreError::NotFound(object.to_string()))?;
        if !record.is_migrated() {
            return Err(LineageError::Validation(format!(
                "record {recid} is not migrated"
            )));
        }
        let parent = self.backend.parent_of(&key).await?;
        Ok(Member {
            key,
            record,
            parent,
        })
    }

    /// Reuses the concept DOI of a base member, or stages a new one
    async fn stage_concept_doi(
        &self,
        base: &PidKey,
        members: &[Member],
        changes: &mut ChangeSet,
    ) -> Result<String> {
        let conceptdoi = members
            .iter()
            .filter(|m| m.parent.as_ref() == Some(base))
            .find_map(|m| m.record.body.get("conceptdoi").and_then(Value::as_str))
            .filter(|doi| !doi.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.config.concept_doi(&base.value));

        let key = PidKey::new(PidType::Doi, conceptdoi.clone());
        match self.ids.lookup(&key).await? {
            Lookup::Found(_) => {}
            Lookup::Deleted => return Err(PidError::Deleted(key.to_string()).into()),
            Lookup::NotFound => {
                let latest = members
                    .last()
                    .ok_or_else(|| LineageError::Validation("no records to link".to_string()))?;
                changes.push_pid(PidOp::Create(
                    PersistentIdentifier::new(key, PidStatus::Reserved)
                        .bound_to(DocumentKind::Record, latest.record.id),
                ));
                tracing::info!(concept = %base, conceptdoi = %conceptdoi, "Minting concept DOI");
            }
        }
        Ok(conceptdoi)
    }

    /// Live concept DOI of a concept being merged away
    async fn retired_concept_doi(&self, concept: &PidKey, members: &[Member]) -> Result<Option<PidKey>> {
        let conceptdoi = members
            .iter()
            .filter(|m| m.parent.as_ref() == Some(concept))
            .find_map(|m| m.record.body.get("conceptdoi").and_then(Value::as_str))
            .filter(|doi| !doi.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.config.concept_doi(&concept.value));
        let key = PidKey::new(PidType::Doi, conceptdoi);
        Ok(match self.ids.lookup(&key).await? {
            Lookup::Found(_) => Some(key),
            Lookup::NotFound | Lookup::Deleted => None,
        })
    }

    /// Record and deposit documents of one version
    ///
    /// A bound version yields its record and the deposit it was published from.
    /// An unbound draft is found through the migrated deposit carrying its number.
    async fn version_documents(&self, version: &PersistentIdentifier) -> Result<Vec<StoredDocument>> {
        let mut docs = Vec::new();
        if let Some(object) = version.object_uuid {
            if let Some(doc) = self.backend.get_document(&object).await? {
                if doc.kind == DocumentKind::Record {
                    if let Some(deposit) = self.linked_deposit(&doc).await? {
                        docs.push(deposit);
                    }
                }
                docs.push(doc);
            }
            return Ok(docs);
        }

        let Ok(recid) = version.value.parse::<Recid>() else {
            return Ok(docs);
        };
        let filter = DocumentFilter::of_kind(DocumentKind::Deposit).migrated(true);
        for id in self.backend.list_documents(&filter).await? {
            if let Some(doc) = self.backend.get_document(&id).await? {
                if doc.body.get("recid").and_then(Recid::from_json) == Some(recid) {
                    docs.push(doc);
                }
            }
        }
        Ok(docs)
    }

    /// Deposit a record was published from, when it still exists
    async fn linked_deposit(&self, record: &StoredDocument) -> Result<Option<StoredDocument>> {
        let depid = record
            .body
            .get("_deposit")
            .and_then(|d| d.get("id"))
            .and_then(|id| match id {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        let Some(depid) = depid else {
            return Ok(None);
        };
        match self.ids.lookup(&PidKey::depid(depid)).await? {
            Lookup::Found(PersistentIdentifier {
                object_uuid: Some(object),
                object_type: Some(DocumentKind::Deposit),
                ..
            }) => self.backend.get_document(&object).await,
            _ => Ok(None),
        }
    }
}

/// Fails if a published member of `group` is missing from or reordered by the input
fn check_members_kept(group: &ConceptGroup, positions: &HashMap<&PidKey, usize>) -> Result<()> {
    let mut last = None;
    for pid in group.published() {
        let Some(&at) = positions.get(pid) else {
            return Err(LineageError::IdentifierConflict(format!(
                "{pid} is a version of {} but is missing from the records to link",
                group.concept()
            )));
        };
        if last.map_or(false, |prev| at < prev) {
            return Err(LineageError::IdentifierConflict(format!(
                "linking would reorder the versions of {}",
                group.concept()
            )));
        }
        last = Some(at);
    }
    Ok(())
}

fn stage_concept_state(changes: &mut ChangeSet, concept: &PersistentIdentifier, state: ConceptState) {
    let key = concept.key();
    match state {
        ConceptState::Redirected(target) => {
            if concept.status != PidStatus::Redirected || concept.redirect.as_ref() != Some(&target) {
                changes.push_pid(PidOp::Redirect { key, target });
            }
        }
        ConceptState::Reserved => {
            if concept.status != PidStatus::Reserved {
                changes.push_pid(PidOp::SetStatus {
                    key,
                    status: PidStatus::Reserved,
                });
            }
        }
        ConceptState::Retired => {
            if concept.status != PidStatus::Deleted {
                changes.push_pid(PidOp::SetStatus {
                    key,
                    status: PidStatus::Deleted,
                });
            }
        }
    }
}

fn stage_version_fields(
    changes: &mut ChangeSet,
    doc: &StoredDocument,
    conceptrecid: &str,
    conceptdoi: &str,
    communities: &BTreeSet<String>,
) {
    let mut body: Document = doc.body.clone();
    body.insert("conceptrecid".into(), json!(conceptrecid));
    body.insert("conceptdoi".into(), json!(conceptdoi));
    if !communities.is_empty() {
        body.insert("communities".into(), set_to_json(communities.clone()));
    }
    if body != doc.body {
        changes.put_document(doc.id, doc.kind, Some(doc.revision), body);
    }
}

/// Drops the concept fields of a document that belongs to `conceptrecid`
fn stage_cleared_fields(changes: &mut ChangeSet, doc: &StoredDocument, conceptrecid: &str) {
    let mut body = changes.staged_body(&doc.id).cloned().unwrap_or_else(|| doc.body.clone());
    let owned = match body.get("conceptrecid") {
        Some(Value::String(s)) => s == conceptrecid,
        Some(Value::Number(n)) => n.to_string() == conceptrecid,
        _ => false,
    };
    if !owned {
        return;
    }
    body.remove("conceptrecid");
    body.remove("conceptdoi");
    changes.put_document(doc.id, doc.kind, Some(doc.revision), body);
}

fn has_text(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(_)) => true,
        _ => false,
    }
}
