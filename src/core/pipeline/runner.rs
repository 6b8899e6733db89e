//! Transformation pipeline
//!
//! Migrating one document runs in four phases:
//!
//! 1. entry guard: a document carrying `$schema` is returned untouched
//! 2. identifier resolution: the record number is resolved or reserved and the
//!    registry writes it needs are staged
//! 3. the category-specific step fold (pure)
//! 4. staging of derived identifiers and, for published deposits, the sync with
//!    the published record
//!
//! A deleted record number short-circuits phase 2: a record is skipped and a
//! deposit is retracted, whatever its category.
//!
//! Everything staged is committed once at the end. Any error before the commit
//! leaves the store untouched.

use super::context::{MigrationContext, MigrationOutcome, PipelineState};
use super::steps::run_steps;
use crate::adapters::database::{ChangeSet, MigrationBackend, PidOp};
use crate::config::MigrationConfig;
use crate::core::classifier::{classify, Category};
use crate::core::identifiers::IdentifierManager;
use crate::domain::{
    Document, DocumentId, DocumentKind, LegacyDocument, LineageError, Lookup, PidKey,
    PidStatus, PidType, Recid, Result, StoreError, StoredDocument, TargetDocument,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Everything a migration would write, computed without writing
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Stored document being migrated
    pub document_id: DocumentId,
    /// Record or deposit
    pub kind: DocumentKind,
    /// Resolved record number
    pub recid: Recid,
    /// Deposit category; `None` for records
    pub category: Option<Category>,
    /// Migrated document; `None` when the document is skipped or retracted
    pub target: Option<TargetDocument>,
    /// Staged writes, committed as one unit
    pub changes: ChangeSet,
    /// Outcome once committed
    pub outcome: MigrationOutcome,
}

/// How the record number of a document was found
#[derive(Debug, Clone, Copy)]
enum RecidResolution {
    /// Reused or freshly staged
    Live(Recid),
    /// The record number exists and was retracted
    Deleted(Recid),
}

/// Transformation pipeline for records and deposits
#[derive(Clone)]
pub struct Pipeline {
    backend: Arc<dyn MigrationBackend>,
    ids: IdentifierManager,
    config: Arc<MigrationConfig>,
}

impl Pipeline {
    /// Creates a pipeline over a backend
    pub fn new(backend: Arc<dyn MigrationBackend>, config: MigrationConfig) -> Self {
        Self {
            ids: IdentifierManager::new(Arc::clone(&backend)),
            backend,
            config: Arc::new(config),
        }
    }

    /// Identifier manager sharing this pipeline's backend
    pub fn identifiers(&self) -> &IdentifierManager {
        &self.ids
    }

    /// Migrates one stored document, stamping it with the current time
    pub async fn migrate(&self, id: &DocumentId) -> Result<MigrationOutcome> {
        self.migrate_at(id, Utc::now()).await
    }

    /// Migrates one stored document
    ///
    /// Safe to call again on the same document: the second call returns
    /// [`MigrationOutcome::AlreadyMigrated`] without writing.
    ///
    /// # Errors
    ///
    /// Whatever the classifier, the identifier resolution, the steps or the commit
    /// raise. Nothing is written when an error is returned.
    pub async fn migrate_at(&self, id: &DocumentId, now: DateTime<Utc>) -> Result<MigrationOutcome> {
        let stored = self
            .backend
            .get_document(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let Some(plan) = self.plan(&stored, now).await? else {
            tracing::debug!(document = %id, state = %PipelineState::Migrated, "Already migrated");
            return Ok(MigrationOutcome::AlreadyMigrated);
        };

        let outcome = plan.outcome;
        if let MigrationOutcome::Skipped { recid } = outcome {
            tracing::info!(document = %id, recid = %recid, "Deleted record, no migration required");
            return Ok(outcome);
        }
        self.backend.commit(plan.changes).await?;
        tracing::info!(
            document = %id,
            kind = %plan.kind,
            recid = %plan.recid,
            category = ?plan.category,
            state = %PipelineState::Migrated,
            "Document migrated"
        );
        Ok(outcome)
    }

    /// Computes the migration of a stored document without committing it
    ///
    /// Returns `None` for a document that is already migrated. Registry reads and
    /// sequence allocation still happen; an allocated sequence value is never
    /// reused even if the plan is discarded.
    pub async fn plan(&self, stored: &StoredDocument, now: DateTime<Utc>) -> Result<Option<MigrationPlan>> {
        if stored.is_migrated() {
            return Ok(None);
        }
        tracing::debug!(document = %stored.id, state = %PipelineState::InProgress, "Migrating document");

        let legacy = stored.to_legacy()?;
        let category = match stored.kind {
            DocumentKind::Record => None,
            DocumentKind::Deposit => Some(classify(&legacy, &self.config.stale_drafts, now.date_naive())?),
        };

        let mut changes = ChangeSet::new();
        let recid = match self.resolve_recid(stored, &legacy, &mut changes).await? {
            RecidResolution::Live(recid) => recid,
            RecidResolution::Deleted(recid) => {
                let outcome = match stored.kind {
                    DocumentKind::Record => MigrationOutcome::Skipped { recid },
                    DocumentKind::Deposit => {
                        self.retract_deposit(stored, &legacy, &mut changes).await?;
                        MigrationOutcome::Retracted { recid }
                    }
                };
                return Ok(Some(MigrationPlan {
                    document_id: stored.id,
                    kind: stored.kind,
                    recid,
                    category,
                    target: None,
                    changes,
                    outcome,
                }));
            }
        };

        let ctx = MigrationContext {
            config: &self.config,
            document_id: stored.id,
            kind: stored.kind,
            legacy: &legacy,
            category,
            recid,
            now,
        };
        let target = TargetDocument::new(run_steps(&ctx)?)?;

        self.stage_identifiers(&ctx, target.body(), &mut changes).await?;
        changes.put_document(stored.id, stored.kind, Some(stored.revision), target.body().clone());

        if category == Some(Category::Published) {
            self.sync_published_record(stored.id, recid, target.body(), &mut changes)
                .await?;
        }
        let outcome = MigrationOutcome::Migrated { recid, category };

        Ok(Some(MigrationPlan {
            document_id: stored.id,
            kind: stored.kind,
            recid,
            category,
            target: Some(target),
            changes,
            outcome,
        }))
    }

    async fn resolve_recid(
        &self,
        stored: &StoredDocument,
        legacy: &LegacyDocument,
        changes: &mut ChangeSet,
    ) -> Result<RecidResolution> {
        let distinct: BTreeSet<Recid> = legacy
            .sips
            .iter()
            .filter_map(|sip| sip.recid)
            .chain(legacy.recid)
            .collect();

        if distinct.len() > 1 {
            let values: Vec<String> = distinct.iter().map(Recid::to_string).collect();
            return Err(LineageError::ambiguous(
                legacy.label(),
                format!("multiple record identifiers [{}]", values.join(", ")),
            ));
        }

        match (stored.kind, distinct.into_iter().next()) {
            (DocumentKind::Record, Some(recid)) => {
                if let Lookup::Deleted = self.ids.lookup(&PidKey::recid(recid)).await? {
                    return Ok(RecidResolution::Deleted(recid));
                }
                self.ids
                    .ensure_pid(
                        changes,
                        &PidKey::recid(recid),
                        PidStatus::Registered,
                        Some((DocumentKind::Record, stored.id)),
                    )
                    .await?;
                Ok(RecidResolution::Live(recid))
            }
            (DocumentKind::Record, None) => Err(LineageError::LegacyInvariant(format!(
                "record {} has no recid",
                stored.id
            ))),
            (DocumentKind::Deposit, Some(recid)) => {
                match self.ids.lookup(&PidKey::recid(recid)).await? {
                    Lookup::Found(_) => {}
                    Lookup::Deleted => return Ok(RecidResolution::Deleted(recid)),
                    Lookup::NotFound => {
                        self.ids
                            .ensure_pid(changes, &PidKey::recid(recid), PidStatus::Reserved, None)
                            .await?;
                    }
                }
                Ok(RecidResolution::Live(recid))
            }
            (DocumentKind::Deposit, None) => {
                let recid = self.fresh_recid(legacy).await?;
                self.ids
                    .ensure_pid(changes, &PidKey::recid(recid), PidStatus::Reserved, None)
                    .await?;
                tracing::debug!(document = %legacy.label(), recid = %recid, "Reserved record number");
                Ok(RecidResolution::Live(recid))
            }
        }
    }

    /// The deposit number when it is free as a record number, else the next value
    async fn fresh_recid(&self, legacy: &LegacyDocument) -> Result<Recid> {
        if let Some(depid) = legacy.deposit_id().and_then(|d| d.parse::<Recid>().ok()) {
            if self.backend.get_pid(&PidKey::recid(depid)).await?.is_none() {
                return Ok(depid);
            }
        }
        let key = self.ids.reserve_next(PidType::Recid).await?;
        key.value.parse().map_err(LineageError::Database)
    }

    async fn stage_identifiers(
        &self,
        ctx: &MigrationContext<'_>,
        target: &Document,
        changes: &mut ChangeSet,
    ) -> Result<()> {
        match ctx.kind {
            DocumentKind::Deposit => {
                if let Some(depid) = ctx.legacy.deposit_id() {
                    self.ids
                        .ensure_pid(
                            changes,
                            &PidKey::depid(depid),
                            PidStatus::Registered,
                            Some((DocumentKind::Deposit, ctx.document_id)),
                        )
                        .await?;
                }
            }
            DocumentKind::Record => {
                let binding = Some((DocumentKind::Record, ctx.document_id));
                if let Some(doi) = non_empty_str(target.get("doi")) {
                    let status = if doi.starts_with(&ctx.config.internal_doi_prefix) {
                        PidStatus::Registered
                    } else {
                        PidStatus::Reserved
                    };
                    self.ids
                        .ensure_pid(changes, &PidKey::new(PidType::Doi, doi), status, binding)
                        .await?;
                }
                let oai = target
                    .get("_oai")
                    .and_then(|o| non_empty_str(o.get("id")));
                if let Some(oai) = oai {
                    self.ids
                        .ensure_pid(
                            changes,
                            &PidKey::new(PidType::Oai, oai),
                            PidStatus::Registered,
                            binding,
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Copies the deposit's `_deposit` block onto the published record
    async fn sync_published_record(
        &self,
        deposit_id: DocumentId,
        recid: Recid,
        target: &Document,
        changes: &mut ChangeSet,
    ) -> Result<()> {
        let key = PidKey::recid(recid);
        let record = match self.ids.lookup(&key).await? {
            Lookup::Found(pid) => match (pid.object_type, pid.object_uuid) {
                (Some(DocumentKind::Record), Some(object)) => {
                    self.backend.get_document(&object).await?
                }
                _ => None,
            },
            Lookup::NotFound | Lookup::Deleted => None,
        };

        let Some(record) = record else {
            tracing::warn!(
                deposit = %deposit_id,
                recid = %recid,
                "Published deposit has no record to sync"
            );
            return Ok(());
        };

        let Some(deposit_block) = target.get("_deposit") else {
            return Ok(());
        };
        let mut body = changes
            .staged_body(&record.id)
            .cloned()
            .unwrap_or(record.body);
        if body.get("_deposit") != Some(deposit_block) {
            body.insert("_deposit".into(), deposit_block.clone());
            changes.put_document(record.id, DocumentKind::Record, Some(record.revision), body);
        }
        Ok(())
    }

    /// Retracts a deposit whose record was deleted
    async fn retract_deposit(
        &self,
        stored: &StoredDocument,
        legacy: &LegacyDocument,
        changes: &mut ChangeSet,
    ) -> Result<()> {
        if let Some(depid) = legacy.deposit_id() {
            let key = PidKey::depid(depid);
            if let Lookup::Found(_) = self.ids.lookup(&key).await? {
                changes.push_pid(PidOp::SetStatus {
                    key,
                    status: PidStatus::Deleted,
                });
            }
        }
        changes.delete_document(stored.id, stored.revision);
        tracing::info!(
            document = %stored.id,
            deposit = %legacy.label(),
            "Record was deleted, retracting its deposit"
        );
        Ok(())
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::database::{DocumentStore, IdentifierRegistry, UnitOfWork};
    use crate::adapters::memory::MemoryBackend;
    use crate::domain::{PersistentIdentifier, SCHEMA_KEY};
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 6, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        backend: Arc<MemoryBackend>,
        pipeline: Pipeline,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = Arc::new(MemoryBackend::new());
            let pipeline = Pipeline::new(backend.clone(), MigrationConfig::default());
            Self { backend, pipeline }
        }

        async fn insert(&self, kind: DocumentKind, body: serde_json::Value, pids: Vec<PersistentIdentifier>) -> DocumentId {
            let id = DocumentId::generate();
            let mut changes = ChangeSet::new();
            changes.put_document(id, kind, None, body.as_object().unwrap().clone());
            for pid in pids {
                changes.push_pid(PidOp::Create(pid.bound_to(kind, id)));
            }
            self.backend.commit(changes).await.unwrap();
            id
        }

        async fn body(&self, id: &DocumentId) -> Document {
            self.backend.get_document(id).await.unwrap().unwrap().body
        }
    }

    #[tokio::test]
    async fn test_record_migration_registers_identifiers() {
        let fx = Fixture::new();
        let id = fx
            .insert(
                DocumentKind::Record,
                json!({
                    "recid": 5,
                    "doi": "10.5281/zenodo.5",
                    "oai": {"oai": "oai:zenodo.org:5", "indicator": "user-a"}
                }),
                vec![PersistentIdentifier::new(PidKey::recid(5), PidStatus::Reserved)],
            )
            .await;

        let outcome = fx.pipeline.migrate_at(&id, now()).await.unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                recid: Recid::new(5),
                category: None
            }
        );

        let ids = fx.pipeline.identifiers();
        let recid = ids.lookup(&PidKey::recid(5)).await.unwrap().found().unwrap();
        assert_eq!(recid.status, PidStatus::Registered);
        let doi = ids
            .lookup(&PidKey::new(PidType::Doi, "10.5281/zenodo.5"))
            .await
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(doi.status, PidStatus::Registered);
        assert_eq!(doi.object_uuid, Some(id));
        assert!(ids
            .lookup(&PidKey::new(PidType::Oai, "oai:zenodo.org:5"))
            .await
            .unwrap()
            .is_found());
    }

    #[tokio::test]
    async fn test_external_doi_is_reserved() {
        let fx = Fixture::new();
        let id = fx
            .insert(
                DocumentKind::Record,
                json!({"recid": 6, "doi": "10.1000/external"}),
                vec![],
            )
            .await;
        fx.pipeline.migrate_at(&id, now()).await.unwrap();

        let doi = fx
            .pipeline
            .identifiers()
            .lookup(&PidKey::new(PidType::Doi, "10.1000/external"))
            .await
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(doi.status, PidStatus::Reserved);
    }

    #[tokio::test]
    async fn test_second_run_is_a_noop() {
        let fx = Fixture::new();
        let id = fx
            .insert(DocumentKind::Record, json!({"recid": 7, "title": "t"}), vec![])
            .await;

        fx.pipeline.migrate_at(&id, now()).await.unwrap();
        let first = fx.body(&id).await;
        let outcome = fx.pipeline.migrate_at(&id, now()).await.unwrap();

        assert!(outcome.is_noop());
        assert_eq!(fx.body(&id).await, first);
        assert!(first.contains_key(SCHEMA_KEY));
    }

    #[tokio::test]
    async fn test_published_deposit_syncs_record() {
        let fx = Fixture::new();
        let record = fx
            .insert(
                DocumentKind::Record,
                json!({"recid": 42, "title": "r"}),
                vec![PersistentIdentifier::new(PidKey::recid(42), PidStatus::Registered)],
            )
            .await;
        let deposit = fx
            .insert(
                DocumentKind::Deposit,
                json!({
                    "_p": {"id": 9, "user_id": 7},
                    "sips": [{"metadata": {"recid": 42}}]
                }),
                vec![PersistentIdentifier::new(PidKey::depid(9), PidStatus::Registered)],
            )
            .await;

        fx.pipeline.migrate_at(&deposit, now()).await.unwrap();

        let record_body = fx.body(&record).await;
        assert_eq!(record_body["_deposit"]["id"], json!("9"));
        assert_eq!(record_body["_deposit"]["status"], json!("published"));
        assert!(!record_body.contains_key(SCHEMA_KEY));
    }

    #[tokio::test]
    async fn test_deleted_record_retracts_deposit() {
        let fx = Fixture::new();
        fx.insert(
            DocumentKind::Record,
            json!({"recid": 43}),
            vec![PersistentIdentifier::new(PidKey::recid(43), PidStatus::Deleted)],
        )
        .await;
        let deposit = fx
            .insert(
                DocumentKind::Deposit,
                json!({"_p": {"id": 10}, "sips": [{"metadata": {"recid": 43}}]}),
                vec![PersistentIdentifier::new(PidKey::depid(10), PidStatus::Registered)],
            )
            .await;

        let outcome = fx.pipeline.migrate_at(&deposit, now()).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Retracted { recid: Recid::new(43) });
        assert!(fx.backend.get_document(&deposit).await.unwrap().is_none());
        assert_eq!(
            fx.pipeline.identifiers().lookup(&PidKey::depid(10)).await.unwrap(),
            Lookup::Deleted
        );
    }

    #[tokio::test]
    async fn test_deleted_record_is_skipped() {
        let fx = Fixture::new();
        let id = fx
            .insert(
                DocumentKind::Record,
                json!({"recid": 44, "title": "gone"}),
                vec![PersistentIdentifier::new(PidKey::recid(44), PidStatus::Deleted)],
            )
            .await;

        for _ in 0..2 {
            let outcome = fx.pipeline.migrate_at(&id, now()).await.unwrap();
            assert_eq!(outcome, MigrationOutcome::Skipped { recid: Recid::new(44) });
            assert!(outcome.is_noop());
        }
        assert!(!fx.body(&id).await.contains_key(SCHEMA_KEY));
        let recid = fx.backend.get_pid(&PidKey::recid(44)).await.unwrap().unwrap();
        assert_eq!(recid.status, PidStatus::Deleted);
        assert_eq!(recid.object_uuid, Some(id));
    }

    #[tokio::test]
    async fn test_draft_deposit_of_deleted_record_is_retracted() {
        let fx = Fixture::new();
        fx.insert(
            DocumentKind::Record,
            json!({"recid": 45}),
            vec![PersistentIdentifier::new(PidKey::recid(45), PidStatus::Deleted)],
        )
        .await;
        let deposit = fx
            .insert(
                DocumentKind::Deposit,
                json!({
                    "_p": {"id": 12, "modified": "2017-05-20T00:00:00"},
                    "sips": [{"metadata": {"recid": 45}}],
                    "drafts": {"simple": {"values": {"title": "edit"}, "completed": false}}
                }),
                vec![PersistentIdentifier::new(PidKey::depid(12), PidStatus::Registered)],
            )
            .await;

        let outcome = fx.pipeline.migrate_at(&deposit, now()).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::Retracted { recid: Recid::new(45) });
        assert!(fx.backend.get_document(&deposit).await.unwrap().is_none());
        assert_eq!(
            fx.pipeline.identifiers().lookup(&PidKey::depid(12)).await.unwrap(),
            Lookup::Deleted
        );
    }

    #[tokio::test]
    async fn test_multiple_recids_commit_nothing() {
        let fx = Fixture::new();
        let deposit = fx
            .insert(
                DocumentKind::Deposit,
                json!({
                    "_p": {"id": 11},
                    "sips": [{"metadata": {"recid": 1}}, {"metadata": {"recid": 2}}]
                }),
                vec![],
            )
            .await;
        let pids_before = fx.backend.pid_count();

        let err = fx.pipeline.migrate_at(&deposit, now()).await.unwrap_err();
        assert!(matches!(err, LineageError::AmbiguousLegacyState { .. }));
        assert!(!fx.body(&deposit).await.contains_key(SCHEMA_KEY));
        assert_eq!(fx.backend.pid_count(), pids_before);
    }

    #[tokio::test]
    async fn test_new_deposit_reserves_its_deposit_number() {
        let fx = Fixture::new();
        let deposit = fx
            .insert(DocumentKind::Deposit, json!({"_p": {"id": 77}, "sips": []}), vec![])
            .await;

        let outcome = fx.pipeline.migrate_at(&deposit, now()).await.unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                recid: Recid::new(77),
                category: Some(Category::New)
            }
        );
        let recid = fx
            .pipeline
            .identifiers()
            .lookup(&PidKey::recid(77))
            .await
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(recid.status, PidStatus::Reserved);
        assert_eq!(fx.body(&deposit).await["_deposit"]["status"], json!("draft"));
    }

    #[tokio::test]
    async fn test_record_without_recid_fails() {
        let fx = Fixture::new();
        let id = fx
            .insert(DocumentKind::Record, json!({"title": "orphan"}), vec![])
            .await;
        let err = fx.pipeline.migrate_at(&id, now()).await.unwrap_err();
        assert!(matches!(err, LineageError::LegacyInvariant(_)));
    }
}
