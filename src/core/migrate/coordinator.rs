//! Migration coordinator
//!
//! Enumerates candidate documents and runs one unit of work per candidate, either
//! inline (eager) or dispatched to the task runtime. A failed unit is logged with
//! the document's best-known identifier, recorded in the summary, and the run
//! moves on.

use super::summary::{MigrationError, MigrationSummary, UnitOutcome};
use crate::adapters::database::{DocumentFilter, MigrationBackend};
use crate::adapters::tasks::TaskRuntime;
use crate::config::LineageConfig;
use crate::core::identifiers::IdentifierManager;
use crate::core::pipeline::{MigrationOutcome, Pipeline};
use crate::core::versioning::{LinkOutcome, VersionLinker};
use crate::domain::{
    DocumentId, DocumentKind, LineageError, Lookup, MigrationErrorDetail, PidError, PidKey,
    PidStatus, PidType, Recid, Result, StoreError,
};
use crate::{log_batch_progress, log_migration_failure, log_migration_start};
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};

type UnitResult = std::result::Result<UnitOutcome, MigrationError>;

/// Which documents a run operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationTarget {
    /// Published records
    Records,
    /// Deposits
    Deposits,
}

impl MigrationTarget {
    /// Stored document kind of the target
    pub fn kind(&self) -> DocumentKind {
        match self {
            MigrationTarget::Records => DocumentKind::Record,
            MigrationTarget::Deposits => DocumentKind::Deposit,
        }
    }

    /// PID type identifying a document of the target
    pub fn primary_pid_type(&self) -> PidType {
        match self {
            MigrationTarget::Records => PidType::Recid,
            MigrationTarget::Deposits => PidType::Depid,
        }
    }
}

impl fmt::Display for MigrationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationTarget::Records => f.write_str("records"),
            MigrationTarget::Deposits => f.write_str("deposits"),
        }
    }
}

/// How waiting for dispatched tasks ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every dispatched task finished
    Idle,
    /// Idle polling hit its limit with tasks still pending
    TimedOut {
        /// Tasks still pending
        pending: usize,
    },
    /// A shutdown signal arrived while tasks were pending
    Interrupted {
        /// Tasks still pending
        pending: usize,
    },
}

/// Polls the runtime until no dispatched task is pending
///
/// Gives up after `max_polls` sleeps of `poll_interval`, so an in-flight count
/// that never drains cannot hang the caller.
pub async fn wait_for_idle(
    runtime: &dyn TaskRuntime,
    poll_interval: Duration,
    max_polls: u32,
    shutdown_signal: &watch::Receiver<bool>,
) -> Result<WaitOutcome> {
    let mut polls = 0u32;
    loop {
        let pending = runtime.pending().await?;
        if pending == 0 {
            return Ok(WaitOutcome::Idle);
        }
        if *shutdown_signal.borrow() {
            return Ok(WaitOutcome::Interrupted { pending });
        }
        if polls >= max_polls {
            return Ok(WaitOutcome::TimedOut { pending });
        }
        tracing::debug!(pending, poll = polls + 1, "Waiting for dispatched tasks");
        tokio::time::sleep(poll_interval).await;
        polls += 1;
    }
}

/// Runs migrations and versioning over the whole store
pub struct MigrationCoordinator {
    config: LineageConfig,
    backend: Arc<dyn MigrationBackend>,
    runtime: Arc<dyn TaskRuntime>,
    pipeline: Pipeline,
    linker: VersionLinker,
    shutdown_signal: watch::Receiver<bool>,
}

impl MigrationCoordinator {
    /// Create a new coordinator
    pub fn new(
        config: LineageConfig,
        backend: Arc<dyn MigrationBackend>,
        runtime: Arc<dyn TaskRuntime>,
        shutdown_signal: watch::Receiver<bool>,
    ) -> Self {
        let pipeline = Pipeline::new(Arc::clone(&backend), config.migration.clone());
        let linker = VersionLinker::new(Arc::clone(&backend), config.versioning.clone());
        Self {
            config,
            backend,
            runtime,
            pipeline,
            linker,
            shutdown_signal,
        }
    }

    /// Pipeline used for single documents
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Migrates every unmigrated document of the target, or the one named by `id`
    ///
    /// `id` is a storage UUID or the value of the target's primary PID (a record
    /// number for records, a deposit number for deposits).
    ///
    /// # Errors
    ///
    /// Only enumeration failures and an unresolvable `id` are errors; per-document
    /// failures are recorded in the summary.
    pub async fn migrate(
        &self,
        target: MigrationTarget,
        id: Option<&str>,
        eager: bool,
    ) -> Result<MigrationSummary> {
        let candidates = match id {
            Some(raw) => vec![self.resolve_document(target, raw).await?],
            None => {
                self.backend
                    .list_documents(&DocumentFilter::of_kind(target.kind()).migrated(false))
                    .await?
            }
        };

        let pipeline = self.pipeline.clone();
        let dry_run = self.config.application.dry_run;
        if dry_run {
            tracing::info!("Dry run mode: migrations are planned but not committed");
        }

        let work = move |id: DocumentId| {
            let pipeline = pipeline.clone();
            async move {
                match migrate_document(&pipeline, &id, dry_run).await {
                    Ok(outcome) => Ok(outcome),
                    Err(error) => {
                        Err(record_failure(pipeline.identifiers(), target, &id, &error, !dry_run).await)
                    }
                }
            }
        };

        self.run(target.to_string(), candidates, eager, work).await
    }

    /// Gives every unversioned migrated document of the target a concept
    ///
    /// Records without a concept become the single version of a new one. Draft
    /// deposits with a reserved record number get a concept with the draft as its
    /// only child.
    pub async fn version(
        &self,
        target: MigrationTarget,
        id: Option<&str>,
        eager: bool,
    ) -> Result<MigrationSummary> {
        let label = format!("{target} versions");
        if self.config.application.dry_run {
            tracing::info!("Dry run mode: versioning skipped");
            let summary = MigrationSummary::new(label);
            summary.log_summary();
            return Ok(summary);
        }

        match target {
            MigrationTarget::Records => {
                let recids = match id {
                    Some(raw) => vec![raw
                        .parse::<Recid>()
                        .map_err(LineageError::Validation)?],
                    None => self.unversioned_records().await?,
                };
                let linker = self.linker.clone();
                let work = move |recid: Recid| {
                    let linker = linker.clone();
                    async move {
                        match linker.version_published_record(recid).await {
                            Ok(Some(outcome)) if outcome.changed => Ok(UnitOutcome::Done),
                            Ok(_) => Ok(UnitOutcome::Skipped),
                            Err(error) => {
                                let detail = MigrationErrorDetail::new(error.to_string())
                                    .with_recid(recid.to_string());
                                log_migration_failure!(detail.best_identifier(), &error);
                                Err(MigrationError::from_error(&error, detail))
                            }
                        }
                    }
                };
                self.run(label, recids, eager, work).await
            }
            MigrationTarget::Deposits => {
                let deposits = match id {
                    Some(raw) => vec![self.resolve_document(target, raw).await?],
                    None => {
                        self.backend
                            .list_documents(
                                &DocumentFilter::of_kind(DocumentKind::Deposit).migrated(true),
                            )
                            .await?
                    }
                };
                let linker = self.linker.clone();
                let work = move |id: DocumentId| {
                    let linker = linker.clone();
                    async move {
                        match linker.version_new_deposit(&id).await {
                            Ok(Some(_)) => Ok(UnitOutcome::Done),
                            Ok(None) => Ok(UnitOutcome::Skipped),
                            Err(error) => {
                                let detail = MigrationErrorDetail::new(error.to_string())
                                    .with_document_id(id.to_string());
                                log_migration_failure!(detail.best_identifier(), &error);
                                Err(MigrationError::from_error(&error, detail))
                            }
                        }
                    }
                };
                self.run(label, deposits, eager, work).await
            }
        }
    }

    /// Links records as ordered versions of one concept
    pub async fn link(&self, recids: &[Recid]) -> Result<LinkOutcome> {
        if self.config.application.dry_run {
            return Err(LineageError::Validation(
                "linking is not available in dry run mode".to_string(),
            ));
        }
        self.linker.link_records(recids).await
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    async fn run<U, W, Fut>(
        &self,
        target: String,
        units: Vec<U>,
        eager: bool,
        work: W,
    ) -> Result<MigrationSummary>
    where
        U: fmt::Display + Send + 'static,
        W: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UnitResult> + Send + 'static,
    {
        let start = Instant::now();
        let total = units.len();
        log_migration_start!(target, total);

        let mut summary = MigrationSummary::new(target);
        summary.total = total;

        if eager {
            for (index, unit) in units.into_iter().enumerate() {
                if self.shutdown_requested() {
                    tracing::warn!("Shutdown requested, stopping before the next document");
                    summary.interrupted = true;
                    break;
                }
                summary.record(work(unit).await);
                log_batch_progress!(index + 1, total);
            }
            let summary = summary.with_duration(start.elapsed());
            summary.log_summary();
            return Ok(summary);
        }

        let shared = Arc::new(Mutex::new(summary));
        let work = Arc::new(work);
        for (index, unit) in units.into_iter().enumerate() {
            if self.shutdown_requested() {
                tracing::warn!("Shutdown requested, no further tasks dispatched");
                shared.lock().await.interrupted = true;
                break;
            }
            let key = unit.to_string();
            let task_work = Arc::clone(&work);
            let sink = Arc::clone(&shared);
            let task = Box::pin(async move {
                let result = task_work(unit).await;
                sink.lock().await.record(result);
            });
            if let Err(e) = self.runtime.submit(key.clone(), task).await {
                tracing::error!(task = %key, error = %e, "Task rejected by runtime");
                let detail = MigrationErrorDetail::new(e.to_string()).with_document_id(key);
                shared
                    .lock()
                    .await
                    .add_error(MigrationError::from_error(&e, detail));
            }
            log_batch_progress!(index + 1, total);
        }

        let outcome = wait_for_idle(
            self.runtime.as_ref(),
            Duration::from_millis(self.config.tasks.poll_interval_ms),
            self.config.tasks.max_idle_polls,
            &self.shutdown_signal,
        )
        .await?;

        let mut summary = shared.lock().await.clone();
        match outcome {
            WaitOutcome::Idle => {}
            WaitOutcome::TimedOut { pending } => {
                tracing::warn!(pending, "Gave up waiting for dispatched tasks");
                summary.interrupted = true;
            }
            WaitOutcome::Interrupted { pending } => {
                tracing::warn!(pending, "Shutdown requested while tasks were pending");
                summary.interrupted = true;
            }
        }

        let summary = summary.with_duration(start.elapsed());
        summary.log_summary();
        Ok(summary)
    }

    async fn resolve_document(&self, target: MigrationTarget, raw: &str) -> Result<DocumentId> {
        if let Ok(id) = raw.parse::<DocumentId>() {
            return Ok(id);
        }
        let key = PidKey::new(target.primary_pid_type(), raw.trim());
        match self.pipeline.identifiers().lookup(&key).await? {
            Lookup::Found(pid) => pid.object_uuid.ok_or_else(|| {
                LineageError::Validation(format!("{key} is not bound to a document"))
            }),
            Lookup::NotFound => Err(PidError::NotFound(key.to_string()).into()),
            Lookup::Deleted => Err(PidError::Deleted(key.to_string()).into()),
        }
    }

    /// Registered record numbers of migrated records that have no concept yet
    async fn unversioned_records(&self) -> Result<Vec<Recid>> {
        let migrated: HashSet<DocumentId> = self
            .backend
            .list_documents(&DocumentFilter::of_kind(DocumentKind::Record).migrated(true))
            .await?
            .into_iter()
            .collect();

        let mut recids = Vec::new();
        for pid in self
            .backend
            .list_pids(PidType::Recid, Some(PidStatus::Registered))
            .await?
        {
            let bound_to_migrated = pid.object_type == Some(DocumentKind::Record)
                && pid.object_uuid.map_or(false, |id| migrated.contains(&id));
            if !bound_to_migrated || self.backend.parent_of(&pid.key()).await?.is_some() {
                continue;
            }
            match pid.value.parse::<Recid>() {
                Ok(recid) => recids.push(recid),
                Err(e) => tracing::warn!(pid = %pid.key(), error = %e, "Skipping non-numeric recid"),
            }
        }
        Ok(recids)
    }
}

async fn migrate_document(pipeline: &Pipeline, id: &DocumentId, dry_run: bool) -> Result<UnitOutcome> {
    let outcome = if dry_run {
        let stored = pipeline
            .identifiers()
            .backend()
            .get_document(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        match pipeline.plan(&stored, Utc::now()).await? {
            Some(plan) => {
                tracing::info!(
                    document = %id,
                    recid = %plan.recid,
                    documents = plan.changes.documents.len(),
                    pid_ops = plan.changes.pid_ops.len(),
                    "Dry run: migration planned, nothing committed"
                );
                plan.outcome
            }
            None => MigrationOutcome::AlreadyMigrated,
        }
    } else {
        pipeline.migrate(id).await?
    };

    Ok(match outcome {
        MigrationOutcome::AlreadyMigrated => UnitOutcome::AlreadyMigrated,
        MigrationOutcome::Migrated { .. } => UnitOutcome::Done,
        MigrationOutcome::Retracted { .. } => UnitOutcome::Retracted,
        MigrationOutcome::Skipped { .. } => UnitOutcome::Skipped,
    })
}

/// Logs a failed migration and returns the document's primary PID to RESERVED
async fn record_failure(
    ids: &IdentifierManager,
    target: MigrationTarget,
    id: &DocumentId,
    error: &LineageError,
    reserve: bool,
) -> MigrationError {
    let mut detail = MigrationErrorDetail::new(error.to_string()).with_document_id(id.to_string());
    let pids = match ids.backend().pids_for_object(id).await {
        Ok(pids) => pids,
        Err(e) => {
            tracing::warn!(document = %id, error = %e, "Could not read identifiers of failed document");
            Vec::new()
        }
    };
    for pid in &pids {
        match pid.pid_type {
            PidType::Recid => detail = detail.with_recid(pid.value.clone()),
            PidType::Depid => detail = detail.with_depid(pid.value.clone()),
            _ => {}
        }
    }
    log_migration_failure!(detail.best_identifier(), error);

    if reserve {
        let primary = pids
            .iter()
            .find(|p| p.pid_type == target.primary_pid_type() && p.status == PidStatus::Registered);
        if let Some(pid) = primary {
            let key = pid.key();
            match ids.reserve(&key).await {
                Ok(()) => tracing::info!(pid = %key, "Identifier returned to reserved"),
                Err(e) => tracing::warn!(pid = %key, error = %e, "Could not reserve identifier"),
            }
        }
    }

    MigrationError::from_error(error, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::database::{ChangeSet, DocumentStore, IdentifierRegistry, PidOp, UnitOfWork};
    use crate::adapters::memory::MemoryBackend;
    use crate::adapters::tasks::LocalTaskRuntime;
    use crate::domain::{Document, PersistentIdentifier};
    use serde_json::{json, Value};

    struct Fixture {
        backend: Arc<MemoryBackend>,
        coordinator: MigrationCoordinator,
        shutdown: watch::Sender<bool>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut config = LineageConfig::default();
            config.tasks.poll_interval_ms = 10;
            let backend = Arc::new(MemoryBackend::new());
            let (tx, rx) = watch::channel(false);
            let coordinator = MigrationCoordinator::new(
                config,
                backend.clone(),
                Arc::new(LocalTaskRuntime::new(2)),
                rx,
            );
            Self {
                backend,
                coordinator,
                shutdown: tx,
            }
        }

        async fn insert_record(&self, recid: u64, body: Value) -> DocumentId {
            let id = DocumentId::generate();
            let body: Document = serde_json::from_value(body).unwrap();
            let mut changes = ChangeSet::new();
            changes.put_document(id, DocumentKind::Record, None, body);
            changes.push_pid(PidOp::Create(
                PersistentIdentifier::new(PidKey::recid(recid), PidStatus::Registered)
                    .bound_to(DocumentKind::Record, id),
            ));
            self.backend.commit(changes).await.unwrap();
            id
        }
    }

    #[tokio::test]
    async fn test_partial_failure_continues_and_reserves() {
        let fx = Fixture::new();
        fx.insert_record(1, json!({"recid": 1, "title": "One"})).await;
        let broken = fx
            .insert_record(2, json!({"recid": 2, "authors": [{"name": "A", "affiliation": ["x", "y"]}]}))
            .await;
        fx.insert_record(3, json!({"recid": 3, "title": "Three"})).await;

        let summary = fx
            .coordinator
            .migrate(MigrationTarget::Records, None, true)
            .await
            .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors[0].detail.best_identifier(), "recid:2");

        let pid = fx.backend.get_pid(&PidKey::recid(2)).await.unwrap().unwrap();
        assert_eq!(pid.status, PidStatus::Reserved);
        let stored = fx.backend.get_document(&broken).await.unwrap().unwrap();
        assert!(!stored.is_migrated());
    }

    #[tokio::test]
    async fn test_dispatched_run_matches_eager() {
        let fx = Fixture::new();
        for recid in 1..=5 {
            fx.insert_record(recid, json!({"recid": recid, "title": "T"})).await;
        }

        let summary = fx
            .coordinator
            .migrate(MigrationTarget::Records, None, false)
            .await
            .unwrap();

        assert_eq!(summary.successful, 5);
        assert!(summary.is_successful());
        let left = fx
            .backend
            .list_documents(&DocumentFilter::of_kind(DocumentKind::Record).migrated(false))
            .await
            .unwrap();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn test_single_document_by_recid() {
        let fx = Fixture::new();
        fx.insert_record(1, json!({"recid": 1})).await;
        fx.insert_record(2, json!({"recid": 2})).await;

        let summary = fx
            .coordinator
            .migrate(MigrationTarget::Records, Some("2"), true)
            .await
            .unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.successful, 1);

        let missing = fx
            .coordinator
            .migrate(MigrationTarget::Records, Some("99"), true)
            .await;
        assert!(matches!(missing, Err(LineageError::Pid(PidError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_version_records_after_migration() {
        let fx = Fixture::new();
        fx.insert_record(1, json!({"recid": 1})).await;
        fx.insert_record(2, json!({"recid": 2})).await;
        fx.coordinator
            .migrate(MigrationTarget::Records, None, true)
            .await
            .unwrap();

        let summary = fx
            .coordinator
            .version(MigrationTarget::Records, None, true)
            .await
            .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.successful, 2);

        let again = fx
            .coordinator
            .version(MigrationTarget::Records, None, true)
            .await
            .unwrap();
        assert_eq!(again.total, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_eager_run() {
        let fx = Fixture::new();
        fx.insert_record(1, json!({"recid": 1})).await;
        fx.shutdown.send(true).unwrap();

        let summary = fx
            .coordinator
            .migrate(MigrationTarget::Records, None, true)
            .await
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.processed(), 0);
    }

    struct StuckRuntime;

    #[async_trait::async_trait]
    impl TaskRuntime for StuckRuntime {
        async fn submit(&self, _key: String, _task: crate::adapters::tasks::TaskFuture) -> Result<()> {
            Ok(())
        }

        async fn pending(&self) -> Result<usize> {
            Ok(3)
        }
    }

    #[tokio::test]
    async fn test_wait_for_idle_is_bounded() {
        let (_tx, rx) = watch::channel(false);
        let outcome = wait_for_idle(&StuckRuntime, Duration::from_millis(1), 3, &rx)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut { pending: 3 });
    }

    #[tokio::test]
    async fn test_wait_for_idle_interrupted() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let outcome = wait_for_idle(&StuckRuntime, Duration::from_millis(1), 100, &rx)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Interrupted { pending: 3 });
    }
}
