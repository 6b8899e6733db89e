//! Loading a dump and running the batch migration and versioning end to end

use lineage::adapters::database::{DocumentFilter, DocumentStore, IdentifierRegistry};
use lineage::adapters::memory::MemoryBackend;
use lineage::adapters::tasks::LocalTaskRuntime;
use lineage::config::LineageConfig;
use lineage::core::identifiers::IdentifierManager;
use lineage::core::migrate::{
    check_dump, DumpLoader, MigrationCoordinator, MigrationErrorType, MigrationTarget,
};
use lineage::domain::{DocumentKind, PidKey, PidStatus};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::watch;

fn test_config() -> LineageConfig {
    let mut config = LineageConfig::default();
    config.tasks.poll_interval_ms = 10;
    config.tasks.max_idle_polls = 500;
    config
}

fn write_dump(documents: &[Value]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(serde_json::to_string(documents).unwrap().as_bytes())
        .unwrap();
    file.flush().unwrap();
    file
}

fn coordinator(
    backend: &Arc<MemoryBackend>,
    config: LineageConfig,
) -> (MigrationCoordinator, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    let coordinator = MigrationCoordinator::new(
        config,
        backend.clone(),
        Arc::new(LocalTaskRuntime::new(4)),
        rx,
    );
    (coordinator, tx)
}

fn legacy_dump() -> Vec<Value> {
    vec![
        json!({"recid": 1, "title": "First", "communities": ["physics"]}),
        json!({"recid": 2, "authors": [{"name": "Doe", "affiliation": ["CERN", "ETH"]}]}),
        json!({"recid": 1, "title": "First again"}),
        json!({"_p": {"id": 9, "user_id": 7}, "sips": [{"metadata": {"recid": 1}}]}),
        json!({
            "_p": {"id": 10, "user_id": 7, "modified": "2017-05-20T00:00:00"},
            "drafts": {"simple": {"values": {"title": "Next"}, "completed": false}}
        }),
        json!({"sips": []}),
    ]
}

#[tokio::test]
async fn test_full_run() {
    let backend = Arc::new(MemoryBackend::new());
    let dump = write_dump(&legacy_dump());

    let load = DumpLoader::new(backend.clone())
        .load_file(dump.path())
        .await
        .unwrap();
    assert_eq!(load.loaded, 4);
    assert_eq!(load.duplicates_skipped, 1);
    assert_eq!(load.failed, 1);
    assert_eq!(backend.document_count(), 4);

    let (coordinator, _shutdown) = coordinator(&backend, test_config());

    let records = coordinator
        .migrate(MigrationTarget::Records, None, false)
        .await
        .unwrap();
    assert_eq!(records.total, 2);
    assert_eq!(records.successful, 1);
    assert_eq!(records.failed, 1);
    assert_eq!(records.errors[0].error_type, MigrationErrorType::LegacyInvariant);
    assert_eq!(records.errors[0].detail.best_identifier(), "recid:2");
    let failed = backend.get_pid(&PidKey::recid(2)).await.unwrap().unwrap();
    assert_eq!(failed.status, PidStatus::Reserved);

    let deposits = coordinator
        .migrate(MigrationTarget::Deposits, None, true)
        .await
        .unwrap();
    assert_eq!(deposits.successful, 2);
    assert!(deposits.is_successful());

    let record_versions = coordinator
        .version(MigrationTarget::Records, None, true)
        .await
        .unwrap();
    assert_eq!(record_versions.successful, 1);
    let concept = backend.parent_of(&PidKey::recid(1)).await.unwrap().unwrap();
    let concept_pid = backend.get_pid(&concept).await.unwrap().unwrap();
    assert_eq!(concept_pid.redirect, Some(PidKey::recid(1)));

    let deposit_versions = coordinator
        .version(MigrationTarget::Deposits, None, true)
        .await
        .unwrap();
    assert_eq!(deposit_versions.successful, 1);
    assert_eq!(deposit_versions.skipped, 1);
    assert!(backend
        .parent_of(&PidKey::recid(10))
        .await
        .unwrap()
        .is_some());

    let published = backend
        .get_pid(&PidKey::depid(9))
        .await
        .unwrap()
        .and_then(|pid| pid.object_uuid)
        .unwrap();
    let body = backend.get_document(&published).await.unwrap().unwrap().body;
    assert_eq!(body["conceptrecid"], json!(concept.value));
    assert_eq!(body["communities"], json!(["physics"]));
}

#[tokio::test]
async fn test_shutdown_before_run_leaves_work_for_next_run() {
    let backend = Arc::new(MemoryBackend::new());
    let dump = write_dump(&[
        json!({"recid": 1}),
        json!({"recid": 2}),
        json!({"recid": 3}),
    ]);
    DumpLoader::new(backend.clone())
        .load_file(dump.path())
        .await
        .unwrap();

    let (first, shutdown) = coordinator(&backend, test_config());
    shutdown.send(true).unwrap();
    let summary = first
        .migrate(MigrationTarget::Records, None, false)
        .await
        .unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.processed(), 0);

    let (second, _shutdown) = coordinator(&backend, test_config());
    let summary = second
        .migrate(MigrationTarget::Records, None, true)
        .await
        .unwrap();
    assert_eq!(summary.successful, 3);
    let left = backend
        .list_documents(&DocumentFilter::of_kind(DocumentKind::Record).migrated(false))
        .await
        .unwrap();
    assert!(left.is_empty());
}

#[tokio::test]
async fn test_deleted_record_counts_as_skipped_on_every_run() {
    let backend = Arc::new(MemoryBackend::new());
    let dump = write_dump(&[json!({"recid": 1}), json!({"recid": 2})]);
    DumpLoader::new(backend.clone())
        .load_file(dump.path())
        .await
        .unwrap();
    IdentifierManager::new(backend.clone())
        .soft_delete(&PidKey::recid(2))
        .await
        .unwrap();

    let (coordinator, _shutdown) = coordinator(&backend, test_config());
    let first = coordinator
        .migrate(MigrationTarget::Records, None, true)
        .await
        .unwrap();
    assert_eq!(first.successful, 1);
    assert_eq!(first.skipped, 1);
    assert_eq!(first.failed, 0);

    let second = coordinator
        .migrate(MigrationTarget::Records, None, true)
        .await
        .unwrap();
    assert_eq!(second.skipped, 1);
    assert_eq!(second.failed, 0);
    assert!(second.is_successful());
}

#[tokio::test]
async fn test_dry_run_commits_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let dump = write_dump(&[
        json!({"recid": 1}),
        json!({"recid": 2, "authors": [{"name": "Doe", "affiliation": ["CERN", "ETH"]}]}),
    ]);
    DumpLoader::new(backend.clone())
        .load_file(dump.path())
        .await
        .unwrap();

    let mut config = test_config();
    config.application.dry_run = true;
    let (coordinator, _shutdown) = coordinator(&backend, config);
    let summary = coordinator
        .migrate(MigrationTarget::Records, None, true)
        .await
        .unwrap();

    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 1);
    let left = backend
        .list_documents(&DocumentFilter::of_kind(DocumentKind::Record).migrated(false))
        .await
        .unwrap();
    assert_eq!(left.len(), 2);
    let untouched = backend.get_pid(&PidKey::recid(2)).await.unwrap().unwrap();
    assert_eq!(untouched.status, PidStatus::Registered);
}

#[tokio::test]
async fn test_check_dump_leaves_store_alone() {
    let dump = write_dump(&legacy_dump());

    let report = check_dump(dump.path(), &test_config()).await.unwrap();

    assert!(!report.is_clean());
    assert_eq!(report.load.failed, 1);
    assert_eq!(report.records.failed, 1);
    assert_eq!(report.deposits.successful, 2);
}
