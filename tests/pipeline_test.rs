//! End-to-end tests of the transformation pipeline over the in-memory backend

use chrono::{DateTime, TimeZone, Utc};
use lineage::adapters::database::{DocumentStore, IdentifierRegistry};
use lineage::adapters::memory::MemoryBackend;
use lineage::config::{MigrationConfig, StaleDraftPolicy};
use lineage::core::classifier::Category;
use lineage::core::migrate::{DumpLoader, LoadStatus};
use lineage::core::pipeline::{MigrationOutcome, Pipeline};
use lineage::domain::{
    Document, DocumentId, LineageError, PidKey, PidStatus, Recid, SCHEMA_KEY,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 6, 1, 12, 0, 0).unwrap()
}

struct Harness {
    backend: Arc<MemoryBackend>,
    loader: DumpLoader,
    pipeline: Pipeline,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(MigrationConfig::default())
    }

    fn with_config(config: MigrationConfig) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        Self {
            loader: DumpLoader::new(backend.clone()),
            pipeline: Pipeline::new(backend.clone(), config),
            backend,
        }
    }

    async fn load(&self, value: Value) -> DocumentId {
        match self.loader.load_document(value).await.unwrap() {
            LoadStatus::Loaded(id) => id,
            LoadStatus::Duplicate => panic!("document was reported as a duplicate"),
        }
    }

    async fn body(&self, id: &DocumentId) -> Document {
        self.backend.get_document(id).await.unwrap().unwrap().body
    }
}

#[tokio::test]
async fn test_record_and_published_deposit() {
    let h = Harness::new();
    let record = h
        .load(json!({"recid": 42, "title": "Paper", "keywords": ["a", null]}))
        .await;
    let deposit = h
        .load(json!({
            "_p": {"id": 9, "user_id": 7, "modified": "2016-03-01T08:00:00"},
            "sips": [{"metadata": {"recid": 42}}]
        }))
        .await;

    let outcome = h.pipeline.migrate_at(&record, now()).await.unwrap();
    assert_eq!(
        outcome,
        MigrationOutcome::Migrated {
            recid: Recid::new(42),
            category: None
        }
    );
    let outcome = h.pipeline.migrate_at(&deposit, now()).await.unwrap();
    assert_eq!(
        outcome,
        MigrationOutcome::Migrated {
            recid: Recid::new(42),
            category: Some(Category::Published)
        }
    );

    let deposit_body = h.body(&deposit).await;
    assert!(deposit_body.contains_key(SCHEMA_KEY));
    assert_eq!(deposit_body["recid"], json!(42));
    assert_eq!(deposit_body["_deposit"]["status"], json!("published"));
    assert_eq!(deposit_body["_deposit"]["pid"]["value"], json!("42"));

    let record_body = h.body(&record).await;
    assert!(record_body.contains_key(SCHEMA_KEY));
    assert_eq!(record_body["keywords"], json!(["a", ""]));
    assert_eq!(record_body["_deposit"], deposit_body["_deposit"]);
}

#[tokio::test]
async fn test_migration_is_idempotent() {
    let h = Harness::new();
    let record = h.load(json!({"recid": 1, "title": null})).await;

    h.pipeline.migrate_at(&record, now()).await.unwrap();
    let first = h.body(&record).await;
    assert_eq!(first["title"], json!(""));

    let later = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
    let outcome = h.pipeline.migrate_at(&record, later).await.unwrap();
    assert_eq!(outcome, MigrationOutcome::AlreadyMigrated);
    assert_eq!(h.body(&record).await, first);
}

#[tokio::test]
async fn test_ambiguous_deposit_writes_nothing() {
    let h = Harness::new();
    let deposit = h
        .load(json!({
            "_p": {"id": 11},
            "sips": [{"metadata": {"recid": 1}}, {"metadata": {"recid": 2}}]
        }))
        .await;
    let before = h.body(&deposit).await;
    let pids_before = h.backend.pid_count();

    let err = h.pipeline.migrate_at(&deposit, now()).await.unwrap_err();

    assert!(matches!(err, LineageError::AmbiguousLegacyState { .. }));
    assert_eq!(h.body(&deposit).await, before);
    assert_eq!(h.backend.pid_count(), pids_before);
}

#[tokio::test]
async fn test_deposits_without_recid_get_distinct_numbers() {
    let h = Harness::new();
    h.load(json!({"recid": 5})).await;
    let mut deposits = Vec::new();
    for depid in [5, 6, 7] {
        deposits.push(h.load(json!({"_p": {"id": depid}})).await);
    }

    let mut recids = HashSet::new();
    for deposit in &deposits {
        match h.pipeline.migrate_at(deposit, now()).await.unwrap() {
            MigrationOutcome::Migrated {
                recid,
                category: Some(Category::New),
            } => {
                let pid = h.backend.get_pid(&PidKey::recid(recid)).await.unwrap().unwrap();
                assert_eq!(pid.status, PidStatus::Reserved);
                recids.insert(recid);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(recids.len(), 3);
    assert!(!recids.contains(&Recid::new(5)));
}

#[tokio::test]
async fn test_stale_open_drafts_recovered_as_published() {
    let h = Harness::new();
    let deposit = h
        .load(json!({
            "_p": {"id": 20, "modified": "2015-01-01T00:00:00"},
            "drafts": {
                "simple": {"values": {"title": "a"}, "completed": false},
                "complex": {"values": {"title": "b"}, "completed": false}
            }
        }))
        .await;

    let outcome = h.pipeline.migrate_at(&deposit, now()).await.unwrap();
    assert!(matches!(
        outcome,
        MigrationOutcome::Migrated {
            category: Some(Category::Published),
            ..
        }
    ));
    assert_eq!(h.body(&deposit).await["_deposit"]["status"], json!("published"));
}

#[tokio::test]
async fn test_recent_open_drafts_need_manual_resolution() {
    let h = Harness::with_config(MigrationConfig {
        stale_drafts: StaleDraftPolicy {
            threshold_days: 365,
            treat_as_published: true,
        },
        ..MigrationConfig::default()
    });
    let deposit = h
        .load(json!({
            "_p": {"id": 21, "modified": "2017-05-01T00:00:00"},
            "drafts": {
                "simple": {"values": {}, "completed": false},
                "complex": {"values": {}, "completed": false}
            }
        }))
        .await;

    let err = h.pipeline.migrate_at(&deposit, now()).await.unwrap_err();
    assert!(matches!(err, LineageError::AmbiguousLegacyState { .. }));
}

#[tokio::test]
async fn test_deposit_of_deleted_record_is_retracted() {
    let h = Harness::new();
    h.load(json!({"recid": 43})).await;
    h.pipeline
        .identifiers()
        .soft_delete(&PidKey::recid(43))
        .await
        .unwrap();
    let deposit = h
        .load(json!({"_p": {"id": 30}, "sips": [{"metadata": {"recid": 43}}]}))
        .await;

    let outcome = h.pipeline.migrate_at(&deposit, now()).await.unwrap();

    assert_eq!(outcome, MigrationOutcome::Retracted { recid: Recid::new(43) });
    assert!(h.backend.get_document(&deposit).await.unwrap().is_none());
    let depid = h.backend.get_pid(&PidKey::depid("30")).await.unwrap().unwrap();
    assert_eq!(depid.status, PidStatus::Deleted);
}

#[tokio::test]
async fn test_draft_deposit_of_unpublished_record_keeps_reserved_number() {
    let h = Harness::new();
    let deposit = h
        .load(json!({
            "_p": {"id": 40, "user_id": 3, "modified": "2017-05-20T00:00:00"},
            "drafts": {"simple": {"values": {"title": "Working"}, "completed": false}}
        }))
        .await;

    let outcome = h.pipeline.migrate_at(&deposit, now()).await.unwrap();

    let MigrationOutcome::Migrated { recid, category } = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(category, Some(Category::Draft));
    let body = h.body(&deposit).await;
    assert_eq!(body["title"], json!("Working"));
    assert_eq!(body["_deposit"]["status"], json!("draft"));
    let pid = h.backend.get_pid(&PidKey::recid(recid)).await.unwrap().unwrap();
    assert_eq!(pid.status, PidStatus::Reserved);
}
