//! Initial load from legacy dumps
//!
//! A dump is either one JSON array of legacy documents or a stream of concatenated
//! JSON values. Parsing runs on a blocking thread and hands documents over a
//! bounded channel, so a dump is never held in memory whole.

use super::batch::LoadResult;
use super::coordinator::{MigrationCoordinator, MigrationTarget};
use super::summary::MigrationSummary;
use crate::adapters::database::{ChangeSet, MigrationBackend, PidOp};
use crate::adapters::memory::MemoryBackend;
use crate::adapters::tasks::LocalTaskRuntime;
use crate::config::LineageConfig;
use crate::domain::{
    DocumentId, DocumentKind, LegacyDocument, LineageError, PersistentIdentifier, PidKey,
    PidStatus, Result, StoreError,
};
use serde::de::{self, Deserializer as _, SeqAccess, Visitor};
use serde_json::Value;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Documents buffered between the parser and the loader
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

type DumpItem = Result<Value>;

/// Streams the documents of a dump file
///
/// Returns the receiving end of the document channel and the parser task, which
/// yields the number of documents parsed. A parse error is sent down the channel
/// and ends the stream.
pub fn stream_documents(
    path: PathBuf,
    capacity: usize,
) -> (mpsc::Receiver<DumpItem>, JoinHandle<Result<usize>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::task::spawn_blocking(move || {
        let result = parse_dump(&path, &tx);
        if let Err(e) = &result {
            let _ = tx.blocking_send(Err(LineageError::Serialization(format!(
                "{}: {e}",
                path.display()
            ))));
        }
        result
    });
    (rx, handle)
}

fn parse_dump(path: &Path, tx: &mpsc::Sender<DumpItem>) -> Result<usize> {
    let mut reader = BufReader::new(File::open(path)?);
    if first_significant_byte(&mut reader)? == Some(b'[') {
        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        let count = (&mut deserializer).deserialize_seq(DumpVisitor { tx })?;
        deserializer.end()?;
        return Ok(count);
    }

    let mut count = 0;
    for value in serde_json::Deserializer::from_reader(reader).into_iter::<Value>() {
        if tx.blocking_send(Ok(value?)).is_err() {
            break;
        }
        count += 1;
    }
    Ok(count)
}

/// Skips leading whitespace and peeks at the first byte without consuming it
fn first_significant_byte(reader: &mut impl BufRead) -> Result<Option<u8>> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(None);
        }
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(pos) => {
                let byte = buf[pos];
                reader.consume(pos);
                return Ok(Some(byte));
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

/// Forwards the elements of a top-level array one at a time
struct DumpVisitor<'a> {
    tx: &'a mpsc::Sender<DumpItem>,
}

impl<'de, 'a> Visitor<'de> for DumpVisitor<'a> {
    type Value = usize;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of legacy documents")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<usize, A::Error> {
        let mut count = 0;
        while let Some(value) = seq.next_element::<Value>()? {
            if self.tx.blocking_send(Ok(value)).is_err() {
                return Err(de::Error::custom("document receiver closed"));
            }
            count += 1;
        }
        Ok(count)
    }
}

/// What happened to one loaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Stored under a fresh identifier
    Loaded(DocumentId),
    /// Its primary identifier already exists
    Duplicate,
}

/// Stores legacy documents from dumps
pub struct DumpLoader {
    backend: Arc<dyn MigrationBackend>,
    channel_capacity: usize,
}

impl DumpLoader {
    /// Create a loader over a backend
    pub fn new(backend: Arc<dyn MigrationBackend>) -> Self {
        Self {
            backend,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Loads every document of a dump file
    ///
    /// A document that fails to load is recorded and skipped; the rest of the dump
    /// still loads.
    ///
    /// # Errors
    ///
    /// Only a failure of the parser task itself is an error.
    pub async fn load_file(&self, path: &Path) -> Result<LoadResult> {
        tracing::info!(path = %path.display(), "Loading dump");
        let (mut rx, parser) = stream_documents(path.to_path_buf(), self.channel_capacity);

        let mut result = LoadResult::new();
        while let Some(item) = rx.recv().await {
            let loaded = match item {
                Ok(value) => self.load_document(value).await,
                Err(e) => Err(e),
            };
            match loaded {
                Ok(LoadStatus::Loaded(id)) => {
                    tracing::debug!(document = %id, "Document loaded");
                    result.add_success();
                }
                Ok(LoadStatus::Duplicate) => result.add_duplicate(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Document not loaded");
                    result.add_failure(e.to_string());
                }
            }
        }

        match parser.await {
            Ok(Ok(count)) => tracing::debug!(parsed = count, "Dump parsed"),
            Ok(Err(_)) => {}
            Err(e) => return Err(LineageError::Task(format!("dump parser failed: {e}"))),
        }

        tracing::info!(
            path = %path.display(),
            loaded = result.loaded,
            duplicates = result.duplicates_skipped,
            failed = result.failed,
            "Dump loaded"
        );
        Ok(result)
    }

    /// Stores one legacy document with a fresh identifier
    ///
    /// Records get a registered `recid` PID, deposits a registered `depid` PID,
    /// both bound to the new document.
    pub async fn load_document(&self, value: Value) -> Result<LoadStatus> {
        let legacy = LegacyDocument::from_value(value.clone())?;
        let kind = legacy.kind();
        let key = match kind {
            DocumentKind::Record => legacy.recid.map(PidKey::recid).ok_or_else(|| {
                LineageError::LegacyInvariant("record without recid".to_string())
            })?,
            DocumentKind::Deposit => legacy.deposit_id().map(PidKey::depid).ok_or_else(|| {
                LineageError::LegacyInvariant(format!("deposit without deposit number ({})", legacy.label()))
            })?,
        };

        if self.backend.get_pid(&key).await?.is_some() {
            tracing::debug!(pid = %key, "Identifier exists, skipping document");
            return Ok(LoadStatus::Duplicate);
        }

        let Value::Object(body) = value else {
            return Err(LineageError::LegacyInvariant(
                "legacy document must be a JSON object".to_string(),
            ));
        };
        let id = DocumentId::generate();
        let mut changes = ChangeSet::new();
        changes.put_document(id, kind, None, body);
        changes.push_pid(PidOp::Create(
            PersistentIdentifier::new(key, PidStatus::Registered).bound_to(kind, id),
        ));

        match self.backend.commit(changes).await {
            Ok(()) => Ok(LoadStatus::Loaded(id)),
            Err(LineageError::Store(StoreError::Conflict(_))) => Ok(LoadStatus::Duplicate),
            Err(e) => Err(e),
        }
    }
}

/// Result of checking a dump
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// Loading into the scratch backend
    pub load: LoadResult,
    /// Record migration
    pub records: MigrationSummary,
    /// Deposit migration
    pub deposits: MigrationSummary,
}

impl CheckReport {
    /// Whether every document loaded and migrated
    pub fn is_clean(&self) -> bool {
        self.load.failed == 0 && self.records.is_successful() && self.deposits.is_successful()
    }
}

/// Migrates a dump against a scratch in-memory backend
///
/// Nothing is persisted. Records migrate before deposits so that published
/// deposits find their records.
pub async fn check_dump(path: &Path, config: &LineageConfig) -> Result<CheckReport> {
    let backend = Arc::new(MemoryBackend::new());
    let load = DumpLoader::new(backend.clone()).load_file(path).await?;

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut config = config.clone();
    config.application.dry_run = false;
    let coordinator = MigrationCoordinator::new(
        config.clone(),
        backend,
        Arc::new(LocalTaskRuntime::new(config.tasks.concurrency)),
        shutdown_rx,
    );

    let records = coordinator.migrate(MigrationTarget::Records, None, true).await?;
    let deposits = coordinator.migrate(MigrationTarget::Deposits, None, true).await?;
    Ok(CheckReport {
        load,
        records,
        deposits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::database::{DocumentFilter, DocumentStore, IdentifierRegistry};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn dump(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_first_significant_byte() {
        let mut reader = BufReader::new("  \n\t[1]".as_bytes());
        assert_eq!(first_significant_byte(&mut reader).unwrap(), Some(b'['));

        let mut empty = BufReader::new("   ".as_bytes());
        assert_eq!(first_significant_byte(&mut empty).unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_array_dump() {
        let file = dump(r#"[{"recid": 1, "title": "A"}, {"recid": 2}, {"_p": {"id": 9}, "recid": 2}]"#);
        let backend = Arc::new(MemoryBackend::new());
        let result = DumpLoader::new(backend.clone()).load_file(file.path()).await.unwrap();

        assert_eq!(result.loaded, 3);
        assert_eq!(result.failed, 0);

        let deposits = backend
            .list_documents(&DocumentFilter::of_kind(DocumentKind::Deposit))
            .await
            .unwrap();
        assert_eq!(deposits.len(), 1);
        let depid = backend.get_pid(&PidKey::depid(9)).await.unwrap().unwrap();
        assert_eq!(depid.status, PidStatus::Registered);
        assert_eq!(depid.object_uuid, Some(deposits[0]));
    }

    #[tokio::test]
    async fn test_load_concatenated_dump_skips_duplicates() {
        let file = dump("{\"recid\": 1}\n{\"recid\": 1}\n{\"title\": \"no id\"}\n");
        let backend = Arc::new(MemoryBackend::new());
        let result = DumpLoader::new(backend.clone()).load_file(file.path()).await.unwrap();

        assert_eq!(result.loaded, 1);
        assert_eq!(result.duplicates_skipped, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(backend.document_count(), 1);
    }

    #[tokio::test]
    async fn test_truncated_dump_reports_parse_error() {
        let file = dump(r#"[{"recid": 1}, {"recid": "#);
        let backend = Arc::new(MemoryBackend::new());
        let result = DumpLoader::new(backend).load_file(file.path()).await.unwrap();

        assert_eq!(result.loaded, 1);
        assert_eq!(result.failed, 1);
    }

    #[tokio::test]
    async fn test_check_dump_reports_failures() {
        let file = dump(
            r#"[
                {"recid": 1, "title": "Fine"},
                {"recid": 2, "authors": [{"name": "A", "affiliation": ["x", "y"]}]}
            ]"#,
        );
        let report = check_dump(file.path(), &LineageConfig::default()).await.unwrap();

        assert_eq!(report.load.loaded, 2);
        assert_eq!(report.records.successful, 1);
        assert_eq!(report.records.failed, 1);
        assert_eq!(report.deposits.total, 0);
        assert!(!report.is_clean());
    }
}
