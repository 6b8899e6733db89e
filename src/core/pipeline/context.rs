//! Migration context and pipeline states

use crate::config::MigrationConfig;
use crate::core::classifier::Category;
use crate::domain::{DocumentId, DocumentKind, LegacyDocument, Recid};
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

/// Read-only inputs shared by every step of one document's migration
///
/// Built once after identifier resolution and never mutated; steps thread the
/// target document through a fold and read everything else from here.
#[derive(Debug, Clone, Copy)]
pub struct MigrationContext<'a> {
    /// Migration settings
    pub config: &'a MigrationConfig,
    /// Stored document being migrated
    pub document_id: DocumentId,
    /// Record or deposit
    pub kind: DocumentKind,
    /// Parsed legacy input
    pub legacy: &'a LegacyDocument,
    /// Deposit category; `None` for records
    pub category: Option<Category>,
    /// Resolved record number
    pub recid: Recid,
    /// Migration timestamp
    pub now: DateTime<Utc>,
}

impl MigrationContext<'_> {
    /// Calendar date of the migration
    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }
}

/// State of one document's migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Not picked up yet
    Unstarted,
    /// Identifiers resolved, transforms running
    InProgress,
    /// Target document committed, or was already migrated
    Migrated,
    /// Aborted; nothing was committed
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Unstarted => "unstarted",
            PipelineState::InProgress => "in_progress",
            PipelineState::Migrated => "migrated",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful migration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The document carried the schema marker; nothing was written
    AlreadyMigrated,
    /// The target document was committed
    Migrated {
        /// Record number of the document
        recid: Recid,
        /// Deposit category; `None` for records
        category: Option<Category>,
    },
    /// The deposit's record was retracted, so the deposit was deleted
    Retracted {
        /// Record number of the retracted record
        recid: Recid,
    },
    /// The record's number was deleted; nothing was written
    Skipped {
        /// Deleted record number
        recid: Recid,
    },
}

impl MigrationOutcome {
    /// Whether anything was written
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            MigrationOutcome::AlreadyMigrated | MigrationOutcome::Skipped { .. }
        )
    }
}
