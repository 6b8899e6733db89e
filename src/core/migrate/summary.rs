//! Migration summary and reporting
//!
//! Tracks per-document outcomes of a batch run. One failed document never aborts
//! the run; it is recorded here with its best-known identifier.

use crate::domain::{LineageError, MigrationErrorDetail, PidError};
use std::fmt;
use std::time::Duration;

/// Successful result of one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// A document was migrated or a concept written
    Done,
    /// The document was already migrated
    AlreadyMigrated,
    /// The deposit's record was deleted, so the deposit was retracted
    Retracted,
    /// Nothing applied to this unit
    Skipped,
}

/// Summary of a batch run
#[derive(Debug, Clone)]
pub struct MigrationSummary {
    /// What ran, for example `records` or `deposit versions`
    pub target: String,

    /// Number of units enumerated
    pub total: usize,

    /// Number of units that wrote something
    pub successful: usize,

    /// Number of documents that were already migrated
    pub already_migrated: usize,

    /// Number of deposits retracted because their record was deleted
    pub retracted: usize,

    /// Number of units with nothing to do
    pub skipped: usize,

    /// Number of failed units
    pub failed: usize,

    /// Whether the run stopped early on a shutdown signal or an idle timeout
    pub interrupted: bool,

    /// Duration of the run
    pub duration: Duration,

    /// Errors encountered during the run
    pub errors: Vec<MigrationError>,
}

impl MigrationSummary {
    /// Create a new empty summary
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            total: 0,
            successful: 0,
            already_migrated: 0,
            retracted: 0,
            skipped: 0,
            failed: 0,
            interrupted: false,
            duration: Duration::from_secs(0),
            errors: Vec::new(),
        }
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Record the result of one unit
    pub fn record(&mut self, result: Result<UnitOutcome, MigrationError>) {
        match result {
            Ok(UnitOutcome::Done) => self.successful += 1,
            Ok(UnitOutcome::AlreadyMigrated) => self.already_migrated += 1,
            Ok(UnitOutcome::Retracted) => self.retracted += 1,
            Ok(UnitOutcome::Skipped) => self.skipped += 1,
            Err(error) => self.add_error(error),
        }
    }

    /// Add a failure
    pub fn add_error(&mut self, error: MigrationError) {
        self.failed += 1;
        self.errors.push(error);
    }

    /// Number of units that finished, successfully or not
    pub fn processed(&self) -> usize {
        self.successful + self.already_migrated + self.retracted + self.skipped + self.failed
    }

    /// Check if the run was successful (no failures, not interrupted)
    pub fn is_successful(&self) -> bool {
        self.failed == 0 && !self.interrupted
    }

    /// Get success rate as a percentage of processed units
    pub fn success_rate(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            return 100.0;
        }
        ((processed - self.failed) as f64 / processed as f64) * 100.0
    }

    /// Log the summary
    pub fn log_summary(&self) {
        tracing::info!(
            target_kind = %self.target,
            total = self.total,
            successful = self.successful,
            already_migrated = self.already_migrated,
            retracted = self.retracted,
            skipped = self.skipped,
            failed = self.failed,
            interrupted = self.interrupted,
            duration_secs = self.duration.as_secs(),
            success_rate = format!("{:.2}%", self.success_rate()),
            "Migration run completed"
        );

        if !self.errors.is_empty() {
            tracing::warn!(
                error_count = self.errors.len(),
                "Migration run completed with errors"
            );
            for error in &self.errors {
                tracing::warn!(
                    error_type = %error.error_type,
                    document = %error.detail.best_identifier(),
                    retryable = error.detail.retryable,
                    message = %error.detail.message,
                    "Migration error"
                );
            }
        }
    }
}

/// Type of migration error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationErrorType {
    /// Legacy data needs manual resolution
    AmbiguousLegacyState,
    /// A field transform found a broken legacy shape
    LegacyInvariant,
    /// Duplicate identifier or cross-group membership
    IdentifierConflict,
    /// Identifier missing or retracted
    Identifier,
    /// Store or registry failure expected to pass on redelivery
    Transient,
    /// Store or registry failure
    Storage,
    /// Task runtime refused or lost the unit
    Task,
    /// Anything else
    Unknown,
}

impl From<&LineageError> for MigrationErrorType {
    fn from(error: &LineageError) -> Self {
        if error.is_transient() {
            return MigrationErrorType::Transient;
        }
        match error {
            LineageError::AmbiguousLegacyState { .. } => MigrationErrorType::AmbiguousLegacyState,
            LineageError::LegacyInvariant(_) => MigrationErrorType::LegacyInvariant,
            LineageError::IdentifierConflict(_) | LineageError::Pid(PidError::Duplicate(_)) => {
                MigrationErrorType::IdentifierConflict
            }
            LineageError::Pid(_) => MigrationErrorType::Identifier,
            LineageError::Store(_) | LineageError::Database(_) => MigrationErrorType::Storage,
            LineageError::Task(_) => MigrationErrorType::Task,
            _ => MigrationErrorType::Unknown,
        }
    }
}

impl fmt::Display for MigrationErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationErrorType::AmbiguousLegacyState => "ambiguous_legacy_state",
            MigrationErrorType::LegacyInvariant => "legacy_invariant",
            MigrationErrorType::IdentifierConflict => "identifier_conflict",
            MigrationErrorType::Identifier => "identifier",
            MigrationErrorType::Transient => "transient",
            MigrationErrorType::Storage => "storage",
            MigrationErrorType::Task => "task",
            MigrationErrorType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A failed unit of work
#[derive(Debug, Clone)]
pub struct MigrationError {
    /// Type of error
    pub error_type: MigrationErrorType,

    /// Message and best-known identifiers of the document
    pub detail: MigrationErrorDetail,
}

impl MigrationError {
    /// Create a new migration error
    pub fn new(error_type: MigrationErrorType, detail: MigrationErrorDetail) -> Self {
        Self { error_type, detail }
    }

    /// Classify a pipeline error
    pub fn from_error(error: &LineageError, detail: MigrationErrorDetail) -> Self {
        let detail = if error.is_transient() {
            detail.retryable()
        } else {
            detail
        };
        Self::new(MigrationErrorType::from(error), detail)
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.detail.best_identifier(),
            self.error_type,
            self.detail.message
        )
    }
}
