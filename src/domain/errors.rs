//! Domain error types
//!
//! This module defines the error hierarchy for Lineage. Errors are domain-specific
//! and never expose third-party driver types.

use thiserror::Error;

/// Main Lineage error type
///
/// This is the primary error type used throughout the application. Variants follow
/// the failure taxonomy of the migration: ambiguous legacy data, broken legacy
/// invariants, identifier conflicts, identifier lookups and transient store failures.
#[derive(Debug, Error)]
pub enum LineageError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Legacy data that cannot be migrated without manual resolution
    #[error("Ambiguous legacy state for {document}: {reason}")]
    AmbiguousLegacyState {
        /// Best-known identifier of the offending document
        document: String,
        /// What made the document ambiguous
        reason: String,
    },

    /// A field transform found a legacy shape it cannot convert
    #[error("Legacy invariant violated: {0}")]
    LegacyInvariant(String),

    /// Duplicate mint or cross-group membership while linking versions
    #[error("Identifier conflict: {0}")]
    IdentifierConflict(String),

    /// Identifier registry errors
    #[error("Identifier error: {0}")]
    Pid(#[from] PidError),

    /// Document store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Database-related errors (driver, pool)
    #[error("Database error: {0}")]
    Database(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Task runtime errors
    #[error("Task error: {0}")]
    Task(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl LineageError {
    /// Builds an [`LineageError::AmbiguousLegacyState`] error
    pub fn ambiguous(document: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AmbiguousLegacyState {
            document: document.into(),
            reason: reason.into(),
        }
    }

    /// Whether a redelivery of the same unit of work is expected to succeed
    ///
    /// Commit conflicts and exhausted connection pools are transient; everything
    /// else is a property of the data and will fail again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LineageError::Store(StoreError::Conflict(_))
                | LineageError::Store(StoreError::Unavailable(_))
        )
    }

    /// Short machine-friendly name of the error kind, used in summaries
    pub fn kind(&self) -> &'static str {
        match self {
            LineageError::Configuration(_) => "configuration",
            LineageError::AmbiguousLegacyState { .. } => "ambiguous_legacy_state",
            LineageError::LegacyInvariant(_) => "legacy_invariant",
            LineageError::IdentifierConflict(_) => "identifier_conflict",
            LineageError::Pid(PidError::NotFound(_)) => "pid_not_found",
            LineageError::Pid(PidError::Deleted(_)) => "pid_deleted",
            LineageError::Pid(_) => "pid",
            LineageError::Store(_) => "store",
            LineageError::Database(_) => "database",
            LineageError::Validation(_) => "validation",
            LineageError::Task(_) => "task",
            LineageError::Serialization(_) => "serialization",
            LineageError::Io(_) => "io",
            LineageError::Other(_) => "other",
        }
    }
}

/// Identifier registry errors
///
/// `NotFound` and `Deleted` are distinct so that callers can tell a retracted
/// object from one that never existed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PidError {
    /// No identifier with this type and value exists
    #[error("PID not found: {0}")]
    NotFound(String),

    /// The identifier existed and has been retracted
    #[error("PID deleted: {0}")]
    Deleted(String),

    /// An identifier with this type and value already exists
    #[error("Duplicate PID: {0}")]
    Duplicate(String),

    /// The requested status change is not allowed
    #[error("Invalid status transition for {pid}: {from} -> {to}")]
    InvalidTransition {
        /// Identifier being changed
        pid: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// A redirect chain loops or is too long
    #[error("Broken redirect chain at {0}")]
    BrokenRedirect(String),
}

/// Document store errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Document does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed or a concurrent writer won a unique key
    #[error("Commit conflict: {0}")]
    Conflict(String),

    /// Backend temporarily unavailable (pool exhausted, connection dropped)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Per-document migration failure details
///
/// Provides the best-known identifiers of a failed document for operator logs.
#[derive(Debug, Clone)]
pub struct MigrationErrorDetail {
    /// Storage identifier of the document
    pub document_id: Option<String>,

    /// Record identifier, when known
    pub recid: Option<String>,

    /// Deposit identifier, when known
    pub depid: Option<String>,

    /// Error message
    pub message: String,

    /// Whether redelivery is expected to succeed
    pub retryable: bool,
}

impl MigrationErrorDetail {
    /// Creates a new migration error detail
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            document_id: None,
            recid: None,
            depid: None,
            message: message.into(),
            retryable: false,
        }
    }

    /// Sets the document identifier
    pub fn with_document_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    /// Sets the record identifier
    pub fn with_recid(mut self, recid: impl Into<String>) -> Self {
        self.recid = Some(recid.into());
        self
    }

    /// Sets the deposit identifier
    pub fn with_depid(mut self, depid: impl Into<String>) -> Self {
        self.depid = Some(depid.into());
        self
    }

    /// Marks the error as retryable
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// The most specific identifier available, for log lines
    pub fn best_identifier(&self) -> String {
        if let Some(recid) = &self.recid {
            format!("recid:{recid}")
        } else if let Some(depid) = &self.depid {
            format!("depid:{depid}")
        } else if let Some(id) = &self.document_id {
            id.clone()
        } else {
            "unknown".to_string()
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for LineageError {
    fn from(err: std::io::Error) -> Self {
        LineageError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for LineageError {
    fn from(err: serde_json::Error) -> Self {
        LineageError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for LineageError {
    fn from(err: toml::de::Error) -> Self {
        LineageError::Configuration(format!("TOML parse error: {err}"))
    }
}
