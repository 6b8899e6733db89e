//! Logging and observability
//!
//! Structured logging through `tracing`:
//! - Console output for operators
//! - Optional JSON file logging with rotation
//! - Macros for the recurring migration log lines
//!
//! # Example
//!
//! ```no_run
//! use lineage::logging::init_logging;
//! use lineage::config::LoggingConfig;
//!
//! let _guard = init_logging("info", &LoggingConfig::default()).expect("Failed to initialize logging");
//! tracing::info!(recid = 42, "Record migrated");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log the start of a migration run
///
/// # Example
///
/// ```no_run
/// use lineage::log_migration_start;
///
/// log_migration_start!("records", 1500);
/// ```
#[macro_export]
macro_rules! log_migration_start {
    ($target:expr, $count:expr) => {
        tracing::info!(target_kind = %$target, candidates = $count, "Starting migration run");
    };
}

/// Log a failed unit of work with the document's best-known identifier
///
/// # Example
///
/// ```no_run
/// use lineage::log_migration_failure;
/// use lineage::domain::LineageError;
///
/// let error = LineageError::LegacyInvariant("affiliation list".to_string());
/// log_migration_failure!("recid:42", &error);
/// ```
#[macro_export]
macro_rules! log_migration_failure {
    ($document:expr, $error:expr) => {
        tracing::error!(
            document = %$document,
            error_kind = $error.kind(),
            transient = $error.is_transient(),
            error = %$error,
            "Migration failed"
        );
    };
}

/// Log progress through a batch
///
/// # Example
///
/// ```no_run
/// use lineage::log_batch_progress;
///
/// log_batch_progress!(100, 1000);
/// ```
#[macro_export]
macro_rules! log_batch_progress {
    ($current:expr, $total:expr) => {
        tracing::debug!(
            current = $current,
            total = $total,
            progress_pct = ($current as f64 / ($total as f64).max(1.0) * 100.0),
            "Processing batch"
        );
    };
}
