//! Integration tests for logging functionality

use lineage::config::LoggingConfig;
use lineage::domain::LineageError;
use lineage::logging::init_logging;
use lineage::{log_batch_progress, log_migration_failure, log_migration_start};
use tempfile::TempDir;

#[test]
fn test_logging_config_default() {
    let config = LoggingConfig::default();
    assert!(!config.local_enabled);
    assert_eq!(config.local_rotation, "daily");
    assert_eq!(config.local_path, "logs");

    let console = LoggingConfig::console_only();
    assert!(!console.local_enabled);
}

// A subscriber can be installed once per process, so initialization is covered
// by a single test.
#[test]
fn test_file_logging_initialization() {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("logs");
    let config = LoggingConfig {
        local_enabled: true,
        local_path: log_path.to_string_lossy().to_string(),
        local_rotation: "never".to_string(),
    };

    assert!(init_logging("verbose", &config).is_err());
    assert!(!log_path.exists());

    let guard = init_logging("debug", &config).unwrap();
    assert!(log_path.is_dir());

    let error = LineageError::LegacyInvariant("affiliation list".to_string());
    log_migration_start!("records", 3);
    log_migration_failure!("recid:42", &error);
    log_batch_progress!(1, 3);

    let second = init_logging("info", &LoggingConfig::console_only());
    assert!(matches!(second, Err(LineageError::Configuration(_))));

    drop(guard);
}
