//! Configuration management for Lineage.
//!
//! Lineage reads a TOML file with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `LINEAGE_<SECTION>_<KEY>` environment overrides
//! - Default values for optional settings
//! - Validation of every section on load
//!
//! Configuration is a plain value handed to constructors; nothing reads it from
//! global state.
//!
//! # Example Configuration
//!
//! ```toml
//! database_target = "postgresql"
//!
//! [application]
//! log_level = "info"
//!
//! [migration]
//! record_schema = "https://zenodo.org/schemas/records/record-v1.0.0.json"
//! deposit_schema = "https://zenodo.org/schemas/deposits/records/record-v1.0.0.json"
//! internal_doi_prefix = "10.5281"
//!
//! [migration.stale_drafts]
//! threshold_days = 365
//! treat_as_published = true
//!
//! [versioning]
//! doi_prefix = "10.5281"
//! doi_namespace = "zenodo"
//!
//! [tasks]
//! concurrency = 8
//! poll_interval_ms = 5000
//!
//! [postgresql]
//! connection_string = "${LINEAGE_DATABASE_URL}"
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use lineage::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("lineage.toml")?;
//! println!("Stale drafts after {} days", config.migration.stale_drafts.threshold_days);
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, DatabaseTarget, Environment, LineageConfig, LoggingConfig,
    MigrationConfig, PostgreSQLConfig, StaleDraftPolicy, TaskConfig, VersioningConfig,
};
pub use secret::{redact_connection_string, secret_string, SecretString, SecretValue};
