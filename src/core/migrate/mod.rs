//! Migration orchestration
//!
//! - [`coordinator`] - enumerates candidates and runs one unit of work per document
//! - [`dump`] - streaming initial load from legacy dumps and the dump check
//! - [`summary`] - per-run outcome counts and failures
//! - [`batch`] - load result bookkeeping
//!
//! # Example
//!
//! ```rust,no_run
//! use lineage::adapters::database::{create_backend, create_task_runtime};
//! use lineage::config::load_config;
//! use lineage::core::migrate::{MigrationCoordinator, MigrationTarget};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("lineage.toml")?;
//! let backend = create_backend(&config).await?;
//! let runtime = create_task_runtime(&config);
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let coordinator = MigrationCoordinator::new(config, backend, runtime, shutdown_rx);
//! let summary = coordinator.migrate(MigrationTarget::Records, None, false).await?;
//! println!("Migrated: {}, failed: {}", summary.successful, summary.failed);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod coordinator;
pub mod dump;
pub mod summary;

pub use batch::LoadResult;
pub use coordinator::{wait_for_idle, MigrationCoordinator, MigrationTarget, WaitOutcome};
pub use dump::{check_dump, stream_documents, CheckReport, DumpLoader, LoadStatus};
pub use summary::{MigrationError, MigrationErrorType, MigrationSummary, UnitOutcome};
