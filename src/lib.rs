// Lineage - Legacy record migration and version linking
// Copyright (c) 2025 Lineage Contributors
// Licensed under the MIT License

//! # Lineage - legacy record migration and version linking
//!
//! Lineage migrates a repository's legacy records and deposits to a schema-versioned
//! target format and groups the versions of a work under one concept identifier.
//!
//! ## Overview
//!
//! This library provides:
//! - **Loading** legacy dumps into a document store, one persistent identifier each
//! - **Classifying** deposits as published, draft or new
//! - **Transforming** records and deposits into target documents, one commit each
//! - **Managing** persistent identifiers through their lifecycle
//! - **Linking** record versions into concept groups with redirects to the latest
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Business logic (transforms, classifier, pipeline, versioning, orchestration)
//! - [`adapters`] - Backends (PostgreSQL, in-memory) and the task runtime
//! - [`domain`] - Core domain types and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging and observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lineage::adapters::database::{create_backend, create_task_runtime};
//! use lineage::config::load_config;
//! use lineage::core::migrate::{DumpLoader, MigrationCoordinator, MigrationTarget};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("lineage.toml")?;
//!     let backend = create_backend(&config).await?;
//!
//!     DumpLoader::new(backend.clone())
//!         .load_file(Path::new("records.json"))
//!         .await?;
//!
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     let runtime = create_task_runtime(&config);
//!     let coordinator = MigrationCoordinator::new(config, backend, runtime, shutdown_rx);
//!     let summary = coordinator.migrate(MigrationTarget::Records, None, true).await?;
//!
//!     println!("Migrated {} records", summary.successful);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Every library function returns [`domain::Result`]. A failed document is never
//! fatal to a batch: the coordinator logs it with its best-known identifier and
//! moves on.
//!
//! ```rust
//! use lineage::domain::LineageError;
//!
//! let err = LineageError::ambiguous("depid:12", "multiple record identifiers [1, 2]");
//! assert!(!err.is_transient());
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
