//! Migrate command implementation
//!
//! Migrates every unmigrated record or deposit, or a single one with `--id`.

use super::{load_or_report, report_summary, TargetArg};
use crate::adapters::database::{create_backend, create_task_runtime};
use crate::core::migrate::MigrationCoordinator;
use clap::Args;
use tokio::sync::watch;

/// Arguments for the migrate command
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Which documents to migrate
    #[arg(value_enum)]
    pub target: TargetArg,

    /// Migrate one document, by UUID or by record/deposit number
    #[arg(long)]
    pub id: Option<String>,

    /// Run in this process one document at a time instead of dispatching tasks
    #[arg(long)]
    pub eager: bool,

    /// Plan migrations without committing anything
    #[arg(long)]
    pub dry_run: bool,
}

impl MigrateArgs {
    /// Execute the migrate command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!(target_kind = ?self.target, id = ?self.id, eager = self.eager, "Starting migrate command");

        let mut config = match load_or_report(config_path) {
            Ok(c) => c,
            Err(code) => return Ok(code),
        };
        if self.dry_run {
            tracing::info!("Enabling dry-run mode from CLI");
            config.application.dry_run = true;
        }
        if config.application.dry_run {
            println!("🔍 DRY RUN MODE - Nothing will be committed");
            println!();
        }

        let backend = match create_backend(&config).await {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create backend");
                eprintln!("Failed to connect to the backend: {e}");
                return Ok(4);
            }
        };
        let runtime = create_task_runtime(&config);
        let coordinator = MigrationCoordinator::new(config, backend, runtime, shutdown_signal);

        println!("🚀 Migrating {}...", crate::core::migrate::MigrationTarget::from(self.target));
        let summary = match coordinator
            .migrate(self.target.into(), self.id.as_deref(), self.eager)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Migration failed");
                eprintln!("Migration failed: {e}");
                return Ok(5);
            }
        };

        Ok(report_summary(&summary))
    }
}
