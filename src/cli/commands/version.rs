//! Version command implementation
//!
//! Gives migrated records and draft deposits a concept.

use super::{load_or_report, report_summary, TargetArg};
use crate::adapters::database::{create_backend, create_task_runtime};
use crate::core::migrate::MigrationCoordinator;
use clap::Args;
use tokio::sync::watch;

/// Arguments for the version command
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Which documents to version
    #[arg(value_enum)]
    pub target: TargetArg,

    /// Version one document: a record number, or a deposit UUID or number
    #[arg(long)]
    pub id: Option<String>,

    /// Run in this process instead of dispatching tasks
    #[arg(long)]
    pub eager: bool,
}

impl VersionArgs {
    /// Execute the version command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!(target_kind = ?self.target, id = ?self.id, "Starting version command");

        let config = match load_or_report(config_path) {
            Ok(c) => c,
            Err(code) => return Ok(code),
        };
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

        println!("🔗 Versioning {}...", crate::core::migrate::MigrationTarget::from(self.target));
        let summary = match coordinator
            .version(self.target.into(), self.id.as_deref(), self.eager)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Versioning failed");
                eprintln!("Versioning failed: {e}");
                return Ok(5);
            }
        };

        Ok(report_summary(&summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_config_path() {
        let args = VersionArgs {
            target: TargetArg::Records,
            id: None,
            eager: false,
        };
        let (_tx, rx) = watch::channel(false);
        let code = args.execute("/nonexistent/lineage.toml", rx).await.unwrap();
        assert_eq!(code, 2);
    }
}
