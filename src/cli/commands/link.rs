//! Link command implementation

use super::load_or_report;
use crate::adapters::database::{create_backend, create_task_runtime};
use crate::core::migrate::MigrationCoordinator;
use crate::domain::{LineageError, Recid};
use clap::Args;
use tokio::sync::watch;

/// Arguments for the link command
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Record numbers, oldest version first
    #[arg(required = true, num_args = 1..)]
    pub recids: Vec<u64>,
}

impl LinkArgs {
    /// Execute the link command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!(recids = ?self.recids, "Starting link command");

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

        let recids: Vec<Recid> = self.recids.iter().copied().map(Recid::new).collect();
        match coordinator.link(&recids).await {
            Ok(outcome) => {
                let children: Vec<String> = outcome.children.iter().map(|c| c.value.clone()).collect();
                println!("✅ Concept {} ({})", outcome.concept.value, outcome.conceptdoi);
                println!("  Versions: {}", children.join(", "));
                if !outcome.changed {
                    println!("  Already linked, nothing written");
                }
                Ok(0)
            }
            Err(e @ (LineageError::IdentifierConflict(_) | LineageError::Validation(_))) => {
                tracing::error!(error = %e, "Records not linked");
                println!("❌ Records not linked");
                println!("   Error: {e}");
                Ok(1)
            }
            Err(e) => {
                tracing::error!(error = %e, "Linking failed");
                eprintln!("Linking failed: {e}");
                Ok(5)
            }
        }
    }
}
