//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the Lineage configuration file.

use crate::config::{load_config, redact_connection_string};
use crate::config::schema::DatabaseTarget;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // load_config validates every section
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration is invalid");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Environment: {:?}", config.environment);
        println!("  Log Level: {}", config.application.log_level);
        println!("  Dry Run: {}", config.application.dry_run);

        match config.database_target {
            DatabaseTarget::Memory => println!("  Database Target: memory (nothing persisted)"),
            DatabaseTarget::PostgreSQL => {
                if let Some(ref pg_config) = config.postgresql {
                    println!("  Database Target: PostgreSQL");
                    println!(
                        "  PostgreSQL Connection: {}",
                        redact_connection_string(&pg_config.connection_string)
                    );
                    println!("  Max Connections: {}", pg_config.max_connections);
                }
            }
        }

        println!("  Record Schema: {}", config.migration.record_schema);
        println!("  Deposit Schema: {}", config.migration.deposit_schema);
        println!(
            "  Stale Drafts: older than {} days {}",
            config.migration.stale_drafts.threshold_days,
            if config.migration.stale_drafts.treat_as_published {
                "are treated as published"
            } else {
                "need manual resolution"
            }
        );
        println!("  Concept DOI: {}", config.versioning.concept_doi("<recid>"));
        println!("  Task Concurrency: {}", config.tasks.concurrency);
        println!();
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_valid_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "database_target = \"memory\"\n\n[tasks]\nconcurrency = 4").unwrap();

        let code = ValidateArgs {}.execute(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "database_target = \"postgresql\"").unwrap();

        let code = ValidateArgs {}.execute(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(code, 2);
    }
}
