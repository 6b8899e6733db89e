//! CLI command implementations
//!
//! Every command returns its process exit code:
//! 0 success, 1 partial failure, 2 configuration error, 4 connection error,
//! 5 fatal error, 130 interrupted.

pub mod check;
pub mod link;
pub mod load;
pub mod migrate;
pub mod validate;
pub mod version;

use crate::config::{load_config, LineageConfig};
use crate::core::migrate::{MigrationSummary, MigrationTarget};
use clap::ValueEnum;

/// Document kind selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetArg {
    /// Published records
    Records,
    /// Deposits
    Deposits,
}

impl From<TargetArg> for MigrationTarget {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Records => MigrationTarget::Records,
            TargetArg::Deposits => MigrationTarget::Deposits,
        }
    }
}

/// Loads and validates the configuration, printing the failure
fn load_or_report(config_path: &str) -> Result<LineageConfig, i32> {
    load_config(config_path).map_err(|e| {
        tracing::error!(config_path = %config_path, error = %e, "Failed to load configuration");
        println!("❌ Failed to load configuration file");
        println!("   Error: {e}");
        2
    })
}

/// Prints a run summary and returns the exit code it implies
fn report_summary(summary: &MigrationSummary) -> i32 {
    println!();
    println!("📊 Summary ({}):", summary.target);
    println!("  Total: {}", summary.total);
    println!("  Successful: {}", summary.successful);
    println!("  Already Migrated: {}", summary.already_migrated);
    println!("  Retracted: {}", summary.retracted);
    println!("  Skipped: {}", summary.skipped);
    println!("  Failed: {}", summary.failed);
    println!("  Duration: {:.2}s", summary.duration.as_secs_f64());
    println!("  Success Rate: {:.2}%", summary.success_rate());
    println!();

    if !summary.errors.is_empty() {
        println!("⚠️  Errors encountered:");
        for error in &summary.errors {
            println!("  - {error}");
        }
        println!();
    }

    if summary.interrupted {
        println!("⚠️  Run interrupted. Migrated documents are skipped on the next run.");
        130
    } else if summary.is_successful() {
        println!("✅ Completed successfully!");
        0
    } else {
        println!("⚠️  Completed with failures");
        1
    }
}
