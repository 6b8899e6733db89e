//! Check command implementation
//!
//! Migrates a dump against a scratch in-memory store and lists every document
//! that would fail. Nothing is persisted.

use super::{load_or_report, report_summary};
use crate::core::migrate::check_dump;
use clap::Args;
use std::path::PathBuf;

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Dump file to check
    pub dump: PathBuf,
}

impl CheckArgs {
    /// Execute the check command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(dump = %self.dump.display(), "Starting check command");

        let config = match load_or_report(config_path) {
            Ok(c) => c,
            Err(code) => return Ok(code),
        };

        println!("🔍 Checking {}", self.dump.display());
        let report = match check_dump(&self.dump, &config).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Check failed");
                eprintln!("Check failed: {e}");
                return Ok(5);
            }
        };

        println!("  Loaded: {}", report.load.loaded);
        println!("  Duplicates Skipped: {}", report.load.duplicates_skipped);
        if !report.load.errors.is_empty() {
            println!("⚠️  Documents that did not load:");
            for error in &report.load.errors {
                println!("  - {error}");
            }
        }

        let records = report_summary(&report.records);
        let deposits = report_summary(&report.deposits);
        Ok(if report.is_clean() {
            0
        } else {
            records.max(deposits).max(1)
        })
    }
}
