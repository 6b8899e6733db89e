//! Load command implementation
//!
//! Streams legacy dumps into the configured store.

use super::load_or_report;
use crate::adapters::database::create_backend;
use crate::core::migrate::{DumpLoader, LoadResult};
use clap::Args;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::watch;

/// Arguments for the load command
#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Dump files (a JSON array or concatenated JSON documents)
    #[arg(required = true, num_args = 1..)]
    pub dumps: Vec<PathBuf>,
}

impl LoadArgs {
    /// Execute the load command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!(dumps = self.dumps.len(), "Starting load command");

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

        let loader = DumpLoader::new(backend);
        let start = Instant::now();
        let mut total = LoadResult::new();
        let mut interrupted = false;

        for dump in &self.dumps {
            if *shutdown_signal.borrow() {
                interrupted = true;
                break;
            }
            println!("📥 Loading {}", dump.display());
            match loader.load_file(dump).await {
                Ok(result) => total.merge(result),
                Err(e) => {
                    tracing::error!(path = %dump.display(), error = %e, "Dump load failed");
                    total.add_failure(format!("{}: {e}", dump.display()));
                }
            }
        }

        println!();
        println!("📊 Load Summary:");
        println!("  Loaded: {}", total.loaded);
        println!("  Duplicates Skipped: {}", total.duplicates_skipped);
        println!("  Failed: {}", total.failed);
        println!("  Duration: {:.2}s", start.elapsed().as_secs_f64());
        println!();

        if !total.errors.is_empty() {
            println!("⚠️  Errors encountered:");
            for error in &total.errors {
                println!("  - {error}");
            }
            println!();
        }

        Ok(if interrupted {
            println!("⚠️  Load interrupted. Loaded documents are skipped on the next run.");
            130
        } else if total.failed > 0 {
            println!("⚠️  Load completed with failures");
            1
        } else {
            println!("✅ Load completed successfully!");
            0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_load_into_memory_store() {
        let mut config = NamedTempFile::new().unwrap();
        writeln!(config, "database_target = \"memory\"").unwrap();
        let mut dump = NamedTempFile::new().unwrap();
        write!(dump, r#"[{{"recid": 1}}, {{"recid": 2}}]"#).unwrap();

        let args = LoadArgs {
            dumps: vec![dump.path().to_path_buf()],
        };
        let (_tx, rx) = watch::channel(false);
        let code = args.execute(config.path().to_str().unwrap(), rx).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_missing_dump_is_partial_failure() {
        let mut config = NamedTempFile::new().unwrap();
        writeln!(config, "database_target = \"memory\"").unwrap();

        let args = LoadArgs {
            dumps: vec![PathBuf::from("/nonexistent/dump.json")],
        };
        let (_tx, rx) = watch::channel(false);
        let code = args.execute(config.path().to_str().unwrap(), rx).await.unwrap();
        assert_eq!(code, 1);
    }
}
