//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for Lineage using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Lineage - legacy record migration and version linking
#[derive(Parser, Debug)]
#[command(name = "lineage")]
#[command(version, about, long_about = None)]
#[command(author = "Lineage Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "lineage.toml", env = "LINEAGE_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "LINEAGE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load legacy dumps into the store
    Load(commands::load::LoadArgs),

    /// Migrate a dump in memory and report every failure
    Check(commands::check::CheckArgs),

    /// Migrate records or deposits
    Migrate(commands::migrate::MigrateArgs),

    /// Give migrated records or deposits a concept
    Version(commands::version::VersionArgs),

    /// Link records as versions of one concept
    Link(commands::link::LinkArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::TargetArg;

    #[test]
    fn test_cli_parse_migrate() {
        let cli = Cli::parse_from(["lineage", "migrate", "records"]);
        assert_eq!(cli.config, "lineage.toml");
        match cli.command {
            Commands::Migrate(args) => {
                assert_eq!(args.target, TargetArg::Records);
                assert!(!args.eager);
                assert!(args.id.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::parse_from(["lineage", "--config", "custom.toml", "validate-config"]);
        assert_eq!(cli.config, "custom.toml");
        assert!(matches!(cli.command, Commands::ValidateConfig(_)));
    }

    #[test]
    fn test_cli_parse_with_log_level() {
        let cli = Cli::parse_from(["lineage", "--log-level", "debug", "check", "dump.json"]);
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_cli_parse_version_single() {
        let cli = Cli::parse_from(["lineage", "version", "deposits", "--id", "77", "--eager"]);
        match cli.command {
            Commands::Version(args) => {
                assert_eq!(args.target, TargetArg::Deposits);
                assert_eq!(args.id.as_deref(), Some("77"));
                assert!(args.eager);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_link() {
        let cli = Cli::parse_from(["lineage", "link", "1", "2", "3"]);
        match cli.command {
            Commands::Link(args) => assert_eq!(args.recids, vec![1, 2, 3]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_target() {
        assert!(Cli::try_parse_from(["lineage", "migrate", "files"]).is_err());
        assert!(Cli::try_parse_from(["lineage", "link"]).is_err());
        assert!(Cli::try_parse_from(["lineage", "load"]).is_err());
    }
}
