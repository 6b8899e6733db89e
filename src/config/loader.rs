//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{DatabaseTarget, Environment, LineageConfig};
use super::secret::secret_string;
use crate::domain::errors::LineageError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into LineageConfig
/// 4. Applies environment variable overrides (LINEAGE_* prefix)
/// 5. Validates the configuration
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Errors
///
/// Returns an error if:
/// - File cannot be read
/// - A referenced environment variable is unset
/// - TOML parsing fails
/// - Configuration validation fails
///
/// # Examples
///
/// ```no_run
/// use lineage::config::loader::load_config;
///
/// let config = load_config("lineage.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<LineageConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(LineageError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        LineageError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}

/// Parses configuration text, applying substitution, overrides and validation
///
/// # Errors
///
/// See [`load_config`].
pub fn parse_config(contents: &str) -> Result<LineageConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: LineageConfig = toml::from_str(&contents)
        .map_err(|e| LineageError::Configuration(format!("Failed to parse TOML: {}", e)))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        LineageError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    Ok(config)
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("environment variable pattern is valid")
    })
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are copied verbatim.
///
/// # Errors
///
/// Returns an error naming every referenced environment variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = env_var_pattern();
    let mut lines = Vec::new();
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_string());
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    let placeholder = format!("${{{}}}", var_name);
                    processed_line = processed_line.replace(&placeholder, &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|m| m == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        lines.push(processed_line);
    }

    if !missing_vars.is_empty() {
        return Err(LineageError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(lines.join("\n"))
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        LineageError::Configuration(format!("Invalid value '{value}' for environment variable {name}"))
    })
}

/// Applies environment variable overrides using the LINEAGE_* prefix
///
/// Environment variables follow the pattern: LINEAGE_<SECTION>_<KEY>
/// For example: LINEAGE_TASKS_CONCURRENCY, LINEAGE_POSTGRESQL_CONNECTION_STRING
fn apply_env_overrides(config: &mut LineageConfig) -> Result<()> {
    if let Ok(val) = std::env::var("LINEAGE_ENVIRONMENT") {
        config.environment = match val.to_lowercase().as_str() {
            "development" => Environment::Development,
            "staging" => Environment::Staging,
            "production" => Environment::Production,
            other => {
                return Err(LineageError::Configuration(format!(
                    "Invalid LINEAGE_ENVIRONMENT '{other}'"
                )))
            }
        };
    }
    if let Ok(val) = std::env::var("LINEAGE_DATABASE_TARGET") {
        config.database_target = match val.to_lowercase().as_str() {
            "postgresql" => DatabaseTarget::PostgreSQL,
            "memory" => DatabaseTarget::Memory,
            other => {
                return Err(LineageError::Configuration(format!(
                    "Invalid LINEAGE_DATABASE_TARGET '{other}'"
                )))
            }
        };
    }

    // Application overrides
    if let Ok(val) = std::env::var("LINEAGE_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Ok(val) = std::env::var("LINEAGE_APPLICATION_DRY_RUN") {
        config.application.dry_run = parse_override("LINEAGE_APPLICATION_DRY_RUN", &val)?;
    }

    // Migration overrides
    if let Ok(val) = std::env::var("LINEAGE_MIGRATION_INTERNAL_DOI_PREFIX") {
        config.migration.internal_doi_prefix = val;
    }
    if let Ok(val) = std::env::var("LINEAGE_MIGRATION_STALE_DRAFT_DAYS") {
        config.migration.stale_drafts.threshold_days =
            parse_override("LINEAGE_MIGRATION_STALE_DRAFT_DAYS", &val)?;
    }

    // Versioning overrides
    if let Ok(val) = std::env::var("LINEAGE_VERSIONING_DOI_PREFIX") {
        config.versioning.doi_prefix = val;
    }

    // Task overrides
    if let Ok(val) = std::env::var("LINEAGE_TASKS_CONCURRENCY") {
        config.tasks.concurrency = parse_override("LINEAGE_TASKS_CONCURRENCY", &val)?;
    }
    if let Ok(val) = std::env::var("LINEAGE_TASKS_POLL_INTERVAL_MS") {
        config.tasks.poll_interval_ms = parse_override("LINEAGE_TASKS_POLL_INTERVAL_MS", &val)?;
    }

    // PostgreSQL overrides (only if PostgreSQL is configured)
    if let Some(ref mut pg_config) = config.postgresql {
        if let Ok(val) = std::env::var("LINEAGE_POSTGRESQL_CONNECTION_STRING") {
            pg_config.connection_string = secret_string(val);
        }
        if let Ok(val) = std::env::var("LINEAGE_POSTGRESQL_MAX_CONNECTIONS") {
            pg_config.max_connections = parse_override("LINEAGE_POSTGRESQL_MAX_CONNECTIONS", &val)?;
        }
    }

    // Logging overrides
    if let Ok(val) = std::env::var("LINEAGE_LOGGING_LOCAL_ENABLED") {
        config.logging.local_enabled = parse_override("LINEAGE_LOGGING_LOCAL_ENABLED", &val)?;
    }
    if let Ok(val) = std::env::var("LINEAGE_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}
