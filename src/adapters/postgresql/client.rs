//! PostgreSQL client implementation
//!
//! Owns the connection pool and applies the schema.

use crate::config::{redact_connection_string, PostgreSQLConfig};
use crate::domain::{LineageError, Result};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::NoTls;

/// Pooled PostgreSQL connections for Lineage
pub struct PostgreSQLClient {
    pool: Pool,
    config: PostgreSQLConfig,
}

impl PostgreSQLClient {
    /// Create a new PostgreSQL client
    ///
    /// The pool connects lazily; call [`test_connection`](Self::test_connection) to
    /// fail fast on bad credentials.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Configuration`] for an unparseable connection string
    /// and [`LineageError::Database`] if the pool cannot be built.
    pub async fn new(config: PostgreSQLConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .connection_string
            .expose_secret()
            .parse()
            .map_err(|e| {
                LineageError::Configuration(format!("Invalid PostgreSQL connection string: {e}"))
            })?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .recycle_timeout(Some(timeout))
            .runtime(deadpool_postgres::Runtime::Tokio1)
            .build()
            .map_err(|e| LineageError::Database(format!("Failed to create connection pool: {e}")))?;

        tracing::debug!(
            target = %redact_connection_string(&config.connection_string),
            max_connections = config.max_connections,
            "PostgreSQL pool created"
        );

        Ok(Self { pool, config })
    }

    /// Runs `SELECT 1` on a pooled connection
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.get_connection().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| LineageError::Database(format!("Connection test failed: {e}")))?;

        tracing::info!("PostgreSQL connection test successful");
        Ok(())
    }

    /// Applies the bundled schema
    ///
    /// Every statement is `IF NOT EXISTS`, so this is safe on every start.
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.get_connection().await?;
        let migration_sql = include_str!("../../../migrations/001_initial_schema.sql");

        client
            .batch_execute(migration_sql)
            .await
            .map_err(|e| LineageError::Database(format!("Failed to execute migration: {e}")))?;

        tracing::info!("PostgreSQL schema initialized successfully");
        Ok(())
    }

    /// Get a connection from the pool with the statement timeout applied
    ///
    /// # Errors
    ///
    /// Pool exhaustion and timeouts surface as
    /// [`StoreError::Unavailable`](crate::domain::StoreError::Unavailable) so the
    /// orchestrator treats them as transient.
    pub async fn get_connection(&self) -> Result<Object> {
        let client = self.pool.get().await.map_err(|e| {
            crate::domain::StoreError::Unavailable(format!(
                "Failed to get connection from pool: {e}"
            ))
        })?;

        client
            .batch_execute(&format!(
                "SET statement_timeout = {}",
                self.config.statement_timeout_seconds * 1000
            ))
            .await
            .map_err(|e| LineageError::Database(format!("Failed to set statement timeout: {e}")))?;

        Ok(client)
    }

    /// Connection string with credentials removed
    pub fn connection_string_safe(&self) -> String {
        format!(
            "postgresql://***@{}",
            redact_connection_string(&self.config.connection_string)
        )
    }

    /// Get the pool statistics
    pub fn pool_status(&self) -> deadpool_postgres::Status {
        self.pool.status()
    }
}
