//! Backend factory
//!
//! Picks the backend implementation from `database_target`.

use crate::adapters::database::traits::MigrationBackend;
use crate::adapters::memory::MemoryBackend;
use crate::adapters::postgresql::{PostgreSQLClient, PostgresBackend};
use crate::adapters::tasks::{LocalTaskRuntime, TaskRuntime};
use crate::config::{DatabaseTarget, LineageConfig};
use crate::domain::{LineageError, Result};
use std::sync::Arc;

/// Create the backend selected by the configuration
///
/// For PostgreSQL the connection is tested and the schema applied before returning.
///
/// # Errors
///
/// Returns an error if the PostgreSQL section is missing or the database is
/// unreachable.
pub async fn create_backend(config: &LineageConfig) -> Result<Arc<dyn MigrationBackend>> {
    match config.database_target {
        DatabaseTarget::Memory => {
            tracing::warn!("Using the in-memory backend; nothing will be persisted");
            Ok(Arc::new(MemoryBackend::new()))
        }
        DatabaseTarget::PostgreSQL => {
            let pg_config = config.postgresql.as_ref().ok_or_else(|| {
                LineageError::Configuration(
                    "postgresql section is required when database_target = \"postgresql\""
                        .to_string(),
                )
            })?;

            tracing::info!("Creating PostgreSQL backend");
            let client = PostgreSQLClient::new(pg_config.clone()).await?;
            client.test_connection().await?;
            client.ensure_schema().await?;

            Ok(Arc::new(PostgresBackend::new(client)))
        }
    }
}

/// Create the task runtime used for dispatched migrations
pub fn create_task_runtime(config: &LineageConfig) -> Arc<dyn TaskRuntime> {
    Arc::new(LocalTaskRuntime::new(config.tasks.concurrency))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_from_default_config() {
        let config = LineageConfig::default();
        let backend = create_backend(&config).await.unwrap();
        let pids = backend
            .list_pids(crate::domain::PidType::Recid, None)
            .await
            .unwrap();
        assert!(pids.is_empty());
    }

    #[tokio::test]
    async fn test_postgresql_without_section_fails() {
        let config = LineageConfig {
            database_target: DatabaseTarget::PostgreSQL,
            ..Default::default()
        };
        assert!(matches!(
            create_backend(&config).await,
            Err(LineageError::Configuration(_))
        ));
    }
}
