//! PostgreSQL implementation of the backend traits
//!
//! Reads go straight to pooled connections. A commit opens one transaction, locks
//! the PID rows it touches, validates and applies every staged operation, and
//! commits; any error drops the transaction, which rolls it back.

use crate::adapters::database::changeset::{ChangeSet, DocumentWrite, PidOp};
use crate::adapters::database::traits::{
    DocumentFilter, DocumentStore, IdentifierRegistry, UnitOfWork,
};
use crate::adapters::postgresql::client::PostgreSQLClient;
use crate::adapters::postgresql::models::{
    parent_from_row, version_entry_from_row, PostgreSQLDocument, PostgreSQLPid,
};
use crate::domain::{
    DocumentId, LineageError, PersistentIdentifier, PidError, PidKey, PidStatus, PidType, Result,
    StoreError, StoredDocument, VersionEntry,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::Transaction;

/// PostgreSQL backend
pub struct PostgresBackend {
    client: Arc<PostgreSQLClient>,
}

impl PostgresBackend {
    /// Create a new backend over a client
    pub fn new(client: PostgreSQLClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Create a new backend with an Arc-wrapped client
    pub fn new_with_arc(client: Arc<PostgreSQLClient>) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Arc<PostgreSQLClient> {
        &self.client
    }
}

/// Maps driver errors onto the store taxonomy
///
/// Unique violations and serialization failures are conflicts another writer won;
/// redelivery recomputes and retries.
fn map_pg_error(context: &str, e: tokio_postgres::Error) -> LineageError {
    match e.code() {
        Some(code)
            if *code == SqlState::UNIQUE_VIOLATION
                || *code == SqlState::T_R_SERIALIZATION_FAILURE
                || *code == SqlState::T_R_DEADLOCK_DETECTED =>
        {
            StoreError::Conflict(format!("{context}: {e}")).into()
        }
        _ if e.is_closed() => StoreError::Unavailable(format!("{context}: {e}")).into(),
        _ => LineageError::Database(format!("{context}: {e}")),
    }
}

async fn lock_pid(tx: &Transaction<'_>, key: &PidKey) -> Result<PersistentIdentifier> {
    let row = tx
        .query_opt(
            &format!(
                "SELECT {} FROM pids WHERE pid_type = $1 AND pid_value = $2 FOR UPDATE",
                PostgreSQLPid::COLUMNS
            ),
            &[&key.pid_type.as_str(), &key.value],
        )
        .await
        .map_err(|e| map_pg_error("Failed to lock PID", e))?
        .ok_or_else(|| PidError::NotFound(key.to_string()))?;
    PostgreSQLPid::from_row(&row)?.into_domain()
}

async fn update_status(
    tx: &Transaction<'_>,
    key: &PidKey,
    status: PidStatus,
    redirect: Option<&PidKey>,
) -> Result<()> {
    tx.execute(
        "UPDATE pids SET status = $3, redirect_type = $4, redirect_value = $5, updated_at = now() \
         WHERE pid_type = $1 AND pid_value = $2",
        &[
            &key.pid_type.as_str(),
            &key.value,
            &status.as_str(),
            &redirect.map(|r| r.pid_type.as_str()),
            &redirect.map(|r| r.value.as_str()),
        ],
    )
    .await
    .map_err(|e| map_pg_error("Failed to update PID status", e))?;
    Ok(())
}

async fn read_children(tx: &Transaction<'_>, parent: &PidKey) -> Result<Vec<VersionEntry>> {
    tx.query(
        "SELECT child_type, child_value, is_draft FROM pid_relations \
         WHERE parent_type = $1 AND parent_value = $2 ORDER BY position",
        &[&parent.pid_type.as_str(), &parent.value],
    )
    .await
    .map_err(|e| map_pg_error("Failed to read children", e))?
    .iter()
    .map(version_entry_from_row)
    .collect()
}

async fn apply_pid_op(tx: &Transaction<'_>, op: PidOp) -> Result<()> {
    match op {
        PidOp::Create(pid) => {
            tx.execute(
                "INSERT INTO pids (pid_type, pid_value, object_type, object_uuid, status, \
                 redirect_type, redirect_value) VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &pid.pid_type.as_str(),
                    &pid.value,
                    &pid.object_type.map(|k| k.as_str()),
                    &pid.object_uuid.map(|id| id.into_inner()),
                    &pid.status.as_str(),
                    &pid.redirect.as_ref().map(|r| r.pid_type.as_str()),
                    &pid.redirect.as_ref().map(|r| r.value.as_str()),
                ],
            )
            .await
            .map_err(|e| map_pg_error(&format!("Failed to create {}", pid.key()), e))?;
        }
        PidOp::SetStatus { key, status } => {
            let current = lock_pid(tx, &key).await?;
            current.check_transition(status)?;
            let redirect = if status == PidStatus::Redirected {
                current.redirect.as_ref()
            } else {
                None
            };
            update_status(tx, &key, status, redirect).await?;
        }
        PidOp::Bind { key, kind, object } => {
            let rows = tx
                .execute(
                    "UPDATE pids SET object_type = $3, object_uuid = $4, updated_at = now() \
                     WHERE pid_type = $1 AND pid_value = $2",
                    &[
                        &key.pid_type.as_str(),
                        &key.value,
                        &kind.as_str(),
                        &object.into_inner(),
                    ],
                )
                .await
                .map_err(|e| map_pg_error("Failed to bind PID", e))?;
            if rows == 0 {
                return Err(PidError::NotFound(key.to_string()).into());
            }
        }
        PidOp::Redirect { key, target } => {
            let target_pid = lock_pid(tx, &target).await?;
            if target_pid.status == PidStatus::Deleted {
                return Err(PidError::Deleted(target.to_string()).into());
            }
            let current = lock_pid(tx, &key).await?;
            current.check_transition(PidStatus::Redirected)?;
            update_status(tx, &key, PidStatus::Redirected, Some(&target)).await?;
        }
        PidOp::SetChildren {
            parent,
            expected,
            children,
        } => {
            lock_pid(tx, &parent).await?;
            let current = read_children(tx, &parent).await?;
            if current != expected {
                return Err(StoreError::Conflict(format!(
                    "children of {parent} changed since they were read"
                ))
                .into());
            }
            for (i, child) in children.iter().enumerate() {
                if children[..i].iter().any(|c| c.pid == child.pid) {
                    return Err(LineageError::IdentifierConflict(format!(
                        "{} listed twice under {parent}",
                        child.pid
                    )));
                }
                lock_pid(tx, &child.pid).await?;
                let owner = tx
                    .query_opt(
                        "SELECT parent_type, parent_value FROM pid_relations \
                         WHERE child_type = $1 AND child_value = $2",
                        &[&child.pid.pid_type.as_str(), &child.pid.value],
                    )
                    .await
                    .map_err(|e| map_pg_error("Failed to read parent", e))?
                    .map(|row| parent_from_row(&row))
                    .transpose()?;
                if let Some(owner) = owner {
                    if owner != parent {
                        return Err(StoreError::Conflict(format!(
                            "{} already belongs to {owner}",
                            child.pid
                        ))
                        .into());
                    }
                }
            }
            tx.execute(
                "DELETE FROM pid_relations WHERE parent_type = $1 AND parent_value = $2",
                &[&parent.pid_type.as_str(), &parent.value],
            )
            .await
            .map_err(|e| map_pg_error("Failed to clear children", e))?;
            for (position, child) in children.iter().enumerate() {
                let position = i32::try_from(position).map_err(|_| {
                    LineageError::Validation(format!("too many versions under {parent}"))
                })?;
                tx.execute(
                    "INSERT INTO pid_relations (parent_type, parent_value, child_type, \
                     child_value, position, is_draft) VALUES ($1, $2, $3, $4, $5, $6)",
                    &[
                        &parent.pid_type.as_str(),
                        &parent.value,
                        &child.pid.pid_type.as_str(),
                        &child.pid.value,
                        &position,
                        &child.draft,
                    ],
                )
                .await
                .map_err(|e| map_pg_error("Failed to insert child", e))?;
            }
        }
    }
    Ok(())
}

async fn apply_write(tx: &Transaction<'_>, write: DocumentWrite) -> Result<()> {
    let body = Value::Object(write.body);
    match write.expected_revision {
        None => {
            tx.execute(
                "INSERT INTO documents (id, kind, revision, body) VALUES ($1, $2, 1, $3)",
                &[&write.id.into_inner(), &write.kind.as_str(), &body],
            )
            .await
            .map_err(|e| map_pg_error(&format!("Failed to insert document {}", write.id), e))?;
        }
        Some(expected) => {
            let expected = expected as i64;
            let rows = tx
                .execute(
                    "UPDATE documents SET kind = $2, body = $3, revision = revision + 1, \
                     updated_at = now() WHERE id = $1 AND revision = $4",
                    &[&write.id.into_inner(), &write.kind.as_str(), &body, &expected],
                )
                .await
                .map_err(|e| map_pg_error(&format!("Failed to update document {}", write.id), e))?;
            if rows == 0 {
                return Err(StoreError::Conflict(format!(
                    "document {} is not at revision {expected}",
                    write.id
                ))
                .into());
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for PostgresBackend {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<StoredDocument>> {
        let client = self.client.get_connection().await?;
        let row = client
            .query_opt(
                "SELECT id, kind, revision, body FROM documents WHERE id = $1",
                &[id.as_uuid()],
            )
            .await
            .map_err(|e| map_pg_error("Failed to read document", e))?;
        row.map(|r| PostgreSQLDocument::from_row(&r)?.into_domain())
            .transpose()
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<DocumentId>> {
        let client = self.client.get_connection().await?;
        let kind = filter.kind.map(|k| k.as_str());
        let rows = client
            .query(
                "SELECT id FROM documents \
                 WHERE ($1::TEXT IS NULL OR kind = $1) AND ($2::BOOLEAN IS NULL OR migrated = $2) \
                 ORDER BY id",
                &[&kind, &filter.migrated],
            )
            .await
            .map_err(|e| map_pg_error("Failed to list documents", e))?;
        rows.iter()
            .map(|row| {
                row.try_get::<_, uuid::Uuid>("id")
                    .map(DocumentId::from_uuid)
                    .map_err(|e| LineageError::Database(format!("Failed to read column id: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl IdentifierRegistry for PostgresBackend {
    async fn get_pid(&self, key: &PidKey) -> Result<Option<PersistentIdentifier>> {
        let client = self.client.get_connection().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM pids WHERE pid_type = $1 AND pid_value = $2",
                    PostgreSQLPid::COLUMNS
                ),
                &[&key.pid_type.as_str(), &key.value],
            )
            .await
            .map_err(|e| map_pg_error("Failed to read PID", e))?;
        row.map(|r| PostgreSQLPid::from_row(&r)?.into_domain())
            .transpose()
    }

    async fn pids_for_object(&self, object: &DocumentId) -> Result<Vec<PersistentIdentifier>> {
        let client = self.client.get_connection().await?;
        client
            .query(
                &format!(
                    "SELECT {} FROM pids WHERE object_uuid = $1 ORDER BY pid_type, pid_value",
                    PostgreSQLPid::COLUMNS
                ),
                &[object.as_uuid()],
            )
            .await
            .map_err(|e| map_pg_error("Failed to read PIDs", e))?
            .iter()
            .map(|r| PostgreSQLPid::from_row(r)?.into_domain())
            .collect()
    }

    async fn list_pids(
        &self,
        pid_type: PidType,
        status: Option<PidStatus>,
    ) -> Result<Vec<PersistentIdentifier>> {
        let client = self.client.get_connection().await?;
        let status = status.map(|s| s.as_str());
        client
            .query(
                &format!(
                    "SELECT {} FROM pids WHERE pid_type = $1 AND ($2::TEXT IS NULL OR status = $2) \
                     ORDER BY (pid_value ~ '^[0-9]+$') DESC, \
                     CASE WHEN pid_value ~ '^[0-9]+$' THEN pid_value::NUMERIC END, pid_value",
                    PostgreSQLPid::COLUMNS
                ),
                &[&pid_type.as_str(), &status],
            )
            .await
            .map_err(|e| map_pg_error("Failed to list PIDs", e))?
            .iter()
            .map(|r| PostgreSQLPid::from_row(r)?.into_domain())
            .collect()
    }

    async fn parent_of(&self, child: &PidKey) -> Result<Option<PidKey>> {
        let client = self.client.get_connection().await?;
        client
            .query_opt(
                "SELECT parent_type, parent_value FROM pid_relations \
                 WHERE child_type = $1 AND child_value = $2",
                &[&child.pid_type.as_str(), &child.value],
            )
            .await
            .map_err(|e| map_pg_error("Failed to read parent", e))?
            .map(|row| parent_from_row(&row))
            .transpose()
    }

    async fn children_of(&self, parent: &PidKey) -> Result<Vec<VersionEntry>> {
        let client = self.client.get_connection().await?;
        client
            .query(
                "SELECT child_type, child_value, is_draft FROM pid_relations \
                 WHERE parent_type = $1 AND parent_value = $2 ORDER BY position",
                &[&parent.pid_type.as_str(), &parent.value],
            )
            .await
            .map_err(|e| map_pg_error("Failed to read children", e))?
            .iter()
            .map(version_entry_from_row)
            .collect()
    }

    async fn next_value(&self, pid_type: PidType) -> Result<u64> {
        let client = self.client.get_connection().await?;
        loop {
            let row = client
                .query_one(
                    "INSERT INTO pid_sequences (pid_type, last_value) \
                     VALUES ($1, COALESCE((SELECT MAX(pid_value::BIGINT) FROM pids \
                        WHERE pid_type = $1 AND pid_value ~ '^[0-9]{1,18}$'), 0) + 1) \
                     ON CONFLICT (pid_type) DO UPDATE SET last_value = pid_sequences.last_value + 1 \
                     RETURNING last_value",
                    &[&pid_type.as_str()],
                )
                .await
                .map_err(|e| map_pg_error("Failed to allocate sequence value", e))?;
            let value: i64 = row
                .try_get("last_value")
                .map_err(|e| LineageError::Database(format!("Failed to read sequence: {e}")))?;
            let taken = client
                .query_opt(
                    "SELECT 1 FROM pids WHERE pid_type = $1 AND pid_value = $2",
                    &[&pid_type.as_str(), &value.to_string()],
                )
                .await
                .map_err(|e| map_pg_error("Failed to check sequence value", e))?
                .is_some();
            if !taken {
                return Ok(value as u64);
            }
            tracing::debug!(pid_type = %pid_type, value, "Sequence value already taken, skipping");
        }
    }
}

#[async_trait]
impl UnitOfWork for PostgresBackend {
    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut client = self.client.get_connection().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| map_pg_error("Failed to open transaction", e))?;

        for op in changes.pid_ops {
            apply_pid_op(&tx, op).await?;
        }
        for write in changes.documents {
            apply_write(&tx, write).await?;
        }
        for deletion in changes.deletions {
            let rows = tx
                .execute(
                    "DELETE FROM documents WHERE id = $1 AND revision = $2",
                    &[
                        &deletion.id.into_inner(),
                        &(deletion.expected_revision as i64),
                    ],
                )
                .await
                .map_err(|e| map_pg_error("Failed to delete document", e))?;
            if rows == 0 {
                return Err(StoreError::Conflict(format!(
                    "document {} is not at revision {}",
                    deletion.id, deletion.expected_revision
                ))
                .into());
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_pg_error("Failed to commit transaction", e))
    }
}
