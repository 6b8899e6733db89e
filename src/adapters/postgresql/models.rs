//! PostgreSQL row models
//!
//! Maps rows of the `documents`, `pids` and `pid_relations` tables onto domain types.

use crate::domain::{
    Document, DocumentId, DocumentKind, LineageError, PersistentIdentifier, PidKey, PidStatus,
    PidType, Result, StoredDocument, VersionEntry,
};
use serde_json::Value;
use tokio_postgres::Row;
use uuid::Uuid;

/// Row of the `documents` table
#[derive(Debug, Clone)]
pub struct PostgreSQLDocument {
    /// Document UUID
    pub id: Uuid,
    /// `record` or `deposit`
    pub kind: String,
    /// Optimistic concurrency revision
    pub revision: i64,
    /// JSONB body
    pub body: Value,
}

impl PostgreSQLDocument {
    /// Reads the columns `id, kind, revision, body`
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: column(row, "id")?,
            kind: column(row, "kind")?,
            revision: column(row, "revision")?,
            body: column(row, "body")?,
        })
    }

    /// Converts into the domain representation
    pub fn into_domain(self) -> Result<StoredDocument> {
        let body: Document = match self.body {
            Value::Object(map) => map,
            _ => {
                return Err(LineageError::Database(format!(
                    "document {} body is not a JSON object",
                    self.id
                )))
            }
        };
        Ok(StoredDocument {
            id: DocumentId::from_uuid(self.id),
            kind: parse_column::<DocumentKind>("kind", &self.kind)?,
            revision: u64::try_from(self.revision).map_err(|_| {
                LineageError::Database(format!("negative revision on document {}", self.id))
            })?,
            body,
        })
    }
}

/// Row of the `pids` table
#[derive(Debug, Clone)]
pub struct PostgreSQLPid {
    /// Identifier namespace
    pub pid_type: String,
    /// Identifier value
    pub pid_value: String,
    /// Bound object kind
    pub object_type: Option<String>,
    /// Bound object
    pub object_uuid: Option<Uuid>,
    /// Lifecycle status
    pub status: String,
    /// Redirect target namespace
    pub redirect_type: Option<String>,
    /// Redirect target value
    pub redirect_value: Option<String>,
}

impl PostgreSQLPid {
    /// Column list matching [`PostgreSQLPid::from_row`]
    pub const COLUMNS: &'static str =
        "pid_type, pid_value, object_type, object_uuid, status, redirect_type, redirect_value";

    /// Reads the columns listed in [`PostgreSQLPid::COLUMNS`]
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            pid_type: column(row, "pid_type")?,
            pid_value: column(row, "pid_value")?,
            object_type: column(row, "object_type")?,
            object_uuid: column(row, "object_uuid")?,
            status: column(row, "status")?,
            redirect_type: column(row, "redirect_type")?,
            redirect_value: column(row, "redirect_value")?,
        })
    }

    /// Converts into the domain representation
    pub fn into_domain(self) -> Result<PersistentIdentifier> {
        let redirect = match (self.redirect_type, self.redirect_value) {
            (Some(t), Some(v)) => Some(PidKey::new(parse_column::<PidType>("redirect_type", &t)?, v)),
            _ => None,
        };
        Ok(PersistentIdentifier {
            pid_type: parse_column("pid_type", &self.pid_type)?,
            value: self.pid_value,
            object_type: self
                .object_type
                .as_deref()
                .map(|k| parse_column::<DocumentKind>("object_type", k))
                .transpose()?,
            object_uuid: self.object_uuid.map(DocumentId::from_uuid),
            status: parse_column::<PidStatus>("status", &self.status)?,
            redirect,
        })
    }
}

/// Reads `child_type, child_value, is_draft` from a `pid_relations` row
pub fn version_entry_from_row(row: &Row) -> Result<VersionEntry> {
    let child_type: String = column(row, "child_type")?;
    let child_value: String = column(row, "child_value")?;
    let draft: bool = column(row, "is_draft")?;
    Ok(VersionEntry {
        pid: PidKey::new(parse_column("child_type", &child_type)?, child_value),
        draft,
    })
}

/// Reads `parent_type, parent_value` from a `pid_relations` row
pub fn parent_from_row(row: &Row) -> Result<PidKey> {
    let parent_type: String = column(row, "parent_type")?;
    let parent_value: String = column(row, "parent_value")?;
    Ok(PidKey::new(
        parse_column("parent_type", &parent_type)?,
        parent_value,
    ))
}

fn column<'a, T>(row: &'a Row, name: &str) -> Result<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(name)
        .map_err(|e| LineageError::Database(format!("Failed to read column {name}: {e}")))
}

fn parse_column<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse()
        .map_err(|e: String| LineageError::Database(format!("Bad value in column {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_into_domain() {
        let id = Uuid::new_v4();
        let row = PostgreSQLDocument {
            id,
            kind: "deposit".to_string(),
            revision: 3,
            body: json!({"title": "x"}),
        };
        let doc = row.into_domain().unwrap();
        assert_eq!(doc.id, DocumentId::from_uuid(id));
        assert_eq!(doc.kind, DocumentKind::Deposit);
        assert_eq!(doc.revision, 3);
    }

    #[test]
    fn test_document_body_must_be_object() {
        let row = PostgreSQLDocument {
            id: Uuid::new_v4(),
            kind: "record".to_string(),
            revision: 1,
            body: json!([1]),
        };
        assert!(row.into_domain().is_err());
    }

    #[test]
    fn test_pid_into_domain_with_redirect() {
        let row = PostgreSQLPid {
            pid_type: "recid".to_string(),
            pid_value: "10".to_string(),
            object_type: None,
            object_uuid: None,
            status: "redirected".to_string(),
            redirect_type: Some("recid".to_string()),
            redirect_value: Some("12".to_string()),
        };
        let pid = row.into_domain().unwrap();
        assert_eq!(pid.status, PidStatus::Redirected);
        assert_eq!(pid.redirect, Some(PidKey::recid(12)));
    }

    #[test]
    fn test_unknown_status_rejected() {
        let row = PostgreSQLPid {
            pid_type: "recid".to_string(),
            pid_value: "1".to_string(),
            object_type: None,
            object_uuid: None,
            status: "gone".to_string(),
            redirect_type: None,
            redirect_value: None,
        };
        assert!(row.into_domain().is_err());
    }
}
