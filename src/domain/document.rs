//! Legacy and target documents
//!
//! Legacy documents arrive as free-form JSON objects. [`LegacyDocument`] lifts the
//! parts the migration branches on (owner, record number, deposit bookkeeping,
//! submission packages, drafts) into typed optional fields and keeps everything else
//! as an untyped map for the field transforms.

use super::errors::LineageError;
use super::ids::{DocumentId, Recid};
use super::result::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// JSON object used for documents in flight
pub type Document = Map<String, Value>;

/// Key of the schema marker carried by migrated documents
pub const SCHEMA_KEY: &str = "$schema";

/// Kind of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Published, read-mostly metadata record
    Record,
    /// Editable counterpart of a record
    Deposit,
}

impl DocumentKind {
    /// Storage name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Record => "record",
            DocumentKind::Deposit => "deposit",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "record" => Ok(DocumentKind::Record),
            "deposit" => Ok(DocumentKind::Deposit),
            other => Err(format!("Unknown document kind '{other}'")),
        }
    }
}

/// Legacy owner block of a record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerBlock {
    /// Numeric user id
    pub id: Option<u64>,
    /// Contact e-mail
    pub email: Option<String>,
    /// Login name
    pub username: Option<String>,
    /// Deposit number the record was published from
    pub deposition_id: Option<String>,
}

/// Legacy deposit bookkeeping (the `_p` block)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositInfo {
    /// Deposit number
    pub id: Option<u64>,
    /// Owning user
    pub user_id: Option<u64>,
    /// Last modification timestamp, verbatim
    pub modified: Option<String>,
}

impl DepositInfo {
    /// Calendar date of the last modification
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::LegacyInvariant`] when the timestamp is present but
    /// unparseable.
    pub fn modified_date(&self) -> Result<Option<NaiveDate>> {
        match &self.modified {
            None => Ok(None),
            Some(raw) => parse_legacy_date(raw).map(Some).ok_or_else(|| {
                LineageError::LegacyInvariant(format!("unparseable _p.modified '{raw}'"))
            }),
        }
    }
}

/// One submission information package
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionPackage {
    /// Record number the submission published to
    pub recid: Option<Recid>,
    /// DOI assigned at submission, when held as a string
    pub doi: Option<String>,
    /// Full submitted metadata
    pub metadata: Document,
}

/// One open draft block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftBlock {
    /// Draft form values
    pub values: Document,
    /// Whether the draft form was completed
    pub completed: bool,
}

/// A legacy document as read from a dump
///
/// Immutable input to the migration. Fields that the pipeline branches on are typed
/// and optional; the rest stays in [`LegacyDocument::fields`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyDocument {
    /// Schema marker, present only on documents that were already migrated
    pub schema: Option<String>,
    /// Top-level record number
    pub recid: Option<Recid>,
    /// Owner block
    pub owner: Option<OwnerBlock>,
    /// Deposit bookkeeping
    pub deposit: Option<DepositInfo>,
    /// Submission packages, in submission order
    pub sips: Vec<SubmissionPackage>,
    /// Open drafts keyed by draft type
    pub drafts: BTreeMap<String, DraftBlock>,
    /// Every other field, untouched
    pub fields: Document,
    has_sips: bool,
    has_drafts: bool,
}

impl LegacyDocument {
    /// Parses a legacy document from a JSON value
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::LegacyInvariant`] if the value is not an object or a
    /// typed block has the wrong shape.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::try_from(map),
            other => Err(LineageError::LegacyInvariant(format!(
                "legacy document must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Whether the document carries deposit structure
    pub fn kind(&self) -> DocumentKind {
        if self.deposit.is_some() || self.has_sips || self.has_drafts {
            DocumentKind::Deposit
        } else {
            DocumentKind::Record
        }
    }

    /// Whether the schema marker is present
    pub fn is_migrated(&self) -> bool {
        self.schema.is_some()
    }

    /// Owning user, preferring the deposit block over the owner block
    pub fn owner_id(&self) -> Option<u64> {
        self.deposit
            .as_ref()
            .and_then(|p| p.user_id)
            .or_else(|| self.owner.as_ref().and_then(|o| o.id))
    }

    /// Deposit number, preferring the deposit block over the owner block
    pub fn deposit_id(&self) -> Option<String> {
        self.deposit
            .as_ref()
            .and_then(|p| p.id.map(|id| id.to_string()))
            .or_else(|| {
                self.owner
                    .as_ref()
                    .and_then(|o| o.deposition_id.clone())
                    .filter(|d| !d.is_empty())
            })
    }

    /// Human-oriented identifier for log lines
    pub fn label(&self) -> String {
        if let Some(depid) = self.deposit.as_ref().and_then(|p| p.id) {
            format!("depid:{depid}")
        } else if let Some(recid) = self.recid {
            format!("recid:{recid}")
        } else {
            "unidentified".to_string()
        }
    }
}

impl TryFrom<Document> for LegacyDocument {
    type Error = LineageError;

    fn try_from(mut map: Document) -> Result<Self> {
        let schema = map
            .remove(SCHEMA_KEY)
            .and_then(|v| v.as_str().map(str::to_string));

        let recid = match map.remove("recid") {
            None | Some(Value::Null) => None,
            Some(value) => Some(Recid::from_json(&value).ok_or_else(|| {
                LineageError::LegacyInvariant(format!("invalid recid {value}"))
            })?),
        };

        let owner = match map.remove("owner") {
            None | Some(Value::Null) => None,
            Some(Value::Object(owner)) => Some(OwnerBlock {
                id: owner.get("id").and_then(json_u64),
                email: non_empty_str(owner.get("email")),
                username: non_empty_str(owner.get("username")),
                deposition_id: owner.get("deposition_id").and_then(json_string),
            }),
            Some(other) => {
                return Err(LineageError::LegacyInvariant(format!(
                    "owner must be an object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        let deposit = match map.remove("_p") {
            None | Some(Value::Null) => None,
            Some(Value::Object(p)) => Some(DepositInfo {
                id: p.get("id").and_then(json_u64),
                user_id: p.get("user_id").and_then(json_u64),
                modified: p.get("modified").and_then(json_string),
            }),
            Some(other) => {
                return Err(LineageError::LegacyInvariant(format!(
                    "_p must be an object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        let has_sips = map.contains_key("sips");
        let sips = match map.remove("sips") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(parse_sip)
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(LineageError::LegacyInvariant(format!(
                    "sips must be a list, got {}",
                    json_type_name(&other)
                )))
            }
        };

        let has_drafts = map.contains_key("drafts");
        let drafts = match map.remove("drafts") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(blocks)) => blocks
                .into_iter()
                .map(|(draft_type, block)| Ok((draft_type, parse_draft(block)?)))
                .collect::<Result<BTreeMap<_, _>>>()?,
            Some(other) => {
                return Err(LineageError::LegacyInvariant(format!(
                    "drafts must be an object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        Ok(Self {
            schema,
            recid,
            owner,
            deposit,
            sips,
            drafts,
            fields: map,
            has_sips,
            has_drafts,
        })
    }
}

fn parse_sip(value: Value) -> Result<SubmissionPackage> {
    let Value::Object(mut sip) = value else {
        return Err(LineageError::LegacyInvariant(
            "submission package must be an object".to_string(),
        ));
    };
    let metadata = match sip.remove("metadata") {
        Some(Value::Object(metadata)) => metadata,
        None | Some(Value::Null) => Map::new(),
        Some(_) => {
            return Err(LineageError::LegacyInvariant(
                "submission package metadata must be an object".to_string(),
            ))
        }
    };
    let recid = match metadata.get("recid") {
        None | Some(Value::Null) => None,
        Some(value) => Some(Recid::from_json(value).ok_or_else(|| {
            LineageError::LegacyInvariant(format!("invalid submission recid {value}"))
        })?),
    };
    let doi = metadata
        .get("doi")
        .and_then(|d| d.as_str())
        .map(str::to_string);
    Ok(SubmissionPackage {
        recid,
        doi,
        metadata,
    })
}

fn parse_draft(value: Value) -> Result<DraftBlock> {
    let Value::Object(mut block) = value else {
        return Err(LineageError::LegacyInvariant(
            "draft block must be an object".to_string(),
        ));
    };
    let values = match block.remove("values") {
        Some(Value::Object(values)) => values,
        _ => Map::new(),
    };
    let completed = block
        .get("completed")
        .map(|c| match c {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
            _ => false,
        })
        .unwrap_or(false);
    Ok(DraftBlock { values, completed })
}

/// Parses the timestamp shapes found in legacy dumps into a calendar date
pub fn parse_legacy_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn json_u64(value: &Value) -> Option<u64> {
    Recid::from_json(value).map(|r| r.value())
}

fn json_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// A migrated document carrying the schema marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Document", into = "Document")]
pub struct TargetDocument(Document);

impl TargetDocument {
    /// Wraps a document that carries the schema marker
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Validation`] when `$schema` is missing or not a string.
    pub fn new(body: Document) -> Result<Self> {
        match body.get(SCHEMA_KEY) {
            Some(Value::String(s)) if !s.is_empty() => Ok(Self(body)),
            _ => Err(LineageError::Validation(
                "target document is missing its $schema marker".to_string(),
            )),
        }
    }

    /// The schema URL
    pub fn schema(&self) -> &str {
        self.0
            .get(SCHEMA_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    /// Read access to the body
    pub fn body(&self) -> &Document {
        &self.0
    }

    /// Consumes self and returns the body
    pub fn into_inner(self) -> Document {
        self.0
    }
}

impl TryFrom<Document> for TargetDocument {
    type Error = LineageError;

    fn try_from(body: Document) -> Result<Self> {
        Self::new(body)
    }
}

impl From<TargetDocument> for Document {
    fn from(doc: TargetDocument) -> Self {
        doc.0
    }
}

/// A document as held by the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Storage identifier
    pub id: DocumentId,
    /// Record or deposit
    pub kind: DocumentKind,
    /// Optimistic concurrency revision, incremented on every write
    pub revision: u64,
    /// Document body
    pub body: Document,
}

impl StoredDocument {
    /// Whether the body carries the schema marker
    pub fn is_migrated(&self) -> bool {
        self.body.contains_key(SCHEMA_KEY)
    }

    /// Parses the body as a legacy document
    ///
    /// # Errors
    ///
    /// See [`LegacyDocument::try_from`].
    pub fn to_legacy(&self) -> Result<LegacyDocument> {
        LegacyDocument::try_from(self.body.clone())
    }
}
