//! Domain identifier types with validation
//!
//! Newtype wrappers keep storage identifiers and record numbers from being mixed up.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Storage identifier of a document
///
/// Every document in the store, legacy or migrated, is addressed by a UUID that never
/// changes across migration.
///
/// # Examples
///
/// ```
/// use lineage::domain::ids::DocumentId;
/// use std::str::FromStr;
///
/// let id = DocumentId::from_str("7d44b88c-4199-4bad-97dc-d78268e01398").unwrap();
/// assert_eq!(id.to_string(), "7d44b88c-4199-4bad-97dc-d78268e01398");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generates a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Consumes self and returns the inner UUID
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| format!("Invalid document id '{s}': {e}"))
    }
}

/// Numeric record identifier
///
/// Legacy dumps store record numbers both as JSON numbers and as strings, so parsing
/// accepts either.
///
/// # Examples
///
/// ```
/// use lineage::domain::ids::Recid;
///
/// let recid = Recid::from_json(&serde_json::json!("42")).unwrap();
/// assert_eq!(recid, Recid::new(42));
/// assert_eq!(recid.to_string(), "42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Recid(u64);

impl Recid {
    /// Creates a new Recid
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the numeric value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Parses a record number held in a JSON value
    ///
    /// # Returns
    ///
    /// `None` for `null`, empty strings and anything that is not a non-negative integer
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(Self),
            Value::String(s) => s.trim().parse().ok().map(Self),
            _ => None,
        }
    }

    /// JSON number representation, as stored in target documents
    pub fn to_json(&self) -> Value {
        Value::from(self.0)
    }
}

impl fmt::Display for Recid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Recid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| format!("Invalid record identifier '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_id_roundtrip_through_string() {
        let id = DocumentId::generate();
        let parsed = DocumentId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_document_id_rejects_garbage() {
        assert!(DocumentId::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn test_recid_from_json_variants() {
        assert_eq!(Recid::from_json(&json!(7)), Some(Recid::new(7)));
        assert_eq!(Recid::from_json(&json!(" 12 ")), Some(Recid::new(12)));
        assert_eq!(Recid::from_json(&json!(null)), None);
        assert_eq!(Recid::from_json(&json!("")), None);
        assert_eq!(Recid::from_json(&json!(-3)), None);
        assert_eq!(Recid::from_json(&json!({"value": 1})), None);
    }

    #[test]
    fn test_recid_from_str() {
        assert_eq!("99".parse::<Recid>().unwrap().value(), 99);
        assert!("x1".parse::<Recid>().is_err());
    }
}
