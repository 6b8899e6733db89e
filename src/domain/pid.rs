//! Persistent identifiers
//!
//! A PID is a typed `(type, value)` pair bound to at most one stored object and
//! carrying a lifecycle status. PIDs are never physically removed; retraction is a
//! status change to [`PidStatus::Deleted`].

use super::document::DocumentKind;
use super::errors::PidError;
use super::ids::DocumentId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier namespaces known to the migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PidType {
    /// Record number, also used for concept identifiers
    Recid,
    /// Deposit number
    Depid,
    /// Digital object identifier
    Doi,
    /// OAI-PMH identifier
    Oai,
}

impl PidType {
    /// Wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            PidType::Recid => "recid",
            PidType::Depid => "depid",
            PidType::Doi => "doi",
            PidType::Oai => "oai",
        }
    }
}

impl fmt::Display for PidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PidType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recid" => Ok(PidType::Recid),
            "depid" => Ok(PidType::Depid),
            "doi" => Ok(PidType::Doi),
            "oai" => Ok(PidType::Oai),
            other => Err(format!("Unknown PID type '{other}'")),
        }
    }
}

/// Lifecycle status of a PID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PidStatus {
    /// Allocated but not publicly resolvable as complete
    Reserved,
    /// Public and resolvable
    Registered,
    /// Retracted; resolution reports the deletion explicitly
    Deleted,
    /// Resolves to another PID
    Redirected,
}

impl PidStatus {
    /// Storage name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            PidStatus::Reserved => "reserved",
            PidStatus::Registered => "registered",
            PidStatus::Deleted => "deleted",
            PidStatus::Redirected => "redirected",
        }
    }

    /// Whether a PID in this status may move to `next`
    ///
    /// Deletion is terminal. Every other transition is allowed, including the
    /// `Registered -> Reserved` rollback applied when a migration fails.
    pub fn can_transition_to(&self, next: PidStatus) -> bool {
        !matches!(self, PidStatus::Deleted) || next == PidStatus::Deleted
    }
}

impl fmt::Display for PidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PidStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(PidStatus::Reserved),
            "registered" => Ok(PidStatus::Registered),
            "deleted" => Ok(PidStatus::Deleted),
            "redirected" => Ok(PidStatus::Redirected),
            other => Err(format!("Unknown PID status '{other}'")),
        }
    }
}

/// The unique `(type, value)` key of a PID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PidKey {
    /// Identifier namespace
    pub pid_type: PidType,
    /// Identifier value within the namespace
    pub value: String,
}

impl PidKey {
    /// Creates a new key
    pub fn new(pid_type: PidType, value: impl Into<String>) -> Self {
        Self {
            pid_type,
            value: value.into(),
        }
    }

    /// Shorthand for a `recid` key
    pub fn recid(value: impl ToString) -> Self {
        Self::new(PidType::Recid, value.to_string())
    }

    /// Shorthand for a `depid` key
    pub fn depid(value: impl ToString) -> Self {
        Self::new(PidType::Depid, value.to_string())
    }
}

impl fmt::Display for PidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid_type, self.value)
    }
}

/// A persistent identifier as held by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentIdentifier {
    /// Identifier namespace
    pub pid_type: PidType,
    /// Identifier value
    pub value: String,
    /// Kind of the bound object, if bound
    pub object_type: Option<DocumentKind>,
    /// Bound object, if any
    pub object_uuid: Option<DocumentId>,
    /// Lifecycle status
    pub status: PidStatus,
    /// Resolution target while the status is [`PidStatus::Redirected`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<PidKey>,
}

impl PersistentIdentifier {
    /// Creates an unbound identifier
    pub fn new(key: PidKey, status: PidStatus) -> Self {
        Self {
            pid_type: key.pid_type,
            value: key.value,
            object_type: None,
            object_uuid: None,
            status,
            redirect: None,
        }
    }

    /// Binds the identifier to a stored object
    pub fn bound_to(mut self, kind: DocumentKind, object: DocumentId) -> Self {
        self.object_type = Some(kind);
        self.object_uuid = Some(object);
        self
    }

    /// Returns the `(type, value)` key
    pub fn key(&self) -> PidKey {
        PidKey::new(self.pid_type, self.value.clone())
    }

    /// Checks a status change against the lifecycle rules
    ///
    /// # Errors
    ///
    /// Returns [`PidError::InvalidTransition`] when leaving the deleted state.
    pub fn check_transition(&self, next: PidStatus) -> Result<(), PidError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(PidError::InvalidTransition {
                pid: self.key().to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            })
        }
    }
}

/// One version in a concept's ordered child list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// The version's record PID
    pub pid: PidKey,
    /// Whether this version is an unpublished draft
    pub draft: bool,
}

impl VersionEntry {
    /// A published version
    pub fn published(pid: PidKey) -> Self {
        Self { pid, draft: false }
    }

    /// An unpublished draft version
    pub fn draft(pid: PidKey) -> Self {
        Self { pid, draft: true }
    }
}

/// Outcome of an identifier lookup
///
/// Registry lookups return this instead of signalling absence through errors, so
/// callers branch on "never existed" and "retracted" explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The identifier resolves
    Found(T),
    /// No identifier with this key exists
    NotFound,
    /// The identifier exists and is retracted
    Deleted,
}

impl<T> Lookup<T> {
    /// Returns the found value, if any
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the lookup found a live identifier
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    /// Maps the found value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::Deleted => Lookup::Deleted,
        }
    }

    /// Converts the lookup into a result, naming `key` in the error
    ///
    /// # Errors
    ///
    /// [`PidError::NotFound`] or [`PidError::Deleted`].
    pub fn into_result(self, key: &PidKey) -> Result<T, PidError> {
        match self {
            Lookup::Found(value) => Ok(value),
            Lookup::NotFound => Err(PidError::NotFound(key.to_string())),
            Lookup::Deleted => Err(PidError::Deleted(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_key_display() {
        assert_eq!(PidKey::recid(42).to_string(), "recid:42");
        assert_eq!(PidKey::new(PidType::Doi, "10.5281/zenodo.1").to_string(), "doi:10.5281/zenodo.1");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            PidStatus::Reserved,
            PidStatus::Registered,
            PidStatus::Deleted,
            PidStatus::Redirected,
        ] {
            assert_eq!(status.as_str().parse::<PidStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_deleted_is_terminal() {
        let pid = PersistentIdentifier::new(PidKey::recid(1), PidStatus::Deleted);
        assert!(pid.check_transition(PidStatus::Registered).is_err());
        assert!(pid.check_transition(PidStatus::Deleted).is_ok());

        let pid = PersistentIdentifier::new(PidKey::recid(1), PidStatus::Registered);
        assert!(pid.check_transition(PidStatus::Reserved).is_ok());
    }

    #[test]
    fn test_lookup_into_result() {
        let key = PidKey::recid(9);
        assert_eq!(Lookup::Found(3).into_result(&key), Ok(3));
        assert_eq!(
            Lookup::<u8>::NotFound.into_result(&key),
            Err(PidError::NotFound("recid:9".to_string()))
        );
        assert_eq!(
            Lookup::<u8>::Deleted.into_result(&key),
            Err(PidError::Deleted("recid:9".to_string()))
        );
    }
}
