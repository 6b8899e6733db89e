//! Secret configuration values
//!
//! Database credentials live inside `secrecy::Secret`, which zeroizes memory on drop
//! and redacts `Debug` output. The value has to be exposed explicitly with
//! `expose_secret()` at the single place that needs it (pool construction).
//!
//! ```rust
//! use lineage::config::{redact_connection_string, secret_string};
//! use secrecy::ExposeSecret;
//!
//! let dsn = secret_string("postgresql://lineage:pw@db:5432/lineage".to_string());
//! assert!(!format!("{dsn:?}").contains("pw"));
//! assert_eq!(redact_connection_string(&dsn), "db:5432/lineage");
//! assert!(dsn.expose_secret().starts_with("postgresql://"));
//! ```

use secrecy::{CloneableSecret, DebugSecret, ExposeSecret, Secret, SerializableSecret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// String payload that may be held in a [`Secret`]
#[derive(Clone, Debug, Zeroize)]
#[zeroize(drop)]
pub struct SecretValue(String);

impl CloneableSecret for SecretValue {}
impl DebugSecret for SecretValue {}
impl SerializableSecret for SecretValue {}

impl From<String> for SecretValue {
    fn from(s: String) -> Self {
        SecretValue(s)
    }
}

impl AsRef<str> for SecretValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for SecretValue {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Serialize for SecretValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretValue)
    }
}

/// Zeroizing, redacted string used for credentials
pub type SecretString = Secret<SecretValue>;

/// Wraps a plain string as a [`SecretString`]
#[inline]
pub fn secret_string(value: String) -> SecretString {
    Secret::new(SecretValue::from(value))
}

/// The part of a connection string after the credentials, safe to print
pub fn redact_connection_string(dsn: &SecretString) -> String {
    dsn.expose_secret()
        .rsplit('@')
        .next()
        .filter(|rest| !rest.contains("://"))
        .unwrap_or("***")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = secret_string("sensitive-data".to_string());
        let debug_output = format!("{secret:?}");
        assert!(!debug_output.contains("sensitive-data"));
    }

    #[test]
    fn test_secret_serde() {
        #[derive(Serialize, Deserialize)]
        struct Section {
            connection_string: SecretString,
        }

        let parsed: Section =
            toml::from_str("connection_string = \"postgres://u:p@h/db\"").unwrap();
        assert_eq!(&**parsed.connection_string.expose_secret(), "postgres://u:p@h/db");
    }

    #[test]
    fn test_redaction_without_credentials() {
        let dsn = secret_string("postgres://localhost/db".to_string());
        assert_eq!(redact_connection_string(&dsn), "***");
    }
}
