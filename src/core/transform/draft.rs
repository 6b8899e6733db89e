//! Translation of legacy draft form values
//!
//! Draft payloads were saved straight from the legacy deposit form, so they carry
//! form placeholders (`"None"`, empty strings, people without names) that the target
//! schema rejects. The translation applies the defaults the legacy loader used and
//! drops anything empty before the values are merged into the deposit.

use super::normalize::{is_empty_value, is_none_like};
use crate::domain::document::parse_legacy_date;
use crate::domain::{Document, LineageError, Result};
use chrono::NaiveDate;
use serde_json::{json, Value};

const DROPPED_KEYS: &[&str] = &["modification_date", "recid", "version_id"];

/// How a possibly-empty key is cleaned before the emptiness check
#[derive(Debug, Clone, Copy)]
enum Cleaner {
    /// Drop if empty
    Plain,
    /// People list: entries without a name go, empty keys inside entries go
    People,
    /// Identifier list: entries without an identifier go
    Identifiers,
    /// String list: empty strings go
    Strings,
    /// Subject list: entries without a term go
    Subjects,
}

const EMPTY_KEYS: &[(&str, Cleaner)] = &[
    ("authors", Cleaner::Plain),
    ("access_right", Cleaner::Plain),
    ("alternate_identifiers", Cleaner::Identifiers),
    ("communities", Cleaner::Plain),
    ("conference_acronym", Cleaner::Plain),
    ("conference_dates", Cleaner::Plain),
    ("conference_place", Cleaner::Plain),
    ("conference_session", Cleaner::Plain),
    ("conference_session_part", Cleaner::Plain),
    ("conference_title", Cleaner::Plain),
    ("conference_url", Cleaner::Plain),
    ("contributors", Cleaner::People),
    ("creators", Cleaner::People),
    ("_deposit_actions", Cleaner::Plain),
    ("grants", Cleaner::Plain),
    ("imprint_isbn", Cleaner::Plain),
    ("imprint", Cleaner::Plain),
    ("imprint_place", Cleaner::Plain),
    ("imprint_publisher", Cleaner::Plain),
    ("journal_issue", Cleaner::Plain),
    ("journal_pages", Cleaner::Plain),
    ("journal_title", Cleaner::Plain),
    ("journal_volume", Cleaner::Plain),
    ("keywords", Cleaner::Strings),
    ("license", Cleaner::Plain),
    ("meeting", Cleaner::Plain),
    ("notes", Cleaner::Plain),
    ("part_of", Cleaner::Plain),
    ("partof_pages", Cleaner::Plain),
    ("partof_title", Cleaner::Plain),
    ("provisional_communities", Cleaner::Plain),
    ("references", Cleaner::Plain),
    ("related_identifiers", Cleaner::Identifiers),
    ("resource_type", Cleaner::Plain),
    ("subjects", Cleaner::Subjects),
    ("thesis_supervisors", Cleaner::People),
    ("thesis_university", Cleaner::Plain),
];

/// Translates draft form values into deposit metadata
///
/// `today` decides whether an embargo has already lapsed.
///
/// # Errors
///
/// Returns [`LineageError::LegacyInvariant`] for an embargoed draft whose embargo
/// date is missing or unparseable.
pub fn translate_draft(values: &Document, today: NaiveDate) -> Result<Document> {
    let mut metadata = values.clone();
    apply_defaults(&mut metadata, today)?;
    clean_empty(&mut metadata);
    Ok(into_target_shape(metadata))
}

fn apply_defaults(metadata: &mut Document, today: NaiveDate) -> Result<()> {
    if !metadata.contains_key("access_right") {
        metadata.insert("access_right".into(), json!("open"));
    }

    if access_right(metadata) == Some("embargoed") {
        let embargo = metadata
            .get("embargo_date")
            .and_then(Value::as_str)
            .and_then(parse_legacy_date)
            .ok_or_else(|| {
                LineageError::LegacyInvariant(
                    "embargoed draft without a valid embargo_date".to_string(),
                )
            })?;
        if embargo <= today {
            metadata.insert("access_right".into(), json!("open"));
            metadata.remove("embargo_date");
        }
    }

    if access_right(metadata) == Some("embargoed") && !metadata.contains_key("access_conditions") {
        metadata.insert("access_conditions".into(), json!("Not specified."));
    }

    if is_none_like(metadata.get("upload_type")) {
        metadata.insert("upload_type".into(), json!("publication"));
    }
    match metadata.get("upload_type").and_then(Value::as_str) {
        Some("publication") if is_none_like(metadata.get("publication_type")) => {
            metadata.insert("publication_type".into(), json!("other"));
        }
        Some("image") if is_none_like(metadata.get("image_type")) => {
            metadata.insert("image_type".into(), json!("other"));
        }
        _ => {}
    }
    for subtype in ["publication_type", "image_type"] {
        if metadata.contains_key(subtype) && is_none_like(metadata.get(subtype)) {
            metadata.remove(subtype);
        }
    }

    if is_none_like(metadata.get("description")) {
        metadata.insert("description".into(), json!("No description"));
    }
    if is_none_like(metadata.get("title")) {
        metadata.insert("title".into(), json!("No title"));
    }
    Ok(())
}

fn access_right(metadata: &Document) -> Option<&str> {
    metadata.get("access_right").and_then(Value::as_str)
}

fn clean_empty(metadata: &mut Document) {
    for key in DROPPED_KEYS {
        metadata.remove(*key);
    }
    for (key, cleaner) in EMPTY_KEYS {
        let Some(value) = metadata.remove(*key) else {
            continue;
        };
        let cleaned = match cleaner {
            Cleaner::Plain => value,
            Cleaner::People => filter_entries(value, "name", true),
            Cleaner::Identifiers => filter_entries(value, "identifier", true),
            Cleaner::Subjects => filter_entries(value, "term", true),
            Cleaner::Strings => match value {
                Value::Array(items) => {
                    Value::Array(items.into_iter().filter(|v| !is_empty_value(v)).collect())
                }
                other => other,
            },
        };
        if !is_empty_value(&cleaned) {
            metadata.insert(key.to_string(), cleaned);
        }
    }
}

/// Keeps list entries whose `required` key is non-empty
fn filter_entries(value: Value, required: &str, remove_empty_keys: bool) -> Value {
    let Value::Array(items) = value else {
        return value;
    };
    Value::Array(
        items
            .into_iter()
            .filter(|item| item.get(required).map_or(false, |v| !is_empty_value(v)))
            .map(|item| match item {
                Value::Object(mut entry) if remove_empty_keys => {
                    entry.retain(|_, v| !is_empty_value(v));
                    Value::Object(entry)
                }
                other => other,
            })
            .collect(),
    )
}

/// Moves the legacy upload type and subtype into `resource_type`
fn into_target_shape(mut metadata: Document) -> Document {
    if let Some(Value::String(upload_type)) = metadata.remove("upload_type") {
        let subtype = match upload_type.as_str() {
            "publication" => metadata.remove("publication_type"),
            "image" => metadata.remove("image_type"),
            _ => None,
        };
        let mut resource_type = serde_json::Map::new();
        resource_type.insert("type".into(), Value::String(upload_type));
        if let Some(subtype) = subtype {
            resource_type.insert("subtype".into(), subtype);
        }
        metadata.insert("resource_type".into(), Value::Object(resource_type));
    }
    metadata
}
