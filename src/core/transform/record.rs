//! Field transforms for published records
//!
//! Each transform takes the in-progress document and returns it with one concern
//! addressed. They never touch the identifier registry; identifier side effects are
//! staged by the pipeline after the fold.

use super::normalize::{is_empty_value, scalar_or_list, set_to_json, string_set, take_object};
use crate::config::MigrationConfig;
use crate::domain::document::{json_type_name, OwnerBlock};
use crate::domain::{Document, LineageError, Recid, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

/// Read-only inputs available to every record transform
#[derive(Debug, Clone, Copy)]
pub struct RecordEnv<'a> {
    /// Migration settings
    pub config: &'a MigrationConfig,
    /// Legacy owner block, lifted out of the document before the fold
    pub owner: Option<&'a OwnerBlock>,
    /// Resolved record number
    pub recid: Recid,
    /// Migration timestamp
    pub now: DateTime<Utc>,
}

/// Signature shared by the record transforms
pub type RecordTransform = fn(Document, &RecordEnv<'_>) -> Result<Document>;

/// Record transforms in application order
pub const RECORD_TRANSFORMS: &[(&str, RecordTransform)] = &[
    ("remove_legacy_fields", remove_legacy_fields),
    ("upload_type", migrate_upload_type),
    ("authors", migrate_authors),
    ("oai", migrate_oai),
    ("grants", migrate_grants),
    ("license", migrate_license),
    ("meetings", migrate_meetings),
    ("owners", migrate_owners),
    ("description", migrate_description),
    ("imprint", migrate_imprint),
    ("part_of", migrate_part_of),
    ("references", migrate_references),
    ("communities", migrate_communities),
    ("provisional_communities", migrate_provisional_communities),
    ("thesis", migrate_thesis),
    ("buckets", add_buckets),
];

/// Runs every record transform in order
///
/// # Errors
///
/// The first [`LineageError::LegacyInvariant`] raised, prefixed with the name of the
/// transform that found it.
pub fn transform_record(doc: Document, env: &RecordEnv<'_>) -> Result<Document> {
    RECORD_TRANSFORMS
        .iter()
        .try_fold(doc, |doc, (name, transform)| {
            transform(doc, env).map_err(|e| match e {
                LineageError::LegacyInvariant(msg) => {
                    LineageError::LegacyInvariant(format!("{name}: {msg}"))
                }
                other => other,
            })
        })
}

const LEGACY_ONLY_KEYS: &[&str] = &[
    "fft",
    "files_to_upload",
    "collections",
    "preservation_score",
    "restriction",
    "url",
    "version_history",
    "documents",
    "creation_date",
    "modification_date",
    "system_control_number",
    "system_number",
    "altmetric_id",
];

fn remove_legacy_fields(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    for key in LEGACY_ONLY_KEYS {
        doc.remove(*key);
    }
    Ok(doc)
}

fn migrate_upload_type(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    if let Some(upload_type) = doc.remove("upload_type") {
        doc.insert("resource_type".into(), upload_type);
    }
    Ok(doc)
}

fn migrate_authors(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    let Some(authors) = doc.remove("authors") else {
        return Ok(doc);
    };
    let creators = scalar_or_list(authors)
        .into_iter()
        .map(|creator| match creator {
            Value::Object(mut creator) => {
                match creator.remove("affiliation") {
                    Some(Value::Array(mut affiliations)) => match affiliations.len() {
                        0 => {}
                        1 => {
                            creator.insert("affiliation".into(), affiliations.remove(0));
                        }
                        n => {
                            return Err(LineageError::LegacyInvariant(format!(
                                "creator has {n} affiliations, expected at most one"
                            )))
                        }
                    },
                    Some(affiliation) => {
                        creator.insert("affiliation".into(), affiliation);
                    }
                    None => {}
                }
                Ok(Value::Object(creator))
            }
            other => Err(LineageError::LegacyInvariant(format!(
                "creator must be an object, got {}",
                json_type_name(&other)
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    doc.insert("creators".into(), Value::Array(creators));
    Ok(doc)
}

fn migrate_oai(mut doc: Document, env: &RecordEnv<'_>) -> Result<Document> {
    let Some(oai) = doc.remove("oai") else {
        return Ok(doc);
    };
    let Value::Object(mut oai) = oai else {
        return Err(LineageError::LegacyInvariant("oai must be an object".to_string()));
    };
    let id = oai
        .remove("oai")
        .filter(|id| !is_empty_value(id))
        .ok_or_else(|| LineageError::LegacyInvariant("oai block has no identifier".to_string()))?;
    let sets = scalar_or_list(oai.remove("indicator").unwrap_or(Value::Null));

    doc.insert(
        "_oai".into(),
        json!({
            "id": id,
            "sets": sets,
            "updated": env.now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }),
    );
    Ok(doc)
}

fn identifier_of(value: &Value, what: &str) -> Result<String> {
    let identifier = match value {
        Value::Object(map) => map.get("identifier"),
        Value::String(_) => Some(value),
        _ => None,
    };
    match identifier {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(LineageError::LegacyInvariant(format!(
            "{what} without an identifier"
        ))),
    }
}

fn migrate_grants(mut doc: Document, env: &RecordEnv<'_>) -> Result<Document> {
    let Some(grants) = doc.remove("grants") else {
        return Ok(doc);
    };
    let refs = scalar_or_list(grants)
        .iter()
        .map(|grant| {
            let identifier = identifier_of(grant, "grant")?;
            Ok(json!({"$ref": format!("{}::{identifier}", env.config.grants_ref_base)}))
        })
        .collect::<Result<Vec<_>>>()?;
    doc.insert("grants".into(), Value::Array(refs));
    Ok(doc)
}

fn migrate_license(mut doc: Document, env: &RecordEnv<'_>) -> Result<Document> {
    let Some(license) = doc.remove("license") else {
        return Ok(doc);
    };
    let identifier = identifier_of(&license, "license")?;
    doc.insert(
        "license".into(),
        json!({"$ref": format!("{}/{identifier}", env.config.license_ref_base)}),
    );
    Ok(doc)
}

fn migrate_meetings(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    let conference_url = doc.remove("conference_url");
    let meetings = doc.remove("meetings");
    if conference_url.is_none() && meetings.is_none() {
        return Ok(doc);
    }

    let mut meeting = take_object(&mut doc, "meeting");
    if let Some(url) = conference_url {
        meeting.insert("url".into(), url);
    }
    match meetings {
        None | Some(Value::Null) => {}
        Some(Value::Object(extra)) => meeting.extend(extra),
        Some(other) => {
            return Err(LineageError::LegacyInvariant(format!(
                "meetings must be an object, got {}",
                json_type_name(&other)
            )))
        }
    }
    doc.insert("meeting".into(), Value::Object(meeting));
    Ok(doc)
}

fn migrate_owners(mut doc: Document, env: &RecordEnv<'_>) -> Result<Document> {
    let Some(owner) = env.owner else {
        return Ok(doc);
    };
    let owners: Vec<Value> = owner.id.into_iter().map(Value::from).collect();
    doc.insert("owners".into(), Value::Array(owners.clone()));

    let mut agent = Map::new();
    agent.insert("role".into(), json!("uploader"));
    if let Some(email) = &owner.email {
        agent.insert("email".into(), json!(email));
    }
    if let Some(username) = &owner.username {
        agent.insert("username".into(), json!(username));
    }
    if let Some(id) = owner.id {
        agent.insert("user_id".into(), json!(id.to_string()));
    }
    let mut internal = take_object(&mut doc, "_internal");
    let mut source = take_object(&mut internal, "source");
    source.insert("agents".into(), json!([agent]));
    internal.insert("source".into(), Value::Object(source));
    doc.insert("_internal".into(), Value::Object(internal));

    if !doc.contains_key("_deposit") {
        let mut deposit = Map::new();
        deposit.insert(
            "id".into(),
            json!(owner.deposition_id.clone().unwrap_or_default()),
        );
        deposit.insert(
            "pid".into(),
            json!({"type": "recid", "value": env.recid.to_string()}),
        );
        deposit.insert("owners".into(), Value::Array(owners));
        deposit.insert("status".into(), json!("published"));
        if let Some(id) = owner.id {
            deposit.insert("created_by".into(), json!(id));
        }
        doc.insert("_deposit".into(), Value::Object(deposit));
    }
    Ok(doc)
}

fn migrate_description(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    doc.entry("description").or_insert_with(|| json!(""));
    Ok(doc)
}

fn migrate_imprint(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    let isbn = doc.remove("isbn");
    if isbn.is_none() && !doc.contains_key("imprint") {
        return Ok(doc);
    }
    let mut imprint = take_object(&mut doc, "imprint");
    if let Some(isbn) = isbn {
        imprint.insert("isbn".into(), isbn);
    }
    imprint.remove("year");
    doc.insert("imprint".into(), Value::Object(imprint));
    Ok(doc)
}

fn migrate_part_of(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    let Some(part_of) = doc.get_mut("part_of") else {
        return Ok(doc);
    };
    let Value::Object(part_of) = part_of else {
        return Err(LineageError::LegacyInvariant("part_of must be an object".to_string()));
    };
    part_of.remove("year");

    let moved: Vec<(String, Value)> = ["publisher", "place", "isbn"]
        .iter()
        .filter_map(|key| part_of.remove(*key).map(|v| (key.to_string(), v)))
        .collect();
    if moved.is_empty() {
        return Ok(doc);
    }

    let mut imprint = take_object(&mut doc, "imprint");
    for (key, value) in moved {
        if imprint.contains_key(&key) {
            return Err(LineageError::LegacyInvariant(format!(
                "part_of.{key} collides with imprint.{key}"
            )));
        }
        imprint.insert(key, value);
    }
    doc.insert("imprint".into(), Value::Object(imprint));
    Ok(doc)
}

fn migrate_references(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    let Some(references) = doc.remove("references") else {
        return Ok(doc);
    };
    let kept: Vec<Value> = scalar_or_list(references)
        .into_iter()
        .filter_map(|reference| {
            reference
                .get("raw_reference")
                .filter(|raw| !is_empty_value(raw))
                .map(|raw| json!({"raw_reference": raw}))
        })
        .collect();
    doc.insert("references".into(), Value::Array(kept));
    Ok(doc)
}

fn migrate_communities(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    if let Some(communities) = doc.remove("communities") {
        doc.insert("communities".into(), set_to_json(string_set(communities)));
    }
    Ok(doc)
}

fn migrate_provisional_communities(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    let Some(provisional) = doc.remove("provisional_communities") else {
        return Ok(doc);
    };
    let accepted = doc
        .get("communities")
        .cloned()
        .map(string_set)
        .unwrap_or_default();
    let pending: std::collections::BTreeSet<String> = string_set(provisional)
        .difference(&accepted)
        .cloned()
        .collect();
    if !pending.is_empty() {
        doc.insert("provisional_communities".into(), set_to_json(pending));
    }
    Ok(doc)
}

fn migrate_thesis(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    let supervisors = doc.remove("thesis_supervisors");
    let university = doc.remove("thesis_university");
    if supervisors.is_none() && university.is_none() {
        return Ok(doc);
    }
    let mut thesis = take_object(&mut doc, "thesis");
    if let Some(supervisors) = supervisors {
        thesis.insert("supervisors".into(), supervisors);
    }
    if let Some(university) = university {
        thesis.insert("university".into(), university);
    }
    doc.insert("thesis".into(), Value::Object(thesis));
    Ok(doc)
}

fn add_buckets(mut doc: Document, _env: &RecordEnv<'_>) -> Result<Document> {
    let bucket = match doc.get("_files") {
        None => return Ok(doc),
        Some(Value::Array(files)) => files
            .first()
            .and_then(|f| f.get("bucket"))
            .cloned()
            .ok_or_else(|| {
                LineageError::LegacyInvariant("_files[0] has no bucket".to_string())
            })?,
        Some(other) => {
            return Err(LineageError::LegacyInvariant(format!(
                "_files must be a list, got {}",
                json_type_name(other)
            )))
        }
    };
    let mut buckets = take_object(&mut doc, "_buckets");
    buckets.insert("record".into(), bucket);
    buckets.insert("deposit".into(), json!(""));
    doc.insert("_buckets".into(), Value::Object(buckets));
    Ok(doc)
}
