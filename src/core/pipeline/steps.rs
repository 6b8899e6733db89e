//! Category-specific step sequences
//!
//! A step takes the in-progress target document and the read-only
//! [`MigrationContext`] and returns the next document. The sequence for a document
//! is chosen from its kind and category and folded left to right.
//!
//! Records start from their legacy fields. Deposits start empty and only get the
//! fields their steps build.

use super::context::MigrationContext;
use crate::core::classifier::Category;
use crate::core::transform::normalize::take_object;
use crate::core::transform::{empty_if_none_map, transform_record, translate_draft, RecordEnv};
use crate::domain::{Document, DocumentKind, LineageError, Result, SCHEMA_KEY};
use serde_json::{json, Value};

/// Signature shared by every pipeline step
pub type Step = fn(Document, &MigrationContext<'_>) -> Result<Document>;

const RECORD_STEPS: &[(&str, Step)] = &[
    ("init", init),
    ("record_fields", record_fields),
    ("nulls", flatten_nulls),
    ("finalize_record", finalize_record),
];

const PUBLISHED_DEPOSIT_STEPS: &[(&str, Step)] = &[
    ("recid", attach_recid),
    ("status", deposit_status),
    ("deposit_pid", deposit_pid),
    ("nulls", flatten_nulls),
    ("internal", deposit_internal),
    ("finalize_deposit", finalize_deposit),
];

const DRAFT_DEPOSIT_STEPS: &[(&str, Step)] = &[
    ("recid", attach_recid),
    ("status", deposit_status),
    ("draft", merge_open_draft),
    ("doi", submitted_doi),
    ("nulls", flatten_nulls),
    ("internal", deposit_internal),
    ("finalize_deposit", finalize_deposit),
];

const NEW_DEPOSIT_STEPS: &[(&str, Step)] = &[
    ("recid", attach_recid),
    ("status", deposit_status),
    ("doi", submitted_doi),
    ("nulls", flatten_nulls),
    ("internal", deposit_internal),
    ("finalize_deposit", finalize_deposit),
];

/// Step sequence for a document kind and deposit category
pub fn steps_for(kind: DocumentKind, category: Option<Category>) -> &'static [(&'static str, Step)] {
    match (kind, category) {
        (DocumentKind::Record, _) => RECORD_STEPS,
        (DocumentKind::Deposit, Some(Category::Draft)) => DRAFT_DEPOSIT_STEPS,
        (DocumentKind::Deposit, Some(Category::New)) => NEW_DEPOSIT_STEPS,
        (DocumentKind::Deposit, Some(Category::Published) | None) => PUBLISHED_DEPOSIT_STEPS,
    }
}

/// Folds the document's step sequence, starting from an empty document
pub fn run_steps(ctx: &MigrationContext<'_>) -> Result<Document> {
    steps_for(ctx.kind, ctx.category)
        .iter()
        .try_fold(Document::new(), |doc, (name, step)| {
            tracing::trace!(document = %ctx.document_id, step = name, "Running step");
            step(doc, ctx)
        })
}

/// Seeds a record with its legacy fields
fn init(_doc: Document, ctx: &MigrationContext<'_>) -> Result<Document> {
    Ok(ctx.legacy.fields.clone())
}

fn record_fields(doc: Document, ctx: &MigrationContext<'_>) -> Result<Document> {
    let env = RecordEnv {
        config: ctx.config,
        owner: ctx.legacy.owner.as_ref(),
        recid: ctx.recid,
        now: ctx.now,
    };
    transform_record(doc, &env)
}

fn flatten_nulls(doc: Document, _ctx: &MigrationContext<'_>) -> Result<Document> {
    Ok(empty_if_none_map(doc))
}

fn attach_recid(mut doc: Document, ctx: &MigrationContext<'_>) -> Result<Document> {
    doc.insert("recid".into(), ctx.recid.to_json());
    Ok(doc)
}

fn deposit_status(mut doc: Document, ctx: &MigrationContext<'_>) -> Result<Document> {
    let status = ctx.category.unwrap_or(Category::Published).deposit_status();
    let mut deposit = take_object(&mut doc, "_deposit");
    deposit.insert("status".into(), json!(status));
    doc.insert("_deposit".into(), Value::Object(deposit));
    Ok(doc)
}

fn deposit_pid(mut doc: Document, ctx: &MigrationContext<'_>) -> Result<Document> {
    let mut deposit = take_object(&mut doc, "_deposit");
    deposit.insert(
        "pid".into(),
        json!({"type": "recid", "value": ctx.recid.to_string()}),
    );
    doc.insert("_deposit".into(), Value::Object(deposit));
    Ok(doc)
}

fn merge_open_draft(mut doc: Document, ctx: &MigrationContext<'_>) -> Result<Document> {
    let draft = ctx
        .legacy
        .drafts
        .values()
        .find(|draft| !draft.completed)
        .ok_or_else(|| {
            LineageError::LegacyInvariant(format!(
                "{} classified as draft without an open draft",
                ctx.legacy.label()
            ))
        })?;
    doc.extend(translate_draft(&draft.values, ctx.today())?);
    Ok(doc)
}

fn submitted_doi(mut doc: Document, ctx: &MigrationContext<'_>) -> Result<Document> {
    let doi = ctx
        .legacy
        .sips
        .iter()
        .rev()
        .find_map(|sip| sip.doi.as_deref().filter(|d| !d.is_empty()));
    if let Some(doi) = doi {
        doc.insert("doi".into(), json!(doi));
    }
    Ok(doc)
}

fn deposit_internal(mut doc: Document, ctx: &MigrationContext<'_>) -> Result<Document> {
    let owner = ctx.legacy.owner_id();

    let mut owners: Vec<u64> = owner.into_iter().collect();
    for extra in &ctx.config.extra_owners {
        if !owners.contains(extra) {
            owners.push(*extra);
        }
    }

    let mut deposit = take_object(&mut doc, "_deposit");
    deposit.insert("owners".into(), json!(owners));
    deposit.insert(
        "id".into(),
        json!(ctx.legacy.deposit_id().unwrap_or_default()),
    );
    if let Some(modified) = ctx.legacy.deposit.as_ref().and_then(|p| p.modified.as_ref()) {
        deposit.insert("submitted".into(), json!(modified));
    }
    if let Some(owner) = owner {
        deposit.insert("created_by".into(), json!(owner));
    }
    doc.insert("_deposit".into(), Value::Object(deposit));
    doc.insert("owners".into(), json!(owner.into_iter().collect::<Vec<_>>()));
    Ok(doc)
}

fn finalize_deposit(mut doc: Document, ctx: &MigrationContext<'_>) -> Result<Document> {
    doc.insert("recid".into(), ctx.recid.to_json());
    doc.insert(SCHEMA_KEY.into(), json!(ctx.config.deposit_schema));
    Ok(doc)
}

fn finalize_record(mut doc: Document, ctx: &MigrationContext<'_>) -> Result<Document> {
    doc.insert("recid".into(), ctx.recid.to_json());
    doc.insert(SCHEMA_KEY.into(), json!(ctx.config.record_schema));
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use crate::domain::{DocumentId, LegacyDocument, Recid};
    use chrono::{TimeZone, Utc};

    fn run(
        legacy: serde_json::Value,
        kind: DocumentKind,
        category: Option<Category>,
        config: &MigrationConfig,
    ) -> Document {
        let legacy = LegacyDocument::from_value(legacy).unwrap();
        let ctx = MigrationContext {
            config,
            document_id: DocumentId::generate(),
            kind,
            legacy: &legacy,
            category,
            recid: Recid::new(42),
            now: Utc.with_ymd_and_hms(2017, 6, 1, 12, 0, 0).unwrap(),
        };
        run_steps(&ctx).unwrap()
    }

    #[test]
    fn test_published_deposit_bookkeeping() {
        let config = MigrationConfig::default();
        let out = run(
            json!({
                "owner": {"id": "7"},
                "recid": "42",
                "sips": [{"metadata": {"recid": 42}}]
            }),
            DocumentKind::Deposit,
            Some(Category::Published),
            &config,
        );
        assert_eq!(out["owners"], json!([7]));
        assert_eq!(out["_deposit"]["owners"], json!([7]));
        assert_eq!(out["_deposit"]["status"], json!("published"));
        assert_eq!(out["_deposit"]["pid"], json!({"type": "recid", "value": "42"}));
        assert_eq!(out["recid"], json!(42));
        assert_eq!(out[SCHEMA_KEY], json!(config.deposit_schema));
    }

    #[test]
    fn test_draft_deposit_merges_open_draft() {
        let config = MigrationConfig {
            extra_owners: vec![1, 7],
            ..MigrationConfig::default()
        };
        let out = run(
            json!({
                "_p": {"id": 12, "user_id": 7, "modified": "2017-05-01T10:00:00"},
                "sips": [{"metadata": {"recid": 42, "doi": "10.5281/zenodo.42"}}],
                "drafts": {"simple": {"values": {"title": "Draft title"}, "completed": false}}
            }),
            DocumentKind::Deposit,
            Some(Category::Draft),
            &config,
        );
        assert_eq!(out["title"], json!("Draft title"));
        assert_eq!(out["doi"], json!("10.5281/zenodo.42"));
        assert_eq!(out["_deposit"]["status"], json!("draft"));
        assert_eq!(out["_deposit"]["owners"], json!([7, 1]));
        assert_eq!(out["_deposit"]["id"], json!("12"));
        assert_eq!(out["_deposit"]["submitted"], json!("2017-05-01T10:00:00"));
        assert!(out["_deposit"].get("pid").is_none());
    }

    #[test]
    fn test_deposit_drops_legacy_fields() {
        let config = MigrationConfig::default();
        let out = run(
            json!({
                "_p": {"id": 13, "user_id": 7},
                "title": "legacy title",
                "_files": [{"key": "a.pdf"}],
                "sips": [{"metadata": {"recid": 42}}]
            }),
            DocumentKind::Deposit,
            Some(Category::Published),
            &config,
        );
        assert!(out.get("title").is_none());
        assert!(out.get("_files").is_none());
        let mut keys: Vec<&str> = out.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![SCHEMA_KEY, "_deposit", "owners", "recid"]);
    }

    #[test]
    fn test_record_nulls_flattened() {
        let config = MigrationConfig::default();
        let out = run(
            json!({"recid": 42, "title": null, "tags": [null, "x"]}),
            DocumentKind::Record,
            None,
            &config,
        );
        assert_eq!(out["title"], json!(""));
        assert_eq!(out["tags"], json!(["", "x"]));
        assert_eq!(out[SCHEMA_KEY], json!(config.record_schema));
    }
}
