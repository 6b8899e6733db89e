//! Document Classifier
//!
//! Decides which transform sequence a legacy deposit runs, from its submission
//! packages and open draft blocks. An open draft is a draft block whose form was
//! never completed.

use crate::config::StaleDraftPolicy;
use crate::domain::{LegacyDocument, LineageError, Result};
use chrono::NaiveDate;
use std::fmt;

/// Migration category of a deposit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Submitted and public
    Published,
    /// Carries one open draft that becomes the active draft payload
    Draft,
    /// Never submitted
    New,
}

impl Category {
    /// Value of `_deposit.status` for this category
    pub fn deposit_status(&self) -> &'static str {
        match self {
            Category::Published => "published",
            Category::Draft | Category::New => "draft",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Published => "published",
            Category::Draft => "draft",
            Category::New => "new",
        };
        f.write_str(name)
    }
}

/// Classifies a legacy deposit
///
/// - no open draft: `Published`, or `New` when nothing was ever submitted
/// - one open draft: `Draft`, whatever its age
/// - several open drafts: `Published` when the deposit was last modified strictly
///   more than `policy.threshold_days` before `today` and the policy allows it,
///   otherwise ambiguous
///
/// # Errors
///
/// [`LineageError::AmbiguousLegacyState`] when several drafts are open and the
/// stale-draft rule does not apply (including when the modification date is
/// unknown), and [`LineageError::LegacyInvariant`] for an unparseable date.
pub fn classify(
    doc: &LegacyDocument,
    policy: &StaleDraftPolicy,
    today: NaiveDate,
) -> Result<Category> {
    let open: Vec<&str> = doc
        .drafts
        .iter()
        .filter(|(_, draft)| !draft.completed)
        .map(|(draft_type, _)| draft_type.as_str())
        .collect();

    match open.len() {
        0 if doc.sips.is_empty() => Ok(Category::New),
        0 => Ok(Category::Published),
        1 => Ok(Category::Draft),
        n => {
            let modified = match &doc.deposit {
                Some(deposit) => deposit.modified_date()?,
                None => None,
            };
            let Some(modified) = modified else {
                return Err(LineageError::ambiguous(
                    doc.label(),
                    format!("{n} open drafts ({}) and no modification date", open.join(", ")),
                ));
            };
            let age_days = (today - modified).num_days();
            if policy.treat_as_published && age_days > policy.threshold_days {
                tracing::debug!(
                    document = %doc.label(),
                    open_drafts = n,
                    age_days,
                    "Stale open drafts, treating deposit as published"
                );
                Ok(Category::Published)
            } else {
                Err(LineageError::ambiguous(
                    doc.label(),
                    format!(
                        "{n} open drafts ({}) last modified {age_days} days ago",
                        open.join(", ")
                    ),
                ))
            }
        }
    }
}
