//! Orphan deletion: removes stored items that the latest discovery pass no longer saw.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::contract::Storage;
use crate::error::MirrorError;

/// Storage paths discovered by one container or list expansion. Built fresh every time.
pub type ReconciliationSet = HashSet<String>;

/// What a storage backend knows about one stored path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub path: String,
    pub created: DateTime<Utc>,
}

/// Selects the entries to delete, sorted by path.
///
/// An entry is stale when it lies under `prefix`, is absent from `keep`, lies under none of
/// the `excluded` sub-folders and, with a floor set, was not created before `not_before`.
pub fn stale_paths<'a>(
    entries: impl IntoIterator<Item = &'a StoredEntry>,
    prefix: &str,
    keep: &HashSet<String>,
    excluded: &[String],
    not_before: Option<DateTime<Utc>>,
) -> Vec<String> {
    let mut stale: Vec<String> = entries
        .into_iter()
        .filter(|entry| entry.path.starts_with(prefix))
        .filter(|entry| !keep.contains(&entry.path))
        .filter(|entry| !excluded.iter().any(|folder| entry.path.starts_with(folder.as_str())))
        .filter(|entry| not_before.map_or(true, |floor| entry.created >= floor))
        .map(|entry| entry.path.clone())
        .collect();
    stale.sort();
    stale
}

/// Runs the deletion pass for one namespace. Refuses to run once `cancel` has fired:
/// a partial discovery must never delete what simply was not reached.
pub async fn reconcile(
    storage: &dyn Storage,
    prefix: &str,
    keep: &ReconciliationSet,
    excluded: &[String],
    not_before: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
) -> Result<Vec<String>, MirrorError> {
    if cancel.is_cancelled() {
        return Err(MirrorError::Cancelled {
            operation: format!("reconciliation of {prefix}"),
        });
    }

    let deleted = storage
        .delete_tree_except(prefix, keep, excluded, not_before)
        .await
        .map_err(|source| MirrorError::Reconcile {
            prefix: prefix.to_string(),
            source,
        })?;

    info!(
        prefix,
        kept = keep.len(),
        deleted = deleted.len(),
        "[RECONCILE] Removed stale resources"
    );
    Ok(deleted)
}
