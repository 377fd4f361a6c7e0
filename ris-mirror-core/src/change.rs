//! Change detection: decides whether freshly fetched content has to be written.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::contract::{Storage, StoredResource};
use crate::error::MirrorError;

/// Content fingerprint of raw bytes.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of an HTML page with its anchor tags removed (their text is kept).
/// Portal links embed per-request tokens that would otherwise change the hash on every fetch.
pub fn page_fingerprint(html: &str) -> String {
    static ANCHOR_TAG: OnceLock<Regex> = OnceLock::new();
    let anchor = ANCHOR_TAG.get_or_init(|| {
        Regex::new(r"(?is)</?a(?:\s[^>]*)?>").expect("anchor tag pattern is valid")
    });
    fingerprint(anchor.replace_all(html, "").as_bytes())
}

/// Write when nothing is stored yet, or when the candidate is not older than the stored
/// copy and its fingerprint differs. Strictly older content is never written.
pub fn should_persist(
    candidate_fingerprint: &str,
    candidate_created: DateTime<Utc>,
    stored: Option<&StoredResource>,
) -> bool {
    match stored {
        None => true,
        Some(stored) => {
            candidate_created >= stored.created && candidate_fingerprint != stored.fingerprint
        }
    }
}

/// Reads the stored copy at `path` and writes `content` if [`should_persist`] says so.
/// Returns whether a write happened.
pub async fn persist_if_changed(
    storage: &dyn Storage,
    path: &str,
    content: &[u8],
    fingerprint: &str,
    created: DateTime<Utc>,
) -> Result<bool, MirrorError> {
    let stored = read_stored(storage, path).await?;
    write_if_changed(storage, path, content, fingerprint, created, stored.as_ref()).await
}

pub async fn read_stored(
    storage: &dyn Storage,
    path: &str,
) -> Result<Option<StoredResource>, MirrorError> {
    storage
        .read(path)
        .await
        .map_err(|source| MirrorError::Storage {
            operation: "read",
            path: path.to_string(),
            source,
        })
}

/// Like [`persist_if_changed`], for callers that already hold the stored copy.
pub async fn write_if_changed(
    storage: &dyn Storage,
    path: &str,
    content: &[u8],
    fingerprint: &str,
    created: DateTime<Utc>,
    stored: Option<&StoredResource>,
) -> Result<bool, MirrorError> {
    if !should_persist(fingerprint, created, stored) {
        debug!(path, "Stored copy is current, skipping write");
        return Ok(false);
    }

    storage
        .write_if_newer(path, content, fingerprint, created)
        .await
        .map_err(|source| MirrorError::Storage {
            operation: "write",
            path: path.to_string(),
            source,
        })?;
    debug!(path, bytes = content.len(), "Wrote resource");
    Ok(true)
}
