use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::fetch_resource;
use crate::change::{fingerprint, read_stored, write_if_changed};
use crate::config::MirrorConfig;
use crate::contract::{content_type, Fetcher, HttpMethod, Storage};
use crate::descriptor::ResourceDescriptor;
use crate::error::MirrorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    /// Plain GET of a stored file, any content type.
    Attachment,
    /// Rendered on request by POSTing the descriptor's form payload.
    Document,
}

impl LeafKind {
    fn method(self) -> HttpMethod {
        match self {
            LeafKind::Attachment => HttpMethod::Get,
            LeafKind::Document => HttpMethod::Post,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            LeafKind::Attachment => content_type::ANY,
            LeafKind::Document => content_type::PDF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafOutcome {
    Written,
    /// Fetched, but identical to the stored copy (or older than it).
    Unchanged,
    /// Not fetched: the stored copy is at least as recent and no redownload was asked for.
    Current,
}

pub struct LeafDownloader {
    config: Arc<MirrorConfig>,
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn Storage>,
}

impl LeafDownloader {
    pub fn new(
        config: Arc<MirrorConfig>,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            config,
            fetcher,
            storage,
        }
    }

    /// Fetches one leaf and writes it when changed. Every fetch or storage failure is
    /// returned; leaves have no fallback.
    pub async fn download(
        &self,
        kind: LeafKind,
        resource: &ResourceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<LeafOutcome, MirrorError> {
        let path = resource.storage_path(&self.config.folders);
        let stored = read_stored(self.storage.as_ref(), &path).await?;

        if let Some(stored) = &stored {
            if !resource.redownload() && stored.created >= resource.created() {
                debug!(path = %path, "[LEAF] Stored copy is current, not fetching");
                return Ok(LeafOutcome::Current);
            }
        }

        let content = fetch_resource(
            self.fetcher.as_ref(),
            kind.method(),
            resource,
            kind.content_type(),
            cancel,
        )
        .await?;

        let written = write_if_changed(
            self.storage.as_ref(),
            &path,
            &content,
            &fingerprint(&content),
            resource.created(),
            stored.as_ref(),
        )
        .await?;

        info!(path = %path, ?kind, bytes = content.len(), written, "[LEAF] Downloaded");
        Ok(if written {
            LeafOutcome::Written
        } else {
            LeafOutcome::Unchanged
        })
    }
}
