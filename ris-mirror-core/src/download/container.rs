use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::fetch_resource;
use crate::change::{page_fingerprint, persist_if_changed};
use crate::config::MirrorConfig;
use crate::contract::{content_type, Fetcher, HttpMethod, Storage};
use crate::descriptor::{agenda_item_prefix, attachment_prefix, Category, ResourceDescriptor};
use crate::dispatch::FanOut;
use crate::error::MirrorError;
use crate::extract::extract_children;
use crate::reconcile::{reconcile, ReconciliationSet};

/// What one container expansion did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpandReport {
    pub path: String,
    /// The page was rewritten because its content changed.
    pub written: bool,
    pub children: usize,
    pub fanned_out: usize,
    pub deleted: Vec<String>,
}

pub struct ContainerDownloader {
    config: Arc<MirrorConfig>,
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn Storage>,
}

impl ContainerDownloader {
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

    /// Stores the container page, fans out its children and deletes the children stored
    /// earlier that the page no longer lists.
    ///
    /// Extraction runs on every expansion, also when the page itself is unchanged.
    /// Nothing is deleted unless the whole fan-out succeeded and `cancel` never fired.
    pub async fn expand(
        &self,
        resource: &ResourceDescriptor,
        fan_out: &dyn FanOut,
        cancel: &CancellationToken,
    ) -> Result<ExpandReport, MirrorError> {
        let folders = &self.config.folders;
        let path = resource.storage_path(folders);

        let body = fetch_resource(
            self.fetcher.as_ref(),
            HttpMethod::Get,
            resource,
            content_type::HTML,
            cancel,
        )
        .await?;
        let page = String::from_utf8_lossy(&body).into_owned();
        let written = persist_if_changed(
            self.storage.as_ref(),
            &path,
            &body,
            &page_fingerprint(&page),
            resource.created(),
        )
        .await?;

        let children = extract_children(&page, resource, &self.config.portal);
        let attachment_paths: ReconciliationSet = children
            .attachments
            .iter()
            .chain(&children.documents)
            .map(|child| child.storage_path(folders))
            .collect();
        let agenda_item_paths: ReconciliationSet = children
            .agenda_items
            .iter()
            .map(|child| child.storage_path(folders))
            .collect();

        let mut batch = children.attachments;
        batch.extend(children.documents);
        batch.extend(children.agenda_items);
        let child_count = batch.len();

        let fanned_out = fan_out
            .fan_out(batch, cancel)
            .await
            .map_err(|e| e.context(format!("fanning out children of {resource}")))?;

        if cancel.is_cancelled() {
            warn!(path = %path, "[EXPAND] Cancelled after fan-out, skipping reconciliation");
            return Err(MirrorError::Cancelled {
                operation: format!("expansion of {resource}"),
            });
        }

        let mut deleted = reconcile(
            self.storage.as_ref(),
            &format!("{}{}", folders.attachments, attachment_prefix(resource.name())),
            &attachment_paths,
            &[],
            None,
            cancel,
        )
        .await?;

        if resource.category() == Category::Session {
            deleted.extend(
                reconcile(
                    self.storage.as_ref(),
                    &format!("{}{}", folders.agenda_items, agenda_item_prefix(resource.name())),
                    &agenda_item_paths,
                    &[folders.attachments.clone()],
                    None,
                    cancel,
                )
                .await?,
            );
        }

        info!(
            path = %path,
            written,
            children = child_count,
            fanned_out,
            deleted = deleted.len(),
            "[EXPAND] Container expanded"
        );
        Ok(ExpandReport {
            path,
            written,
            children: child_count,
            fanned_out,
            deleted,
        })
    }
}
