//! Single entry point for every discovered resource.
//!
//! [`route`] is a total function from a descriptor's category and payload shape to the
//! handler that downloads it. [`Dispatcher`] runs that handler, and, being the
//! [`FanOut`] of every container it expands, either recurses inline or publishes each
//! child as one queue message.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::MirrorConfig;
use crate::contract::{Fetcher, Publisher, Storage};
use crate::descriptor::{Category, ResourceDescriptor};
use crate::download::{ContainerDownloader, ExpandReport, LeafDownloader, LeafKind, LeafOutcome};
use crate::error::MirrorError;
use crate::queue::QueueMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Leaf(LeafKind),
    Container,
}

/// Maps `(category, has document options)` to a handler. Index pages have none.
pub fn handler_for(category: Category, has_document_options: bool) -> Option<Handler> {
    match category {
        Category::Attachment | Category::AttachmentDocument if has_document_options => {
            Some(Handler::Leaf(LeafKind::Document))
        }
        Category::Attachment | Category::AttachmentDocument => {
            Some(Handler::Leaf(LeafKind::Attachment))
        }
        Category::Session | Category::AgendaItem | Category::Proposal => Some(Handler::Container),
        Category::SessionList | Category::ProposalList => None,
    }
}

/// Handler for `resource`. Calendar placeholders and index pages are unroutable.
pub fn route(resource: &ResourceDescriptor) -> Result<Handler, MirrorError> {
    let unroutable = || MirrorError::Unroutable {
        category: resource.category(),
        name: resource.name().to_string(),
    };
    if resource.is_placeholder() {
        return Err(unroutable());
    }
    handler_for(resource.category(), resource.has_document_options()).ok_or_else(unroutable)
}

/// Hands a batch of freshly discovered descriptors on for processing.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FanOut: Send + Sync {
    /// Returns how many descriptors were handed on.
    async fn fan_out(
        &self,
        batch: Vec<ResourceDescriptor>,
        cancel: &CancellationToken,
    ) -> Result<usize, MirrorError>;
}

/// How a [`Dispatcher`] fans out children.
#[derive(Clone)]
pub enum FanOutMode {
    /// Depth-first, in the caller's task. The first failing child aborts the batch.
    Inline,
    /// One message per child.
    Queue(Arc<dyn Publisher>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Leaf(LeafOutcome),
    Container(ExpandReport),
}

pub struct Dispatcher {
    leaf: LeafDownloader,
    container: ContainerDownloader,
    mode: FanOutMode,
}

impl Dispatcher {
    pub fn new(
        config: Arc<MirrorConfig>,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn Storage>,
        mode: FanOutMode,
    ) -> Self {
        Self {
            leaf: LeafDownloader::new(config.clone(), fetcher.clone(), storage.clone()),
            container: ContainerDownloader::new(config, fetcher, storage),
            mode,
        }
    }

    pub async fn dispatch(
        &self,
        resource: &ResourceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, MirrorError> {
        let handler = route(resource)?;
        debug!(resource = %resource, ?handler, "[DISPATCH] Routing");
        let outcome = match handler {
            Handler::Leaf(kind) => self
                .leaf
                .download(kind, resource, cancel)
                .await
                .map(DispatchOutcome::Leaf),
            Handler::Container => self
                .container
                .expand(resource, self, cancel)
                .await
                .map(DispatchOutcome::Container),
        };
        outcome.map_err(|e| e.context(format!("dispatching {resource}")))
    }

    /// Consumer side of the queue: decodes one message and dispatches it.
    pub async fn dispatch_message(
        &self,
        message: &[u8],
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, MirrorError> {
        let resource = QueueMessage::decode(message)?;
        self.dispatch(&resource, cancel).await
    }
}

#[async_trait]
impl FanOut for Dispatcher {
    async fn fan_out(
        &self,
        batch: Vec<ResourceDescriptor>,
        cancel: &CancellationToken,
    ) -> Result<usize, MirrorError> {
        let count = batch.len();
        match &self.mode {
            FanOutMode::Inline => {
                for resource in &batch {
                    if cancel.is_cancelled() {
                        return Err(MirrorError::Cancelled {
                            operation: format!("inline dispatch of {resource}"),
                        });
                    }
                    self.dispatch(resource, cancel).await?;
                }
            }
            FanOutMode::Queue(publisher) => {
                for resource in &batch {
                    publisher.publish(resource).await.map_err(|source| {
                        error!(resource = %resource, error = %source, "[DISPATCH] Publish failed");
                        MirrorError::Publish {
                            name: resource.name().to_string(),
                            source,
                        }
                    })?;
                }
            }
        }
        info!(count, "[DISPATCH] Fanned out");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn routing_table_is_total_over_categories() {
        for category in Category::ALL {
            for options in [false, true] {
                let handler = handler_for(category, options);
                match category {
                    Category::SessionList | Category::ProposalList => assert!(handler.is_none()),
                    Category::Session | Category::AgendaItem | Category::Proposal => {
                        assert_eq!(handler, Some(Handler::Container))
                    }
                    Category::Attachment | Category::AttachmentDocument => assert_eq!(
                        handler,
                        Some(Handler::Leaf(if options {
                            LeafKind::Document
                        } else {
                            LeafKind::Attachment
                        }))
                    ),
                }
            }
        }
    }

    #[test]
    fn placeholders_and_index_pages_are_unroutable() {
        let created = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let placeholder = ResourceDescriptor::placeholder(Category::Session, "Holiday", created);
        let index = ResourceDescriptor::new(
            Category::SessionList,
            "all-sessions",
            ".html",
            created,
            "https://ris.example.org/bi/si0046.asp",
        );
        for resource in [placeholder, index] {
            let err = route(&resource).unwrap_err();
            assert!(matches!(err, MirrorError::Unroutable { .. }));
            assert!(err.is_fatal());
        }
    }

    #[tokio::test]
    async fn queue_mode_publishes_one_message_per_child() {
        let mut publisher = crate::contract::MockPublisher::new();
        publisher.expect_publish().times(2).returning(|_| Ok(()));
        let dispatcher = Dispatcher::new(
            Arc::new(MirrorConfig::default()),
            Arc::new(crate::contract::MockFetcher::new()),
            Arc::new(crate::contract::MockStorage::new()),
            FanOutMode::Queue(Arc::new(publisher)),
        );
        let created = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let batch = vec![
            ResourceDescriptor::new(Category::Proposal, "proposal-1", ".html", created, "u1"),
            ResourceDescriptor::new(Category::Proposal, "proposal-2", ".html", created, "u2"),
        ];
        let count = dispatcher
            .fan_out(batch, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
