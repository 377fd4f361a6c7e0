//! Fetch-and-store for single resources.
//!
//! [`LeafDownloader`] handles terminal resources (attachments and attachment documents).
//! [`ContainerDownloader`] handles pages that list further children: it stores the page,
//! extracts the children, hands them to a [`FanOut`](crate::dispatch::FanOut) and
//! reconciles the container's namespace afterwards.

mod container;
mod leaf;

pub use container::{ContainerDownloader, ExpandReport};
pub use leaf::{LeafDownloader, LeafKind, LeafOutcome};

use tokio_util::sync::CancellationToken;

use crate::contract::{Fetcher, HttpMethod};
use crate::descriptor::ResourceDescriptor;
use crate::error::MirrorError;

/// One fetch through the collaborator. A failure after `cancel` fired is reported as
/// [`MirrorError::Cancelled`] so callers can tell an abort from a broken portal.
pub(crate) async fn fetch_resource(
    fetcher: &dyn Fetcher,
    method: HttpMethod,
    resource: &ResourceDescriptor,
    expected_content_type: &str,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, MirrorError> {
    if cancel.is_cancelled() {
        return Err(MirrorError::Cancelled {
            operation: format!("fetching {resource}"),
        });
    }
    fetcher
        .fetch(method, resource, expected_content_type, cancel)
        .await
        .map_err(|source| {
            if cancel.is_cancelled() {
                MirrorError::Cancelled {
                    operation: format!("fetching {resource}"),
                }
            } else {
                MirrorError::Fetch {
                    url: resource.request_uri().to_string(),
                    source,
                }
            }
        })
}
