//! # contract: the collaborators the engine talks to
//!
//! The engine never opens a socket, touches a file or talks to a message broker itself.
//! It goes through three narrow traits:
//!
//! - [`Fetcher`]: one HTTP request per call, validated against an expected content type.
//! - [`Storage`]: existence checks, reads, guarded writes and prefix-scoped deletion.
//! - [`Publisher`]: hands one descriptor to an asynchronous work queue.
//!
//! Retry, timeout and delivery policies belong to the implementations.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall` (behind `test-export-mocks`, on by default),
//!   so integration tests can script portal responses and assert on publish calls.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use tokio_util::sync::CancellationToken;

use crate::descriptor::ResourceDescriptor;
use crate::error::BoxError;

pub type FetchError = BoxError;
pub type StorageError = BoxError;
pub type PublishError = BoxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    /// Form-encoded POST of the descriptor's form payload.
    Post,
}

/// Content types the engine asks for.
pub mod content_type {
    pub const HTML: &str = "text/html";
    pub const PDF: &str = "application/pdf";
    pub const ANY: &str = "*";
}

/// A stored copy as the storage backend knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResource {
    pub path: String,
    pub content: Vec<u8>,
    pub fingerprint: String,
    /// `created` of the descriptor the copy was written from.
    pub created: DateTime<Utc>,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the body of `resource`. Implementations must abort promptly once `cancel`
    /// fires and reject responses whose content type does not match `expected_content_type`
    /// (`"*"` accepts anything).
    async fn fetch(
        &self,
        method: HttpMethod,
        resource: &ResourceDescriptor,
        expected_content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Returns `None` when nothing is stored at `path`.
    async fn read(&self, path: &str) -> Result<Option<StoredResource>, StorageError>;

    /// Writes `content` unless the stored copy is strictly newer than `created`.
    async fn write_if_newer(
        &self,
        path: &str,
        content: &[u8],
        fingerprint: &str,
        created: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Deletes every stored path that starts with `prefix`, is not in `keep`, does not
    /// start with one of `excluded`, and (when `not_before` is set) was created at or
    /// after `not_before`. Returns the deleted paths.
    async fn delete_tree_except(
        &self,
        prefix: &str,
        keep: &HashSet<String>,
        excluded: &[String],
        not_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>, StorageError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Enqueues one descriptor as one message.
    async fn publish(&self, resource: &ResourceDescriptor) -> Result<(), PublishError>;
}
