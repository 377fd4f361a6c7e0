//! Error taxonomy of the mirror engine.
//!
//! Collaborators (fetcher, storage, publisher) report boxed errors; the engine wraps them
//! into [`MirrorError`] together with the operation and the resource they concern.

use thiserror::Error;

use crate::descriptor::Category;

/// Boxed error returned by collaborator implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("fetching {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("storage `{operation}` on {path} failed: {source}")]
    Storage {
        operation: &'static str,
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("publishing {name} failed: {source}")]
    Publish {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("cannot parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("index page {url} yielded no rows")]
    EmptyIndex { url: String },

    #[error("reconciling {prefix} failed: {source}")]
    Reconcile {
        prefix: String,
        #[source]
        source: BoxError,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown resource category `{0}`")]
    UnknownCategory(String),

    #[error("no downloader for {category} resource `{name}`")]
    Unroutable { category: Category, name: String },

    #[error("malformed queue message: {0}")]
    MalformedMessage(String),

    #[error("queue worker failed: {0}")]
    Worker(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<MirrorError>,
    },
}

impl MirrorError {
    /// Wraps the error with the operation/resource it happened in.
    pub fn context(self, context: impl Into<String>) -> Self {
        MirrorError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Errors that mean the producer and consumer disagree on the message format.
    /// There is no local recovery: the consuming process must stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            MirrorError::UnknownCategory(_)
            | MirrorError::Unroutable { .. }
            | MirrorError::MalformedMessage(_) => true,
            MirrorError::Context { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            MirrorError::Cancelled { .. } => true,
            MirrorError::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
