//! In-process asynchronous work queue.
//!
//! Every message is one JSON-encoded [`ResourceDescriptor`]. [`QueuePublisher`] is the
//! producer half handed to the dispatcher as its fan-out target, [`WorkQueue::run`] starts
//! the consumers. The run ends when no message is pending any more: children are published
//! before their parent's message completes, so the count only reaches zero once the whole
//! tree has been processed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::contract::{PublishError, Publisher};
use crate::descriptor::{Category, ResourceDescriptor};
use crate::dispatch::Dispatcher;
use crate::error::MirrorError;

/// Wire format of one queue message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Kept as text so that a producer with a newer category set is detected on decode.
    pub category: String,
    pub name: String,
    #[serde(default)]
    pub extension: String,
    pub created: DateTime<Utc>,
    pub request_uri: String,
    #[serde(default)]
    pub form_payload: Vec<(String, String)>,
    #[serde(default)]
    pub redownload: bool,
}

impl QueueMessage {
    pub fn from_descriptor(resource: &ResourceDescriptor) -> Self {
        Self {
            category: resource.category().as_str().to_string(),
            name: resource.name().to_string(),
            extension: resource.extension().to_string(),
            created: resource.created(),
            request_uri: resource.request_uri().to_string(),
            form_payload: resource.form_payload().to_vec(),
            redownload: resource.redownload(),
        }
    }

    pub fn into_descriptor(self) -> Result<ResourceDescriptor, MirrorError> {
        let category: Category = self.category.parse()?;
        Ok(ResourceDescriptor::new(
            category,
            self.name,
            self.extension,
            self.created,
            self.request_uri,
        )
        .with_form_payload(self.form_payload)
        .with_redownload(self.redownload))
    }

    pub fn encode(resource: &ResourceDescriptor) -> Result<Vec<u8>, MirrorError> {
        serde_json::to_vec(&Self::from_descriptor(resource))
            .map_err(|e| MirrorError::MalformedMessage(e.to_string()))
    }

    pub fn decode(message: &[u8]) -> Result<ResourceDescriptor, MirrorError> {
        serde_json::from_slice::<Self>(message)
            .map_err(|e| MirrorError::MalformedMessage(e.to_string()))?
            .into_descriptor()
    }
}

/// Outcome of one [`WorkQueue::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueReport {
    pub processed: usize,
    /// Messages whose dispatch failed without being fatal. Each was logged.
    pub failed: usize,
}

impl std::ops::AddAssign for QueueReport {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.failed += other.failed;
    }
}

pub struct WorkQueue {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    pending: Arc<AtomicUsize>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publisher(&self) -> QueuePublisher {
        QueuePublisher {
            sender: self.sender.clone(),
            pending: self.pending.clone(),
        }
    }

    /// Messages published but not yet fully processed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Consumes messages with `workers` concurrent consumers until none is pending.
    ///
    /// A fatal dispatch error (undecodable message, unknown or unroutable category) stops
    /// every consumer and is returned. Other failures are logged and counted.
    pub async fn run(
        &self,
        dispatcher: Arc<Dispatcher>,
        workers: usize,
        cancel: &CancellationToken,
    ) -> Result<QueueReport, MirrorError> {
        if self.pending() == 0 {
            info!("[QUEUE] Nothing to process");
            return Ok(QueueReport::default());
        }

        let stop = cancel.child_token();
        info!(workers, pending = self.pending(), "[QUEUE] Starting consumers");
        let handles: Vec<_> = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(consume(
                    worker,
                    self.receiver.clone(),
                    self.pending.clone(),
                    dispatcher.clone(),
                    cancel.clone(),
                    stop.clone(),
                ))
            })
            .collect();

        let mut report = QueueReport::default();
        let mut fatal = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(tally)) => report += tally,
                Ok(Err(e)) => {
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    fatal.get_or_insert(MirrorError::Worker(e.to_string()));
                }
            }
        }

        if let Some(e) = fatal {
            error!(error = %e, "[QUEUE] Stopped on fatal error");
            return Err(e);
        }
        if cancel.is_cancelled() {
            warn!(processed = report.processed, "[QUEUE] Cancelled");
            return Err(MirrorError::Cancelled {
                operation: "queue run".into(),
            });
        }
        info!(
            processed = report.processed,
            failed = report.failed,
            "[QUEUE] All messages processed"
        );
        Ok(report)
    }
}

async fn consume(
    worker: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    pending: Arc<AtomicUsize>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    stop: CancellationToken,
) -> Result<QueueReport, MirrorError> {
    // Also fires when this consumer panics, so its siblings never wait on a message
    // count that can no longer reach zero.
    let _stop_on_exit = stop.clone().drop_guard();
    let mut tally = QueueReport::default();
    loop {
        let message = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = stop.cancelled() => None,
                message = receiver.recv() => message,
            }
        };
        let Some(message) = message else {
            break;
        };

        match dispatcher.dispatch_message(&message, &cancel).await {
            Ok(outcome) => {
                debug!(worker, ?outcome, "[QUEUE] Message processed");
                tally.processed += 1;
            }
            Err(e) if e.is_fatal() => {
                error!(worker, error = %e, "[QUEUE] Fatal message, stopping all consumers");
                stop.cancel();
                return Err(e);
            }
            Err(e) => {
                warn!(worker, error = %e, "[QUEUE] Message failed");
                tally.failed += 1;
            }
        }

        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!(worker, "[QUEUE] Queue drained");
            stop.cancel();
        }
    }
    Ok(tally)
}

/// Producer half of a [`WorkQueue`].
#[derive(Clone)]
pub struct QueuePublisher {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    pending: Arc<AtomicUsize>,
}

#[async_trait]
impl Publisher for QueuePublisher {
    async fn publish(&self, resource: &ResourceDescriptor) -> Result<(), PublishError> {
        let message = QueueMessage::encode(resource)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.sender.send(message) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(format!("queue closed: {e}").into());
        }
        debug!(resource = %resource, "[QUEUE] Published");
        Ok(())
    }
}
