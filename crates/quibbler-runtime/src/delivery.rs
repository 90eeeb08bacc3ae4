//! Feedback delivery for the asynchronous path.
//!
//! [`FileFeedbackSink`] writes `<project>/.quibbler/<key>.txt` atomically
//! (temp file in the same directory, then rename). [`Dispatcher`] runs each
//! event as a tracked background task and hands the caller a
//! [`DeliveryTicket`] that resolves once the write (or the decision not to
//! write) has happened.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use quibbler_core::{InboundEvent, ReviewReply, paths};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::{EventOutcome, ReviewEngine};
use crate::errors::RuntimeError;

/// Text written when a flag carries no explanation.
const BARE_FLAG_TEXT: &str = "Quibbler flagged the latest change but gave no details.";

// =============================================================================
// Sink
// =============================================================================

/// Destination for flagged reviews.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    /// Persist `reply` for `context_key`. Returns where it was written.
    async fn deliver(
        &self,
        project_root: &Path,
        context_key: &str,
        reply: &ReviewReply,
    ) -> Result<PathBuf, RuntimeError>;
}

/// Writes feedback files under the project's `.quibbler` directory.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileFeedbackSink;

#[async_trait]
impl FeedbackSink for FileFeedbackSink {
    async fn deliver(
        &self,
        project_root: &Path,
        context_key: &str,
        reply: &ReviewReply,
    ) -> Result<PathBuf, RuntimeError> {
        let path = paths::feedback_path(project_root, context_key);
        let text = if reply.feedback_text.trim().is_empty() {
            BARE_FLAG_TEXT
        } else {
            reply.feedback_text.as_str()
        };
        write_atomic(&path, text)
            .await
            .map_err(|source| RuntimeError::FeedbackWrite {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), bytes = text.len(), "feedback written");
        Ok(path)
    }
}

async fn write_atomic(path: &Path, text: &str) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("feedback path has no parent directory"))?;
    tokio::fs::create_dir_all(dir).await?;
    let tmp = dir.join(format!(".feedback-{}.tmp", Uuid::now_v7()));
    if let Err(error) = tokio::fs::write(&tmp, text).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(error);
    }
    if let Err(error) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(error);
    }
    Ok(())
}

// =============================================================================
// Dispatcher
// =============================================================================

/// How an asynchronously processed event ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Feedback was written to this path.
    Written(PathBuf),
    /// Nothing to deliver (skipped, record-only, or approved).
    NoFeedback,
    /// Processing or the write failed.
    Failed(String),
}

/// Completion signal for one submitted event.
#[derive(Debug)]
pub struct DeliveryTicket {
    rx: oneshot::Receiver<DeliveryStatus>,
}

impl DeliveryTicket {
    /// Wait for the event to be fully processed.
    pub async fn wait(self) -> DeliveryStatus {
        self.rx
            .await
            .unwrap_or_else(|_| DeliveryStatus::Failed("delivery task was dropped".into()))
    }
}

/// Runs events in the background and tracks the tasks for draining.
pub struct Dispatcher {
    engine: Arc<ReviewEngine>,
    sink: Arc<dyn FeedbackSink>,
    tasks: Mutex<JoinSet<()>>,
    pending: Arc<AtomicUsize>,
}

impl Dispatcher {
    /// Create a dispatcher delivering through `sink`.
    pub fn new(engine: Arc<ReviewEngine>, sink: Arc<dyn FeedbackSink>) -> Self {
        Self {
            engine,
            sink,
            tasks: Mutex::new(JoinSet::new()),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Engine this dispatcher feeds.
    pub fn engine(&self) -> &Arc<ReviewEngine> {
        &self.engine
    }

    /// Queue `event` for background processing. Never waits.
    ///
    /// Events for the same key are processed in submission order.
    pub fn submit(&self, event: InboundEvent) -> DeliveryTicket {
        let (tx, rx) = oneshot::channel();
        let slot = self
            .engine
            .registry()
            .get_or_create(&event.context_key, &event.project_root);
        let mut position = slot.enqueue();

        let engine = Arc::clone(&self.engine);
        let sink = Arc::clone(&self.sink);
        let pending = Arc::clone(&self.pending);
        let _ = pending.fetch_add(1, Ordering::Relaxed);

        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            log_join_error(result);
        }
        let _ = tasks.spawn(async move {
            position.ready().await;
            let key = event.context_key.clone();
            let status = match engine.handle_and_deliver(event, sink.as_ref()).await {
                Ok(EventOutcome::Reviewed(report)) => {
                    report.delivery.unwrap_or(DeliveryStatus::NoFeedback)
                }
                Ok(EventOutcome::Skipped | EventOutcome::Recorded) => DeliveryStatus::NoFeedback,
                Err(error) => {
                    warn!(context_key = %key, %error, category = error.category(), "event processing failed");
                    DeliveryStatus::Failed(error.to_string())
                }
            };
            drop(position);
            drop(slot);
            let _ = tx.send(status);
            let _ = pending.fetch_sub(1, Ordering::Relaxed);
        });
        DeliveryTicket { rx }
    }

    /// Approximate number of events still in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Wait for every submitted event to finish.
    pub async fn drain_all(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            log_join_error(result);
        }
    }

    /// [`Self::drain_all`] bounded by `timeout`. Returns `false` on timeout.
    pub async fn drain_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.drain_all()).await.is_ok()
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        warn!(%error, "delivery task panicked");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending_count", &self.pending_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_sink_writes_feedback() {
        let dir = TempDir::new().unwrap();
        let path = FileFeedbackSink
            .deliver(dir.path(), "sess-1", &ReviewReply::flag("1. Run the tests"))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join(".quibbler/sess-1.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1. Run the tests");
    }

    #[tokio::test]
    async fn file_sink_overwrites_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let sink = FileFeedbackSink;
        let _ = sink.deliver(dir.path(), "s", &ReviewReply::flag("first")).await.unwrap();
        let path = sink.deliver(dir.path(), "s", &ReviewReply::flag("second")).await.unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "second");
        let names: Vec<String> = std::fs::read_dir(dir.path().join(".quibbler"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["s.txt"]);
    }

    #[tokio::test]
    async fn bare_flag_gets_placeholder_text() {
        let dir = TempDir::new().unwrap();
        let path = FileFeedbackSink
            .deliver(dir.path(), "s", &ReviewReply::flag(""))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), BARE_FLAG_TEXT);
    }

    #[tokio::test]
    async fn unwritable_project_is_feedback_write_error() {
        let dir = TempDir::new().unwrap();
        // A file where the .quibbler directory should be.
        std::fs::write(dir.path().join(".quibbler"), "").unwrap();
        let err = FileFeedbackSink
            .deliver(dir.path(), "s", &ReviewReply::flag("x"))
            .await
            .unwrap_err();
        assert_matches!(err, RuntimeError::FeedbackWrite { .. });
    }

    #[tokio::test]
    async fn dropped_ticket_sender_reports_failure() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        assert_matches!(DeliveryTicket { rx }.wait().await, DeliveryStatus::Failed(_));
    }
}
