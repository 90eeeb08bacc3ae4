//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use quibbler_runtime::Dispatcher;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Coordinates shutdown of the listener, the sweeper, and in-flight reviews.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve on Ctrl-C (or SIGTERM on Unix), or when shutdown is initiated
    /// some other way. Cancels the token either way.
    pub async fn wait_for_signal(&self) {
        tokio::select! {
            () = ctrl_c() => info!("shutdown signal received"),
            () = self.token.cancelled() => {}
        }
        self.shutdown();
    }

    /// Cancel the token, then give background deliveries and tracked tasks
    /// up to `timeout` in total to finish. Returns `false` on timeout; any
    /// task still running is aborted.
    pub async fn graceful_shutdown(
        &self,
        dispatcher: &Dispatcher,
        handles: Vec<JoinHandle<()>>,
        timeout: Duration,
    ) -> bool {
        self.shutdown();
        info!(
            pending_events = dispatcher.pending_count(),
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "draining before shutdown"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = async {
            dispatcher.drain_all().await;
            let _ = futures::future::join_all(handles).await;
        };
        if tokio::time::timeout(timeout, drain).await.is_ok() {
            return true;
        }
        warn!("shutdown timed out after {timeout:?}, abandoning in-flight work");
        for abort in aborts {
            abort.abort();
        }
        false
    }
}

#[cfg(unix)]
async fn ctrl_c() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(error) => {
            warn!(%error, "SIGTERM handler unavailable, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn ctrl_c() {
    let _ = tokio::signal::ctrl_c().await;
}
