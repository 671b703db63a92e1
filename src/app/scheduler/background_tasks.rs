//! Background task management for the scheduler
//!
//! Three long-running tasks serve a scheduler: the drain worker, the update
//! feed dispatcher and the optional periodic janitor. Each holds only a weak
//! reference to the scheduler and stops on the shared shutdown broadcast or
//! once the scheduler is dropped.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{executor, feed, Inner};
use crate::app::models::FileUpdate;

/// Owns the scheduler's spawned tasks
#[derive(Debug, Default)]
pub struct BackgroundTaskManager {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the worker that drains the queue whenever a slot may have freed
    pub(crate) fn start_drain_task(
        &mut self,
        inner: Weak<Inner>,
        signal: Arc<Notify>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        let Some(inner) = inner.upgrade() else { break };
                        executor::drain(&inner).await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Drain task received shutdown signal");
                        break;
                    }
                }
            }
        });

        self.tasks.push(("drain", task));
    }

    /// Start the dispatcher that routes backend updates to tracked downloads
    pub(crate) fn start_feed_task(
        &mut self,
        inner: Weak<Inner>,
        mut updates: broadcast::Receiver<FileUpdate>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = updates.recv() => {
                        let Some(inner) = inner.upgrade() else { break };
                        match received {
                            Ok(update) => feed::handle_update(&inner, update).await,
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                feed::handle_lag(&inner, missed).await;
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                info!("Backend update feed closed");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Feed task received shutdown signal");
                        break;
                    }
                }
            }
        });

        self.tasks.push(("feed", task));
    }

    /// Start the periodic cache janitor
    ///
    /// Failures are logged and the next pass runs on schedule.
    pub(crate) fn start_janitor_task(
        &mut self,
        inner: Weak<Inner>,
        period: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        match inner.run_janitor().await {
                            Ok(report) => {
                                if let Some(bytes) = report.requested_bytes {
                                    info!("Janitor requested eviction of {} bytes", bytes);
                                }
                            }
                            Err(e) => warn!("Janitor pass failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Janitor task received shutdown signal");
                        break;
                    }
                }
            }
        });

        self.tasks.push(("janitor", task));
    }

    /// Wait for every task to stop, giving each at most `timeout`
    pub async fn shutdown_all(self, timeout: Duration) {
        debug!("Initiating background task shutdown");

        for (name, task) in self.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!("{} task shutdown timed out after {:?}, aborting", name, timeout);
                abort.abort();
            }
        }

        debug!("All background tasks shutdown complete");
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}
