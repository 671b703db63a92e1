//! Per-file progress fan-out
//!
//! Observers are indexed by handle so the feed dispatcher delivers each
//! update to exactly the watchers of that file.

use std::collections::HashMap;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{watch, RwLock};

use crate::app::models::{DownloadProgress, FileHandle};

/// Handle-keyed registry of progress channels
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    channels: RwLock<HashMap<FileHandle, watch::Sender<DownloadProgress>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `handle`, seeding a new channel with `initial`
    pub async fn subscribe(
        &self,
        handle: FileHandle,
        initial: DownloadProgress,
    ) -> watch::Receiver<DownloadProgress> {
        let mut channels = self.channels.write().await;
        channels
            .entry(handle)
            .or_insert_with(|| watch::channel(initial).0)
            .subscribe()
    }

    /// Push a new value to the watchers of `handle`
    ///
    /// A complete value closes the channel once delivered.
    pub async fn publish(&self, handle: FileHandle, progress: DownloadProgress) {
        if progress.complete {
            if let Some(sender) = self.channels.write().await.remove(&handle) {
                sender.send_replace(progress);
            }
            return;
        }

        if let Some(sender) = self.channels.read().await.get(&handle) {
            sender.send_replace(progress);
        }
    }

    /// Drop the channel for `handle`; open streams end
    pub async fn close(&self, handle: FileHandle) {
        self.channels.write().await.remove(&handle);
    }

    /// Drop every channel
    pub async fn close_all(&self) {
        self.channels.write().await.clear();
    }

    pub async fn watched(&self) -> usize {
        self.channels.read().await.len()
    }
}

/// Turn a watch receiver into a stream
///
/// Yields the current value first, then every change. Ends after a complete
/// value or when the channel closes.
pub fn progress_stream(rx: watch::Receiver<DownloadProgress>) -> BoxStream<'static, DownloadProgress> {
    stream::unfold((rx, true, false), |(mut rx, first, done)| async move {
        if done {
            return None;
        }
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let current = *rx.borrow_and_update();
        Some((current, (rx, false, current.complete)))
    })
    .boxed()
}
