//! Local mirror of backend file state
//!
//! Independent of the admission lock; readers and the update feed touch it
//! through its own `RwLock`.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::app::models::{DownloadState, FileHandle};

/// Last known [`DownloadState`] per file
#[derive(Debug, Default)]
pub struct FileInfoCache {
    entries: RwLock<HashMap<FileHandle, DownloadState>>,
}

impl FileInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, handle: FileHandle) -> Option<DownloadState> {
        self.entries.read().await.get(&handle).cloned()
    }

    pub async fn insert(&self, handle: FileHandle, state: DownloadState) {
        self.entries.write().await.insert(handle, state);
    }

    pub async fn remove(&self, handle: FileHandle) -> Option<DownloadState> {
        self.entries.write().await.remove(&handle)
    }

    /// Drop every entry, returning how many were held
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
