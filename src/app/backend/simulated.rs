//! In-memory content backend
//!
//! `SimulatedBackend` keeps every file's download state in memory and, when
//! given a root directory, writes the downloaded prefix of each file's
//! synthetic content to disk as it "arrives". Tests drive it explicitly
//! (`advance`, `complete`, `stop`, error injection); the `simulate` command
//! lets [`SimulatedBackend::spawn_auto_progress`] move active downloads forward.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::ContentBackend;
use crate::app::models::{
    DownloadRequest, DownloadState, EvictionRequest, FileHandle, FileUpdate, StableId,
    StartOutcome,
};
use crate::app::readiness::boxes::encode_box;
use crate::constants::scheduler::FEED_CHANNEL_CAPACITY;
use crate::errors::{BackendError, BackendResult};

#[derive(Debug)]
struct SimFile {
    state: DownloadState,
    content: Option<Arc<Vec<u8>>>,
}

#[derive(Debug, Default)]
struct SimState {
    files: HashMap<FileHandle, SimFile>,
    stable_ids: HashMap<StableId, FileHandle>,
    expired: HashSet<FileHandle>,
    start_errors: HashMap<FileHandle, BackendError>,
    cancel_errors: HashMap<FileHandle, BackendError>,
    start_requests: Vec<DownloadRequest>,
    cancel_calls: Vec<(FileHandle, bool)>,
    evictions: Vec<EvictionRequest>,
    cache_size: u64,
    cache_stats_error: Option<BackendError>,
    eviction_error: Option<BackendError>,
}

/// In-memory [`ContentBackend`] for tests and simulation
#[derive(Debug)]
pub struct SimulatedBackend {
    state: Mutex<SimState>,
    updates: broadcast::Sender<FileUpdate>,
    root: Option<PathBuf>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    /// Backend that keeps everything in memory
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(FEED_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(SimState::default()),
            updates,
            root: None,
        }
    }

    /// Backend that writes file content under `root` as it downloads
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::new()
        }
    }

    fn emit(&self, handle: FileHandle, state: DownloadState) {
        // No receivers is fine: nobody is listening yet
        let _ = self.updates.send(FileUpdate { handle, state });
    }

    /// Register a remote file of `total_bytes` with no content
    pub async fn add_file(&self, handle: FileHandle, total_bytes: u64) {
        let mut state = self.state.lock().await;
        state.files.insert(
            handle,
            SimFile {
                state: DownloadState {
                    total_bytes,
                    ..Default::default()
                },
                content: None,
            },
        );
    }

    /// Register a remote file whose bytes are written to disk as they arrive
    pub async fn add_file_with_content(&self, handle: FileHandle, content: Vec<u8>) {
        let mut state = self.state.lock().await;
        state.files.insert(
            handle,
            SimFile {
                state: DownloadState {
                    total_bytes: content.len() as u64,
                    ..Default::default()
                },
                content: Some(Arc::new(content)),
            },
        );
    }

    /// Register a file that is already fully cached locally
    pub async fn add_cached_file(&self, handle: FileHandle, total_bytes: u64) {
        let mut state = self.state.lock().await;
        state.files.insert(
            handle,
            SimFile {
                state: DownloadState {
                    total_bytes,
                    downloaded_prefix_bytes: total_bytes,
                    downloading_completed: true,
                    ..Default::default()
                },
                content: None,
            },
        );
    }

    /// Make `id` resolve to `handle`
    pub async fn map_stable_id(&self, id: impl Into<StableId>, handle: FileHandle) {
        self.state.lock().await.stable_ids.insert(id.into(), handle);
    }

    /// Make the backend forget `handle`
    pub async fn expire_handle(&self, handle: FileHandle) {
        self.state.lock().await.expired.insert(handle);
    }

    /// Fail the next start of `handle` with `error`
    pub async fn reject_next_start(&self, handle: FileHandle, error: BackendError) {
        self.state.lock().await.start_errors.insert(handle, error);
    }

    /// Fail the next cancel of `handle` without stopping the transfer
    pub async fn reject_next_cancel(&self, handle: FileHandle, error: BackendError) {
        self.state.lock().await.cancel_errors.insert(handle, error);
    }

    pub async fn set_cache_size(&self, bytes: u64) {
        self.state.lock().await.cache_size = bytes;
    }

    pub async fn fail_cache_queries(&self, error: Option<BackendError>) {
        self.state.lock().await.cache_stats_error = error;
    }

    pub async fn fail_evictions(&self, error: Option<BackendError>) {
        self.state.lock().await.eviction_error = error;
    }

    /// Deliver `bytes` more of `handle`; completes the file when the prefix reaches its size
    pub async fn advance(&self, handle: FileHandle, bytes: u64) -> BackendResult<DownloadState> {
        let (snapshot, write) = {
            let mut state = self.state.lock().await;
            let file = state
                .files
                .get_mut(&handle)
                .ok_or(BackendError::UnknownHandle { handle })?;

            if file.state.downloading_completed {
                return Ok(file.state.clone());
            }

            let total = file.state.total_bytes;
            let prefix = file.state.downloaded_prefix_bytes.saturating_add(bytes).min(total);
            file.state.downloaded_prefix_bytes = prefix;
            if prefix >= total {
                file.state.downloading_completed = true;
                file.state.downloading_active = false;
            }

            let write = match (&file.content, &self.root) {
                (Some(content), Some(root)) => {
                    let path = root.join(format!("{}.mp4", handle.0));
                    file.state.local_path = Some(path.clone());
                    Some((path, Arc::clone(content), prefix as usize))
                }
                _ => None,
            };

            (file.state.clone(), write)
        };

        if let Some((path, content, prefix)) = write {
            tokio::fs::write(&path, &content[..prefix])
                .await
                .map_err(|e| BackendError::Unavailable {
                    reason: format!("failed to write {}: {}", path.display(), e),
                })?;
        }

        self.emit(handle, snapshot.clone());
        Ok(snapshot)
    }

    /// Deliver the rest of `handle`
    pub async fn complete(&self, handle: FileHandle) -> BackendResult<DownloadState> {
        self.advance(handle, u64::MAX).await
    }

    /// Stop the transfer of `handle` without completing it
    pub async fn stop(&self, handle: FileHandle) -> BackendResult<DownloadState> {
        let snapshot = {
            let mut state = self.state.lock().await;
            let file = state
                .files
                .get_mut(&handle)
                .ok_or(BackendError::UnknownHandle { handle })?;
            file.state.downloading_active = false;
            file.state.clone()
        };
        self.emit(handle, snapshot.clone());
        Ok(snapshot)
    }

    /// Push a raw update onto the feed
    pub fn emit_update(&self, update: FileUpdate) {
        let _ = self.updates.send(update);
    }

    /// Handles of every start attempt, in call order (failed attempts included)
    pub async fn started_handles(&self) -> Vec<FileHandle> {
        self.state
            .lock()
            .await
            .start_requests
            .iter()
            .map(|r| r.handle)
            .collect()
    }

    pub async fn start_requests(&self) -> Vec<DownloadRequest> {
        self.state.lock().await.start_requests.clone()
    }

    pub async fn cancel_calls(&self) -> Vec<(FileHandle, bool)> {
        self.state.lock().await.cancel_calls.clone()
    }

    pub async fn eviction_requests(&self) -> Vec<EvictionRequest> {
        self.state.lock().await.evictions.clone()
    }

    /// Handles the backend is currently transferring
    pub async fn active_handles(&self) -> Vec<FileHandle> {
        let state = self.state.lock().await;
        let mut handles: Vec<FileHandle> = state
            .files
            .iter()
            .filter(|(_, f)| f.state.downloading_active)
            .map(|(h, _)| *h)
            .collect();
        handles.sort();
        handles
    }

    /// Periodically deliver a jittered chunk to every active transfer
    pub fn spawn_auto_progress(
        self: &Arc<Self>,
        chunk_bytes: u64,
        tick: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let backend = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for handle in backend.active_handles().await {
                            let low = (chunk_bytes / 2).max(1);
                            let high = chunk_bytes.saturating_add(chunk_bytes / 2).max(low);
                            let bytes = fastrand::u64(low..=high);
                            if let Err(e) = backend.advance(handle, bytes).await {
                                warn!("Simulated transfer of {} failed: {}", handle, e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Simulated progress task received shutdown signal");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl ContentBackend for SimulatedBackend {
    async fn start_download(&self, request: &DownloadRequest) -> BackendResult<StartOutcome> {
        let handle = request.handle;
        let snapshot = {
            let mut state = self.state.lock().await;
            state.start_requests.push(request.clone());

            if let Some(error) = state.start_errors.remove(&handle) {
                return Err(error);
            }
            if state.expired.contains(&handle) {
                return Err(BackendError::UnknownHandle { handle });
            }

            let file = state
                .files
                .get_mut(&handle)
                .ok_or(BackendError::UnknownHandle { handle })?;

            if file.state.downloading_completed {
                return Ok(StartOutcome::Finished(file.state.clone()));
            }

            file.state.downloading_active = true;
            file.state.clone()
        };

        self.emit(handle, snapshot.clone());
        Ok(StartOutcome::Downloading(snapshot))
    }

    async fn cancel_download(
        &self,
        handle: FileHandle,
        only_if_pending: bool,
    ) -> BackendResult<()> {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.cancel_calls.push((handle, only_if_pending));

            if let Some(error) = state.cancel_errors.remove(&handle) {
                return Err(error);
            }

            let file = state
                .files
                .get_mut(&handle)
                .ok_or(BackendError::UnknownHandle { handle })?;

            if only_if_pending && file.state.downloading_active {
                return Ok(());
            }
            file.state.downloading_active = false;
            file.state.clone()
        };

        self.emit(handle, snapshot);
        Ok(())
    }

    async fn resolve_stable_id(&self, id: &StableId) -> BackendResult<FileHandle> {
        let state = self.state.lock().await;
        state
            .stable_ids
            .get(id)
            .copied()
            .ok_or_else(|| BackendError::UnresolvableId {
                id: id.to_string(),
            })
    }

    async fn file_state(&self, handle: FileHandle) -> BackendResult<DownloadState> {
        let state = self.state.lock().await;
        if state.expired.contains(&handle) {
            return Err(BackendError::UnknownHandle { handle });
        }
        state
            .files
            .get(&handle)
            .map(|f| f.state.clone())
            .ok_or(BackendError::UnknownHandle { handle })
    }

    fn subscribe(&self) -> broadcast::Receiver<FileUpdate> {
        self.updates.subscribe()
    }

    async fn cache_size(&self) -> BackendResult<u64> {
        let state = self.state.lock().await;
        match &state.cache_stats_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.cache_size),
        }
    }

    async fn request_eviction(&self, request: &EvictionRequest) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        state.evictions.push(request.clone());
        if let Some(error) = &state.eviction_error {
            return Err(error.clone());
        }
        state.cache_size = state.cache_size.saturating_sub(request.target_bytes);
        Ok(())
    }
}

/// Build a minimal ISO-BMFF style file: `ftyp`, then `moov` and `mdat` in the
/// requested order. `moov_first = false` produces a file that is not optimized
/// for progressive playback.
pub fn synthetic_container(moov_first: bool, moov_payload: usize, mdat_payload: usize) -> Vec<u8> {
    let mut ftyp = Vec::with_capacity(16);
    ftyp.extend_from_slice(b"isom");
    ftyp.extend_from_slice(&0u32.to_be_bytes());
    ftyp.extend_from_slice(b"isom");
    ftyp.extend_from_slice(b"mp41");

    let moov = encode_box(*b"moov", &vec![0x6d; moov_payload]);
    let mdat_bytes: Vec<u8> = (0..mdat_payload).map(|i| (i % 251) as u8).collect();
    let mdat = encode_box(*b"mdat", &mdat_bytes);

    let mut out = encode_box(*b"ftyp", &ftyp);
    if moov_first {
        out.extend_from_slice(&moov);
        out.extend_from_slice(&mdat);
    } else {
        out.extend_from_slice(&mdat);
        out.extend_from_slice(&moov);
    }
    out
}
