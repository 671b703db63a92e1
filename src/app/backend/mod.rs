//! Boundary to the remote content backend
//!
//! The scheduler never talks to the network itself. Everything it needs from
//! the backend (starting and cancelling transfers, resolving identifiers,
//! querying file state, cache statistics and eviction) goes through the
//! [`ContentBackend`] trait. [`SimulatedBackend`] is an in-memory
//! implementation used by the tests and the `simulate` command.

pub mod simulated;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::app::models::{
    DownloadRequest, DownloadState, EvictionRequest, FileHandle, FileUpdate, StableId,
    StartOutcome,
};
use crate::errors::BackendResult;

pub use simulated::{synthetic_container, SimulatedBackend};

/// Operations consumed from the remote content backend
#[async_trait]
pub trait ContentBackend: Send + Sync + 'static {
    /// Ask the backend to start (or continue) downloading a file
    async fn start_download(&self, request: &DownloadRequest) -> BackendResult<StartOutcome>;

    /// Cancel a download; with `only_if_pending` an already running transfer is left alone
    async fn cancel_download(&self, handle: FileHandle, only_if_pending: bool)
        -> BackendResult<()>;

    /// Resolve a stable identifier to a fresh handle
    async fn resolve_stable_id(&self, id: &StableId) -> BackendResult<FileHandle>;

    /// Current download state of a file
    async fn file_state(&self, handle: FileHandle) -> BackendResult<DownloadState>;

    /// Subscribe to the shared per-file state-change feed
    fn subscribe(&self) -> broadcast::Receiver<FileUpdate>;

    /// Aggregate size of the on-disk cache in bytes
    async fn cache_size(&self) -> BackendResult<u64>;

    /// Ask the backend to evict cached files
    async fn request_eviction(&self, request: &EvictionRequest) -> BackendResult<()>;
}
