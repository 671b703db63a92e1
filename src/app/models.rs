//! Core data types shared by the scheduler components
//!
//! These types describe the files the backend knows about, the requests
//! callers submit, and the per-file download state mirrored from the backend.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::priority;

/// Backend-issued reference to a file. May expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileHandle(pub i64);

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<i64> for FileHandle {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Long-lived content identifier that can be resolved to a fresh handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(String);

impl StableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StableId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StableId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Resource class with its own concurrency sub-limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Video,
    Thumb,
}

impl ResourceClass {
    /// Every class, in a stable order
    pub const ALL: [ResourceClass; 2] = [ResourceClass::Video, ResourceClass::Thumb];

    /// Compatibility classification from a bare priority
    ///
    /// Older call sites only passed a priority; anything at or above
    /// [`priority::VIDEO_INFERENCE_THRESHOLD`] was treated as video.
    pub fn from_priority(priority: u8) -> Self {
        if priority >= priority::VIDEO_INFERENCE_THRESHOLD {
            ResourceClass::Video
        } else {
            ResourceClass::Thumb
        }
    }

    /// Backend priority used when the caller does not pick one
    pub fn default_priority(self) -> u8 {
        match self {
            ResourceClass::Video => priority::VIDEO_DEFAULT,
            ResourceClass::Thumb => priority::THUMB_DEFAULT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::Video => "video",
            ResourceClass::Thumb => "thumb",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller's request to download a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// File to download
    pub handle: FileHandle,
    /// Resource class the download counts against
    pub class: ResourceClass,
    /// Backend priority (1..=32)
    pub priority: u8,
    /// First byte to download
    pub offset: u64,
    /// Number of bytes to download (0 = to the end)
    pub limit: u64,
    /// Identifier used to recover from an expired handle
    pub stable_id: Option<StableId>,
}

impl DownloadRequest {
    /// Whole-file request with the class's default priority
    pub fn new(handle: FileHandle, class: ResourceClass) -> Self {
        Self {
            handle,
            class,
            priority: class.default_priority(),
            offset: 0,
            limit: 0,
            stable_id: None,
        }
    }

    /// Request classified from its priority alone
    pub fn inferred(handle: FileHandle, priority: u8) -> Self {
        let priority = priority::clamp(priority);
        Self {
            priority,
            ..Self::new(handle, ResourceClass::from_priority(priority))
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority::clamp(priority);
        self
    }

    pub fn with_range(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn with_stable_id(mut self, stable_id: impl Into<StableId>) -> Self {
        self.stable_id = Some(stable_id.into());
        self
    }
}

/// Per-file download state as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadState {
    /// Local path once the file has materialized on disk
    pub local_path: Option<PathBuf>,
    /// Contiguous bytes available from offset 0
    pub downloaded_prefix_bytes: u64,
    /// Full size of the file (0 if unknown)
    pub total_bytes: u64,
    /// Backend is currently transferring this file
    pub downloading_active: bool,
    /// Entire file is present locally
    pub downloading_completed: bool,
}

impl DownloadState {
    pub fn is_complete(&self) -> bool {
        self.downloading_completed
    }

    /// Not transferring: completed, stopped, or never started
    pub fn is_inactive(&self) -> bool {
        !self.downloading_active
    }

    pub fn progress(&self) -> DownloadProgress {
        DownloadProgress {
            downloaded_bytes: self.downloaded_prefix_bytes,
            total_bytes: self.total_bytes,
            complete: self.downloading_completed,
        }
    }
}

/// Progress snapshot published to observers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub complete: bool,
}

impl DownloadProgress {
    /// Completion ratio in `0.0..=1.0` (0 when the size is unknown)
    pub fn fraction(&self) -> f64 {
        if self.complete {
            1.0
        } else if self.total_bytes == 0 {
            0.0
        } else {
            (self.downloaded_bytes as f64 / self.total_bytes as f64).min(1.0)
        }
    }
}

/// State change emitted on the backend's shared update feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    pub handle: FileHandle,
    pub state: DownloadState,
}

/// Immediate result of asking the backend to start a download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// File is already fully available (e.g. cached)
    Finished(DownloadState),
    /// Transfer started; completion arrives on the update feed
    Downloading(DownloadState),
    /// Request queued by the backend; state arrives on the update feed
    ///
    /// From here on `file_state` reports the file active until it stops.
    Accepted,
}

/// Parameters of a backend eviction pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionRequest {
    /// Bytes the backend should try to free
    pub target_bytes: u64,
    /// Files younger than this are kept
    pub min_age: Duration,
    /// Recently accessed files are kept for this long
    pub immunity: Duration,
    /// Files that must never be evicted
    pub exclude: BTreeSet<FileHandle>,
}

/// Successful resolution of a submitted download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DownloadOutcome {
    /// File fully downloaded
    Completed {
        handle: FileHandle,
        local_path: Option<PathBuf>,
    },
    /// Backend stopped the transfer before completion
    Stopped { handle: FileHandle },
    /// Caller cancelled the download
    Cancelled { handle: FileHandle },
}

impl DownloadOutcome {
    /// Handle the outcome refers to (the fresh handle after stale recovery)
    pub fn handle(&self) -> FileHandle {
        match self {
            DownloadOutcome::Completed { handle, .. }
            | DownloadOutcome::Stopped { handle }
            | DownloadOutcome::Cancelled { handle } => *handle,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DownloadOutcome::Completed { .. })
    }
}
