//! Admission control
//!
//! The [`ConcurrencyGate`] owns the active set and the counters. It lives
//! inside the scheduler's admission lock next to the job queue, so every
//! method is synchronous and free of I/O.
//!
//! A download holds its slot from [`ConcurrencyGate::admit`] until the first
//! [`ConcurrencyGate::release`] for its handle; later releases for the same
//! handle return `false` and leave the counters alone.

pub mod limits;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::app::models::{DownloadOutcome, DownloadRequest, FileHandle, ResourceClass};
use crate::app::queue::{resolve_waiters, Job, JobResult, Waiter};
use crate::errors::DownloadError;

pub use limits::{ConcurrencyCounters, ConcurrencyLimits, SharedLimits};

/// Why a slot is being released
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Transfer finished
    Completed { local_path: Option<PathBuf> },
    /// Backend reported the transfer inactive without completing it
    Stopped,
    /// Caller cancelled the active download
    Cancelled,
    /// Terminal failure
    Failed(DownloadError),
}

impl ReleaseReason {
    /// Outcome delivered to the waiters of `handle`
    pub fn into_result(self, handle: FileHandle) -> JobResult {
        match self {
            ReleaseReason::Completed { local_path } => {
                Ok(DownloadOutcome::Completed { handle, local_path })
            }
            ReleaseReason::Stopped => Ok(DownloadOutcome::Stopped { handle }),
            ReleaseReason::Cancelled => Ok(DownloadOutcome::Cancelled { handle }),
            ReleaseReason::Failed(err) => Err(err),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReleaseReason::Completed { .. } => "completed",
            ReleaseReason::Stopped => "stopped",
            ReleaseReason::Cancelled => "cancelled",
            ReleaseReason::Failed(_) => "failed",
        }
    }
}

/// A download currently holding a slot
#[derive(Debug)]
pub struct ActiveEntry {
    pub request: DownloadRequest,
    pub started_at: Instant,
    /// A cancel was sent to the backend for this download
    pub cancel_requested: bool,
    /// The backend took the start request for this admission
    pub started: bool,
    /// An inactive update arrived while the start request was in flight
    pub recheck_after_start: bool,
    waiters: Vec<Waiter>,
}

impl ActiveEntry {
    pub fn class(&self) -> ResourceClass {
        self.request.class
    }
}

/// Result of moving an active entry to a fresh handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rekey {
    /// Entry now lives under the new handle and still holds its slot
    Moved,
    /// New handle was already active; waiters joined it and the old slot was freed
    Merged,
    /// Old handle was not active
    Missing,
}

/// Tracks active downloads against the shared limits
#[derive(Debug)]
pub struct ConcurrencyGate {
    limits: Arc<SharedLimits>,
    counters: ConcurrencyCounters,
    active: HashMap<FileHandle, ActiveEntry>,
    duplicate_releases: u64,
}

impl ConcurrencyGate {
    pub fn new(limits: Arc<SharedLimits>) -> Self {
        Self {
            limits,
            counters: ConcurrencyCounters::default(),
            active: HashMap::new(),
            duplicate_releases: 0,
        }
    }

    /// Whether a download of `class` may start right now
    pub fn can_admit(&self, class: ResourceClass) -> bool {
        self.counters.active_global < self.limits.max_global()
            && self.counters.for_class(class) < self.limits.max_for(class)
    }

    /// Give `job` a slot
    ///
    /// Returns the request to start, or `None` when the handle was already
    /// active and the job's waiters were merged into the running download.
    pub fn admit(&mut self, job: Job) -> Option<DownloadRequest> {
        let (request, waiters) = job.into_parts();

        if let Some(entry) = self.active.get_mut(&request.handle) {
            debug!(
                "File {} already active, merging {} waiter(s)",
                request.handle,
                waiters.len()
            );
            entry.waiters.extend(waiters);
            return None;
        }

        self.counters.increment(request.class);
        debug!(
            "Admitted {} download {} (global {}/{}, {} {}/{})",
            request.class,
            request.handle,
            self.counters.active_global,
            self.limits.max_global(),
            request.class,
            self.counters.for_class(request.class),
            self.limits.max_for(request.class)
        );
        self.active.insert(
            request.handle,
            ActiveEntry {
                request: request.clone(),
                started_at: Instant::now(),
                cancel_requested: false,
                started: false,
                recheck_after_start: false,
                waiters,
            },
        );
        Some(request)
    }

    /// Free the slot held by `handle` and resolve its waiters
    ///
    /// Returns `false` when the handle holds no slot, i.e. an earlier
    /// release already ran.
    pub fn release(&mut self, handle: FileHandle, reason: ReleaseReason) -> bool {
        let Some(entry) = self.active.remove(&handle) else {
            self.duplicate_releases += 1;
            debug!(
                "Ignoring {} release for file {}: no slot held",
                reason.label(),
                handle
            );
            return false;
        };

        self.counters.decrement(entry.class());
        debug!(
            "Released {} slot of file {} ({}, held {:?})",
            entry.class(),
            handle,
            reason.label(),
            entry.started_at.elapsed()
        );
        resolve_waiters(entry.waiters, reason.into_result(handle));
        true
    }

    /// Attach a waiter to an active download
    ///
    /// Gives the waiter back when `handle` is not active.
    pub fn attach_waiter(&mut self, handle: FileHandle, waiter: Waiter) -> Result<(), Waiter> {
        match self.active.get_mut(&handle) {
            Some(entry) => {
                entry.waiters.push(waiter);
                Ok(())
            }
            None => Err(waiter),
        }
    }

    /// Move an active entry from an expired handle to its replacement
    pub fn rekey(&mut self, old: FileHandle, new: FileHandle) -> Rekey {
        let Some(mut entry) = self.active.remove(&old) else {
            return Rekey::Missing;
        };

        if let Some(existing) = self.active.get_mut(&new) {
            existing.waiters.append(&mut entry.waiters);
            self.counters.decrement(entry.class());
            return Rekey::Merged;
        }

        entry.request.handle = new;
        self.active.insert(new, entry);
        Rekey::Moved
    }

    /// Add waiters to an active entry (used when folding in a queued job)
    pub fn extend_waiters(&mut self, handle: FileHandle, waiters: Vec<Waiter>) -> Result<(), Vec<Waiter>> {
        match self.active.get_mut(&handle) {
            Some(entry) => {
                entry.waiters.extend(waiters);
                Ok(())
            }
            None => Err(waiters),
        }
    }

    /// Flag an active download as being cancelled
    ///
    /// Returns `false` when `handle` is not active.
    pub fn mark_cancel_requested(&mut self, handle: FileHandle) -> bool {
        match self.active.get_mut(&handle) {
            Some(entry) => {
                entry.cancel_requested = true;
                true
            }
            None => false,
        }
    }

    /// Note that the backend took the start request for `handle`
    ///
    /// Returns whether an inactive update arrived in the meantime and the
    /// file's state needs checking again.
    pub fn mark_started(&mut self, handle: FileHandle) -> bool {
        match self.active.get_mut(&handle) {
            Some(entry) => {
                entry.started = true;
                std::mem::take(&mut entry.recheck_after_start)
            }
            None => false,
        }
    }

    /// Whether an admitted download of `class` has not reached the backend yet
    pub fn has_unstarted(&self, class: ResourceClass) -> bool {
        self.active
            .values()
            .any(|entry| !entry.started && entry.class() == class)
    }

    pub fn is_active(&self, handle: FileHandle) -> bool {
        self.active.contains_key(&handle)
    }

    pub fn entry(&self, handle: FileHandle) -> Option<&ActiveEntry> {
        self.active.get(&handle)
    }

    pub fn entry_mut(&mut self, handle: FileHandle) -> Option<&mut ActiveEntry> {
        self.active.get_mut(&handle)
    }

    pub fn counters(&self) -> ConcurrencyCounters {
        self.counters
    }

    pub fn limits(&self) -> ConcurrencyLimits {
        self.limits.load()
    }

    /// Active handles with their class
    pub fn active_handles(&self) -> Vec<(FileHandle, ResourceClass)> {
        let mut handles: Vec<_> = self
            .active
            .iter()
            .map(|(handle, entry)| (*handle, entry.class()))
            .collect();
        handles.sort_by_key(|(handle, _)| *handle);
        handles
    }

    /// Releases that found no slot to free
    pub fn duplicate_releases(&self) -> u64 {
        self.duplicate_releases
    }

    /// Release every slot, e.g. on shutdown
    pub fn release_all<F>(&mut self, reason: F) -> usize
    where
        F: Fn(FileHandle) -> ReleaseReason,
    {
        let handles: Vec<_> = self.active.keys().copied().collect();
        handles
            .into_iter()
            .filter(|handle| self.release(*handle, reason(*handle)))
            .count()
    }
}
