//! Download scheduling and readiness orchestration
//!
//! The [`Scheduler`] is the control plane: it classifies submissions, asks
//! the concurrency gate for a slot, starts admitted downloads on the backend
//! and queues the rest. Completions arrive on the backend's update feed,
//! release their slot and wake the drain worker, which starts the next
//! eligible job.
//!
//! # Key Features
//!
//! - **Admission control**: global and per-class limits, changeable at runtime
//! - **Fairness**: FIFO within a class, no blocking across classes
//! - **Exactly-once release**: duplicate completion signals are ignored
//! - **Stale handle recovery**: one re-resolution through the stable id, one retry
//! - **Progressive playback**: waits until the container's metadata box is on disk
//! - **Cache maintenance**: periodic janitor keeping the cache under its cap
//!
//! # Architecture
//!
//! - [`config`] - configuration, builder and presets
//! - [`executor`] - starting admitted downloads and draining the queue
//! - [`stale`] - expired handle recovery
//! - [`feed`] - update feed dispatch and lag reconciliation
//! - [`progress`] - per-file progress streams
//! - [`background_tasks`] - drain, feed and janitor tasks
//! - [`stats`] - statistics snapshot and reports
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use media_scheduler::app::backend::SimulatedBackend;
//! use media_scheduler::app::models::{DownloadRequest, FileHandle, ResourceClass};
//! use media_scheduler::app::scheduler::{ConfigPresets, Scheduler};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(SimulatedBackend::new());
//! backend.add_file(FileHandle(1), 4096).await;
//!
//! let scheduler = Scheduler::new(backend.clone(), ConfigPresets::production())?;
//! let ticket = scheduler
//!     .submit(DownloadRequest::new(FileHandle(1), ResourceClass::Video))
//!     .await;
//!
//! backend.complete(FileHandle(1)).await?;
//! let outcome = ticket.await?;
//! println!("finished: {:?}", outcome);
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod background_tasks;
pub mod config;
pub(crate) mod executor;
pub(crate) mod feed;
pub mod progress;
pub(crate) mod stale;
pub mod stats;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{broadcast, Mutex, MutexGuard, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::app::backend::ContentBackend;
use crate::app::cache::{CacheJanitor, FileInfoCache, JanitorReport};
use crate::app::gate::{
    ConcurrencyCounters, ConcurrencyGate, ConcurrencyLimits, ReleaseReason, SharedLimits,
};
use crate::app::models::{
    DownloadOutcome, DownloadProgress, DownloadRequest, DownloadState, FileHandle, ResourceClass,
    StableId,
};
use crate::app::queue::{DownloadTicket, Job, JobQueue};
use crate::app::readiness::ReadinessValidator;
use crate::constants::scheduler::LOCK_CONTENTION_WARN;
use crate::errors::{
    BackendResult, ConfigError, DownloadError, JanitorResult, ReadinessError, ReadinessResult,
};

pub use background_tasks::BackgroundTaskManager;
pub use config::{ConfigPresets, SchedulerConfig, SchedulerConfigBuilder};
pub use progress::{progress_stream, ProgressRegistry};
pub use stats::{SchedulerStats, StatsReporter};

use stats::Totals;

/// What [`Scheduler::cancel`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStatus {
    /// Job was still queued; it was removed and resolved as cancelled
    Dequeued,
    /// Download was active; the backend was asked to cancel it
    Requested,
    /// Scheduler holds no job for the handle
    NotTracked,
}

/// Queue and gate, guarded together by the admission lock
#[derive(Debug)]
pub(crate) struct AdmissionState {
    pub gate: ConcurrencyGate,
    pub queue: JobQueue,
}

pub(crate) struct Inner {
    pub config: SchedulerConfig,
    pub backend: Arc<dyn ContentBackend>,
    pub limits: Arc<SharedLimits>,
    pub state: Mutex<AdmissionState>,
    pub drain_signal: Arc<Notify>,
    pub aliases: RwLock<HashMap<FileHandle, FileHandle>>,
    pub progress: ProgressRegistry,
    pub file_cache: Arc<FileInfoCache>,
    pub validator: ReadinessValidator,
    pub janitor: CacheJanitor,
    pub totals: Totals,
    pub shutdown_tx: broadcast::Sender<()>,
    pub tasks: std::sync::Mutex<Option<BackgroundTaskManager>>,
    pub closed: AtomicBool,
}

impl Inner {
    /// Take the admission lock, noting long waits
    pub async fn lock_state(&self) -> MutexGuard<'_, AdmissionState> {
        let started = Instant::now();
        let guard = self.state.lock().await;
        let waited = started.elapsed();
        if waited > LOCK_CONTENTION_WARN {
            debug!("Admission lock contended for {:?}", waited);
        }
        guard
    }

    /// Follow the alias left by a stale handle recovery, if any
    pub async fn resolve_alias(&self, handle: FileHandle) -> FileHandle {
        self.aliases
            .read()
            .await
            .get(&handle)
            .copied()
            .unwrap_or(handle)
    }

    pub async fn add_alias(&self, old: FileHandle, fresh: FileHandle) {
        if old != fresh {
            debug!("Aliasing file {} to {}", old, fresh);
            self.aliases.write().await.insert(old, fresh);
        }
    }

    /// Release the slot of `handle` and wake the drain worker
    pub async fn release(&self, handle: FileHandle, reason: ReleaseReason) -> bool {
        let recorded = reason.clone();
        let released = self.lock_state().await.gate.release(handle, reason);
        if released {
            self.after_release(handle, &recorded).await;
        }
        released
    }

    /// Release for an inactive feed update; untracked handles are ignored
    ///
    /// The feed may still hold updates from an earlier download of the same
    /// handle, so only a completion is taken as is. Any other inactive
    /// report is checked against a fresh backend query first.
    pub async fn release_from_feed(&self, handle: FileHandle, state: &DownloadState) -> bool {
        if state.downloading_completed {
            return self.release_inactive(handle, state).await;
        }
        {
            let mut admission = self.lock_state().await;
            let Some(entry) = admission.gate.entry_mut(handle) else {
                return false;
            };
            if !entry.started {
                entry.recheck_after_start = true;
                return false;
            }
        }
        self.verify_inactive(handle).await
    }

    /// Query the backend and release `handle` only if it is really inactive
    pub async fn verify_inactive(&self, handle: FileHandle) -> bool {
        match self.backend.file_state(handle).await {
            Ok(fresh) => {
                self.record_state(handle, &fresh).await;
                if fresh.is_inactive() {
                    self.release_inactive(handle, &fresh).await
                } else {
                    debug!("Inactive update for {} predates its current download", handle);
                    false
                }
            }
            Err(e) if e.is_stale_handle() => {
                warn!("Backend lost track of active download {}", handle);
                let reason = ReleaseReason::Failed(DownloadError::Lost { handle, source: e });
                self.release(handle, reason).await
            }
            Err(e) => {
                warn!("Could not confirm state of {}: {}", handle, e);
                false
            }
        }
    }

    /// Mark `handle` started, re-checking it when an inactive update raced the start
    pub async fn confirm_started(&self, handle: FileHandle) {
        let recheck = self.lock_state().await.gate.mark_started(handle);
        if recheck {
            self.verify_inactive(handle).await;
        }
    }

    /// Release `handle` for an inactive state known to be current
    ///
    /// Admissions whose start request is still in flight are flagged for a
    /// re-check instead.
    pub async fn release_inactive(&self, handle: FileHandle, state: &DownloadState) -> bool {
        let reason = {
            let mut admission = self.lock_state().await;
            let Some(entry) = admission.gate.entry_mut(handle) else {
                return false;
            };
            if !entry.started {
                entry.recheck_after_start = true;
                return false;
            }
            let reason = if state.downloading_completed {
                ReleaseReason::Completed {
                    local_path: state.local_path.clone(),
                }
            } else if entry.cancel_requested {
                ReleaseReason::Cancelled
            } else {
                ReleaseReason::Stopped
            };
            admission.gate.release(handle, reason.clone());
            reason
        };
        self.after_release(handle, &reason).await;
        true
    }

    async fn after_release(&self, handle: FileHandle, reason: &ReleaseReason) {
        self.totals.record_release(reason);
        if !matches!(reason, ReleaseReason::Completed { .. }) {
            self.progress.close(handle).await;
        }
        self.drain_signal.notify_one();
    }

    /// Remember the latest backend state and forward it to observers
    pub async fn record_state(&self, handle: FileHandle, state: &DownloadState) {
        self.file_cache.insert(handle, state.clone()).await;
        self.progress.publish(handle, state.progress()).await;
    }

    /// Handles the janitor must not evict: active, queued and pinned files
    pub async fn protected_handles(&self) -> Vec<FileHandle> {
        let admission = self.lock_state().await;
        let mut handles: Vec<FileHandle> = admission
            .gate
            .active_handles()
            .into_iter()
            .map(|(handle, _)| handle)
            .collect();
        for class in ResourceClass::ALL {
            handles.extend(admission.queue.pending_handles(class));
        }
        handles
    }

    pub async fn run_janitor(&self) -> JanitorResult<JanitorReport> {
        let exclude = self.protected_handles().await;
        self.janitor.run_once(exclude).await
    }
}

/// Concurrency-limited download scheduler
///
/// Cheap to clone; all clones share one admission domain. Must be created
/// inside a Tokio runtime because it spawns its background tasks.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler and start its background tasks
    pub fn new(
        backend: Arc<dyn ContentBackend>,
        config: SchedulerConfig,
    ) -> Result<Self, ConfigError> {
        config
            .validate()
            .map_err(|errors| ConfigError::ValidationFailed { errors })?;

        let limits = Arc::new(SharedLimits::new(config.limits));
        let file_cache = Arc::new(FileInfoCache::new());
        let (shutdown_tx, _) = broadcast::channel(1);
        let drain_signal = Arc::new(Notify::new());

        // Subscribe before anything can be started so no update is missed
        let updates = backend.subscribe();

        let inner = Arc::new(Inner {
            validator: ReadinessValidator::new(backend.clone(), config.readiness.clone()),
            janitor: CacheJanitor::new(backend.clone(), config.janitor.clone(), file_cache.clone()),
            state: Mutex::new(AdmissionState {
                gate: ConcurrencyGate::new(limits.clone()),
                queue: JobQueue::new(),
            }),
            config,
            backend,
            limits,
            drain_signal: drain_signal.clone(),
            aliases: RwLock::new(HashMap::new()),
            progress: ProgressRegistry::new(),
            file_cache,
            totals: Totals::default(),
            shutdown_tx,
            tasks: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let mut tasks = BackgroundTaskManager::new();
        let weak = Arc::downgrade(&inner);
        tasks.start_drain_task(weak.clone(), drain_signal, inner.shutdown_tx.subscribe());
        tasks.start_feed_task(weak.clone(), updates, inner.shutdown_tx.subscribe());
        if inner.config.janitor.enabled {
            tasks.start_janitor_task(
                weak,
                inner.config.janitor.interval,
                inner.shutdown_tx.subscribe(),
            );
        }
        if let Ok(mut slot) = inner.tasks.lock() {
            *slot = Some(tasks);
        }

        let limits = inner.limits.load();
        info!(
            "Scheduler started (global {}, video {}, thumb {})",
            limits.max_global, limits.max_video, limits.max_thumb
        );
        Ok(Self { inner })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> Arc<dyn ContentBackend> {
        self.inner.backend.clone()
    }

    /// Submit a download; the returned ticket resolves with its outcome
    ///
    /// The download starts before this returns when a slot is free and no
    /// earlier job of the same class is waiting or still starting; otherwise
    /// it is queued and the drain worker starts it in order.
    /// Submitting a file that is already queued or active joins that job.
    pub async fn submit(&self, mut request: DownloadRequest) -> DownloadTicket {
        request.handle = self.inner.resolve_alias(request.handle).await;
        let handle = request.handle;
        let class = request.class;
        let (waiter, ticket) = DownloadTicket::channel(handle);
        Totals::bump(&self.inner.totals.submitted);

        if self.inner.closed.load(Ordering::SeqCst) {
            let _ = waiter.send(Err(DownloadError::SchedulerClosed { handle }));
            return ticket;
        }

        let to_start = {
            let mut admission = self.inner.lock_state().await;
            // Shutdown empties the queue under this lock after setting the flag
            if self.inner.closed.load(Ordering::SeqCst) {
                let _ = waiter.send(Err(DownloadError::SchedulerClosed { handle }));
                return ticket;
            }

            let waiter = match admission.gate.attach_waiter(handle, waiter) {
                Ok(()) => {
                    debug!("File {} already downloading, joined active job", handle);
                    Totals::bump(&self.inner.totals.coalesced);
                    return ticket;
                }
                Err(waiter) => waiter,
            };
            let waiter = match admission.queue.attach_waiter(handle, waiter) {
                Ok(()) => {
                    debug!("File {} already queued, joined queued job", handle);
                    Totals::bump(&self.inner.totals.coalesced);
                    return ticket;
                }
                Err(waiter) => waiter,
            };

            let job = Job::new(request, waiter);
            // Jobs the drain worker admitted must reach the backend first
            if admission.gate.can_admit(class)
                && !admission.queue.has_pending(class)
                && !admission.gate.has_unstarted(class)
            {
                admission.gate.admit(job)
            } else {
                admission.queue.enqueue(job);
                None
            }
        };

        match to_start {
            Some(request) => executor::start_admitted(&self.inner, request).await,
            // A slot may have opened between the release and this enqueue
            None => self.inner.drain_signal.notify_one(),
        }
        ticket
    }

    /// Cancel a queued or active download
    pub async fn cancel(&self, handle: FileHandle) -> CancelStatus {
        let handle = self.inner.resolve_alias(handle).await;

        enum Found {
            Queued(Job),
            Active,
            Untracked,
        }

        let found = {
            let mut admission = self.inner.lock_state().await;
            if let Some(job) = admission.queue.remove(handle) {
                Found::Queued(job)
            } else if admission.gate.mark_cancel_requested(handle) {
                Found::Active
            } else {
                Found::Untracked
            }
        };

        match found {
            Found::Queued(job) => {
                info!("Cancelled queued download {}", handle);
                self.inner.totals.record_release(&ReleaseReason::Cancelled);
                job.resolve(Ok(DownloadOutcome::Cancelled { handle }));
                self.inner.progress.close(handle).await;
                CancelStatus::Dequeued
            }
            Found::Active => {
                match self.inner.backend.cancel_download(handle, false).await {
                    Ok(()) => {
                        info!("Cancelled active download {}", handle);
                        self.inner.release(handle, ReleaseReason::Cancelled).await;
                    }
                    Err(e) if e.is_stale_handle() => {
                        info!("Cancelled download {} the backend no longer knows", handle);
                        self.inner.release(handle, ReleaseReason::Cancelled).await;
                    }
                    Err(e) => {
                        warn!(
                            "Cancel of {} not acknowledged ({}); waiting for the update feed",
                            handle, e
                        );
                    }
                }
                CancelStatus::Requested
            }
            Found::Untracked => CancelStatus::NotTracked,
        }
    }

    /// Number of downloads holding a slot
    pub async fn active_count(&self) -> usize {
        self.inner.lock_state().await.gate.counters().active_global
    }

    pub async fn counters(&self) -> ConcurrencyCounters {
        self.inner.lock_state().await.gate.counters()
    }

    /// Current limits
    pub fn limits(&self) -> ConcurrencyLimits {
        self.inner.limits.load()
    }

    /// Replace the limits
    ///
    /// Active downloads keep running when a limit drops below the active
    /// count; new admissions wait until the count is back under it. A zero
    /// limit pauses admission for that class.
    pub async fn set_limits(&self, limits: ConcurrencyLimits) {
        {
            let _admission = self.inner.lock_state().await;
            self.inner.limits.store(limits);
        }
        info!(
            "Concurrency limits set to global {}, video {}, thumb {}",
            limits.max_global, limits.max_video, limits.max_thumb
        );
        self.inner.drain_signal.notify_one();
    }

    /// Whether the scheduler holds a queued or active job for `handle`
    pub async fn is_tracked(&self, handle: FileHandle) -> bool {
        let handle = self.inner.resolve_alias(handle).await;
        let admission = self.inner.lock_state().await;
        admission.gate.is_active(handle) || admission.queue.contains(handle)
    }

    /// Current handle for `handle`, following stale recoveries
    pub async fn current_handle(&self, handle: FileHandle) -> FileHandle {
        self.inner.resolve_alias(handle).await
    }

    /// Query the backend for the file's state and refresh the local mirror
    pub async fn file_state(&self, handle: FileHandle) -> BackendResult<DownloadState> {
        let handle = self.inner.resolve_alias(handle).await;
        let state = self.inner.backend.file_state(handle).await?;
        self.inner.file_cache.insert(handle, state.clone()).await;
        Ok(state)
    }

    /// Last state seen for the file, without asking the backend
    pub async fn cached_state(&self, handle: FileHandle) -> Option<DownloadState> {
        let handle = self.inner.resolve_alias(handle).await;
        self.inner.file_cache.get(handle).await
    }

    /// Stream of progress for `handle`
    ///
    /// Starts with the current value and ends once the file is complete or
    /// its download is released without completing.
    pub async fn observe_progress(&self, handle: FileHandle) -> BoxStream<'static, DownloadProgress> {
        let handle = self.inner.resolve_alias(handle).await;
        let initial = match self.inner.file_cache.get(handle).await {
            Some(state) => state.progress(),
            None => match self.inner.backend.file_state(handle).await {
                Ok(state) => {
                    self.inner.file_cache.insert(handle, state.clone()).await;
                    state.progress()
                }
                Err(e) => {
                    debug!("No initial state for {}: {}", handle, e);
                    DownloadProgress::default()
                }
            },
        };

        if initial.complete {
            return stream::once(async move { initial }).boxed();
        }
        let rx = self.inner.progress.subscribe(handle, initial).await;
        progress_stream(rx)
    }

    /// Wait until the file can be handed to a player and return its path
    ///
    /// Re-resolves an expired handle through `stable_id` when given, and
    /// starts a video download if the file is neither complete nor
    /// downloading.
    pub async fn ensure_ready_for_playback(
        &self,
        handle: FileHandle,
        stable_id: Option<StableId>,
        timeout: Duration,
    ) -> ReadinessResult<PathBuf> {
        let mut handle = self.inner.resolve_alias(handle).await;

        let state = match self.inner.backend.file_state(handle).await {
            Ok(state) => state,
            Err(e) if e.is_stale_handle() => {
                let Some(id) = stable_id.as_ref() else {
                    return Err(ReadinessError::Backend(e));
                };
                let fresh = self.inner.backend.resolve_stable_id(id).await?;
                info!("Re-resolved {} via stable id {} to {}", handle, id, fresh);
                self.inner.add_alias(handle, fresh).await;
                handle = fresh;
                self.inner.backend.file_state(handle).await?
            }
            Err(e) => return Err(e.into()),
        };
        self.inner.file_cache.insert(handle, state.clone()).await;

        let mut ticket = None;
        if !state.downloading_completed && !state.downloading_active {
            let mut request = self.inner.config.request(handle, ResourceClass::Video);
            if let Some(id) = stable_id {
                request = request.with_stable_id(id);
            }
            debug!("Starting download of {} for playback", handle);
            ticket = Some(self.submit(request).await);
        }

        let ready = self
            .inner
            .validator
            .wait_until_ready(handle, timeout, ticket.as_mut())
            .await?;
        Ok(ready.path)
    }

    /// Same as [`Scheduler::ensure_ready_for_playback`] with the configured timeout
    pub async fn ensure_ready(&self, handle: FileHandle) -> ReadinessResult<PathBuf> {
        let timeout = self.inner.config.readiness.default_timeout;
        self.ensure_ready_for_playback(handle, None, timeout).await
    }

    /// Run one janitor pass now
    pub async fn run_janitor(&self) -> JanitorResult<JanitorReport> {
        self.inner.run_janitor().await
    }

    /// Re-query every active download and release those the backend
    /// reports inactive or no longer knows
    pub async fn reconcile(&self) -> usize {
        feed::reconcile_active(&self.inner).await
    }

    /// Snapshot of counters, limits, queue and totals
    pub async fn stats(&self) -> SchedulerStats {
        let (counters, queue, active, oldest, duplicates) = {
            let admission = self.inner.lock_state().await;
            (
                admission.gate.counters(),
                admission.queue.stats(),
                admission.gate.active_handles(),
                admission.queue.oldest_queued_at(),
                admission.gate.duplicate_releases(),
            )
        };
        let totals = SchedulerStats::totals_from(&self.inner.totals);

        SchedulerStats {
            counters,
            limits: self.inner.limits.load(),
            queue,
            active_handles: active.into_iter().map(|(handle, _)| handle).collect(),
            oldest_queued_at: oldest,
            total_submitted: totals.submitted,
            total_coalesced: totals.coalesced,
            total_started: totals.started,
            total_completed: totals.completed,
            total_stopped: totals.stopped,
            total_cancelled: totals.cancelled,
            total_failed: totals.failed,
            stale_recoveries: totals.stale_recoveries,
            feed_lag_events: totals.feed_lag_events,
            double_releases_guarded: duplicates,
            cached_files: self.inner.file_cache.len().await,
        }
    }

    /// Stop background tasks and resolve every outstanding ticket
    ///
    /// Queued and active jobs resolve with `SchedulerClosed`; transfers
    /// already running on the backend are left alone.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down scheduler");
        let _ = self.inner.shutdown_tx.send(());

        let tasks = self.inner.tasks.lock().ok().and_then(|mut slot| slot.take());
        if let Some(tasks) = tasks {
            tasks.shutdown_all(self.inner.config.shutdown_timeout).await;
        }

        let (queued, released) = {
            let mut admission = self.inner.lock_state().await;
            let queued = admission.queue.drain_all();
            let released = admission.gate.release_all(|handle| {
                ReleaseReason::Failed(DownloadError::SchedulerClosed { handle })
            });
            (queued, released)
        };
        let dropped = queued.len();
        for job in queued {
            let handle = job.handle();
            job.resolve(Err(DownloadError::SchedulerClosed { handle }));
        }
        self.inner.progress.close_all().await;

        info!(
            "Scheduler stopped ({} queued and {} active job(s) abandoned)",
            dropped, released
        );
    }
}
