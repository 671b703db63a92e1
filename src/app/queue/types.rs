//! Type definitions for the job queue
//!
//! A [`Job`] carries the caller's request plus every waiter that wants to
//! hear how the download ends. Callers hold a [`DownloadTicket`], which is a
//! future resolving to the outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::app::models::{DownloadOutcome, DownloadRequest, FileHandle, ResourceClass};
use crate::errors::DownloadError;

/// Final result delivered to every waiter of a job
pub type JobResult = Result<DownloadOutcome, DownloadError>;

/// Sending half of a submission's completion handle
pub type Waiter = oneshot::Sender<JobResult>;

/// Deliver `result` to every waiter; dropped tickets are skipped
pub fn resolve_waiters(waiters: Vec<Waiter>, result: JobResult) {
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}

/// A pending download owned by the scheduler
#[derive(Debug)]
pub struct Job {
    pub request: DownloadRequest,
    pub queued_at: DateTime<Utc>,
    waiters: Vec<Waiter>,
}

impl Job {
    pub fn new(request: DownloadRequest, waiter: Waiter) -> Self {
        Self {
            request,
            queued_at: Utc::now(),
            waiters: vec![waiter],
        }
    }

    pub fn handle(&self) -> FileHandle {
        self.request.handle
    }

    pub fn class(&self) -> ResourceClass {
        self.request.class
    }

    /// Attach another submission of the same file
    pub fn add_waiter(&mut self, waiter: Waiter) {
        self.waiters.push(waiter);
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// How long this job has been waiting
    pub fn waited(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.queued_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn into_parts(self) -> (DownloadRequest, Vec<Waiter>) {
        (self.request, self.waiters)
    }

    /// Resolve every waiter and drop the job
    pub fn resolve(self, result: JobResult) {
        resolve_waiters(self.waiters, result);
    }
}

/// Completion handle returned by `submit`; await it for the outcome
#[derive(Debug)]
pub struct DownloadTicket {
    handle: FileHandle,
    rx: oneshot::Receiver<JobResult>,
}

impl DownloadTicket {
    /// Create a ticket and the waiter that resolves it
    pub fn channel(handle: FileHandle) -> (Waiter, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { handle, rx })
    }

    /// Handle the ticket was issued for
    pub fn handle(&self) -> FileHandle {
        self.handle
    }

    /// Non-blocking check for the outcome
    ///
    /// Returns the outcome once; afterwards the ticket reports `None` forever.
    pub fn try_result(&mut self) -> Option<JobResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => None,
        }
    }
}

impl Future for DownloadTicket {
    type Output = JobResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let handle = self.handle;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(DownloadError::SchedulerClosed { handle })))
    }
}

/// Statistics about queue operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs ever appended to the queue
    pub total_enqueued: u64,
    /// Jobs removed to start downloading
    pub total_dequeued: u64,
    /// Jobs removed by cancellation
    pub total_cancelled: u64,
    /// Extra submissions attached to a queued job
    pub total_coalesced: u64,
    /// Video jobs currently waiting
    pub video_pending: usize,
    /// Thumbnail jobs currently waiting
    pub thumb_pending: usize,
}

impl QueueStats {
    pub fn pending(&self) -> usize {
        self.video_pending + self.thumb_pending
    }

    pub fn pending_for(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::Video => self.video_pending,
            ResourceClass::Thumb => self.thumb_pending,
        }
    }
}
