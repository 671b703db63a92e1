//! Core job queue implementation
//!
//! The queue is a plain data structure; the scheduler owns it behind its
//! admission lock together with the concurrency gate, so every operation
//! here is synchronous.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::app::models::{FileHandle, ResourceClass};

use super::types::{Job, QueueStats, Waiter};

/// FIFO queue of jobs waiting for a concurrency slot
///
/// Order is preserved across classes: [`JobQueue::take_next_startable`]
/// returns the oldest job whose class currently has room, so a blocked class
/// never holds up the other one and jobs of the same class start in
/// submission order.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
    stats: QueueStats,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job at the tail
    pub fn enqueue(&mut self, job: Job) {
        debug!(
            "Queued {} job {} (priority {})",
            job.class(),
            job.handle(),
            job.request.priority
        );
        self.bump_depth(job.class(), true);
        self.stats.total_enqueued += 1;
        self.jobs.push_back(job);
    }

    /// Remove and return the oldest job whose class `can_start` accepts
    pub fn take_next_startable<F>(&mut self, mut can_start: F) -> Option<Job>
    where
        F: FnMut(ResourceClass) -> bool,
    {
        // Avoid walking the queue when nothing can start
        if !ResourceClass::ALL
            .iter()
            .any(|&class| self.depth(class) > 0 && can_start(class))
        {
            return None;
        }

        let index = self.jobs.iter().position(|job| can_start(job.class()))?;
        let job = self.jobs.remove(index)?;
        self.bump_depth(job.class(), false);
        self.stats.total_dequeued += 1;
        Some(job)
    }

    /// Remove a queued job because it was cancelled
    pub fn remove(&mut self, handle: FileHandle) -> Option<Job> {
        let job = self.take(handle)?;
        self.stats.total_cancelled += 1;
        Some(job)
    }

    /// Remove a queued job without counting it as cancelled
    ///
    /// Used when the job is merged into another entry, e.g. after a stale
    /// handle was re-resolved to a handle that was already queued.
    pub fn take(&mut self, handle: FileHandle) -> Option<Job> {
        let index = self.jobs.iter().position(|job| job.handle() == handle)?;
        let job = self.jobs.remove(index)?;
        self.bump_depth(job.class(), false);
        Some(job)
    }

    /// Attach a waiter to a queued job for `handle`
    ///
    /// Gives the waiter back when no such job is queued.
    pub fn attach_waiter(&mut self, handle: FileHandle, waiter: Waiter) -> Result<(), Waiter> {
        match self.jobs.iter_mut().find(|job| job.handle() == handle) {
            Some(job) => {
                job.add_waiter(waiter);
                self.stats.total_coalesced += 1;
                Ok(())
            }
            None => Err(waiter),
        }
    }

    pub fn contains(&self, handle: FileHandle) -> bool {
        self.jobs.iter().any(|job| job.handle() == handle)
    }

    /// Whether any job of `class` is waiting
    pub fn has_pending(&self, class: ResourceClass) -> bool {
        self.depth(class) > 0
    }

    pub fn depth(&self, class: ResourceClass) -> usize {
        self.stats.pending_for(class)
    }

    /// Handles of queued jobs of `class`, oldest first
    pub fn pending_handles(&self, class: ResourceClass) -> Vec<FileHandle> {
        self.jobs
            .iter()
            .filter(|job| job.class() == class)
            .map(Job::handle)
            .collect()
    }

    /// Enqueue time of the job at the head of the queue
    pub fn oldest_queued_at(&self) -> Option<DateTime<Utc>> {
        self.jobs.front().map(|job| job.queued_at)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remove every queued job, oldest first
    pub fn drain_all(&mut self) -> Vec<Job> {
        self.stats.video_pending = 0;
        self.stats.thumb_pending = 0;
        self.jobs.drain(..).collect()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.clone()
    }

    fn bump_depth(&mut self, class: ResourceClass, up: bool) {
        let depth = match class {
            ResourceClass::Video => &mut self.stats.video_pending,
            ResourceClass::Thumb => &mut self.stats.thumb_pending,
        };
        if up {
            *depth += 1;
        } else {
            *depth = depth.saturating_sub(1);
        }
    }
}
