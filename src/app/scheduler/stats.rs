//! Scheduler statistics and reporting

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::gate::{ConcurrencyCounters, ConcurrencyLimits, ReleaseReason};
use crate::app::models::FileHandle;
use crate::app::queue::QueueStats;

/// Monotonic event counters
#[derive(Debug, Default)]
pub(crate) struct Totals {
    pub submitted: AtomicU64,
    pub coalesced: AtomicU64,
    pub started: AtomicU64,
    pub completed: AtomicU64,
    pub stopped: AtomicU64,
    pub cancelled: AtomicU64,
    pub failed: AtomicU64,
    pub stale_recoveries: AtomicU64,
    pub feed_lag_events: AtomicU64,
}

impl Totals {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a slot release by its reason
    pub fn record_release(&self, reason: &ReleaseReason) {
        let counter = match reason {
            ReleaseReason::Completed { .. } => &self.completed,
            ReleaseReason::Stopped => &self.stopped,
            ReleaseReason::Cancelled => &self.cancelled,
            ReleaseReason::Failed(_) => &self.failed,
        };
        Self::bump(counter);
    }

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub counters: ConcurrencyCounters,
    pub limits: ConcurrencyLimits,
    pub queue: QueueStats,
    pub active_handles: Vec<FileHandle>,
    pub oldest_queued_at: Option<DateTime<Utc>>,
    pub total_submitted: u64,
    pub total_coalesced: u64,
    pub total_started: u64,
    pub total_completed: u64,
    pub total_stopped: u64,
    pub total_cancelled: u64,
    pub total_failed: u64,
    pub stale_recoveries: u64,
    pub feed_lag_events: u64,
    /// Releases that found the slot already freed
    pub double_releases_guarded: u64,
    pub cached_files: usize,
}

impl SchedulerStats {
    pub(crate) fn totals_from(totals: &Totals) -> TotalsSnapshot {
        TotalsSnapshot {
            submitted: Totals::load(&totals.submitted),
            coalesced: Totals::load(&totals.coalesced),
            started: Totals::load(&totals.started),
            completed: Totals::load(&totals.completed),
            stopped: Totals::load(&totals.stopped),
            cancelled: Totals::load(&totals.cancelled),
            failed: Totals::load(&totals.failed),
            stale_recoveries: Totals::load(&totals.stale_recoveries),
            feed_lag_events: Totals::load(&totals.feed_lag_events),
        }
    }

    /// Jobs that reached a final outcome
    pub fn total_resolved(&self) -> u64 {
        self.total_completed + self.total_stopped + self.total_cancelled + self.total_failed
    }

    /// Seconds the head of the queue has been waiting
    pub fn oldest_wait_secs(&self) -> Option<f64> {
        self.oldest_queued_at.map(|at| {
            Utc::now()
                .signed_duration_since(at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0)
        })
    }
}

/// Plain copy of [`Totals`]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TotalsSnapshot {
    pub submitted: u64,
    pub coalesced: u64,
    pub started: u64,
    pub completed: u64,
    pub stopped: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub stale_recoveries: u64,
    pub feed_lag_events: u64,
}

/// Human-readable statistics reports
pub struct StatsReporter;

impl StatsReporter {
    /// One line suitable for periodic logging
    pub fn one_line(stats: &SchedulerStats) -> String {
        format!(
            "active {}/{} (video {}/{}, thumb {}/{}), queued {}, completed {}, failed {}",
            stats.counters.active_global,
            stats.limits.max_global,
            stats.counters.active_video,
            stats.limits.max_video,
            stats.counters.active_thumb,
            stats.limits.max_thumb,
            stats.queue.pending(),
            stats.total_completed,
            stats.total_failed
        )
    }

    /// Multi-line summary report
    pub fn summary(stats: &SchedulerStats) -> String {
        let mut report = String::new();
        report.push_str("=== Scheduler Summary ===\n");
        report.push_str(&format!(
            "Active:     {} of {} (video {} of {}, thumb {} of {})\n",
            stats.counters.active_global,
            stats.limits.max_global,
            stats.counters.active_video,
            stats.limits.max_video,
            stats.counters.active_thumb,
            stats.limits.max_thumb
        ));
        report.push_str(&format!(
            "Queued:     {} (video {}, thumb {})\n",
            stats.queue.pending(),
            stats.queue.video_pending,
            stats.queue.thumb_pending
        ));
        if let Some(wait) = stats.oldest_wait_secs() {
            report.push_str(&format!("Oldest:     waiting {:.1}s\n", wait));
        }
        report.push_str(&format!(
            "Submitted:  {} ({} coalesced)\n",
            stats.total_submitted, stats.total_coalesced
        ));
        report.push_str(&format!("Started:    {}\n", stats.total_started));
        report.push_str(&format!(
            "Resolved:   {} completed, {} stopped, {} cancelled, {} failed\n",
            stats.total_completed, stats.total_stopped, stats.total_cancelled, stats.total_failed
        ));
        report.push_str(&format!(
            "Recovery:   {} stale handle(s) re-resolved, {} feed lag event(s)\n",
            stats.stale_recoveries, stats.feed_lag_events
        ));
        report.push_str(&format!(
            "Guarded:    {} duplicate release(s)\n",
            stats.double_releases_guarded
        ));
        report
    }
}
