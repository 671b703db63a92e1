//! Live progress display for simulated scheduling runs
//!
//! Uses indicatif with two lines: an overall bar counting resolved jobs and
//! a status line showing active slots against the current limits. The
//! display is hidden entirely in quiet or JSON mode.

use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;

use crate::app::queue::JobResult;
use crate::app::{DownloadOutcome, SchedulerStats};
use crate::errors::{AppError, Result};

/// Tallies of how submitted jobs resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    pub completed: usize,
    pub stopped: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl OutcomeTally {
    pub fn record(&mut self, result: &JobResult) {
        match result {
            Ok(outcome) if outcome.is_completed() => self.completed += 1,
            Ok(DownloadOutcome::Cancelled { .. }) => self.cancelled += 1,
            Ok(_) => self.stopped += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.stopped + self.cancelled + self.failed
    }
}

/// Progress bars for a simulation run
pub struct SimulationDisplay {
    multi: MultiProgress,
    overall: ProgressBar,
    status: ProgressBar,
    tally: OutcomeTally,
}

impl SimulationDisplay {
    /// Create the display for `total_jobs`; `visible = false` draws nothing
    pub fn new(total_jobs: usize, visible: bool) -> Result<Self> {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let multi = MultiProgress::with_draw_target(target);

        let overall = multi.add(ProgressBar::new(total_jobs as u64));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map_err(|e| AppError::generic(format!("Progress bar template error: {}", e)))?
                .progress_chars("##-"),
        );
        overall.set_message("jobs resolved");
        overall.enable_steady_tick(Duration::from_millis(100));

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.blue} {msg}")
                .map_err(|e| AppError::generic(format!("Status line template error: {}", e)))?,
        );
        status.set_message("starting scheduler...");

        debug!("Simulation display created for {} jobs", total_jobs);
        Ok(Self {
            multi,
            overall,
            status,
            tally: OutcomeTally::default(),
        })
    }

    /// Refresh the status line from a stats snapshot
    pub fn update_status(&self, stats: &SchedulerStats) {
        self.status.set_message(format!(
            "active {}/{} (video {}/{}, thumb {}/{}), queued {}",
            stats.counters.active_global,
            stats.limits.max_global,
            stats.counters.active_video,
            stats.limits.max_video,
            stats.counters.active_thumb,
            stats.limits.max_thumb,
            stats.queue.pending(),
        ));
        self.status.tick();
    }

    pub fn job_resolved(&mut self, result: &JobResult) {
        self.tally.record(result);
        self.overall.inc(1);
        if let Err(e) = result {
            debug!("Job failed: {}", e);
            let _ = self.multi.println(format!("  failed: {}", e));
        }
    }

    pub fn tally(&self) -> OutcomeTally {
        self.tally
    }

    /// Finish both lines and return the final tally
    pub fn finish(self) -> OutcomeTally {
        self.status.finish_and_clear();
        self.overall.finish_with_message(format!(
            "{} completed, {} failed",
            self.tally.completed, self.tally.failed
        ));
        self.tally
    }
}
