//! Pending download jobs
//!
//! Jobs that could not be admitted immediately wait here until a
//! concurrency slot for their class frees up.
//!
//! # Features
//!
//! - **FIFO per class**: jobs of one class start in submission order
//! - **Class isolation**: a saturated class never blocks the other class
//! - **Coalescing**: repeat submissions of a queued file share one job
//! - **Tickets**: every submission gets a [`DownloadTicket`] future that
//!   resolves with the final [`crate::app::models::DownloadOutcome`]
//!
//! # Basic Usage
//!
//! ```rust
//! use media_scheduler::app::models::{DownloadRequest, FileHandle, ResourceClass};
//! use media_scheduler::app::queue::{DownloadTicket, Job, JobQueue};
//!
//! let mut queue = JobQueue::new();
//! let (waiter, _ticket) = DownloadTicket::channel(FileHandle(7));
//! queue.enqueue(Job::new(
//!     DownloadRequest::new(FileHandle(7), ResourceClass::Thumb),
//!     waiter,
//! ));
//!
//! let next = queue.take_next_startable(|class| class == ResourceClass::Thumb);
//! assert_eq!(next.map(|job| job.handle()), Some(FileHandle(7)));
//! ```

pub mod core;
pub mod types;

#[cfg(test)]
mod tests;

pub use core::JobQueue;
pub use types::{resolve_waiters, DownloadTicket, Job, JobResult, QueueStats, Waiter};
