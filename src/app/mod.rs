//! Core application logic for the media download scheduler
//!
//! This module contains the backend boundary, admission control, the job
//! queue, container readiness validation, cache maintenance and the
//! scheduler that orchestrates them.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use media_scheduler::app::{ConfigPresets, FileHandle, Scheduler, SimulatedBackend};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(SimulatedBackend::new());
//! let scheduler = Scheduler::new(backend, ConfigPresets::production())?;
//!
//! // Blocks until the file's metadata box has been downloaded
//! let path = scheduler
//!     .ensure_ready_for_playback(FileHandle(12), Some("movie-12".into()), Duration::from_secs(30))
//!     .await?;
//! println!("play {}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod gate;
pub mod models;
pub mod queue;
pub mod readiness;
pub mod scheduler;

// Re-export main public API
pub use backend::{synthetic_container, ContentBackend, SimulatedBackend};
pub use cache::{compute_eviction, CacheJanitor, FileInfoCache, JanitorConfig, JanitorReport};
pub use gate::{ConcurrencyCounters, ConcurrencyGate, ConcurrencyLimits, ReleaseReason};
pub use models::{
    DownloadOutcome, DownloadProgress, DownloadRequest, DownloadState, FileHandle, FileUpdate,
    ResourceClass, StableId, StartOutcome,
};
pub use queue::{DownloadTicket, JobQueue, QueueStats};
pub use readiness::{ReadinessConfig, ReadinessValidator, ReadyFile};
pub use scheduler::{
    CancelStatus, ConfigPresets, Scheduler, SchedulerConfig, SchedulerConfigBuilder,
    SchedulerStats, StatsReporter,
};
