//! Prelude module for the Media Scheduler Library
//!
//! Re-exports the items most integrations need, so a single
//! `use media_scheduler::prelude::*;` is enough for typical usage.
//!
//! # Usage
//!
//! ```rust,no_run
//! use media_scheduler::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let backend = Arc::new(SimulatedBackend::new());
//!     let scheduler = Scheduler::new(backend, ConfigPresets::production())?;
//!
//!     let ticket = scheduler
//!         .submit(DownloadRequest::new(FileHandle(1), ResourceClass::Thumb))
//!         .await;
//!     // ... await the ticket, observe progress, etc.
//!     drop(ticket);
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

pub use crate::app::{
    // Orchestration
    CancelStatus,
    ConfigPresets,
    // Limits
    ConcurrencyLimits,
    // Backend boundary
    ContentBackend,
    DownloadOutcome,
    DownloadProgress,
    // Requests and results
    DownloadRequest,
    DownloadState,
    DownloadTicket,
    FileHandle,
    JanitorConfig,
    ReadinessConfig,
    ResourceClass,
    Scheduler,
    SchedulerConfig,
    SchedulerStats,
    SimulatedBackend,
    StableId,
    StatsReporter,
};

pub use crate::config::AppConfig;

pub use crate::errors::{BackendError, DownloadError, ReadinessError};
