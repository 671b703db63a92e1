//! Cache bookkeeping
//!
//! # Module Organization
//!
//! - [`file_info`] - local mirror of backend file state, refreshed from the
//!   update feed and cleared after evictions
//! - [`janitor`] - aggregate size check against a cap plus eviction request
//! - [`config`] - janitor cap, age windows and schedule
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use media_scheduler::app::backend::SimulatedBackend;
//! use media_scheduler::app::cache::{CacheJanitor, FileInfoCache, JanitorConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(SimulatedBackend::new());
//! let janitor = CacheJanitor::new(
//!     backend,
//!     JanitorConfig::default().with_cap_bytes(500 * 1024 * 1024),
//!     Arc::new(FileInfoCache::new()),
//! );
//!
//! let report = janitor.run_once(Vec::new()).await?;
//! println!("cache holds {} bytes", report.aggregate_bytes);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod file_info;
pub mod janitor;

pub use config::JanitorConfig;
pub use file_info::FileInfoCache;
pub use janitor::{compute_eviction, CacheJanitor, JanitorReport};
