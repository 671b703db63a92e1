//! Media Scheduler Library
//!
//! Concurrency-limited download scheduling for media files with progressive
//! container readiness checks. Decides when a requested file may start
//! downloading from a remote content backend, bounds how many downloads of
//! each resource class run at once, and tells a player the earliest moment a
//! partially downloaded file can be streamed.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
