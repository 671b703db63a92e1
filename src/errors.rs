//! Error types for the media download scheduler
//!
//! Errors are grouped by the component that produces them. Job outcome errors
//! (`DownloadError`) are `Clone` because a single download can have several
//! waiters that all receive the same failure.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::app::models::FileHandle;

/// Errors reported by the remote content backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Handle is no longer recognized (evicted, session restarted, ...)
    #[error("File handle {handle} is unknown or has expired")]
    UnknownHandle { handle: FileHandle },

    /// Stable identifier could not be turned into a handle
    #[error("Stable identifier could not be resolved: {id}")]
    UnresolvableId { id: String },

    /// Backend refused the request synchronously
    #[error("Backend rejected request (code {code}): {message}")]
    Rejected { code: i32, message: String },

    /// Backend is not reachable or not ready
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },
}

impl BackendError {
    /// Whether this error means the handle itself has gone stale
    pub fn is_stale_handle(&self) -> bool {
        matches!(self, BackendError::UnknownHandle { .. })
    }
}

/// Terminal failures of a submitted download
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// Backend refused to start the download
    #[error("Backend refused to start download of file {handle}")]
    AdmissionRejected {
        handle: FileHandle,
        #[source]
        source: BackendError,
    },

    /// Handle expired and could not be recovered through its stable id
    #[error("Stale handle {handle} could not be recovered via stable id {stable_id}")]
    StaleHandle {
        handle: FileHandle,
        stable_id: String,
        #[source]
        source: BackendError,
    },

    /// Backend no longer knows about a download that was holding a slot
    #[error("Backend lost track of active download {handle}")]
    Lost {
        handle: FileHandle,
        #[source]
        source: BackendError,
    },

    /// Scheduler went away before the download was resolved
    #[error("Scheduler shut down before download of file {handle} was resolved")]
    SchedulerClosed { handle: FileHandle },
}

impl DownloadError {
    /// Handle the failure refers to
    pub fn handle(&self) -> FileHandle {
        match self {
            DownloadError::AdmissionRejected { handle, .. }
            | DownloadError::StaleHandle { handle, .. }
            | DownloadError::Lost { handle, .. }
            | DownloadError::SchedulerClosed { handle } => *handle,
        }
    }
}

/// Failures while waiting for a file to become playable
#[derive(Error, Debug)]
pub enum ReadinessError {
    /// Metadata box not present within the scan budget
    #[error(
        "'{box_type}' box absent within scan budget of {budget} bytes for file {handle}; file likely not optimized for progressive playback"
    )]
    StructureNotFound {
        handle: FileHandle,
        box_type: String,
        budget: u64,
    },

    /// Completed file does not contain the required structure
    #[error("File {handle} is a corrupt or non-conforming container: {reason}")]
    StructureInvalid { handle: FileHandle, reason: String },

    /// Overall readiness budget elapsed
    #[error("File {handle} not ready for playback after {waited:?} (stuck in {phase})")]
    Timeout {
        handle: FileHandle,
        waited: Duration,
        phase: &'static str,
    },

    /// Download stopped or was cancelled before the file became playable
    #[error("Download of file {handle} stopped before it became playable")]
    DownloadStopped { handle: FileHandle },

    /// Backend query failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Underlying download failed
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Local file could not be read
    #[error("I/O error reading {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Cache maintenance errors
#[derive(Error, Debug)]
pub enum JanitorError {
    /// Aggregate cache statistics could not be queried
    #[error("Failed to query cache statistics")]
    Stats(#[source] BackendError),

    /// Backend refused the eviction request
    #[error("Eviction of {target_bytes} bytes failed")]
    EvictionFailed {
        target_bytes: u64,
        #[source]
        source: BackendError,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Failed to serialize configuration")]
    Serialize(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },

    /// No platform configuration directory
    #[error("Could not determine the system configuration directory")]
    NoConfigDir,

    /// I/O error reading or writing configuration
    #[error("Configuration file I/O error")]
    Io(#[from] std::io::Error),
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Backend error
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Download error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Readiness error
    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    /// Cache maintenance error
    #[error(transparent)]
    Janitor(#[from] JanitorError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Backend(BackendError::Unavailable { .. })
            | AppError::Readiness(ReadinessError::Timeout { .. })
            | AppError::Readiness(ReadinessError::Backend(BackendError::Unavailable { .. }))
            | AppError::Janitor(_) => true,

            AppError::Download(_)
            | AppError::Readiness(ReadinessError::StructureNotFound { .. })
            | AppError::Readiness(ReadinessError::StructureInvalid { .. })
            | AppError::Config(_) => false,

            _ => false,
        }
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Backend(_) => "backend",
            AppError::Download(_) => "download",
            AppError::Readiness(_) => "readiness",
            AppError::Janitor(_) => "janitor",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Backend result type alias
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Readiness result type alias
pub type ReadinessResult<T> = std::result::Result<T, ReadinessError>;

/// Janitor result type alias
pub type JanitorResult<T> = std::result::Result<T, JanitorError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
