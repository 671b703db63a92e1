//! Application constants for the media download scheduler
//!
//! This module centralizes all constants used throughout the crate,
//! organized by functional domain.

use std::time::Duration;

/// Default concurrency limits
pub mod limits {
    /// Maximum downloads running at once across all classes
    pub const DEFAULT_MAX_GLOBAL: usize = 6;

    /// Maximum concurrent video downloads
    pub const DEFAULT_MAX_VIDEO: usize = 2;

    /// Maximum concurrent thumbnail downloads
    pub const DEFAULT_MAX_THUMB: usize = 4;
}

/// Download priority range accepted by the backend
pub mod priority {
    /// Lowest priority accepted by the backend
    pub const MIN: u8 = 1;

    /// Highest priority accepted by the backend
    pub const MAX: u8 = 32;

    /// Default priority for video downloads
    pub const VIDEO_DEFAULT: u8 = 32;

    /// Default priority for thumbnail downloads
    pub const THUMB_DEFAULT: u8 = 8;

    /// Compatibility rule: requests at or above this priority are video
    pub const VIDEO_INFERENCE_THRESHOLD: u8 = 32;

    /// Clamp a priority into the accepted range
    pub fn clamp(priority: u8) -> u8 {
        priority.clamp(MIN, MAX)
    }
}

/// Progressive container readiness
pub mod readiness {
    use super::Duration;

    /// Top-level box a player needs before decoding can begin
    pub const TARGET_BOX: [u8; 4] = *b"moov";

    /// Prefix that must be present before the first scan
    pub const MIN_PREFIX_BYTES: u64 = 512 * 1024;

    /// Delay between readiness polls
    pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

    /// Beyond this prefix a missing box is reported as not found
    pub const MAX_SCAN_BYTES: u64 = 32 * 1024 * 1024;

    /// Default overall readiness budget
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Compact box header: 32-bit size + type
    pub const BOX_HEADER_LEN: u64 = 8;

    /// Extended box header: compact header + 64-bit size
    pub const EXTENDED_BOX_HEADER_LEN: u64 = 16;
}

/// Cache maintenance
pub mod janitor {
    use super::Duration;

    /// Default aggregate cache cap (0 = unlimited)
    pub const DEFAULT_CAP_BYTES: u64 = 2 * 1024 * 1024 * 1024;

    /// Files younger than this are never evicted
    pub const DEFAULT_MIN_AGE: Duration = Duration::from_secs(24 * 60 * 60);

    /// Recently accessed files are immune for this long
    pub const DEFAULT_IMMUNITY: Duration = Duration::from_secs(60 * 60);

    /// Interval between periodic janitor passes
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10 * 60);
}

/// Scheduler orchestration
pub mod scheduler {
    use super::Duration;

    /// Maximum time to wait for background tasks on shutdown
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Capacity of the simulated backend update feed
    pub const FEED_CHANNEL_CAPACITY: usize = 1024;

    /// Queue lock waits above this are logged
    pub const LOCK_CONTENTION_WARN: Duration = Duration::from_millis(10);
}

/// Configuration file locations and environment overrides
pub mod config {
    /// Directory name under the platform config dir
    pub const APP_DIR: &str = "media-scheduler";

    /// Configuration file name
    pub const FILE_NAME: &str = "config.toml";

    /// Environment override for the global limit
    pub const ENV_MAX_GLOBAL: &str = "MEDIA_SCHED_MAX_GLOBAL";

    /// Environment override for the video limit
    pub const ENV_MAX_VIDEO: &str = "MEDIA_SCHED_MAX_VIDEO";

    /// Environment override for the thumbnail limit
    pub const ENV_MAX_THUMB: &str = "MEDIA_SCHED_MAX_THUMB";
}

// Re-export commonly used constants at module level
pub use limits::{DEFAULT_MAX_GLOBAL, DEFAULT_MAX_THUMB, DEFAULT_MAX_VIDEO};
pub use readiness::TARGET_BOX;
