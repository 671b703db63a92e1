//! Cache janitor configuration

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::models::FileHandle;
use crate::constants::janitor;

/// Configuration for cache size maintenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorConfig {
    /// Aggregate cache cap in bytes (0 = unlimited)
    pub cap_bytes: u64,
    /// Files younger than this are never evicted
    #[serde(with = "humantime_serde")]
    pub min_age: Duration,
    /// Recently accessed files stay for this long
    #[serde(with = "humantime_serde")]
    pub immunity: Duration,
    /// Run periodically in the background
    pub enabled: bool,
    /// Interval between periodic passes
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Files that are never evicted, in addition to active downloads
    pub pinned: BTreeSet<FileHandle>,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            cap_bytes: janitor::DEFAULT_CAP_BYTES,
            min_age: janitor::DEFAULT_MIN_AGE,
            immunity: janitor::DEFAULT_IMMUNITY,
            enabled: true,
            interval: janitor::DEFAULT_INTERVAL,
            pinned: BTreeSet::new(),
        }
    }
}

impl JanitorConfig {
    /// Janitor that never evicts and never runs on its own
    pub fn disabled() -> Self {
        Self {
            cap_bytes: 0,
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the aggregate cap in bytes
    pub fn with_cap_bytes(mut self, cap_bytes: u64) -> Self {
        self.cap_bytes = cap_bytes;
        self
    }

    /// Set the periodic interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Pin a file so it is never evicted
    pub fn with_pinned(mut self, handle: FileHandle) -> Self {
        self.pinned.insert(handle);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.interval.is_zero() {
            return Err("Janitor interval cannot be zero when enabled".to_string());
        }
        Ok(())
    }
}
