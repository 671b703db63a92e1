//! Readiness validation settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::boxes::FourCc;
use crate::constants::readiness;

/// How readiness polling behaves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Box the player needs before decoding can begin
    pub target_box: FourCc,
    /// Prefix required before the first scan (capped at the file size)
    pub min_prefix_bytes: u64,
    /// Delay between polls
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Prefix beyond which a missing box is reported as not found
    pub max_scan_bytes: u64,
    /// Budget used when the caller does not pass one
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            target_box: FourCc(readiness::TARGET_BOX),
            min_prefix_bytes: readiness::MIN_PREFIX_BYTES,
            poll_interval: readiness::POLL_INTERVAL,
            max_scan_bytes: readiness::MAX_SCAN_BYTES,
            default_timeout: readiness::DEFAULT_TIMEOUT,
        }
    }
}

impl ReadinessConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("Readiness poll interval cannot be zero".to_string());
        }
        if self.max_scan_bytes < self.min_prefix_bytes {
            return Err(format!(
                "Scan budget ({} bytes) is smaller than the minimum prefix ({} bytes)",
                self.max_scan_bytes, self.min_prefix_bytes
            ));
        }
        if self.default_timeout.is_zero() {
            return Err("Readiness timeout cannot be zero".to_string());
        }
        Ok(())
    }
}
