//! Scheduler configuration, builder and presets

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::cache::JanitorConfig;
use crate::app::gate::ConcurrencyLimits;
use crate::app::models::{DownloadRequest, FileHandle, ResourceClass};
use crate::app::readiness::ReadinessConfig;
use crate::constants::{priority, scheduler};

/// Runtime configuration of a [`super::Scheduler`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Initial concurrency limits (changeable later through `set_limits`)
    pub limits: ConcurrencyLimits,
    /// Priority given to video downloads the scheduler submits itself
    pub video_priority: u8,
    /// Priority given to thumbnail downloads the scheduler submits itself
    pub thumb_priority: u8,
    /// Re-query active downloads when the update feed drops events
    pub reconcile_on_lag: bool,
    /// Maximum time to wait for background tasks on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub readiness: ReadinessConfig,
    pub janitor: JanitorConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        ConfigPresets::production()
    }
}

impl SchedulerConfig {
    /// Build a request for `handle` using the configured class priority
    pub fn request(&self, handle: FileHandle, class: ResourceClass) -> DownloadRequest {
        let priority = match class {
            ResourceClass::Video => self.video_priority,
            ResourceClass::Thumb => self.thumb_priority,
        };
        DownloadRequest::new(handle, class).with_priority(priority)
    }

    /// Validate the configuration, collecting every problem
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.limits.validate() {
            errors.push(e);
        }
        for (name, value) in [
            ("video_priority", self.video_priority),
            ("thumb_priority", self.thumb_priority),
        ] {
            if !(priority::MIN..=priority::MAX).contains(&value) {
                errors.push(format!(
                    "{} must be between {} and {}, got {}",
                    name,
                    priority::MIN,
                    priority::MAX,
                    value
                ));
            }
        }
        if self.shutdown_timeout.is_zero() {
            errors.push("Shutdown timeout cannot be zero".to_string());
        }
        if let Err(e) = self.readiness.validate() {
            errors.push(e);
        }
        if let Err(e) = self.janitor.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Builder for [`SchedulerConfig`]
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfigBuilder {
    limits: Option<ConcurrencyLimits>,
    video_priority: Option<u8>,
    thumb_priority: Option<u8>,
    reconcile_on_lag: Option<bool>,
    shutdown_timeout: Option<Duration>,
    readiness: Option<ReadinessConfig>,
    janitor: Option<JanitorConfig>,
}

impl SchedulerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set all three concurrency limits
    pub fn limits(mut self, max_global: usize, max_video: usize, max_thumb: usize) -> Self {
        self.limits = Some(ConcurrencyLimits::new(max_global, max_video, max_thumb));
        self
    }

    pub fn video_priority(mut self, priority: u8) -> Self {
        self.video_priority = Some(priority);
        self
    }

    pub fn thumb_priority(mut self, priority: u8) -> Self {
        self.thumb_priority = Some(priority);
        self
    }

    pub fn reconcile_on_lag(mut self, enabled: bool) -> Self {
        self.reconcile_on_lag = Some(enabled);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    pub fn readiness(mut self, readiness: ReadinessConfig) -> Self {
        self.readiness = Some(readiness);
        self
    }

    pub fn janitor(mut self, janitor: JanitorConfig) -> Self {
        self.janitor = Some(janitor);
        self
    }

    pub fn build(self) -> SchedulerConfig {
        SchedulerConfig {
            limits: self.limits.unwrap_or_default(),
            video_priority: self.video_priority.unwrap_or(priority::VIDEO_DEFAULT),
            thumb_priority: self.thumb_priority.unwrap_or(priority::THUMB_DEFAULT),
            reconcile_on_lag: self.reconcile_on_lag.unwrap_or(true),
            shutdown_timeout: self
                .shutdown_timeout
                .unwrap_or(scheduler::SHUTDOWN_TIMEOUT),
            readiness: self.readiness.unwrap_or_default(),
            janitor: self.janitor.unwrap_or_default(),
        }
    }
}

/// Configuration presets for different use cases
pub struct ConfigPresets;

impl ConfigPresets {
    /// Default limits, periodic janitor
    pub fn production() -> SchedulerConfig {
        SchedulerConfigBuilder::new().build()
    }

    /// One download per class, small scan budget
    pub fn low_resource() -> SchedulerConfig {
        SchedulerConfigBuilder::new()
            .limits(2, 1, 1)
            .readiness(ReadinessConfig {
                max_scan_bytes: 8 * 1024 * 1024,
                ..Default::default()
            })
            .build()
    }

    /// Fast polling, tiny thresholds, no periodic janitor
    pub fn testing() -> SchedulerConfig {
        SchedulerConfigBuilder::new()
            .limits(4, 2, 2)
            .shutdown_timeout(Duration::from_millis(500))
            .readiness(ReadinessConfig {
                min_prefix_bytes: 16,
                poll_interval: Duration::from_millis(10),
                max_scan_bytes: 64 * 1024,
                default_timeout: Duration::from_secs(2),
                ..Default::default()
            })
            .janitor(JanitorConfig::disabled())
            .build()
    }
}
