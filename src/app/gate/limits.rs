//! Concurrency limits and counters

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::app::models::ResourceClass;
use crate::constants::limits;

/// Upper bounds on simultaneously active downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyLimits {
    pub max_global: usize,
    pub max_video: usize,
    pub max_thumb: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            max_global: limits::DEFAULT_MAX_GLOBAL,
            max_video: limits::DEFAULT_MAX_VIDEO,
            max_thumb: limits::DEFAULT_MAX_THUMB,
        }
    }
}

impl ConcurrencyLimits {
    pub fn new(max_global: usize, max_video: usize, max_thumb: usize) -> Self {
        Self {
            max_global,
            max_video,
            max_thumb,
        }
    }

    /// Limit for one resource class
    pub fn for_class(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::Video => self.max_video,
            ResourceClass::Thumb => self.max_thumb,
        }
    }

    /// Validate limits used to build a scheduler
    ///
    /// Runtime changes through `set_limits` may use zero to pause admission;
    /// a scheduler must start with a usable global limit.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_global == 0 {
            return Err("Global concurrency limit must be greater than 0".to_string());
        }
        if self.max_video == 0 && self.max_thumb == 0 {
            return Err("At least one resource class needs a non-zero limit".to_string());
        }
        Ok(())
    }
}

/// Limits shared between the scheduler's public API and its admission path
///
/// Every admission check loads the current values; nothing caches them.
#[derive(Debug)]
pub struct SharedLimits {
    max_global: AtomicUsize,
    max_video: AtomicUsize,
    max_thumb: AtomicUsize,
}

impl SharedLimits {
    pub fn new(limits: ConcurrencyLimits) -> Self {
        Self {
            max_global: AtomicUsize::new(limits.max_global),
            max_video: AtomicUsize::new(limits.max_video),
            max_thumb: AtomicUsize::new(limits.max_thumb),
        }
    }

    pub fn load(&self) -> ConcurrencyLimits {
        ConcurrencyLimits {
            max_global: self.max_global.load(Ordering::SeqCst),
            max_video: self.max_video.load(Ordering::SeqCst),
            max_thumb: self.max_thumb.load(Ordering::SeqCst),
        }
    }

    pub fn store(&self, limits: ConcurrencyLimits) {
        self.max_global.store(limits.max_global, Ordering::SeqCst);
        self.max_video.store(limits.max_video, Ordering::SeqCst);
        self.max_thumb.store(limits.max_thumb, Ordering::SeqCst);
    }

    pub fn max_global(&self) -> usize {
        self.max_global.load(Ordering::SeqCst)
    }

    pub fn max_for(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::Video => self.max_video.load(Ordering::SeqCst),
            ResourceClass::Thumb => self.max_thumb.load(Ordering::SeqCst),
        }
    }
}

/// Number of downloads currently holding a slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyCounters {
    pub active_global: usize,
    pub active_video: usize,
    pub active_thumb: usize,
}

impl ConcurrencyCounters {
    pub fn for_class(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::Video => self.active_video,
            ResourceClass::Thumb => self.active_thumb,
        }
    }

    /// Global count equals the sum of the class counts
    pub fn is_consistent(&self) -> bool {
        self.active_global == self.active_video + self.active_thumb
    }

    /// Whether no counter exceeds its limit
    pub fn within(&self, limits: &ConcurrencyLimits) -> bool {
        self.active_global <= limits.max_global
            && self.active_video <= limits.max_video
            && self.active_thumb <= limits.max_thumb
    }

    pub(super) fn increment(&mut self, class: ResourceClass) {
        self.active_global += 1;
        match class {
            ResourceClass::Video => self.active_video += 1,
            ResourceClass::Thumb => self.active_thumb += 1,
        }
    }

    pub(super) fn decrement(&mut self, class: ResourceClass) {
        self.active_global = self.active_global.saturating_sub(1);
        match class {
            ResourceClass::Video => self.active_video = self.active_video.saturating_sub(1),
            ResourceClass::Thumb => self.active_thumb = self.active_thumb.saturating_sub(1),
        }
    }
}
