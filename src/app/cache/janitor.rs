//! Cache size maintenance
//!
//! The janitor only does threshold arithmetic. Measuring the cache and
//! deleting files are both delegated to the backend.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::config::JanitorConfig;
use super::file_info::FileInfoCache;
use crate::app::backend::ContentBackend;
use crate::app::models::{EvictionRequest, FileHandle};
use crate::errors::{JanitorError, JanitorResult};

/// Bytes to free so that `aggregate` fits under `cap`
///
/// A cap of zero means unlimited.
pub fn compute_eviction(aggregate_bytes: u64, cap_bytes: u64) -> Option<u64> {
    if cap_bytes == 0 || aggregate_bytes <= cap_bytes {
        None
    } else {
        Some(aggregate_bytes - cap_bytes)
    }
}

/// Result of one janitor pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JanitorReport {
    pub aggregate_bytes: u64,
    pub cap_bytes: u64,
    /// Bytes the backend was asked to free, if any
    pub requested_bytes: Option<u64>,
    /// File-info entries dropped after a successful eviction
    pub cleared_entries: usize,
}

/// Compares the aggregate cache size to a cap and asks the backend to evict
pub struct CacheJanitor {
    backend: Arc<dyn ContentBackend>,
    config: JanitorConfig,
    file_cache: Arc<FileInfoCache>,
}

impl CacheJanitor {
    pub fn new(
        backend: Arc<dyn ContentBackend>,
        config: JanitorConfig,
        file_cache: Arc<FileInfoCache>,
    ) -> Self {
        Self {
            backend,
            config,
            file_cache,
        }
    }

    pub fn config(&self) -> &JanitorConfig {
        &self.config
    }

    /// Run one pass
    ///
    /// `exclude` is merged with the configured pinned files; the backend never
    /// evicts any of them.
    pub async fn run_once<I>(&self, exclude: I) -> JanitorResult<JanitorReport>
    where
        I: IntoIterator<Item = FileHandle>,
    {
        let aggregate_bytes = self
            .backend
            .cache_size()
            .await
            .map_err(JanitorError::Stats)?;

        let mut report = JanitorReport {
            aggregate_bytes,
            cap_bytes: self.config.cap_bytes,
            requested_bytes: None,
            cleared_entries: 0,
        };

        let Some(target_bytes) = compute_eviction(aggregate_bytes, self.config.cap_bytes) else {
            debug!(
                "Cache at {} bytes, cap {} bytes: nothing to evict",
                aggregate_bytes, self.config.cap_bytes
            );
            return Ok(report);
        };

        let mut excluded: BTreeSet<FileHandle> = self.config.pinned.clone();
        excluded.extend(exclude);

        let request = EvictionRequest {
            target_bytes,
            min_age: self.config.min_age,
            immunity: self.config.immunity,
            exclude: excluded,
        };

        info!(
            "Cache at {} bytes exceeds cap of {} bytes, requesting eviction of {} bytes ({} excluded)",
            aggregate_bytes,
            self.config.cap_bytes,
            target_bytes,
            request.exclude.len()
        );

        self.backend
            .request_eviction(&request)
            .await
            .map_err(|source| JanitorError::EvictionFailed {
                target_bytes,
                source,
            })?;

        report.requested_bytes = Some(target_bytes);
        report.cleared_entries = self.file_cache.clear().await;
        Ok(report)
    }
}
