//! Backend update feed dispatch
//!
//! Every update refreshes the file-info mirror and the file's progress
//! watchers. A completion of a tracked download releases its slot; other
//! inactive reports release it once a fresh backend query agrees. Updates
//! for untracked files stop at the mirror.

use tracing::{debug, info, warn};

use super::stats::Totals;
use super::Inner;
use crate::app::gate::ReleaseReason;
use crate::app::models::FileUpdate;
use crate::errors::DownloadError;

pub async fn handle_update(inner: &Inner, update: FileUpdate) {
    let FileUpdate { handle, state } = update;
    inner.record_state(handle, &state).await;

    if state.is_inactive() && inner.release_from_feed(handle, &state).await {
        debug!(
            "Feed reported {} inactive ({} of {} bytes)",
            handle, state.downloaded_prefix_bytes, state.total_bytes
        );
    }
}

/// The receiver fell behind and `missed` updates are gone
pub async fn handle_lag(inner: &Inner, missed: u64) {
    Totals::bump(&inner.totals.feed_lag_events);
    warn!("Update feed lagged, {} update(s) dropped", missed);
    if inner.config.reconcile_on_lag {
        let released = reconcile_active(inner).await;
        if released > 0 {
            info!("Reconciliation released {} download(s)", released);
        }
    }
}

/// Re-query every active download; returns how many slots were released
pub async fn reconcile_active(inner: &Inner) -> usize {
    let active = inner.lock_state().await.gate.active_handles();
    let mut released = 0;

    for (handle, _) in active {
        match inner.backend.file_state(handle).await {
            Ok(state) => {
                inner.record_state(handle, &state).await;
                if state.is_inactive() && inner.release_inactive(handle, &state).await {
                    released += 1;
                }
            }
            Err(e) if e.is_stale_handle() => {
                warn!("Backend lost track of active download {}", handle);
                let reason = ReleaseReason::Failed(DownloadError::Lost { handle, source: e });
                if inner.release(handle, reason).await {
                    released += 1;
                }
            }
            Err(e) => warn!("Could not reconcile {}: {}", handle, e),
        }
    }

    released
}
