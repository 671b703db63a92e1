//! Expired handle recovery
//!
//! When the backend no longer recognizes a handle and the request carries a
//! stable id, the id is resolved once and the start is retried once with the
//! fresh handle. Any failure along the way is terminal for the job.

use tracing::{info, warn};

use super::stats::Totals;
use super::Inner;
use crate::app::gate::{ReleaseReason, Rekey};
use crate::app::models::{DownloadRequest, StableId, StartOutcome};
use crate::errors::{BackendError, DownloadError};

pub async fn recover(
    inner: &Inner,
    request: DownloadRequest,
    stable_id: StableId,
    error: BackendError,
) {
    let old = request.handle;
    info!(
        "File handle {} expired, resolving stable id {}",
        old, stable_id
    );

    let fail = |source: BackendError| {
        ReleaseReason::Failed(DownloadError::StaleHandle {
            handle: old,
            stable_id: stable_id.to_string(),
            source,
        })
    };

    let fresh = match inner.backend.resolve_stable_id(&stable_id).await {
        Ok(fresh) if fresh != old => fresh,
        Ok(_) => {
            warn!("Stable id {} still resolves to expired handle {}", stable_id, old);
            inner.release(old, fail(error)).await;
            return;
        }
        Err(e) => {
            warn!("Could not resolve stable id {}: {}", stable_id, e);
            inner.release(old, fail(e)).await;
            return;
        }
    };

    inner.add_alias(old, fresh).await;
    Totals::bump(&inner.totals.stale_recoveries);

    let rekey = {
        let mut admission = inner.lock_state().await;
        let rekey = admission.gate.rekey(old, fresh);
        if rekey == Rekey::Moved {
            // A job queued under the fresh handle joins the running one
            if let Some(job) = admission.queue.take(fresh) {
                let (_, waiters) = job.into_parts();
                let _ = admission.gate.extend_waiters(fresh, waiters);
            }
        }
        rekey
    };

    match rekey {
        Rekey::Moved => {}
        Rekey::Merged => {
            info!("File {} is already downloading as {}", old, fresh);
            inner.drain_signal.notify_one();
            return;
        }
        Rekey::Missing => {
            info!("Download {} was released during recovery", old);
            return;
        }
    }

    let mut retry = request;
    retry.handle = fresh;
    info!("Retrying download of {} as {}", old, fresh);

    match inner.backend.start_download(&retry).await {
        Ok(StartOutcome::Finished(state)) => {
            inner.record_state(fresh, &state).await;
            inner
                .release(
                    fresh,
                    ReleaseReason::Completed {
                        local_path: state.local_path,
                    },
                )
                .await;
        }
        Ok(StartOutcome::Downloading(state)) => {
            inner.record_state(fresh, &state).await;
            inner.confirm_started(fresh).await;
        }
        Ok(StartOutcome::Accepted) => inner.confirm_started(fresh).await,
        Err(e) if e.is_stale_handle() => {
            warn!("Fresh handle {} for {} is stale too", fresh, stable_id);
            inner.release(fresh, fail(e)).await;
        }
        Err(e) => {
            warn!("Backend rejected retried download {}: {}", fresh, e);
            inner
                .release(
                    fresh,
                    ReleaseReason::Failed(DownloadError::AdmissionRejected {
                        handle: fresh,
                        source: e,
                    }),
                )
                .await;
        }
    }
}
