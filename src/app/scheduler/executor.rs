//! Starting admitted downloads and draining the queue
//!
//! Both functions are called with the admission lock released; they take it
//! only for the short queue and gate mutations.

use tracing::{debug, warn};

use super::stale;
use super::stats::Totals;
use super::{AdmissionState, Inner};
use crate::app::gate::ReleaseReason;
use crate::app::models::{DownloadRequest, StartOutcome};
use crate::errors::DownloadError;

/// Ask the backend to start a download that already holds a slot
///
/// - already complete: the slot is released right away
/// - downloading or accepted: the slot stays held until the update feed
///   reports the file inactive
/// - expired handle with a stable id: handed to stale recovery
/// - any other refusal: the slot is released and the job fails
pub async fn start_admitted(inner: &Inner, request: DownloadRequest) {
    let handle = request.handle;
    Totals::bump(&inner.totals.started);
    debug!(
        "Starting {} download {} (priority {}, offset {}, limit {})",
        request.class, handle, request.priority, request.offset, request.limit
    );

    match inner.backend.start_download(&request).await {
        Ok(StartOutcome::Finished(state)) => {
            debug!("File {} already complete", handle);
            inner.record_state(handle, &state).await;
            inner
                .release(
                    handle,
                    ReleaseReason::Completed {
                        local_path: state.local_path,
                    },
                )
                .await;
        }
        Ok(StartOutcome::Downloading(state)) => {
            inner.record_state(handle, &state).await;
            inner.confirm_started(handle).await;
        }
        Ok(StartOutcome::Accepted) => inner.confirm_started(handle).await,
        Err(e) if e.is_stale_handle() => match request.stable_id.clone() {
            Some(stable_id) => stale::recover(inner, request, stable_id, e).await,
            None => {
                warn!("Backend rejected {}: {}", handle, e);
                inner
                    .release(
                        handle,
                        ReleaseReason::Failed(DownloadError::AdmissionRejected { handle, source: e }),
                    )
                    .await;
            }
        },
        Err(e) => {
            warn!("Backend rejected {}: {}", handle, e);
            inner
                .release(
                    handle,
                    ReleaseReason::Failed(DownloadError::AdmissionRejected { handle, source: e }),
                )
                .await;
        }
    }
}

/// Start queued jobs until none can be admitted
///
/// Each iteration removes and admits one job under the lock, then starts it
/// with the lock released.
pub async fn drain(inner: &Inner) {
    let mut started = 0usize;

    loop {
        let next = {
            let mut admission = inner.lock_state().await;
            let AdmissionState { gate, queue } = &mut *admission;
            let Some(job) = queue.take_next_startable(|class| gate.can_admit(class)) else {
                break;
            };
            debug!("Dequeued {} after {:?}", job.handle(), job.waited());
            gate.admit(job)
        };

        if let Some(request) = next {
            start_admitted(inner, request).await;
            started += 1;
        }
    }

    if started > 0 {
        debug!("Drain pass started {} queued download(s)", started);
    }
}
