//! Unit tests for scheduler orchestration
//!
//! These drive a [`Scheduler`] against the in-memory backend and check
//! admission, release, cancellation and recovery paths.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use super::*;
use crate::app::backend::SimulatedBackend;
use crate::app::models::{DownloadOutcome, FileUpdate};
use crate::errors::BackendError;

fn video(handle: i64) -> DownloadRequest {
    DownloadRequest::new(FileHandle(handle), ResourceClass::Video)
}

fn thumb(handle: i64) -> DownloadRequest {
    DownloadRequest::new(FileHandle(handle), ResourceClass::Thumb)
}

async fn setup(limits: (usize, usize, usize), files: &[i64]) -> (Arc<SimulatedBackend>, Scheduler) {
    let backend = Arc::new(SimulatedBackend::new());
    for &handle in files {
        backend.add_file(FileHandle(handle), 1_000).await;
    }
    let config = SchedulerConfigBuilder::new()
        .limits(limits.0, limits.1, limits.2)
        .janitor(crate::app::cache::JanitorConfig::disabled())
        .build();
    let scheduler = Scheduler::new(backend.clone(), config).unwrap();
    (backend, scheduler)
}

async fn wait_for_active(scheduler: &Scheduler, expected: usize) {
    for _ in 0..400 {
        if scheduler.active_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {} active downloads, found {}",
        expected,
        scheduler.active_count().await
    );
}

async fn wait_for_starts(backend: &SimulatedBackend, expected: usize) -> Vec<FileHandle> {
    for _ in 0..400 {
        let started = backend.started_handles().await;
        if started.len() >= expected {
            return started;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} backend starts", expected);
}

#[tokio::test]
async fn test_submit_starts_immediately_when_slot_free() {
    let (backend, scheduler) = setup((4, 2, 2), &[1]).await;

    let _ticket = scheduler.submit(video(1)).await;
    assert_eq!(backend.started_handles().await, vec![FileHandle(1)]);
    assert_eq!(scheduler.active_count().await, 1);
    assert!(scheduler.counters().await.is_consistent());
}

#[tokio::test]
async fn test_completion_on_feed_resolves_ticket_and_frees_slot() {
    let (backend, scheduler) = setup((4, 2, 2), &[1]).await;

    let ticket = scheduler.submit(video(1)).await;
    backend.complete(FileHandle(1)).await.unwrap();

    let outcome = ticket.await.unwrap();
    assert_eq!(
        outcome,
        DownloadOutcome::Completed {
            handle: FileHandle(1),
            local_path: None
        }
    );
    wait_for_active(&scheduler, 0).await;
    assert_eq!(scheduler.stats().await.total_completed, 1);
}

#[tokio::test]
async fn test_stopped_transfer_resolves_as_stopped() {
    let (backend, scheduler) = setup((4, 2, 2), &[1]).await;

    let ticket = scheduler.submit(thumb(1)).await;
    backend.advance(FileHandle(1), 100).await.unwrap();
    backend.stop(FileHandle(1)).await.unwrap();

    assert_eq!(
        ticket.await.unwrap(),
        DownloadOutcome::Stopped {
            handle: FileHandle(1)
        }
    );
}

#[tokio::test]
async fn test_already_cached_file_releases_immediately() {
    let backend = Arc::new(SimulatedBackend::new());
    backend.add_cached_file(FileHandle(5), 500).await;
    let scheduler = Scheduler::new(backend.clone(), ConfigPresets::testing()).unwrap();

    let ticket = scheduler.submit(video(5)).await;
    assert_eq!(scheduler.active_count().await, 0);
    assert!(ticket.await.unwrap().is_completed());
}

#[tokio::test]
async fn test_rejected_start_fails_job_and_frees_slot() {
    let (backend, scheduler) = setup((4, 2, 2), &[1]).await;
    backend
        .reject_next_start(
            FileHandle(1),
            BackendError::Rejected {
                code: 400,
                message: "bad range".to_string(),
            },
        )
        .await;

    let ticket = scheduler.submit(video(1)).await;
    let err = ticket.await.unwrap_err();
    assert!(matches!(err, DownloadError::AdmissionRejected { handle, .. } if handle == FileHandle(1)));
    assert_eq!(scheduler.active_count().await, 0);
    assert_eq!(scheduler.stats().await.total_failed, 1);
}

#[tokio::test]
async fn test_unknown_handle_without_stable_id_is_rejected() {
    let (_backend, scheduler) = setup((4, 2, 2), &[]).await;

    let err = scheduler.submit(video(3)).await.await.unwrap_err();
    assert!(matches!(
        err,
        DownloadError::AdmissionRejected {
            source: BackendError::UnknownHandle { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_duplicate_submission_joins_existing_job() {
    let (backend, scheduler) = setup((4, 1, 2), &[1, 2]).await;

    let active_a = scheduler.submit(video(1)).await;
    let active_b = scheduler.submit(video(1)).await;
    let queued_a = scheduler.submit(video(2)).await;
    let queued_b = scheduler.submit(video(2)).await;

    assert_eq!(backend.started_handles().await, vec![FileHandle(1)]);
    let stats = scheduler.stats().await;
    assert_eq!(stats.total_coalesced, 2);
    assert_eq!(stats.queue.video_pending, 1);

    backend.complete(FileHandle(1)).await.unwrap();
    assert!(active_a.await.unwrap().is_completed());
    assert!(active_b.await.unwrap().is_completed());

    wait_for_starts(&backend, 2).await;
    backend.complete(FileHandle(2)).await.unwrap();
    assert!(queued_a.await.unwrap().is_completed());
    assert!(queued_b.await.unwrap().is_completed());
}

#[tokio::test]
async fn test_cancel_queued_job_touches_no_counters() {
    let (backend, scheduler) = setup((4, 1, 2), &[1, 2]).await;

    let _active = scheduler.submit(video(1)).await;
    let queued = scheduler.submit(video(2)).await;
    let before = scheduler.counters().await;

    assert_eq!(scheduler.cancel(FileHandle(2)).await, CancelStatus::Dequeued);
    assert_eq!(scheduler.counters().await, before);
    assert_eq!(
        queued.await.unwrap(),
        DownloadOutcome::Cancelled {
            handle: FileHandle(2)
        }
    );
    assert!(backend.cancel_calls().await.is_empty());
}

#[tokio::test]
async fn test_cancel_active_job_releases_once() {
    let (backend, scheduler) = setup((4, 2, 2), &[1]).await;

    let ticket = scheduler.submit(video(1)).await;
    assert_eq!(scheduler.cancel(FileHandle(1)).await, CancelStatus::Requested);
    assert_eq!(backend.cancel_calls().await, vec![(FileHandle(1), false)]);

    assert_eq!(
        ticket.await.unwrap(),
        DownloadOutcome::Cancelled {
            handle: FileHandle(1)
        }
    );
    wait_for_active(&scheduler, 0).await;

    // The feed's inactive event and the acknowledgement both fired; the
    // counters must have moved only once
    tokio::time::sleep(Duration::from_millis(20)).await;
    let stats = scheduler.stats().await;
    assert!(stats.counters.is_consistent());
    assert_eq!(stats.counters.active_global, 0);
    assert_eq!(stats.total_cancelled, 1);
}

#[tokio::test]
async fn test_unacknowledged_cancel_waits_for_feed() {
    let (backend, scheduler) = setup((4, 2, 2), &[1]).await;
    backend
        .reject_next_cancel(
            FileHandle(1),
            BackendError::Unavailable {
                reason: "busy".to_string(),
            },
        )
        .await;

    let ticket = scheduler.submit(video(1)).await;
    assert_eq!(scheduler.cancel(FileHandle(1)).await, CancelStatus::Requested);
    assert_eq!(scheduler.active_count().await, 1);

    backend.stop(FileHandle(1)).await.unwrap();
    assert_eq!(
        ticket.await.unwrap(),
        DownloadOutcome::Cancelled {
            handle: FileHandle(1)
        }
    );
}

#[tokio::test]
async fn test_cancel_untracked_handle() {
    let (_backend, scheduler) = setup((4, 2, 2), &[]).await;
    assert_eq!(scheduler.cancel(FileHandle(9)).await, CancelStatus::NotTracked);
}

#[tokio::test]
async fn test_feed_updates_for_untracked_files_are_ignored() {
    let (backend, scheduler) = setup((4, 2, 2), &[1]).await;
    let _ticket = scheduler.submit(video(1)).await;

    backend.emit_update(FileUpdate {
        handle: FileHandle(77),
        state: DownloadState {
            downloading_completed: true,
            ..Default::default()
        },
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stats = scheduler.stats().await;
    assert_eq!(stats.counters.active_global, 1);
    assert_eq!(stats.double_releases_guarded, 0);
    assert!(scheduler.cached_state(FileHandle(77)).await.is_some());
}

#[tokio::test]
async fn test_stale_handle_recovered_through_stable_id() {
    let (backend, scheduler) = setup((4, 2, 2), &[7, 42]).await;
    backend.expire_handle(FileHandle(7)).await;
    backend.map_stable_id("movie-7", FileHandle(42)).await;

    let ticket = scheduler.submit(video(7).with_stable_id("movie-7")).await;
    assert_eq!(
        backend.started_handles().await,
        vec![FileHandle(7), FileHandle(42)]
    );
    assert_eq!(scheduler.current_handle(FileHandle(7)).await, FileHandle(42));
    assert_eq!(scheduler.stats().await.active_handles, vec![FileHandle(42)]);

    let state = scheduler.file_state(FileHandle(7)).await.unwrap();
    assert!(state.downloading_active);

    backend.complete(FileHandle(42)).await.unwrap();
    let outcome = ticket.await.unwrap();
    assert_eq!(outcome.handle(), FileHandle(42));
    assert_eq!(scheduler.stats().await.stale_recoveries, 1);
}

#[tokio::test]
async fn test_unresolvable_stable_id_fails_with_stale_handle() {
    let (backend, scheduler) = setup((4, 2, 2), &[7]).await;
    backend.expire_handle(FileHandle(7)).await;

    let err = scheduler
        .submit(video(7).with_stable_id("gone"))
        .await
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DownloadError::StaleHandle {
            source: BackendError::UnresolvableId { .. },
            ..
        }
    ));
    assert_eq!(backend.started_handles().await, vec![FileHandle(7)]);
    assert_eq!(scheduler.active_count().await, 0);
}

#[tokio::test]
async fn test_stale_retry_happens_only_once() {
    let (backend, scheduler) = setup((4, 2, 2), &[7]).await;
    backend.expire_handle(FileHandle(7)).await;
    backend.map_stable_id("movie", FileHandle(8)).await;

    let err = scheduler
        .submit(video(7).with_stable_id("movie"))
        .await
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::StaleHandle { .. }));
    assert_eq!(
        backend.started_handles().await,
        vec![FileHandle(7), FileHandle(8)]
    );
    assert!(scheduler.counters().await.is_consistent());
    assert_eq!(scheduler.active_count().await, 0);
}

#[tokio::test]
async fn test_reconcile_releases_lost_downloads() {
    let (backend, scheduler) = setup((4, 2, 2), &[1, 2]).await;
    let lost = scheduler.submit(video(1)).await;
    let _running = scheduler.submit(video(2)).await;

    backend.expire_handle(FileHandle(1)).await;
    assert_eq!(scheduler.reconcile().await, 1);

    assert!(matches!(
        lost.await.unwrap_err(),
        DownloadError::Lost { handle, .. } if handle == FileHandle(1)
    ));
    assert_eq!(scheduler.active_count().await, 1);
}

#[tokio::test]
async fn test_lowering_limits_blocks_new_admissions() {
    let (backend, scheduler) = setup((4, 2, 2), &[1, 2, 3]).await;
    let _a = scheduler.submit(video(1)).await;
    let _b = scheduler.submit(video(2)).await;

    scheduler.set_limits(ConcurrencyLimits::new(4, 1, 2)).await;
    let _c = scheduler.submit(video(3)).await;
    assert_eq!(scheduler.active_count().await, 2);
    assert_eq!(scheduler.stats().await.queue.video_pending, 1);

    backend.complete(FileHandle(1)).await.unwrap();
    wait_for_active(&scheduler, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(backend.started_handles().await.len(), 2);

    backend.complete(FileHandle(2)).await.unwrap();
    let started = wait_for_starts(&backend, 3).await;
    assert_eq!(started[2], FileHandle(3));
}

#[tokio::test]
async fn test_raising_limits_drains_queue() {
    let (backend, scheduler) = setup((4, 1, 2), &[1, 2]).await;
    let _a = scheduler.submit(video(1)).await;
    let _b = scheduler.submit(video(2)).await;
    assert_eq!(backend.started_handles().await.len(), 1);

    scheduler.set_limits(ConcurrencyLimits::new(4, 2, 2)).await;
    wait_for_starts(&backend, 2).await;
    wait_for_active(&scheduler, 2).await;
}

#[tokio::test]
async fn test_observe_progress_follows_feed() {
    let (backend, scheduler) = setup((4, 2, 2), &[1]).await;
    let _ticket = scheduler.submit(video(1)).await;
    let mut progress = scheduler.observe_progress(FileHandle(1)).await;

    let first = progress.next().await.unwrap();
    assert!(!first.complete);

    backend.advance(FileHandle(1), 400).await.unwrap();
    backend.complete(FileHandle(1)).await.unwrap();

    let mut last = first;
    while let Some(update) = progress.next().await {
        assert!(update.downloaded_bytes >= last.downloaded_bytes);
        last = update;
    }
    assert!(last.complete);
    assert_eq!(last.downloaded_bytes, 1_000);
}

#[tokio::test]
async fn test_observe_progress_of_complete_file_yields_once() {
    let backend = Arc::new(SimulatedBackend::new());
    backend.add_cached_file(FileHandle(4), 10).await;
    let scheduler = Scheduler::new(backend, ConfigPresets::testing()).unwrap();

    let items: Vec<_> = scheduler.observe_progress(FileHandle(4)).await.collect().await;
    assert_eq!(items.len(), 1);
    assert!(items[0].complete);
}

#[tokio::test]
async fn test_shutdown_resolves_outstanding_tickets() {
    let (_backend, scheduler) = setup((4, 1, 2), &[1, 2]).await;
    let active = scheduler.submit(video(1)).await;
    let queued = scheduler.submit(video(2)).await;

    scheduler.shutdown().await;
    assert!(matches!(
        active.await,
        Err(DownloadError::SchedulerClosed { .. })
    ));
    assert!(matches!(
        queued.await,
        Err(DownloadError::SchedulerClosed { .. })
    ));

    let late = scheduler.submit(video(1)).await;
    assert!(matches!(late.await, Err(DownloadError::SchedulerClosed { .. })));
    assert_eq!(scheduler.active_count().await, 0);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let backend = Arc::new(SimulatedBackend::new());
    let config = SchedulerConfigBuilder::new().limits(0, 1, 1).build();
    assert!(matches!(
        Scheduler::new(backend, config),
        Err(ConfigError::ValidationFailed { .. })
    ));
}

#[tokio::test]
async fn test_resubmit_after_cancel_keeps_its_slot() {
    let (backend, scheduler) = setup((1, 1, 1), &[1, 2]).await;

    let first = scheduler.submit(video(1)).await;
    assert_eq!(scheduler.cancel(FileHandle(1)).await, CancelStatus::Requested);
    // The cancel's inactive update is still on the feed when the file comes back
    let mut again = scheduler.submit(video(1)).await;
    assert!(matches!(first.await, Ok(DownloadOutcome::Cancelled { .. })));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(again.try_result().is_none());
    assert_eq!(scheduler.active_count().await, 1);
    assert_eq!(backend.active_handles().await, vec![FileHandle(1)]);

    let second = scheduler.submit(video(2)).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(backend.active_handles().await, vec![FileHandle(1)]);
    assert_eq!(scheduler.stats().await.queue.video_pending, 1);

    backend.complete(FileHandle(1)).await.unwrap();
    assert!(again.await.unwrap().is_completed());
    wait_for_starts(&backend, 3).await;
    assert_eq!(backend.active_handles().await, vec![FileHandle(2)]);

    backend.complete(FileHandle(2)).await.unwrap();
    assert!(second.await.unwrap().is_completed());
    assert!(scheduler.counters().await.is_consistent());
}

#[tokio::test]
async fn test_outdated_inactive_update_leaves_running_download_alone() {
    let (backend, scheduler) = setup((4, 2, 2), &[1]).await;
    let mut ticket = scheduler.submit(video(1)).await;

    backend.emit_update(FileUpdate {
        handle: FileHandle(1),
        state: DownloadState::default(),
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(ticket.try_result().is_none());
    assert_eq!(scheduler.active_count().await, 1);
    let mirrored = scheduler.cached_state(FileHandle(1)).await.unwrap();
    assert!(mirrored.downloading_active);

    backend.stop(FileHandle(1)).await.unwrap();
    assert_eq!(
        ticket.await.unwrap(),
        DownloadOutcome::Stopped {
            handle: FileHandle(1)
        }
    );
    wait_for_active(&scheduler, 0).await;
}

#[tokio::test]
async fn test_cancelling_queued_job_ends_its_progress_stream() {
    let (_backend, scheduler) = setup((4, 1, 2), &[1, 2]).await;
    let _active = scheduler.submit(video(1)).await;
    let _queued = scheduler.submit(video(2)).await;

    let mut progress = scheduler.observe_progress(FileHandle(2)).await;
    assert!(!progress.next().await.unwrap().complete);

    assert_eq!(scheduler.cancel(FileHandle(2)).await, CancelStatus::Dequeued);
    let end = tokio::time::timeout(Duration::from_millis(500), progress.next()).await;
    assert!(matches!(end, Ok(None)));
    assert_eq!(scheduler.inner.progress.watched().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submit_racing_shutdown_always_resolves() {
    for _ in 0..50 {
        let (_backend, scheduler) = setup((4, 1, 2), &[1, 2]).await;
        let _active = scheduler.submit(video(1)).await;

        let submitter = scheduler.clone();
        let closer = scheduler.clone();
        let submit = tokio::spawn(async move { submitter.submit(video(2)).await });
        let shutdown = tokio::spawn(async move { closer.shutdown().await });

        let ticket = submit.await.unwrap();
        shutdown.await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), ticket)
            .await
            .expect("ticket left pending after shutdown");
        assert!(matches!(result, Err(DownloadError::SchedulerClosed { .. })));
        assert_eq!(scheduler.stats().await.queue.pending(), 0);
    }
}
