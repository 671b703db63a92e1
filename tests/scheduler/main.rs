//! Integration tests for the download scheduler
//!
//! These drive the public API against the simulated backend and check the
//! admission guarantees in realistic sequences: per-class limits, FIFO
//! order, limit changes, stale-handle recovery and cache maintenance.

use std::sync::Arc;
use std::time::Duration;

use media_scheduler::app::{
    CancelStatus, ConcurrencyCounters, ConcurrencyLimits, DownloadOutcome, DownloadRequest,
    DownloadTicket, FileHandle, JanitorConfig, ResourceClass, Scheduler, SchedulerConfigBuilder,
    SimulatedBackend,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;

const MB: u64 = 1024 * 1024;

fn video(handle: i64) -> DownloadRequest {
    DownloadRequest::new(FileHandle(handle), ResourceClass::Video)
}

fn thumb(handle: i64) -> DownloadRequest {
    DownloadRequest::new(FileHandle(handle), ResourceClass::Thumb)
}

async fn scheduler_with(
    limits: (usize, usize, usize),
    files: impl IntoIterator<Item = i64>,
) -> (Arc<SimulatedBackend>, Scheduler) {
    let backend = Arc::new(SimulatedBackend::new());
    for handle in files {
        backend.add_file(FileHandle(handle), 10_000).await;
    }
    let config = SchedulerConfigBuilder::new()
        .limits(limits.0, limits.1, limits.2)
        .janitor(JanitorConfig::disabled())
        .build();
    let scheduler = Scheduler::new(backend.clone(), config).unwrap();
    (backend, scheduler)
}

async fn wait_for_starts(backend: &SimulatedBackend, expected: usize) -> Vec<FileHandle> {
    for _ in 0..400 {
        let started = backend.started_handles().await;
        if started.len() >= expected {
            return started;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {} starts, saw {:?}",
        expected,
        backend.started_handles().await
    );
}

fn handles(ids: &[i64]) -> Vec<FileHandle> {
    ids.iter().copied().map(FileHandle).collect()
}

#[tokio::test]
async fn test_video_burst_respects_class_limit() {
    let (backend, scheduler) = scheduler_with((4, 2, 4), 1..=5).await;

    let mut tickets = Vec::new();
    for id in 1..=5 {
        tickets.push(scheduler.submit(video(id)).await);
    }

    assert_eq!(backend.started_handles().await, handles(&[1, 2]));
    let stats = scheduler.stats().await;
    assert_eq!(stats.counters.active_video, 2);
    assert_eq!(stats.queue.video_pending, 3);

    backend.complete(FileHandle(1)).await.unwrap();
    assert_eq!(wait_for_starts(&backend, 3).await, handles(&[1, 2, 3]));

    let first = tickets.remove(0).await.unwrap();
    assert!(first.is_completed());
    assert_eq!(scheduler.counters().await.active_video, 2);
}

#[tokio::test]
async fn test_lowered_limit_keeps_actives_and_blocks_admission() {
    let (backend, scheduler) = scheduler_with((4, 2, 2), 1..=3).await;

    let mut tickets: Vec<DownloadTicket> = Vec::new();
    for id in 1..=3 {
        tickets.push(scheduler.submit(video(id)).await);
    }
    assert_eq!(scheduler.active_count().await, 2);

    scheduler
        .set_limits(ConcurrencyLimits::new(4, 1, 2))
        .await;
    assert_eq!(backend.active_handles().await.len(), 2);
    assert_eq!(scheduler.counters().await.active_video, 2);

    // Still one over the new limit after the first completion
    let first_active = backend.active_handles().await[0];
    backend.complete(first_active).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.started_handles().await.len(), 2);
    assert_eq!(scheduler.stats().await.queue.video_pending, 1);

    let second_active = backend.active_handles().await[0];
    backend.complete(second_active).await.unwrap();
    let started = wait_for_starts(&backend, 3).await;
    assert_eq!(started, handles(&[1, 2, 3]));
    assert!(scheduler.counters().await.within(&scheduler.limits()));

    backend.complete(FileHandle(3)).await.unwrap();
    for ticket in tickets {
        assert!(ticket.await.unwrap().is_completed());
    }
}

#[tokio::test]
async fn test_stale_handle_recovers_through_stable_id() {
    let (backend, scheduler) = scheduler_with((4, 2, 2), [42]).await;
    backend.map_stable_id("episode-42", FileHandle(42)).await;

    let ticket = scheduler
        .submit(video(7).with_stable_id("episode-42"))
        .await;

    // The failed attempt on 7 is followed by exactly one retry on 42
    let started = wait_for_starts(&backend, 2).await;
    assert_eq!(started, handles(&[7, 42]));
    assert_eq!(scheduler.current_handle(FileHandle(7)).await, FileHandle(42));
    assert!(scheduler.is_tracked(FileHandle(7)).await);

    backend.advance(FileHandle(42), 500).await.unwrap();
    let state = scheduler.file_state(FileHandle(7)).await.unwrap();
    assert_eq!(state.downloaded_prefix_bytes, 500);

    backend.complete(FileHandle(42)).await.unwrap();
    let outcome = ticket.await.unwrap();
    assert_eq!(outcome.handle(), FileHandle(42));
    assert_eq!(scheduler.stats().await.stale_recoveries, 1);
}

#[tokio::test]
async fn test_janitor_requests_only_the_overage() {
    let backend = Arc::new(SimulatedBackend::new());
    let config = SchedulerConfigBuilder::new()
        .janitor(
            JanitorConfig::disabled()
                .with_cap_bytes(500 * MB)
                .with_pinned(FileHandle(9)),
        )
        .build();
    let scheduler = Scheduler::new(backend.clone(), config).unwrap();

    backend.set_cache_size(600 * MB).await;
    let report = scheduler.run_janitor().await.unwrap();
    assert_eq!(report.requested_bytes, Some(100 * MB));

    let requests = backend.eviction_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target_bytes, 100 * MB);
    assert!(requests[0].exclude.contains(&FileHandle(9)));

    backend.set_cache_size(400 * MB).await;
    let report = scheduler.run_janitor().await.unwrap();
    assert_eq!(report.requested_bytes, None);
    assert_eq!(backend.eviction_requests().await.len(), 1);
}

#[tokio::test]
async fn test_fifo_within_class() {
    let (backend, scheduler) = scheduler_with((4, 1, 4), 1..=4).await;

    let mut tickets = Vec::new();
    for id in [1, 2, 3, 4] {
        tickets.push(scheduler.submit(video(id)).await);
    }

    for expected in 1..=4 {
        let started = wait_for_starts(&backend, expected).await;
        assert_eq!(started, handles(&(1..=expected as i64).collect::<Vec<_>>()));
        backend
            .complete(FileHandle(expected as i64))
            .await
            .unwrap();
    }

    for ticket in tickets {
        assert!(ticket.await.unwrap().is_completed());
    }
}

#[tokio::test]
async fn test_classes_do_not_block_each_other() {
    let (backend, scheduler) = scheduler_with((4, 1, 2), 1..=4).await;

    let _v1 = scheduler.submit(video(1)).await;
    let _v2 = scheduler.submit(video(2)).await;
    let _t3 = scheduler.submit(thumb(3)).await;
    let _t4 = scheduler.submit(thumb(4)).await;

    assert_eq!(backend.started_handles().await, handles(&[1, 3, 4]));
    let counters = scheduler.counters().await;
    assert_eq!(counters.active_video, 1);
    assert_eq!(counters.active_thumb, 2);
}

#[tokio::test]
async fn test_cancel_and_feed_release_decrement_once() {
    let (backend, scheduler) = scheduler_with((1, 1, 1), 1..=2).await;

    let first = scheduler.submit(video(1)).await;
    let second = scheduler.submit(video(2)).await;
    assert_eq!(scheduler.cancel(FileHandle(1)).await, CancelStatus::Requested);

    // A late inactive update for the cancelled file must not free another slot
    backend.stop(FileHandle(1)).await.unwrap();

    assert_eq!(
        first.await.unwrap(),
        DownloadOutcome::Cancelled {
            handle: FileHandle(1)
        }
    );
    wait_for_starts(&backend, 2).await;
    let counters = scheduler.counters().await;
    assert!(counters.is_consistent());
    assert_eq!(counters.active_global, 1);

    backend.complete(FileHandle(2)).await.unwrap();
    assert!(second.await.unwrap().is_completed());
}

#[tokio::test]
async fn test_shutdown_resolves_queued_and_active_tickets() {
    let (_backend, scheduler) = scheduler_with((1, 1, 1), 1..=2).await;

    let active = scheduler.submit(video(1)).await;
    let queued = scheduler.submit(video(2)).await;
    scheduler.shutdown().await;

    assert!(active.await.is_err());
    assert!(queued.await.is_err());
    assert!(scheduler.submit(video(1)).await.await.is_err());
}

/// `observed` may exceed `limit` only when it did not grow since `previous`
fn within_bound(observed: usize, previous: usize, limit: usize) -> bool {
    observed <= limit.max(previous)
}

fn check_bounds(
    observed: &ConcurrencyCounters,
    previous: &ConcurrencyCounters,
    limits: &ConcurrencyLimits,
) {
    assert!(observed.is_consistent(), "inconsistent {:?}", observed);
    assert!(
        within_bound(observed.active_global, previous.active_global, limits.max_global),
        "global {:?} after {:?} under {:?}",
        observed,
        previous,
        limits
    );
    assert!(
        within_bound(observed.active_video, previous.active_video, limits.max_video),
        "video {:?} after {:?} under {:?}",
        observed,
        previous,
        limits
    );
    assert!(
        within_bound(observed.active_thumb, previous.active_thumb, limits.max_thumb),
        "thumb {:?} after {:?} under {:?}",
        observed,
        previous,
        limits
    );
}

#[tokio::test]
async fn test_randomized_arrivals_and_limit_changes() {
    const FILES: i64 = 60;
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let (backend, scheduler) = scheduler_with((3, 2, 2), 1..=FILES).await;

    let mut tickets = Vec::new();
    let mut next_id = 1;
    let mut previous = scheduler.counters().await;

    for _ in 0..300 {
        let before = scheduler.limits();
        match rng.gen_range(0..10) {
            0..=3 if next_id <= FILES => {
                let request = if rng.gen_bool(0.4) {
                    video(next_id)
                } else {
                    thumb(next_id)
                };
                tickets.push(scheduler.submit(request).await);
                next_id += 1;
            }
            0..=6 => {
                let active = backend.active_handles().await;
                if !active.is_empty() {
                    let pick = active[rng.gen_range(0..active.len())];
                    backend.complete(pick).await.unwrap();
                }
            }
            7 => {
                let limits = ConcurrencyLimits::new(
                    rng.gen_range(1..=4),
                    rng.gen_range(0..=2),
                    rng.gen_range(0..=3),
                );
                scheduler.set_limits(limits).await;
            }
            8 if next_id > 1 => {
                let target = FileHandle(rng.gen_range(1..next_id));
                scheduler.cancel(target).await;
            }
            _ => tokio::task::yield_now().await,
        }

        // A drain racing a limit change may still admit under the old limits
        let after = scheduler.limits();
        let bound = ConcurrencyLimits::new(
            before.max_global.max(after.max_global),
            before.max_video.max(after.max_video),
            before.max_thumb.max(after.max_thumb),
        );
        let observed = scheduler.counters().await;
        check_bounds(&observed, &previous, &bound);
        previous = observed;
    }

    // Let everything finish under generous limits
    scheduler
        .set_limits(ConcurrencyLimits::new(4, 2, 3))
        .await;
    let driver = {
        let backend = backend.clone();
        tokio::spawn(async move {
            loop {
                for handle in backend.active_handles().await {
                    let _ = backend.complete(handle).await;
                }
                sleep(Duration::from_millis(2)).await;
            }
        })
    };

    for ticket in tickets {
        let outcome = tokio::time::timeout(Duration::from_secs(5), ticket)
            .await
            .expect("every submission resolves")
            .unwrap();
        assert!(matches!(
            outcome,
            DownloadOutcome::Completed { .. } | DownloadOutcome::Cancelled { .. }
        ));
    }
    driver.abort();

    let stats = scheduler.stats().await;
    assert!(stats.counters.is_consistent());
    assert_eq!(stats.queue.pending(), 0);
}
