//! Integration tests for progressive playback readiness
//!
//! Containers are written to a temporary directory by the simulated
//! backend as bytes "arrive", and the validator decides when the metadata
//! box is fully present.

use std::sync::Arc;
use std::time::Duration;

use media_scheduler::app::readiness::boxes::encode_box;
use media_scheduler::app::readiness::ReadinessPhase;
use media_scheduler::app::{
    synthetic_container, ConfigPresets, ContentBackend, DownloadRequest, FileHandle,
    ReadinessConfig, ReadinessValidator, ResourceClass, Scheduler, SimulatedBackend,
};
use media_scheduler::errors::ReadinessError;
use tempfile::TempDir;
use tokio::sync::broadcast;

const MOOV_PAYLOAD: usize = 64;
const MDAT_PAYLOAD: usize = 2048;
/// `ftyp` (8 + 16) precedes `moov` in a synthetic container
const MOOV_OFFSET: u64 = 24;
const MOOV_SIZE: u64 = 8 + MOOV_PAYLOAD as u64;

fn fast_config() -> ReadinessConfig {
    ReadinessConfig {
        min_prefix_bytes: 16,
        poll_interval: Duration::from_millis(5),
        max_scan_bytes: 64 * 1024,
        ..Default::default()
    }
}

async fn started_backend(content: Vec<u8>) -> (TempDir, Arc<SimulatedBackend>) {
    let temp_dir = TempDir::new().unwrap();
    let backend = Arc::new(SimulatedBackend::with_root(temp_dir.path()));
    backend.add_file_with_content(FileHandle(1), content).await;
    backend
        .start_download(&DownloadRequest::new(FileHandle(1), ResourceClass::Video))
        .await
        .unwrap();
    (temp_dir, backend)
}

#[tokio::test]
async fn test_ready_reports_structure_location() {
    let (_dir, backend) = started_backend(synthetic_container(true, MOOV_PAYLOAD, MDAT_PAYLOAD)).await;
    backend.complete(FileHandle(1)).await.unwrap();

    let validator = ReadinessValidator::new(backend.clone(), fast_config());
    let ready = validator
        .wait_until_ready(FileHandle(1), Duration::from_secs(2), None)
        .await
        .unwrap();

    assert_eq!(ready.structure.offset, MOOV_OFFSET);
    assert_eq!(ready.structure.size, MOOV_SIZE);
    assert!(ready.path.exists());
}

#[tokio::test]
async fn test_one_byte_short_is_not_ready() {
    let (_dir, backend) = started_backend(synthetic_container(true, MOOV_PAYLOAD, MDAT_PAYLOAD)).await;
    let validator = ReadinessValidator::new(backend.clone(), fast_config());
    let end = MOOV_OFFSET + MOOV_SIZE;

    let state = backend.advance(FileHandle(1), end - 1).await.unwrap();
    let mut phase = ReadinessPhase::AwaitingMinPrefix;
    let mut resume_at = 0;
    let step = validator
        .evaluate(FileHandle(1), &state, &mut phase, &mut resume_at)
        .await
        .unwrap();
    assert!(step.is_none());
    assert_eq!(phase, ReadinessPhase::Scanning);
    assert_eq!(resume_at, MOOV_OFFSET);

    let state = backend.advance(FileHandle(1), 1).await.unwrap();
    let ready = validator
        .evaluate(FileHandle(1), &state, &mut phase, &mut resume_at)
        .await
        .unwrap()
        .expect("ready once the last byte arrives");
    assert_eq!(ready.structure.end(), end);
}

#[tokio::test]
async fn test_complete_file_without_target_is_invalid() {
    let mut content = encode_box(*b"ftyp", b"isom\0\0\0\0isommp41");
    content.extend_from_slice(&encode_box(*b"mdat", &[7u8; 512]));
    let (_dir, backend) = started_backend(content).await;
    backend.complete(FileHandle(1)).await.unwrap();

    let validator = ReadinessValidator::new(backend.clone(), fast_config());
    let result = validator
        .wait_until_ready(FileHandle(1), Duration::from_secs(2), None)
        .await;
    assert!(matches!(
        result,
        Err(ReadinessError::StructureInvalid { .. })
    ));
}

#[tokio::test]
async fn test_moov_at_end_is_not_found_within_budget() {
    let content = synthetic_container(false, MOOV_PAYLOAD, 8 * 1024);
    let (_dir, backend) = started_backend(content).await;
    backend.advance(FileHandle(1), 4 * 1024).await.unwrap();

    let config = ReadinessConfig {
        max_scan_bytes: 2 * 1024,
        ..fast_config()
    };
    let validator = ReadinessValidator::new(backend.clone(), config);
    let result = validator
        .wait_until_ready(FileHandle(1), Duration::from_secs(2), None)
        .await;
    assert!(matches!(
        result,
        Err(ReadinessError::StructureNotFound { .. })
    ));
}

#[tokio::test]
async fn test_prefix_below_threshold_times_out() {
    let (_dir, backend) = started_backend(synthetic_container(true, MOOV_PAYLOAD, MDAT_PAYLOAD)).await;
    backend.advance(FileHandle(1), 8).await.unwrap();

    let validator = ReadinessValidator::new(backend.clone(), fast_config());
    let result = validator
        .wait_until_ready(FileHandle(1), Duration::from_millis(60), None)
        .await;
    match result {
        Err(ReadinessError::Timeout { phase, .. }) => {
            assert_eq!(phase, ReadinessPhase::AwaitingMinPrefix.as_str())
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ensure_ready_starts_download_and_returns_path() {
    let temp_dir = TempDir::new().unwrap();
    let backend = Arc::new(SimulatedBackend::with_root(temp_dir.path()));
    backend
        .add_file_with_content(
            FileHandle(3),
            synthetic_container(true, MOOV_PAYLOAD, 16 * 1024),
        )
        .await;

    let scheduler = Scheduler::new(backend.clone(), ConfigPresets::testing()).unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let transfers = backend.spawn_auto_progress(64, Duration::from_millis(5), shutdown_rx);

    let path = scheduler
        .ensure_ready_for_playback(FileHandle(3), None, Duration::from_secs(5))
        .await
        .unwrap();

    assert!(path.starts_with(temp_dir.path()));
    assert_eq!(backend.started_handles().await, vec![FileHandle(3)]);
    let on_disk = tokio::fs::metadata(&path).await.unwrap().len();
    assert!(on_disk >= MOOV_OFFSET + MOOV_SIZE);

    let _ = shutdown_tx.send(());
    transfers.await.unwrap();
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_ensure_ready_fails_when_download_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let backend = Arc::new(SimulatedBackend::with_root(temp_dir.path()));
    let scheduler = Scheduler::new(backend.clone(), ConfigPresets::testing()).unwrap();

    // Handle 5 was never registered and has no stable id to recover with
    let result = scheduler
        .ensure_ready_for_playback(FileHandle(5), None, Duration::from_secs(1))
        .await;
    assert!(result.is_err());
    assert_eq!(scheduler.active_count().await, 0);
}
