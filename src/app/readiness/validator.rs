//! Polling readiness check for partially downloaded files
//!
//! The validator repeatedly asks the backend for the file's download state
//! and walks the container on disk until the target box is entirely inside
//! the downloaded prefix. Every wait is bounded by an overall timeout.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tracing::{debug, info, warn};

use super::boxes::{self, BoxLocation, ScanOutcome};
use super::config::ReadinessConfig;
use crate::app::backend::ContentBackend;
use crate::app::models::{DownloadOutcome, DownloadState, FileHandle};
use crate::app::queue::DownloadTicket;
use crate::errors::{ReadinessError, ReadinessResult};

/// Where the polling state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPhase {
    /// Prefix below the minimum threshold
    AwaitingMinPrefix,
    /// Threshold met but the local file is not readable yet
    AwaitingLocalFile,
    /// Walking box headers
    Scanning,
}

impl ReadinessPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadinessPhase::AwaitingMinPrefix => "awaiting-min-prefix",
            ReadinessPhase::AwaitingLocalFile => "awaiting-local-file",
            ReadinessPhase::Scanning => "scanning",
        }
    }
}

impl fmt::Display for ReadinessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file whose downloaded prefix already holds the target box
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyFile {
    pub handle: FileHandle,
    pub path: PathBuf,
    pub structure: BoxLocation,
    pub downloaded_bytes: u64,
}

/// Decides when a partial download can be handed to a player
pub struct ReadinessValidator {
    backend: Arc<dyn ContentBackend>,
    config: ReadinessConfig,
}

impl ReadinessValidator {
    pub fn new(backend: Arc<dyn ContentBackend>, config: ReadinessConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.config
    }

    /// Poll until `handle` is playable, fails, or `timeout` elapses
    ///
    /// When a `ticket` for the file's download is supplied, a failed,
    /// stopped or cancelled download ends the wait early.
    pub async fn wait_until_ready(
        &self,
        handle: FileHandle,
        timeout: Duration,
        ticket: Option<&mut DownloadTicket>,
    ) -> ReadinessResult<ReadyFile> {
        let started = Instant::now();
        let mut phase = ReadinessPhase::AwaitingMinPrefix;

        let result = tokio::time::timeout(timeout, self.poll(handle, &mut phase, ticket)).await;
        match result {
            Ok(Ok(ready)) => {
                info!(
                    "File {} ready for playback after {:?}: '{}' at {}..{}",
                    handle,
                    started.elapsed(),
                    self.config.target_box,
                    ready.structure.offset,
                    ready.structure.end()
                );
                Ok(ready)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    "File {} not ready after {:?} (phase: {})",
                    handle, timeout, phase
                );
                Err(ReadinessError::Timeout {
                    handle,
                    waited: started.elapsed(),
                    phase: phase.as_str(),
                })
            }
        }
    }

    async fn poll(
        &self,
        handle: FileHandle,
        phase: &mut ReadinessPhase,
        mut ticket: Option<&mut DownloadTicket>,
    ) -> ReadinessResult<ReadyFile> {
        let mut resume_at = 0u64;

        loop {
            match ticket.as_mut().and_then(|t| t.try_result()) {
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(DownloadOutcome::Completed { .. })) => ticket = None,
                Some(Ok(_)) => return Err(ReadinessError::DownloadStopped { handle }),
                None => {}
            }

            let state = self.backend.file_state(handle).await?;
            if let Some(ready) = self.evaluate(handle, &state, phase, &mut resume_at).await? {
                return Ok(ready);
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One step of the state machine against a fresh backend state
    ///
    /// Returns `Ok(None)` when the caller should sleep and poll again.
    pub async fn evaluate(
        &self,
        handle: FileHandle,
        state: &DownloadState,
        phase: &mut ReadinessPhase,
        resume_at: &mut u64,
    ) -> ReadinessResult<Option<ReadyFile>> {
        let threshold = if state.total_bytes > 0 {
            self.config.min_prefix_bytes.min(state.total_bytes)
        } else {
            self.config.min_prefix_bytes
        };

        if !state.is_complete() && state.downloaded_prefix_bytes < threshold {
            enter(handle, phase, ReadinessPhase::AwaitingMinPrefix);
            return Ok(None);
        }

        let Some(path) = state.local_path.as_ref() else {
            enter(handle, phase, ReadinessPhase::AwaitingLocalFile);
            return Ok(None);
        };

        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                debug!("File {} not readable yet at {}: {}", handle, path.display(), e);
                enter(handle, phase, ReadinessPhase::AwaitingLocalFile);
                return Ok(None);
            }
        };

        let io_error = |source| ReadinessError::Io {
            path: path.clone(),
            source,
        };
        let on_disk = file.metadata().await.map_err(io_error)?.len();

        enter(handle, phase, ReadinessPhase::Scanning);

        let expected = if state.is_complete() {
            if state.total_bytes > 0 {
                state.total_bytes
            } else {
                on_disk
            }
        } else {
            state.downloaded_prefix_bytes
        };
        let available = expected.min(on_disk);
        let complete = state.is_complete() && available >= expected;
        let over_budget = state.downloaded_prefix_bytes >= self.config.max_scan_bytes;
        let target = self.config.target_box;

        let outcome = boxes::scan(&mut file, *resume_at, available, target)
            .await
            .map_err(io_error)?;

        let not_found = || ReadinessError::StructureNotFound {
            handle,
            box_type: target.to_string(),
            budget: self.config.max_scan_bytes,
        };
        let invalid = |reason: String| ReadinessError::StructureInvalid { handle, reason };

        match outcome {
            ScanOutcome::Found(structure) => Ok(Some(ReadyFile {
                handle,
                path: path.clone(),
                structure,
                downloaded_bytes: available,
            })),
            ScanOutcome::Incomplete { location, available } => {
                *resume_at = location.offset;
                if complete {
                    Err(invalid(format!(
                        "'{}' box at offset {} declares {} bytes but the file ends at {}",
                        target, location.offset, location.size, available
                    )))
                } else if over_budget {
                    Err(not_found())
                } else {
                    debug!(
                        "File {}: '{}' box incomplete ({} of {} bytes present)",
                        handle,
                        target,
                        available.saturating_sub(location.offset),
                        location.size
                    );
                    Ok(None)
                }
            }
            ScanOutcome::NeedMoreData { resume_at: next } => {
                *resume_at = next;
                if complete {
                    Err(invalid(format!("no '{}' box in {} bytes", target, available)))
                } else if over_budget {
                    Err(not_found())
                } else {
                    Ok(None)
                }
            }
            ScanOutcome::UnboundedBox { offset, box_type } => {
                *resume_at = offset;
                if complete && box_type == target {
                    Ok(Some(ReadyFile {
                        handle,
                        path: path.clone(),
                        structure: BoxLocation {
                            offset,
                            size: available - offset,
                        },
                        downloaded_bytes: available,
                    }))
                } else if complete {
                    Err(invalid(format!(
                        "'{}' box at offset {} runs to end of file before any '{}' box",
                        box_type, offset, target
                    )))
                } else if over_budget {
                    Err(not_found())
                } else {
                    Ok(None)
                }
            }
            ScanOutcome::Malformed { offset, reason } => {
                Err(invalid(format!("at offset {}: {}", offset, reason)))
            }
        }
    }
}

fn enter(handle: FileHandle, phase: &mut ReadinessPhase, next: ReadinessPhase) {
    if *phase != next {
        debug!("File {} readiness: {} -> {}", handle, phase, next);
        *phase = next;
    }
}
