//! Command implementations for the CLI
//!
//! Each handler receives its parsed arguments plus the loaded
//! [`AppConfig`] and drives the library: `simulate` runs a scheduler over
//! the in-memory backend, `probe` walks a local container file, `config`
//! prints or writes the configuration file.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::args::{ConfigAction, ConfigArgs, ProbeArgs, SimulateArgs};
use super::progress::{OutcomeTally, SimulationDisplay};
use crate::app::readiness::boxes::{self, FourCc, ScanOutcome};
use crate::app::{
    FileHandle, ResourceClass, Scheduler, SchedulerStats, SimulatedBackend, StatsReporter,
};
use crate::config::AppConfig;
use crate::errors::{AppError, ConfigError, Result};

/// Highest concurrency observed while sampling a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeakUsage {
    pub global: usize,
    pub video: usize,
    pub thumb: usize,
}

impl PeakUsage {
    fn observe(&mut self, stats: &SchedulerStats) {
        self.global = self.global.max(stats.counters.active_global);
        self.video = self.video.max(stats.counters.active_video);
        self.thumb = self.thumb.max(stats.counters.active_thumb);
    }
}

/// Final report of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub jobs: usize,
    pub completed: usize,
    pub stopped: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub elapsed_ms: u128,
    pub peak: PeakUsage,
    /// Samples in which active counts exceeded the limits
    pub limit_violations: usize,
    pub stats: SchedulerStats,
}

impl SimulationReport {
    fn new(
        tally: OutcomeTally,
        elapsed: Duration,
        peak: PeakUsage,
        limit_violations: usize,
        stats: SchedulerStats,
    ) -> Self {
        Self {
            jobs: tally.total(),
            completed: tally.completed,
            stopped: tally.stopped,
            cancelled: tally.cancelled,
            failed: tally.failed,
            elapsed_ms: elapsed.as_millis(),
            peak,
            limit_violations,
            stats,
        }
    }
}

/// Handle the simulate command
pub async fn handle_simulate(args: SimulateArgs, config: AppConfig, quiet: bool) -> Result<()> {
    let report = run_simulation(&args, &config, !quiet && !args.json).await?;

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| AppError::generic(format!("Failed to encode report: {}", e)))?;
        println!("{}", json);
    } else if !quiet {
        println!();
        println!("{}", StatsReporter::summary(&report.stats));
        println!(
            "Peak concurrency: {} global, {} video, {} thumb",
            report.peak.global, report.peak.video, report.peak.thumb
        );
        println!(
            "Resolved {} job(s) in {:.2}s: {} completed, {} stopped, {} failed",
            report.jobs,
            report.elapsed_ms as f64 / 1000.0,
            report.completed,
            report.stopped,
            report.failed
        );
    }

    if report.limit_violations > 0 {
        return Err(AppError::generic(format!(
            "Concurrency limits were exceeded in {} sample(s)",
            report.limit_violations
        )));
    }
    Ok(())
}

/// Submit a synthetic burst of jobs and wait for all of them to resolve
pub async fn run_simulation(
    args: &SimulateArgs,
    config: &AppConfig,
    show_progress: bool,
) -> Result<SimulationReport> {
    args.validate().map_err(AppError::generic)?;

    let mut scheduler_config = config.to_scheduler_config();
    let limits = &mut scheduler_config.limits;
    if let Some(max_global) = args.max_global {
        limits.max_global = max_global;
    }
    if let Some(max_video) = args.max_video {
        limits.max_video = max_video;
    }
    if let Some(max_thumb) = args.max_thumb {
        limits.max_thumb = max_thumb;
    }

    let backend = Arc::new(SimulatedBackend::new());
    for index in 0..args.total_jobs() {
        backend.add_file(job_handle(index), args.file_size).await;
    }

    let scheduler = Scheduler::new(backend.clone(), scheduler_config)?;
    let (transfer_shutdown, transfer_rx) = broadcast::channel(1);
    let transfers = backend.spawn_auto_progress(
        args.chunk,
        Duration::from_millis(args.tick_ms),
        transfer_rx,
    );

    info!(
        "Simulating {} video and {} thumbnail download(s)",
        args.videos, args.thumbs
    );
    let started = Instant::now();
    let mut display = SimulationDisplay::new(args.total_jobs(), show_progress)?;

    let mut pending = FuturesUnordered::new();
    for index in 0..args.total_jobs() {
        let class = if index < args.videos {
            ResourceClass::Video
        } else {
            ResourceClass::Thumb
        };
        let request = scheduler.config().request(job_handle(index), class);
        pending.push(scheduler.submit(request).await);
    }

    let mut peak = PeakUsage::default();
    let mut limit_violations = 0;
    let mut refresh = tokio::time::interval(Duration::from_millis(50));

    while !pending.is_empty() {
        tokio::select! {
            Some(result) = pending.next() => display.job_resolved(&result),
            _ = refresh.tick() => {
                let stats = scheduler.stats().await;
                if !stats.counters.within(&stats.limits) {
                    warn!("Active downloads exceed limits: {:?}", stats.counters);
                    limit_violations += 1;
                }
                peak.observe(&stats);
                display.update_status(&stats);
            }
        }
    }
    let elapsed = started.elapsed();

    let stats = scheduler.stats().await;
    peak.observe(&stats);

    let _ = transfer_shutdown.send(());
    if let Err(e) = transfers.await {
        debug!("Transfer task ended abnormally: {}", e);
    }
    scheduler.shutdown().await;

    let tally = display.finish();
    Ok(SimulationReport::new(
        tally,
        elapsed,
        peak,
        limit_violations,
        stats,
    ))
}

fn job_handle(index: usize) -> FileHandle {
    FileHandle(index as i64 + 1)
}

/// What a probe found in a local container file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ProbeVerdict {
    /// Target box is complete; playback can begin
    Ready {
        offset: u64,
        size: u64,
        playable_after: u64,
    },
    /// More bytes are needed (`needed` is known once the box header is seen)
    Incomplete { available: u64, needed: Option<u64> },
    /// The file can never become ready
    Invalid { reason: String },
}

impl fmt::Display for ProbeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeVerdict::Ready {
                offset,
                size,
                playable_after,
            } => write!(
                f,
                "Ready: box at offset {} ({} bytes), playable after {} bytes",
                offset, size, playable_after
            ),
            ProbeVerdict::Incomplete {
                available,
                needed: Some(needed),
            } => write!(f, "Incomplete: {} of {} bytes present", available, needed),
            ProbeVerdict::Incomplete {
                available,
                needed: None,
            } => write!(f, "Incomplete: box not reached in {} bytes", available),
            ProbeVerdict::Invalid { reason } => write!(f, "Invalid: {}", reason),
        }
    }
}

/// Turn a scan of the first `available` of `file_len` bytes into a verdict
pub fn classify(
    outcome: ScanOutcome,
    available: u64,
    file_len: u64,
    target: FourCc,
) -> ProbeVerdict {
    match outcome {
        ScanOutcome::Found(location) => ProbeVerdict::Ready {
            offset: location.offset,
            size: location.size,
            playable_after: location.end(),
        },
        ScanOutcome::Incomplete {
            location,
            available,
        } => ProbeVerdict::Incomplete {
            available,
            needed: Some(location.end()),
        },
        ScanOutcome::NeedMoreData { .. } if available >= file_len => ProbeVerdict::Invalid {
            reason: format!("'{}' not found in {} bytes", target, file_len),
        },
        ScanOutcome::NeedMoreData { .. } => ProbeVerdict::Incomplete {
            available,
            needed: None,
        },
        ScanOutcome::UnboundedBox { offset, box_type } => ProbeVerdict::Invalid {
            reason: format!(
                "'{}' at offset {} runs to end of file before '{}'",
                box_type, offset, target
            ),
        },
        ScanOutcome::Malformed { offset, reason } => ProbeVerdict::Invalid {
            reason: format!("malformed box at offset {}: {}", offset, reason),
        },
    }
}

/// Scan a local file and return the verdict
pub async fn probe_file(args: &ProbeArgs, config: &AppConfig) -> Result<ProbeVerdict> {
    let target = match &args.target {
        Some(raw) => FourCc::try_from(raw.clone()).map_err(|reason| ConfigError::InvalidValue {
            field: "target".to_string(),
            value: raw.clone(),
            reason,
        })?,
        None => config.readiness.target_box,
    };

    let mut file = tokio::fs::File::open(&args.file).await?;
    let file_len = file.metadata().await?.len();
    let available = args.available.map_or(file_len, |a| a.min(file_len));

    debug!(
        "Probing {} for '{}' in {} of {} bytes",
        args.file.display(),
        target,
        available,
        file_len
    );
    let outcome = boxes::scan(&mut file, 0, available, target).await?;
    Ok(classify(outcome, available, file_len, target))
}

/// Handle the probe command
pub async fn handle_probe(args: ProbeArgs, config: &AppConfig) -> Result<()> {
    let verdict = probe_file(&args, config).await?;
    println!("{}: {}", args.file.display(), verdict);
    Ok(())
}

/// Handle the config command
pub async fn handle_config(
    args: ConfigArgs,
    config: &AppConfig,
    explicit_path: Option<&Path>,
) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        ConfigAction::Init { force } => {
            let path = match explicit_path {
                Some(path) => path.to_path_buf(),
                None => AppConfig::default_path()?,
            };

            if path.exists() && !force {
                println!(
                    "Configuration already exists: {} (use --force to overwrite)",
                    path.display()
                );
                return Ok(());
            }

            AppConfig::default().save(&path).await?;
            println!("Created default configuration file:");
            println!("   {}", path.display());
            Ok(())
        }
    }
}
