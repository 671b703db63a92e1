//! Command-line argument parsing for the media scheduler
//!
//! This module defines the CLI structure using clap derive macros: a
//! simulated scheduling run, a container probe for local files, and
//! configuration file management.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Media Scheduler - concurrency-limited media downloads
#[derive(Parser, Debug)]
#[command(
    name = "media_scheduler",
    version,
    about = "Schedule media downloads under per-class concurrency limits",
    long_about = "Admission control for media downloads against a content backend.
Bounds concurrent video and thumbnail transfers and reports when a partially
downloaded container can start playing."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a burst of synthetic downloads against the simulated backend
    Simulate(SimulateArgs),

    /// Check whether a local container file is ready for playback
    Probe(ProbeArgs),

    /// Show or create the configuration file
    Config(ConfigArgs),
}

/// Arguments for the simulate command
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of video downloads to submit
    #[arg(long, default_value = "4")]
    pub videos: usize,

    /// Number of thumbnail downloads to submit
    #[arg(long, default_value = "12")]
    pub thumbs: usize,

    /// Override the global concurrency limit
    #[arg(long)]
    pub max_global: Option<usize>,

    /// Override the video concurrency limit
    #[arg(long)]
    pub max_video: Option<usize>,

    /// Override the thumbnail concurrency limit
    #[arg(long)]
    pub max_thumb: Option<usize>,

    /// Size of every simulated file in bytes
    #[arg(long, default_value = "4194304")]
    pub file_size: u64,

    /// Average bytes delivered per transfer per tick
    #[arg(long, default_value = "262144")]
    pub chunk: u64,

    /// Milliseconds between simulated transfer ticks
    #[arg(long, default_value = "50")]
    pub tick_ms: u64,

    /// Print final statistics as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the probe command
#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Container file to scan
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Treat only the first N bytes as downloaded
    #[arg(long, value_name = "BYTES")]
    pub available: Option<u64>,

    /// Box type that must be present (defaults to the configured target)
    #[arg(long, value_name = "FOURCC")]
    pub target: Option<String>,
}

/// Arguments for configuration management
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Logging level from the verbosity flags, if any was given
    pub fn log_level_override(&self) -> Option<tracing::Level> {
        if self.global.quiet {
            Some(tracing::Level::ERROR)
        } else if self.global.very_verbose {
            Some(tracing::Level::DEBUG)
        } else if self.global.verbose {
            Some(tracing::Level::INFO)
        } else {
            None
        }
    }

    /// Effective logging level: flags first, then the configured level
    pub fn log_level(&self, configured: &str) -> tracing::Level {
        self.log_level_override()
            .or_else(|| configured.parse().ok())
            .unwrap_or(tracing::Level::WARN)
    }
}

impl SimulateArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.videos + self.thumbs == 0 {
            return Err("Nothing to simulate: --videos and --thumbs are both 0".to_string());
        }
        if self.file_size == 0 {
            return Err("File size must be greater than 0".to_string());
        }
        if self.chunk == 0 {
            return Err("Chunk size must be greater than 0".to_string());
        }
        if self.tick_ms == 0 {
            return Err("Tick interval must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn total_jobs(&self) -> usize {
        self.videos + self.thumbs
    }
}
