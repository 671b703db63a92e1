//! Command-line interface components
//!
//! Argument parsing, command handlers and the progress display used by the
//! `media_scheduler` binary.

pub mod args;
pub mod commands;
pub mod progress;

pub use args::{Cli, Commands, ConfigAction, ConfigArgs, GlobalArgs, ProbeArgs, SimulateArgs};
pub use commands::{
    classify, handle_config, handle_probe, handle_simulate, probe_file, run_simulation,
    PeakUsage, ProbeVerdict, SimulationReport,
};
pub use progress::{OutcomeTally, SimulationDisplay};
