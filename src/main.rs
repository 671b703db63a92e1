//! Media Scheduler CLI application
//!
//! Runs simulated scheduling bursts, probes local containers for playback
//! readiness and manages the configuration file.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use media_scheduler::cli::{
    handle_config, handle_probe, handle_simulate, Cli, Commands, ConfigAction, ConfigArgs,
};
use media_scheduler::config::AppConfig;
use media_scheduler::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    // `config init` must work even when the existing file does not parse
    let config = match &cli.command {
        Commands::Config(ConfigArgs {
            action: ConfigAction::Init { .. },
        }) => AppConfig::default(),
        _ => AppConfig::load_or_default(cli.global.config.as_deref()).await?,
    };

    init_logging(&cli, &config);

    info!("Media Scheduler v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Simulate(args) => {
            info!("Executing simulate command");
            handle_simulate(args, config, cli.global.quiet).await
        }
        Commands::Probe(args) => {
            info!("Executing probe command");
            handle_probe(args, &config).await
        }
        Commands::Config(args) => handle_config(args, &config, cli.global.config.as_deref()).await,
    }
}

/// Initialize logging from the verbosity flags or the configured level
fn init_logging(cli: &Cli, config: &AppConfig) {
    let log_level = cli.log_level(&config.logging.level);

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("media_scheduler={}", log_level).parse() {
        filter = filter.add_directive(directive);
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    }
}
