mod config;
mod observability;

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shipyard", about = "Shipment aggregation services")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the shipment aggregation API
    Aggregator(AggregatorArgs),
}

#[derive(Args)]
struct AggregatorArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("missing `{0}` section in config file")]
    MissingSection(&'static str),
    #[error(transparent)]
    InvalidAggregatorConfig(#[from] aggregator::config::ValidationError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error(transparent)]
    Aggregator(#[from] aggregator::errors::AggregatorError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Aggregator(args) => run_aggregator(args),
    }
}

fn run_aggregator(args: AggregatorArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config_file_path)?;
    let mut aggregator_config = config
        .aggregator
        .ok_or(CliError::MissingSection("aggregator"))?;

    // Held until shutdown so buffered Sentry events are flushed.
    let _sentry = observability::init_logging(&config.logging.unwrap_or_default());

    if let Some(metrics) = &config.metrics {
        observability::init_metrics(metrics).map_err(CliError::Metrics)?;
    }

    aggregator_config.apply_env()?;

    tracing::info!(
        config_file = %args.config_file_path.display(),
        "Starting aggregator"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(aggregator::run(aggregator_config))?;

    Ok(())
}
