//! logriver: HTTP → broker → document store log relay
//!
//! One binary, two daemons: `gate` accepts log lines over HTTP and publishes
//! them to the broker; `river` consumes them from the broker and batch-writes
//! them to the document store.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use logriver::config::{Config, LogFormat, LoggingConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "logriver")]
#[command(about = "Log-shipping relay between HTTP clients, an AMQP broker, and Elasticsearch")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "logriver.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP ingestion gateway (HTTP -> broker)
    Gate,
    /// Run the relay daemon (broker -> document store)
    River,
    /// Print the default configuration as TOML and exit
    PrintDefaultConfig,
}

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    match config.format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::PrintDefaultConfig) {
        print!("{}", Config::default_toml());
        return Ok(());
    }

    let config = Config::load(&cli.config)?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Gate => commands::gate::run(config).await,
        Commands::River => commands::river::run(config).await,
        Commands::PrintDefaultConfig => unreachable!(),
    }
}
