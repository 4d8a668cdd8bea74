// ABOUTME: CLI entry point for cdc-replay
// ABOUTME: Parses commands and routes to appropriate handlers

use cdc_replay::commands;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cdc-replay")]
#[command(
    about = "Replays logical-decoding SQL files against a target PostgreSQL database",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply prefetched SQL files to the target database
    Catchup {
        #[command(flatten)]
        args: commands::catchup::CatchupArgs,
    },
    /// Inspect or update the sentinel control row on the source database
    Sentinel {
        #[command(flatten)]
        args: commands::sentinel::SentinelArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Catchup { args } => commands::catchup(args).await,
        Commands::Sentinel { args } => commands::sentinel(args).await,
    }
}
