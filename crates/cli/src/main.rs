//! patient-video - batch analysis of recorded patient videos
//!
//! Command-line front end for the orchestrator and the retention sweeper.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

use commands::process::ProcessCommand;
use commands::sweep::SweepCommand;

#[derive(Parser)]
#[command(
    name = "patient-video",
    version,
    about = "Detect, track and classify patient activity in recorded videos",
    after_help = "EXAMPLES:\n  \
                  # Analyse two recordings, four at a time, writing annotated videos\n  \
                  patient-video process --output-dir ./out --max-workers 4 night1.y4m night2.y4m\n\n  \
                  # Machine readable results\n  \
                  patient-video process --format jsonl *.y4m\n\n  \
                  # Remove outputs older than a day, once\n  \
                  patient-video sweep --records-dir ./records --output-root ./out --ttl-secs 86400\n\n  \
                  # Keep sweeping every hour\n  \
                  patient-video sweep --records-dir ./records --watch"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse videos and write annotated outputs
    Process(ProcessCommand),

    /// Delete expired outputs and their records
    Sweep(SweepCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_ascii_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Process(cmd) => cmd.execute().await,
        Commands::Sweep(cmd) => cmd.execute().await,
    }
}
