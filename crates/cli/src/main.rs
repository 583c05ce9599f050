mod commands;
mod runtime;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ordo_observability::tracing::LogFormat;

#[derive(Parser)]
#[command(name = "ordo")]
#[command(about = "Inspect ordo worker pools, jobs and process health")]
#[command(version)]
pub struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of compact text
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sample process health live, then print a report
    Monitor {
        /// Stop after this many seconds (runs until Ctrl-C when omitted)
        #[arg(long)]
        duration: Option<u64>,

        /// Sampling and display interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval: u64,

        /// Write the final report to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Take a sample and print a performance report
    Report {
        /// Write the report to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print process, pool and job statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    ordo_observability::tracing::init_with(&cli.log_level, format);

    let sample_interval = match &cli.command {
        Commands::Monitor { interval, .. } => Some(Duration::from_millis((*interval).max(10))),
        _ => None,
    };
    let runtime = runtime::Runtime::start(sample_interval)?;
    let outcome = match cli.command {
        Commands::Monitor {
            duration,
            interval,
            output,
        } => commands::monitor(&runtime, duration, interval, output).await,
        Commands::Report { output, json } => commands::report(&runtime, output, json).await,
        Commands::Stats => commands::stats(&runtime).await,
    };
    runtime.shutdown().await;
    outcome
}
