use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "convertbuddy-worker")]
#[command(author, version, about = "Runs ConvertBuddy conversion jobs and retention sweeps")]
pub struct Cli {
    /// Path to config file (environment overrides still apply)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the worker pool and the retention scheduler until Ctrl-C
    Run,

    /// Convert local files as one job and print its final status
    Submit {
        /// Conversion target, e.g. "pdf->jpg"
        #[arg(short, long)]
        target: String,

        /// Input files, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Conversion options as a JSON object, e.g. '{"dpi": 150}'
        #[arg(long)]
        options: Option<String>,

        /// Seconds to wait for the job to finish (0 waits indefinitely)
        #[arg(long, default_value = "600")]
        timeout: u64,
    },

    /// Run one retention sweep and print the report
    Sweep,

    /// Check that the external converters are available
    CheckTools,

    /// Validate the effective configuration
    Validate,
}
