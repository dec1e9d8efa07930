use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelsmith")]
#[command(author, version, about = "Assemble scene clips and narration into one advertisement")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Assemble the advertisement described by a run manifest
    Assemble {
        /// Run manifest (JSON)
        #[arg(required = true)]
        manifest: PathBuf,

        /// Directory for the finished video (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Maximum scenes processed at once (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Print the duration of a media file
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Remove stale leftovers from the work directory
    Sweep {
        /// Directory to sweep (defaults to the configured work directory)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Files older than this many hours are removed
        #[arg(long)]
        max_age_hours: Option<u64>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
