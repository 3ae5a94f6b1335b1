//! Command line argument parsing for the indexlib CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// indexlib - segment-based index storage maintenance
#[derive(Parser, Debug, Clone)]
#[command(name = "indexlib")]
#[command(about = "Merge and inspect indexlib partitions")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct IndexlibArgs {
    /// Verbosity level (repeat for more: -v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl IndexlibArgs {
    /// Default log filter for the chosen verbosity; `RUST_LOG` wins over it.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Merge partitions into a new version of a destination partition
    Merge(MergeArgs),

    /// Show the latest version, segments and schema of a partition
    Inspect(InspectArgs),
}

/// Arguments for merging partitions
#[derive(Parser, Debug, Clone)]
pub struct MergeArgs {
    /// Source partition directories
    #[arg(long = "source", value_name = "DIR", required = true, num_args = 1..)]
    pub sources: Vec<PathBuf>,

    /// Destination partition directory
    #[arg(long, value_name = "DIR")]
    pub dest: PathBuf,

    /// Id of the version written to the destination
    #[arg(long)]
    pub version_id: u32,

    /// Merge configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Parallel reduce instances per index (overrides the config)
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Merge worker threads (overrides the config)
    #[arg(long, value_name = "N", env = "INDEXLIB_MERGE_THREADS")]
    pub threads: Option<usize>,

    /// Map partition files into memory while merging
    #[arg(long)]
    pub mmap: bool,
}

/// Arguments for inspecting a partition
#[derive(Parser, Debug, Clone)]
pub struct InspectArgs {
    /// Partition directory
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Inspect this version instead of the latest
    #[arg(long)]
    pub version: Option<u32>,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
