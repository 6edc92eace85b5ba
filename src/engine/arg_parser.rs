use clap::Parser;
use std::path::PathBuf;

use crate::types::{MemoryPolicy, OutputFormat, OutputOrder};

struct DefaultArgs;

impl DefaultArgs {
    pub const DIR: &'static str = ".";
}

/// Pack a source tree into one markdown, JSON or YAML document.
#[derive(Clone, Parser)]
#[command(name = "ctxpack")]
#[command(about = "Pack a directory's text files into a single markdown, JSON or YAML document.")]
pub struct Cli {
    /// Directory to pack. Default: current directory.
    #[arg(value_name = "DIR", default_value = DefaultArgs::DIR)]
    pub dir: PathBuf,

    /// Output file. Default: stdout (or `output` from `.ctxpack.toml`).
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Output format.
    #[arg(long, short = 'f', value_enum)]
    pub format: Option<OutputFormat>,

    /// Order of files in the document.
    #[arg(long, value_enum)]
    pub order: Option<OutputOrder>,

    /// Worker threads (0 = all available).
    #[arg(long, short = 'j')]
    pub concurrency: Option<usize>,

    /// Abort if more files than this are found.
    #[arg(long)]
    pub max_files: Option<usize>,

    /// Abort if the files found add up to more bytes than this.
    #[arg(long)]
    pub max_total_size: Option<u64>,

    /// Skip files larger than this many bytes.
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Per-file processing timeout in milliseconds.
    #[arg(long)]
    pub file_timeout_ms: Option<u64>,

    /// Whole-run timeout in milliseconds, counted from the start of processing.
    #[arg(long, short = 't')]
    pub timeout_ms: Option<u64>,

    /// Process memory ceiling in bytes.
    #[arg(long)]
    pub memory_limit: Option<u64>,

    /// What to do when the memory ceiling is exceeded.
    #[arg(long, value_enum)]
    pub memory_policy: Option<MemoryPolicy>,

    /// Exclude patterns (glob syntax). Can specify multiple: -e pattern1 pattern2 pattern3
    #[arg(long, short = 'e', num_args = 1..)]
    pub exclude: Vec<String>,

    /// Only collect these extensions. Can specify multiple: -i rs toml
    #[arg(long, short = 'i', num_args = 1..)]
    pub include: Vec<String>,

    /// Ignore `.gitignore` / `.ignore` files.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub no_gitignore: Option<bool>,

    /// Strict mode: fail on first permission error instead of skipping.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub strict: Option<bool>,

    /// Show a progress bar (only when writing to a file).
    #[arg(long, short = 'p', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub progress: Option<bool>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}
