use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

struct DefaultArgs;

impl DefaultArgs {
    pub const DIR: &'static str = ".";
}

/// Pack many small files into large containers with a searchable index.
#[derive(Clone, Parser)]
#[command(name = "hoard", version)]
#[command(about = "Archive a directory tree into size-bounded containers with a SQLite index.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Start a new archive (fails if the archive already has files).
    Create(ArchiveArgs),
    /// Archive new and changed files into an existing archive.
    Update(ArchiveArgs),
    /// Restore files from the archive, verifying each checksum.
    Extract(ExtractArgs),
    /// Re-verify archived files against their stored checksums.
    Check(ExtractArgs),
    /// List archived files or containers.
    #[command(alias = "ls")]
    List(ListArgs),
}

/// Flags shared by every subcommand.
#[derive(Clone, Args)]
pub struct CommonArgs {
    /// Archive directory holding index.db and containers. Default: `hoard` in DIR (create/update)
    /// or the current directory (extract/check/list).
    #[arg(long, short = 'a')]
    pub archive: Option<PathBuf>,

    /// Remote store: `file://PATH`, `hsi://PATH`, `cmd://PATH` or `none`.
    #[arg(long, short = 'r')]
    pub remote: Option<String>,

    /// Worker count. Default: available threads, capped by the open file limit.
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Retries after a failed remote transfer.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Keep local containers after upload, or fetched containers after extract/check.
    #[arg(long, short = 'k', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub keep: Option<bool>,

    /// Report what would happen without writing anything.
    #[arg(long, short = 'n')]
    pub dry_run: bool,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    /// Exclude patterns (glob syntax). Can specify multiple: -e pattern1 pattern2 pattern3
    #[arg(long, short = 'e', num_args = 1..)]
    pub exclude: Vec<String>,

    /// Maximum container size, e.g. `10GB`, `512MiB`, `4096`.
    #[arg(long, short = 's')]
    pub max_size: Option<String>,

    /// Write the JSON run summary to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Clone, Args)]
pub struct ArchiveArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Source directory. Default: current directory.
    #[arg(long, short = 'd', value_name = "DIR", default_value = DefaultArgs::DIR)]
    pub dir: PathBuf,

    /// Only archive paths matching these patterns (glob, relative to DIR).
    #[arg(value_name = "PATTERN")]
    pub patterns: Vec<String>,

    /// Archive the targets of symbolic links.
    #[arg(long, short = 'f', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub follow_links: Option<bool>,

    /// Mtime tolerance window in seconds. Files within this window are considered unchanged.
    #[arg(long, short = 'm', value_parser = clap::value_parser!(i64))]
    pub mtime_window: Option<i64>,

    /// Allow update to change the archive's maximum container size.
    #[arg(long)]
    pub reconfigure: bool,
}

#[derive(Clone, Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Path patterns to select (glob). Default: everything.
    #[arg(value_name = "PATTERN")]
    pub patterns: Vec<String>,

    /// Destination directory for extracted files.
    #[arg(long, short = 'o', value_name = "DIR", default_value = DefaultArgs::DIR)]
    pub dest: PathBuf,

    /// Select containers instead of paths: `000002-000004,000007`, `-000003`, `000005-`.
    #[arg(long, short = 'c', value_name = "RANGES")]
    pub containers: Option<String>,

    /// Continue with the remaining containers when the remote store fails to deliver one.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub keep_going: Option<bool>,

    /// Skip containers already verified by an interrupted run.
    #[arg(long)]
    pub resume: bool,

    /// Mtime tolerance window in seconds for skipping identical destination files.
    #[arg(long, short = 'm', value_parser = clap::value_parser!(i64))]
    pub mtime_window: Option<i64>,
}

#[derive(Clone, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Path patterns to list (glob). Default: everything.
    #[arg(value_name = "PATTERN")]
    pub patterns: Vec<String>,

    /// Print every column: size, mtime, checksum, container and offset.
    #[arg(long, short = 'l')]
    pub long: bool,

    /// List containers instead of files.
    #[arg(long)]
    pub containers: bool,
}

impl Commands {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Commands::Create(a) | Commands::Update(a) => &a.common,
            Commands::Extract(a) | Commands::Check(a) => &a.common,
            Commands::List(a) => &a.common,
        }
    }
}
