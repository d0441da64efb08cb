//! Public and internal types for the hoard API and pipelines.

use anyhow::{Result, bail};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::engine::transfer::TransferSettings;
use crate::utils::config::{ContainerConsts, DEFAULT_MTIME_WINDOW_SECS, TransferConsts};

/// Identifier of one container: a sequence number plus whether it holds a single oversized file.
///
/// Regular ids render as six hex digits (`00002a`); oversized ids as five hex digits and the
/// letter `z` (`00002z`). Both forms are six characters and never collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId {
    seq: u32,
    oversized: bool,
}

impl ContainerId {
    pub fn regular(seq: u32) -> Result<Self> {
        if seq > ContainerConsts::MAX_REGULAR_SEQ {
            bail!("container sequence {seq:#x} exceeds six hex digits");
        }
        Ok(Self {
            seq,
            oversized: false,
        })
    }

    pub fn oversized(seq: u32) -> Result<Self> {
        if seq > ContainerConsts::MAX_OVERSIZED_SEQ {
            bail!("container sequence {seq:#x} exceeds five hex digits for an oversized id");
        }
        Ok(Self {
            seq,
            oversized: true,
        })
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn is_oversized(&self) -> bool {
        self.oversized
    }

    /// Sealed file name, e.g. `000003.pack`.
    pub fn file_name(&self) -> String {
        format!("{self}.{}", ContainerConsts::EXTENSION)
    }

    /// Name used while the container is being written, e.g. `000003.pack.part`.
    pub fn partial_file_name(&self) -> String {
        format!("{}.{}", self.file_name(), ContainerConsts::PARTIAL_EXTENSION)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.oversized {
            write!(f, "{:05x}{}", self.seq, ContainerConsts::OVERSIZED_SUFFIX)
        } else {
            write!(f, "{:06x}", self.seq)
        }
    }
}

impl FromStr for ContainerId {
    type Err = anyhow::Error;

    /// Accepts a bare id or a container file name (`00000a`, `00000a.pack`).
    fn from_str(s: &str) -> Result<Self> {
        let id = s
            .strip_suffix(&format!(".{}", ContainerConsts::EXTENSION))
            .unwrap_or(s);
        if id.len() != 6 || !id.is_ascii() {
            bail!("invalid container id {s:?}: expected six characters");
        }
        let digits = id
            .strip_suffix(ContainerConsts::OVERSIZED_SUFFIX)
            .unwrap_or(id);
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid container id {s:?}");
        }
        match id.strip_suffix(ContainerConsts::OVERSIZED_SUFFIX) {
            Some(digits) => {
                let seq = u32::from_str_radix(digits, 16)
                    .map_err(|_| anyhow::anyhow!("invalid oversized container id {s:?}"))?;
                Self::oversized(seq)
            }
            None => {
                let seq = u32::from_str_radix(id, 16)
                    .map_err(|_| anyhow::anyhow!("invalid container id {s:?}"))?;
                Self::regular(seq)
            }
        }
    }
}

impl Serialize for ContainerId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One archived source file: where its bytes live and what they hash to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Path relative to the source root, `/`-separated.
    pub path: String,
    /// Modification time in nanoseconds since epoch.
    pub mtime_ns: i64,
    pub size: u64,
    /// Blake3 hex digest of the content.
    pub checksum: String,
    pub container: ContainerId,
    /// Byte offset of the content inside the container.
    pub offset: u64,
}

impl FileRecord {
    /// Exclusive end of this file's byte range in its container.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// One sealed container as recorded in the `containers` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub size: u64,
    pub checksum: String,
    pub file_count: usize,
    /// Set once the container has been confirmed in the remote store.
    pub remote_ref: Option<String>,
}

/// Archive-wide parameters, written once at creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveConfig {
    pub max_size: u64,
    pub exclude: Vec<String>,
    /// Remote store spec (`hsi://…`, `file://…`, `cmd://…`), or None for local-only archives.
    pub remote: Option<String>,
    pub follow_links: bool,
    pub created_at_ns: i64,
    pub tool_version: String,
}

/// Whether an archive run starts a fresh archive or extends an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveMode {
    Create,
    Update,
}

impl ArchiveMode {
    pub fn name(&self) -> &'static str {
        match self {
            ArchiveMode::Create => "create",
            ArchiveMode::Update => "update",
        }
    }
}

/// Options for create/update.
#[derive(Clone, Debug)]
pub struct ArchiveOpts {
    /// Archive directory. When None, uses `root.join("hoard")`.
    pub archive_dir: Option<PathBuf>,
    /// Include patterns (glob); empty means everything.
    pub include: Vec<String>,
    /// Exclude patterns (glob). On update these add to the archive's stored patterns.
    pub exclude: Vec<String>,
    /// Maximum container size in bytes. Required on create unless the default is wanted;
    /// on update it must match the stored value unless `reconfigure` is set.
    pub max_size: Option<u64>,
    /// Reader/hasher worker count. When None, derived from available threads and the FD limit.
    pub workers: Option<usize>,
    /// Archive the targets of symbolic links instead of skipping links.
    pub follow_links: bool,
    /// Mtime tolerance window in nanoseconds.
    pub mtime_window_ns: i64,
    /// Remote store spec; falls back to the archive's stored remote.
    pub remote: Option<String>,
    pub transfer: TransferSettings,
    /// Keep local containers after a confirmed remote transfer.
    pub keep: bool,
    /// Retries after a failed remote transfer.
    pub retries: u32,
    /// Report what would be archived without writing anything.
    pub dry_run: bool,
    /// Show progress bar.
    pub verbose: bool,
    /// Allow update to change the stored maximum container size.
    pub reconfigure: bool,
    /// Set from outside (e.g. Ctrl+C) to stop between files.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ArchiveOpts {
    fn default() -> Self {
        Self {
            archive_dir: None,
            include: Vec::new(),
            exclude: Vec::new(),
            max_size: None,
            workers: None,
            follow_links: false,
            mtime_window_ns: DEFAULT_MTIME_WINDOW_SECS * 1_000_000_000,
            remote: None,
            transfer: TransferSettings::default(),
            keep: false,
            retries: TransferConsts::DEFAULT_RETRIES,
            dry_run: false,
            verbose: false,
            reconfigure: false,
            cancel: None,
        }
    }
}

/// Extract writes files out; Check only re-verifies checksums.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractMode {
    Extract,
    Check,
}

impl ExtractMode {
    pub fn name(&self) -> &'static str {
        match self {
            ExtractMode::Extract => "extract",
            ExtractMode::Check => "check",
        }
    }
}

/// Options for extract/check.
#[derive(Clone, Debug)]
pub struct ExtractOpts {
    pub mode: ExtractMode,
    /// Archive directory holding `index.db` and the container cache.
    pub archive_dir: PathBuf,
    /// Where extracted files are written (extract mode).
    pub dest: PathBuf,
    /// Path patterns (glob); empty means all files.
    pub patterns: Vec<String>,
    /// Patterns removed from the selection.
    pub exclude: Vec<String>,
    /// Container selection (`000001-000003,000007`) instead of path patterns.
    pub containers: Option<String>,
    pub workers: Option<usize>,
    /// Keep fetched containers in the cache afterwards.
    pub keep: bool,
    /// Continue with remaining containers after the remote store fails to deliver one.
    pub keep_going: bool,
    /// Skip containers already verified by an interrupted run.
    pub resume: bool,
    pub remote: Option<String>,
    pub transfer: TransferSettings,
    pub retries: u32,
    pub mtime_window_ns: i64,
    pub dry_run: bool,
    pub verbose: bool,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ExtractOpts {
    fn default() -> Self {
        Self {
            mode: ExtractMode::Extract,
            archive_dir: PathBuf::new(),
            dest: PathBuf::from("."),
            patterns: Vec::new(),
            exclude: Vec::new(),
            containers: None,
            workers: None,
            keep: false,
            keep_going: false,
            resume: false,
            remote: None,
            transfer: TransferSettings::default(),
            retries: TransferConsts::DEFAULT_RETRIES,
            mtime_window_ns: DEFAULT_MTIME_WINDOW_SECS * 1_000_000_000,
            dry_run: false,
            verbose: false,
            cancel: None,
        }
    }
}

/// What went wrong for one file or container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Source file could not be read during create/update.
    SourceRead,
    /// Content was read but its digest differs from the index.
    ChecksumMismatch,
    /// Container missing, truncated or unreadable, or member shorter than declared.
    ReadError,
    /// Remote put/get failed after all retries.
    Transfer,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::SourceRead => "source read error",
            FailureKind::ChecksumMismatch => "checksum mismatch",
            FailureKind::ReadError => "read error",
            FailureKind::Transfer => "transfer error",
        };
        f.write_str(s)
    }
}

/// One reported failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub path: Option<String>,
    pub container: Option<ContainerId>,
    pub kind: FailureKind,
    pub message: String,
}

/// End-of-run report shared by every operation.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub operation: String,
    /// Files archived, extracted or verified.
    pub succeeded: usize,
    /// Files left alone: unchanged on update, identical on extract, links not followed, or
    /// containers not attempted after an abort.
    pub skipped: usize,
    pub failures: Vec<Failure>,
    /// Containers sealed by this run.
    pub containers_written: Vec<ContainerId>,
    /// Payload bytes archived or read.
    pub bytes: u64,
    pub dry_run: bool,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            ..Default::default()
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// True when nothing failed and the run was not interrupted.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn push_failure(
        &mut self,
        path: Option<String>,
        container: Option<ContainerId>,
        kind: FailureKind,
        message: impl Into<String>,
    ) {
        self.failures.push(Failure {
            path,
            container,
            kind,
            message: message.into(),
        });
    }

    /// Containers named by any failure, for retrying just the broken subset.
    pub fn failed_containers(&self) -> BTreeSet<ContainerId> {
        self.failures.iter().filter_map(|f| f.container).collect()
    }

    /// Failed paths, sorted.
    pub fn failed_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .failures
            .iter()
            .filter_map(|f| f.path.as_deref())
            .collect();
        paths.sort_unstable();
        paths
    }
}
