//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived paths: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    archive_dir_name: String,
    db_filename: String,
    settings_filename: String,
    results_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache paths from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                archive_dir_name: pkg.to_string(),
                db_filename: "index.db".to_string(),
                settings_filename: format!(".{pkg}.toml"),
                results_filename: format!("{pkg}.results"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Default archive directory name, created under the source root.
    pub fn archive_dir_name(&self) -> &str {
        &self.archive_dir_name
    }

    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }

    pub fn settings_filename(&self) -> &str {
        &self.settings_filename
    }

    pub fn results_filename(&self) -> &str {
        &self.results_filename
    }

    /// Files the tool itself writes at the top of a source root. Only the root-level names are
    /// reserved; the same names deeper in the tree are ordinary files.
    pub fn reserved_root_files(&self) -> [&str; 2] {
        [self.settings_filename(), self.results_filename()]
    }
}

// ---- Containers ----

/// Container layout and naming.
pub struct ContainerConsts;

impl ContainerConsts {
    /// Extension of sealed container files.
    pub const EXTENSION: &'static str = "pack";
    /// Extension appended while a container is still being written.
    pub const PARTIAL_EXTENSION: &'static str = "part";
    /// Letter closing an oversized container id. Not a hex digit, so never a regular id.
    pub const OVERSIZED_SUFFIX: char = 'z';
    /// Largest sequence number a regular (six hex digit) id can carry.
    pub const MAX_REGULAR_SEQ: u32 = 0xFF_FFFF;
    /// Largest sequence number an oversized (five hex digit + suffix) id can carry.
    pub const MAX_OVERSIZED_SEQ: u32 = 0xF_FFFF;
    /// Default maximum container size: 256 GiB.
    pub const DEFAULT_MAX_SIZE: u64 = 256 * 1024 * 1024 * 1024;
}

// ---- Hashing ----

/// Hashing I/O thresholds and buffer sizes.
pub struct HashingConsts;

impl HashingConsts {
    /// File size above which hashing uses memory-mapped I/O (bytes). 100 MB.
    pub const HASH_MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;
    /// Chunk size for streaming reads and copies (bytes). 1 MB.
    pub const HASH_READ_CHUNK_SIZE: usize = 1024 * 1024;
}

// ---- Packing pipeline ----

/// Files at or below this size are read whole by a worker and handed to the committer in memory;
/// larger files are streamed from disk by the committer itself.
pub const INLINE_PAYLOAD_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Capacity of the path and transfer-job channels. Their items carry no file content.
pub const PIPELINE_CHANNEL_CAP: usize = 64;

/// Item channel slots per reader worker. In-flight inline payloads stay under
/// `workers * (ITEM_SLOTS_PER_WORKER + 1) * INLINE_PAYLOAD_THRESHOLD`.
pub const ITEM_SLOTS_PER_WORKER: usize = 2;

/// Poll interval for the committer while waiting on items (checks the cancel flag).
pub const CANCEL_POLL_MILLIS: u64 = 200;

// ---- Database ----

/// Batch size for DB update chunks (balance transaction size vs round-trips).
pub const DB_INSERT_BATCH_SIZE: usize = 1000;

/// Index schema version written to `config.schema_version`.
pub const SCHEMA_VERSION: u32 = 1;

// ---- Transfers ----

/// Transfer retry policy.
pub struct TransferConsts;

impl TransferConsts {
    /// Default number of retries after a failed get/put.
    pub const DEFAULT_RETRIES: u32 = 1;
    /// Backoff added per attempt (milliseconds).
    pub const BACKOFF_STEP_MILLIS: u64 = 500;
}

// ---- Change detection ----

/// Default mtime tolerance for update and skip-identical extract (seconds).
pub const DEFAULT_MTIME_WINDOW_SECS: i64 = 1;

// ---- Summary output ----

/// If a run reports more failures than this, the full list goes to RESULTS_FILENAME instead of the log.
pub const LIST_THRESHOLD: usize = 100;
