//! Hoard: pack many small files into a few large containers, indexed by SQLite, with optional
//! transfer of each sealed container to a remote store.

pub mod archive;
pub mod engine;
pub mod error;
pub mod extract;
pub mod list;
pub mod pipeline;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use engine::transfer::{CommandStore, DirStore, RemoteRef, RemoteStore, TransferSettings};
pub use error::{ChecksumError, ConfigError, TransferError};
pub use extract::{check_archive, extract_archive, extract_with_remote};
pub use list::{list_archive, list_containers};

use log::debug;
use std::path::Path;

use archive::{resolve_archive_dir, stored_remote};
use engine::transfer::open_remote;

/// Result alias used by public hoard API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Create or update with an explicit remote store (or none). Lib callers can plug in their own
/// [`RemoteStore`]; the CLI goes through [`create_archive`] / [`update_archive`].
pub fn archive_with_remote(
    root: &Path,
    mode: ArchiveMode,
    opts: &ArchiveOpts,
    remote: Option<&dyn RemoteStore>,
) -> Result<RunSummary> {
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        opts
    );
    archive::archive_dir_with_remote(root, mode, opts, remote)
}

/// Start a new archive of `root`. Fails with [`ConfigError::AlreadyPopulated`] when the archive
/// already has file records.
pub fn create_archive(root: &Path, opts: &ArchiveOpts) -> Result<RunSummary> {
    let store = open_remote(opts.remote.as_deref(), &opts.transfer)?;
    archive_with_remote(root, ArchiveMode::Create, opts, store.as_deref())
}

/// Archive new and changed files of `root` into an existing archive. Uses the archive's stored
/// remote when `opts.remote` is unset.
pub fn update_archive(root: &Path, opts: &ArchiveOpts) -> Result<RunSummary> {
    let spec = opts.remote.clone().or_else(|| {
        let archive_dir = resolve_archive_dir(root, opts);
        stored_remote(&archive_dir)
    });
    let store = open_remote(spec.as_deref(), &opts.transfer)?;
    archive_with_remote(root, ArchiveMode::Update, opts, store.as_deref())
}
