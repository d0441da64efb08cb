//! Read-only listings of an archive's index.

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

use crate::archive::{db_path_for, ensure_local_index};
use crate::engine::db_ops::{containers, lookup, open_db_read_only};
use crate::engine::transfer::RemoteStore;
use crate::error::ConfigError;
use crate::types::{ContainerRecord, FileRecord};
use crate::utils::config::TransferConsts;

fn open_index(archive_dir: &Path, remote: Option<&dyn RemoteStore>) -> Result<Connection> {
    let db_path = db_path_for(archive_dir);
    if !ensure_local_index(archive_dir, remote, TransferConsts::DEFAULT_RETRIES)? {
        return Err(ConfigError::MissingIndex(db_path).into());
    }
    open_db_read_only(&db_path)
}

/// File records matching `patterns` (all when empty), ordered by path. Fetches the index from
/// `remote` when it is not present locally.
pub fn list_archive(
    archive_dir: &Path,
    patterns: &[String],
    remote: Option<&dyn RemoteStore>,
) -> Result<Vec<FileRecord>> {
    let conn = open_index(archive_dir, remote)?;
    lookup(&conn, patterns)
}

/// Every sealed container, ordered by id.
pub fn list_containers(
    archive_dir: &Path,
    remote: Option<&dyn RemoteStore>,
) -> Result<Vec<ContainerRecord>> {
    let conn = open_index(archive_dir, remote)?;
    containers(&conn)
}
