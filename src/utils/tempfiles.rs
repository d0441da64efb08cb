use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::utils::config::ContainerConsts;

/// Directory holding the index snapshot handed to the remote store. Keeps the snapshot's file
/// name equal to the live index's, so the remote copy lands under the same name.
pub fn snapshot_path_for(db_path: &Path) -> PathBuf {
    let name = db_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index.db".to_string());
    db_path
        .parent()
        .unwrap_or(Path::new("."))
        .join(".snapshot")
        .join(name)
}

/// Remove SQLite WAL and SHM files next to `db_path` (left behind after a backup or rename).
pub fn remove_wal_and_shm(db_path: &Path) {
    let file_name = db_path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let parent = db_path.parent().unwrap_or(Path::new("."));
    let _ = std::fs::remove_file(parent.join(format!("{file_name}-wal")));
    let _ = std::fs::remove_file(parent.join(format!("{file_name}-shm")));
}

/// Remove a snapshot file and its directory once it has been transferred.
pub fn remove_snapshot(snapshot: &Path) {
    let _ = std::fs::remove_file(snapshot);
    remove_wal_and_shm(snapshot);
    if let Some(dir) = snapshot.parent() {
        let _ = std::fs::remove_dir(dir);
    }
}

/// Delete `*.pack.part` files left by an interrupted run. They were never indexed.
/// Returns the number removed.
pub fn remove_stale_partials(archive_dir: &Path) -> Result<usize> {
    let suffix = format!(
        ".{}.{}",
        ContainerConsts::EXTENSION,
        ContainerConsts::PARTIAL_EXTENSION
    );
    let mut removed = 0;
    let entries = std::fs::read_dir(archive_dir)
        .with_context(|| format!("read archive directory {}", archive_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(&suffix) {
            std::fs::remove_file(entry.path()).with_context(|| {
                format!("remove stale partial container {}", entry.path().display())
            })?;
            log::warn!("Removed unfinished container {}", entry.path().display());
            removed += 1;
        }
    }
    Ok(removed)
}
