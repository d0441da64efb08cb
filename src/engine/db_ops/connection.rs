//! Open, backup and version-check the index database.

use anyhow::{Context, Result};
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::utils::config::SCHEMA_VERSION;

use super::{SCHEMA, WAL_PRAGMAS};

/// Enable WAL and apply schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(())
}

fn stored_schema_version(conn: &Connection) -> Result<Option<u32>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM config WHERE arg = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("read schema version")?;
    value
        .map(|v| {
            v.parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue {
                    key: "schema_version".to_string(),
                    value: v.clone(),
                }
                .into()
            })
        })
        .transpose()
}

/// Refuse indexes written by a newer schema.
fn check_schema_version(conn: &Connection) -> Result<Option<u32>> {
    let found = stored_schema_version(conn)?;
    if let Some(found) = found
        && found > SCHEMA_VERSION
    {
        return Err(ConfigError::UnsupportedVersion {
            found,
            supported: SCHEMA_VERSION,
        }
        .into());
    }
    Ok(found)
}

fn stamp_schema_version(conn: &Connection) -> Result<()> {
    if check_schema_version(conn)?.is_none() {
        conn.execute(
            "INSERT INTO config (arg, value) VALUES ('schema_version', ?1)",
            [SCHEMA_VERSION.to_string()],
        )
        .context("write schema version")?;
    }
    Ok(())
}

/// Open or create the index DB and ensure schema + WAL with optimizations.
pub fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open index database {}", path.display()))?;
    apply_wal_and_schema(&conn)?;
    stamp_schema_version(&conn)?;
    Ok(conn)
}

/// Open an existing index for reading only (list, dry runs). Fails if the file is missing.
pub fn open_db_read_only(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("open index database {} read-only", path.display()))?;
    check_schema_version(&conn)?;
    Ok(conn)
}

/// Open an in-memory DB with the same schema (tests, dry runs without an index).
pub fn open_db_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory database")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    stamp_schema_version(&conn)?;
    Ok(conn)
}

/// Fold the WAL back into the main database file.
pub fn checkpoint_wal(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
        .context("WAL checkpoint")?;
    Ok(())
}

/// Copy the source database to a file with the SQLite backup API. Destination is overwritten.
/// The copy is consistent even while the source is open for writing.
pub fn backup_to_file(source: &Connection, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let mut dest = Connection::open(path).context("open destination database for backup")?;
    {
        let backup = Backup::new(source, &mut dest).context("create backup")?;
        backup
            .run_to_completion(100, Duration::from_millis(0), None)
            .context("run backup to completion")?;
    }
    // A single self-contained file for the remote copy.
    dest.query_row("PRAGMA journal_mode = DELETE", [], |_| Ok(()))
        .context("set journal mode on backup")?;
    Ok(())
}
