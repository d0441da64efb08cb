//! Index store: schema, open/backup, configuration, file records, containers and checkpoints.
//!
//! Free functions over a `rusqlite::Connection`. During create/update a single writer (the
//! committer) owns the read-write connection; readers open their own connections, which WAL
//! allows to proceed concurrently.

mod config;
mod connection;
mod containers;
mod records;

pub use config::{configure, load_config, set_config_value};
pub use connection::{
    backup_to_file, checkpoint_wal, open_db, open_db_in_memory, open_db_read_only,
};
pub use containers::{
    all_containers, clear_checkpoints, container_record, containers, next_container_seq,
    record_checkpoint, set_remote_ref, verified_containers,
};
pub use records::{
    commit_container, file_count, load_records, lookup, lookup_containers, refresh_mtimes,
    upsert_file,
};

use rusqlite::types::Type;

use crate::types::ContainerId;

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

/// Upsert keyed by path. Re-archiving a file points its record at the new location.
pub(crate) const UPSERT_FILE_SQL: &str = r#"
INSERT INTO files (path, mtime_ns, size, checksum, container, offset)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(path) DO UPDATE SET
    mtime_ns = excluded.mtime_ns,
    size = excluded.size,
    checksum = excluded.checksum,
    container = excluded.container,
    offset = excluded.offset
"#;

pub(crate) const FILE_COLUMNS: &str = "path, mtime_ns, size, checksum, container, offset";

/// Schema for config, files, containers and checkpoints tables.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS config (
    arg TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    mtime_ns INTEGER NOT NULL,
    size INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    container TEXT NOT NULL,
    offset INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_container ON files(container);

CREATE TABLE IF NOT EXISTS containers (
    name TEXT PRIMARY KEY,
    seq INTEGER NOT NULL,
    size INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    file_count INTEGER NOT NULL,
    remote_ref TEXT
);

CREATE TABLE IF NOT EXISTS checkpoints (
    operation TEXT NOT NULL,
    container TEXT NOT NULL,
    verified_at_ns INTEGER NOT NULL,
    PRIMARY KEY (operation, container)
);
"#;

/// Parse a container id stored as text in column `idx`.
pub(crate) fn container_from_sql(idx: usize, text: &str) -> rusqlite::Result<ContainerId> {
    text.parse::<ContainerId>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}
