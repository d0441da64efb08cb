//! File records: upsert, lookup and per-container commits.

use anyhow::{Context, Result};
use rusqlite::{Connection, Row, Statement};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::engine::tools::expand_dir_pattern;
use crate::types::{ContainerId, ContainerRecord, FileRecord};
use crate::utils::config::DB_INSERT_BATCH_SIZE;

use super::{FILE_COLUMNS, UPSERT_FILE_SQL, container_from_sql};

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let container: String = row.get(4)?;
    Ok(FileRecord {
        path: row.get(0)?,
        mtime_ns: row.get(1)?,
        size: row.get::<_, i64>(2)?.max(0) as u64,
        checksum: row.get(3)?,
        container: container_from_sql(4, &container)?,
        offset: row.get::<_, i64>(5)?.max(0) as u64,
    })
}

fn execute_upsert(stmt: &mut Statement<'_>, r: &FileRecord) -> Result<()> {
    stmt.execute((
        r.path.as_str(),
        r.mtime_ns,
        r.size as i64,
        r.checksum.as_str(),
        r.container.to_string(),
        r.offset as i64,
    ))
    .with_context(|| format!("upsert file record {}", r.path))?;
    Ok(())
}

/// Insert a record, or point the existing record for the same path at the new location.
pub fn upsert_file(conn: &Connection, record: &FileRecord) -> Result<()> {
    let mut stmt = conn.prepare_cached(UPSERT_FILE_SQL)?;
    execute_upsert(&mut stmt, record)
}

/// Record a sealed container and every file in it, atomically. A container row never exists
/// without its files, and no file ever points at a container that was not sealed.
pub fn commit_container(
    conn: &mut Connection,
    container: &ContainerRecord,
    records: &[FileRecord],
) -> Result<()> {
    let tx = conn.transaction().context("begin transaction")?;
    tx.execute(
        "INSERT OR REPLACE INTO containers (name, seq, size, checksum, file_count, remote_ref)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (
            container.id.to_string(),
            container.id.seq() as i64,
            container.size as i64,
            container.checksum.as_str(),
            container.file_count as i64,
            container.remote_ref.as_deref(),
        ),
    )
    .with_context(|| format!("insert container {}", container.id))?;
    {
        let mut stmt = tx.prepare(UPSERT_FILE_SQL).context("prepare upsert")?;
        for r in records {
            execute_upsert(&mut stmt, r)?;
        }
    }
    tx.commit().context("commit container")?;
    Ok(())
}

/// Store new mtimes for files whose content was found unchanged.
pub fn refresh_mtimes(conn: &mut Connection, updates: &[(String, i64)]) -> Result<usize> {
    let mut written = 0;
    for chunk in updates.chunks(DB_INSERT_BATCH_SIZE) {
        let tx = conn.transaction().context("begin transaction")?;
        {
            let mut stmt = tx
                .prepare("UPDATE files SET mtime_ns = ?2 WHERE path = ?1")
                .context("prepare mtime update")?;
            for (path, mtime_ns) in chunk {
                written += stmt
                    .execute((path.as_str(), *mtime_ns))
                    .with_context(|| format!("refresh mtime of {path}"))?;
            }
        }
        tx.commit().context("commit mtime refresh")?;
    }
    Ok(written)
}

/// Records whose path or container id matches any glob pattern (SQLite GLOB), ordered by path.
/// No patterns selects every record. A pattern ending in `/` selects a directory's contents.
pub fn lookup(conn: &Connection, patterns: &[String]) -> Result<Vec<FileRecord>> {
    if patterns.is_empty() {
        let mut stmt = conn.prepare(&format!("SELECT {FILE_COLUMNS} FROM files ORDER BY path"))?;
        let rows = stmt.query_map([], record_from_row)?;
        return rows.collect::<rusqlite::Result<Vec<_>>>().context("read file records");
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {FILE_COLUMNS} FROM files WHERE path GLOB ?1 OR container GLOB ?1"
    ))?;
    let mut found: BTreeMap<String, FileRecord> = BTreeMap::new();
    for pattern in patterns {
        let pattern = expand_dir_pattern(pattern);
        let rows = stmt.query_map([pattern.as_str()], record_from_row)?;
        for row in rows {
            let record = row.context("read file record")?;
            found.insert(record.path.clone(), record);
        }
    }
    Ok(found.into_values().collect())
}

/// Records stored in any of `ids`, ordered by path.
pub fn lookup_containers(
    conn: &Connection,
    ids: &BTreeSet<ContainerId>,
) -> Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FILE_COLUMNS} FROM files WHERE container = ?1"
    ))?;
    let mut out = Vec::new();
    for id in ids {
        let rows = stmt.query_map([id.to_string()], record_from_row)?;
        for row in rows {
            out.push(row.context("read file record")?);
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

/// All records keyed by path (update diffing).
pub fn load_records(conn: &Connection) -> Result<HashMap<String, FileRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {FILE_COLUMNS} FROM files"))?;
    let rows = stmt.query_map([], record_from_row)?;
    let mut map = HashMap::new();
    for row in rows {
        let record = row.context("read file record")?;
        map.insert(record.path.clone(), record);
    }
    Ok(map)
}

pub fn file_count(conn: &Connection) -> Result<usize> {
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
        .context("count file records")?;
    Ok(n.max(0) as usize)
}
