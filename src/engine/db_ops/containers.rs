//! Container rows and resumable-run checkpoints.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

use crate::engine::tools::now_ns;
use crate::types::{ContainerId, ContainerRecord};

use super::container_from_sql;

const CONTAINER_COLUMNS: &str = "name, size, checksum, file_count, remote_ref";

fn container_from_row(row: &Row<'_>) -> rusqlite::Result<ContainerRecord> {
    let name: String = row.get(0)?;
    Ok(ContainerRecord {
        id: container_from_sql(0, &name)?,
        size: row.get::<_, i64>(1)?.max(0) as u64,
        checksum: row.get(2)?,
        file_count: row.get::<_, i64>(3)?.max(0) as usize,
        remote_ref: row.get(4)?,
    })
}

/// Distinct containers referenced by current file records.
pub fn all_containers(conn: &Connection) -> Result<BTreeSet<ContainerId>> {
    let mut stmt = conn.prepare("SELECT DISTINCT container FROM files")?;
    let rows = stmt.query_map([], |row| {
        let name: String = row.get(0)?;
        container_from_sql(0, &name)
    })?;
    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .context("read container ids")
}

/// Every sealed container, in id order.
pub fn containers(conn: &Connection) -> Result<Vec<ContainerRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {CONTAINER_COLUMNS} FROM containers"))?;
    let rows = stmt.query_map([], container_from_row)?;
    let mut out = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read containers")?;
    out.sort_by_key(|c| c.id);
    Ok(out)
}

pub fn container_record(conn: &Connection, id: ContainerId) -> Result<Option<ContainerRecord>> {
    conn.query_row(
        &format!("SELECT {CONTAINER_COLUMNS} FROM containers WHERE name = ?1"),
        [id.to_string()],
        container_from_row,
    )
    .optional()
    .with_context(|| format!("read container {id}"))
}

/// Sequence number for the next container: one past the highest ever sealed.
pub fn next_container_seq(conn: &Connection) -> Result<u32> {
    let max: Option<i64> = conn
        .query_row("SELECT MAX(seq) FROM containers", [], |row| row.get(0))
        .context("read highest container sequence")?;
    let from_files = all_containers(conn)?.iter().map(|c| c.seq() as i64).max();
    Ok(match max.into_iter().chain(from_files).max() {
        Some(m) => (m + 1) as u32,
        None => 0,
    })
}

pub fn set_remote_ref(conn: &Connection, id: ContainerId, remote_ref: &str) -> Result<()> {
    conn.execute(
        "UPDATE containers SET remote_ref = ?2 WHERE name = ?1",
        (id.to_string(), remote_ref),
    )
    .with_context(|| format!("record remote copy of {id}"))?;
    Ok(())
}

/// Mark `id` as fully processed by `operation` (`check` or `extract`).
pub fn record_checkpoint(conn: &Connection, operation: &str, id: ContainerId) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO checkpoints (operation, container, verified_at_ns)
         VALUES (?1, ?2, ?3)",
        (operation, id.to_string(), now_ns()),
    )
    .with_context(|| format!("record checkpoint for {id}"))?;
    Ok(())
}

pub fn verified_containers(conn: &Connection, operation: &str) -> Result<BTreeSet<ContainerId>> {
    let mut stmt = conn.prepare("SELECT container FROM checkpoints WHERE operation = ?1")?;
    let rows = stmt.query_map([operation], |row| {
        let name: String = row.get(0)?;
        container_from_sql(0, &name)
    })?;
    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .context("read checkpoints")
}

pub fn clear_checkpoints(conn: &Connection, operation: &str) -> Result<()> {
    conn.execute("DELETE FROM checkpoints WHERE operation = ?1", [operation])
        .context("clear checkpoints")?;
    Ok(())
}
