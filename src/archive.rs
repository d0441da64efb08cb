//! Create and update: configure the archive, run the packing pipeline, publish the index.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::engine::db_ops::{
    backup_to_file, checkpoint_wal, configure, file_count, load_config, load_records,
    next_container_seq, open_db, open_db_read_only, set_config_value,
};
use crate::engine::tools::{canonicalize_dir, now_ns};
use crate::engine::transfer::{
    RemoteStore, get_with_retries, normalize_remote_spec, put_with_retries,
};
use crate::error::ConfigError;
use crate::pipeline::{PackParams, run_pack_pipeline};
use crate::types::{ArchiveConfig, ArchiveMode, ArchiveOpts, FailureKind, RunSummary};
use crate::utils::config::{ContainerConsts, PackagePaths};
use crate::utils::{
    format_size, remove_snapshot, remove_stale_partials, resolve_workers, snapshot_path_for,
};

/// Archive directory for a run: explicit, or `<root>/hoard`.
pub fn resolve_archive_dir(root: &Path, opts: &ArchiveOpts) -> PathBuf {
    opts.archive_dir
        .clone()
        .unwrap_or_else(|| root.join(PackagePaths::get().archive_dir_name()))
}

pub fn db_path_for(archive_dir: &Path) -> PathBuf {
    archive_dir.join(PackagePaths::get().db_filename())
}

/// Make sure `index.db` exists locally, fetching it from `remote` when missing.
/// Returns false when there is no index and nowhere to get one.
pub fn ensure_local_index(
    archive_dir: &Path,
    remote: Option<&dyn RemoteStore>,
    retries: u32,
) -> Result<bool> {
    let db_path = db_path_for(archive_dir);
    if db_path.exists() {
        return Ok(true);
    }
    let Some(store) = remote else {
        return Ok(false);
    };
    std::fs::create_dir_all(archive_dir)
        .with_context(|| format!("create archive directory {}", archive_dir.display()))?;
    info!("Fetching index from {}", store.describe());
    get_with_retries(store, PackagePaths::get().db_filename(), &db_path, retries)
        .with_context(|| format!("fetch {}", db_path.display()))?;
    Ok(true)
}

/// Remote spec stored in an existing local index, if any.
pub fn stored_remote(archive_dir: &Path) -> Option<String> {
    let db_path = db_path_for(archive_dir);
    if !db_path.exists() {
        return None;
    }
    let conn = open_db_read_only(&db_path).ok()?;
    load_config(&conn).ok().flatten().and_then(|c| c.remote)
}

/// Effective parameters after reconciling options with the stored configuration.
struct RunConfig {
    max_size: u64,
    exclude: Vec<String>,
    follow_links: bool,
}

fn requested_config(opts: &ArchiveOpts) -> Result<ArchiveConfig> {
    let max_size = opts.max_size.unwrap_or(ContainerConsts::DEFAULT_MAX_SIZE);
    if max_size == 0 {
        return Err(ConfigError::InvalidMaxSize.into());
    }
    Ok(ArchiveConfig {
        max_size,
        exclude: opts.exclude.clone(),
        remote: normalize_remote_spec(opts.remote.as_deref()),
        follow_links: opts.follow_links,
        created_at_ns: now_ns(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create: the index must hold no records; write (or confirm) the configuration.
fn prepare_create(
    conn: Option<&Connection>,
    archive_dir: &Path,
    opts: &ArchiveOpts,
) -> Result<RunConfig> {
    let config = requested_config(opts)?;
    if let Some(conn) = conn {
        if file_count(conn)? > 0 {
            return Err(ConfigError::AlreadyPopulated(archive_dir.to_path_buf()).into());
        }
        if !opts.dry_run {
            configure(conn, &config)?;
        }
    }
    Ok(RunConfig {
        max_size: config.max_size,
        exclude: config.exclude,
        follow_links: config.follow_links,
    })
}

/// Update: the stored configuration rules; a different max size needs `reconfigure`.
fn prepare_update(conn: &Connection, archive_dir: &Path, opts: &ArchiveOpts) -> Result<RunConfig> {
    let stored = load_config(conn)?
        .ok_or_else(|| ConfigError::MissingConfig(db_path_for(archive_dir)))?;
    let mut max_size = stored.max_size;
    if let Some(requested) = opts.max_size
        && requested != stored.max_size
    {
        if requested == 0 {
            return Err(ConfigError::InvalidMaxSize.into());
        }
        if !opts.reconfigure {
            return Err(ConfigError::Conflict {
                key: "max_size".to_string(),
                stored: stored.max_size.to_string(),
                requested: requested.to_string(),
            }
            .into());
        }
        warn!(
            "Changing maximum container size from {} to {}",
            format_size(stored.max_size),
            format_size(requested)
        );
        if !opts.dry_run {
            set_config_value(conn, "max_size", &requested.to_string())?;
        }
        max_size = requested;
    }
    let mut exclude = stored.exclude.clone();
    for p in &opts.exclude {
        if !exclude.contains(p) {
            exclude.push(p.clone());
        }
    }
    Ok(RunConfig {
        max_size,
        exclude,
        follow_links: stored.follow_links || opts.follow_links,
    })
}

/// Put a consistent snapshot of the index to the remote store.
fn upload_index_snapshot(
    conn: &Connection,
    db_path: &Path,
    store: &dyn RemoteStore,
    retries: u32,
    summary: &mut RunSummary,
) -> Result<()> {
    let snapshot = snapshot_path_for(db_path);
    backup_to_file(conn, &snapshot)?;
    match put_with_retries(store, &snapshot, retries) {
        Ok(r) => debug!("Index snapshot stored at {r}"),
        Err(e) => {
            warn!("Index snapshot upload failed: {e}");
            summary.push_failure(
                Some(PackagePaths::get().db_filename().to_string()),
                None,
                FailureKind::Transfer,
                e.to_string(),
            );
        }
    }
    remove_snapshot(&snapshot);
    Ok(())
}

/// Create or update the archive of `root`, transferring containers through `remote` if given.
pub fn archive_dir_with_remote(
    root: &Path,
    mode: ArchiveMode,
    opts: &ArchiveOpts,
    remote: Option<&dyn RemoteStore>,
) -> Result<RunSummary> {
    let root = canonicalize_dir(root)?;
    let archive_dir = resolve_archive_dir(&root, opts);
    let db_path = db_path_for(&archive_dir);
    debug!(
        "{} {} into {}",
        mode.name(),
        root.display(),
        archive_dir.display()
    );

    if mode == ArchiveMode::Update && !ensure_local_index(&archive_dir, remote, opts.retries)? {
        return Err(ConfigError::MissingIndex(db_path).into());
    }

    if opts.dry_run {
        return dry_run(&root, &archive_dir, &db_path, mode, opts);
    }

    std::fs::create_dir_all(&archive_dir)
        .with_context(|| format!("create archive directory {}", archive_dir.display()))?;
    remove_stale_partials(&archive_dir)?;
    let mut conn = open_db(&db_path)?;

    let run = match mode {
        ArchiveMode::Create => prepare_create(Some(&conn), &archive_dir, opts)?,
        ArchiveMode::Update => prepare_update(&conn, &archive_dir, opts)?,
    };
    let existing = match mode {
        ArchiveMode::Create => HashMap::new(),
        ArchiveMode::Update => load_records(&conn)?,
    };
    let next_seq = next_container_seq(&conn)?;
    debug!(
        "max container size {}, next container sequence {next_seq:#x}",
        format_size(run.max_size)
    );

    let mut summary = run_pack_pipeline(PackParams {
        operation: mode.name(),
        root: &root,
        archive_dir: &archive_dir,
        conn: Some(&mut conn),
        existing: &existing,
        max_size: run.max_size,
        next_seq,
        include: &opts.include,
        exclude: &run.exclude,
        follow_links: run.follow_links,
        mtime_window_ns: opts.mtime_window_ns,
        workers: resolve_workers(opts.workers),
        keep: opts.keep,
        retries: opts.retries,
        verbose: opts.verbose,
        remote,
        cancel: opts.cancel.clone(),
    })?;

    checkpoint_wal(&conn)?;
    if let Some(store) = remote {
        upload_index_snapshot(&conn, &db_path, store, opts.retries, &mut summary)?;
    }
    Ok(summary)
}

/// Report what would be archived. Reads the index if one exists; writes nothing.
fn dry_run(
    root: &Path,
    archive_dir: &Path,
    db_path: &Path,
    mode: ArchiveMode,
    opts: &ArchiveOpts,
) -> Result<RunSummary> {
    let conn = if db_path.exists() {
        Some(open_db_read_only(db_path)?)
    } else {
        None
    };
    let (run, existing, next_seq) = match (mode, conn.as_ref()) {
        (ArchiveMode::Create, c) => (prepare_create(c, archive_dir, opts)?, HashMap::new(), 0),
        (ArchiveMode::Update, Some(c)) => (
            prepare_update(c, archive_dir, opts)?,
            load_records(c)?,
            next_container_seq(c)?,
        ),
        (ArchiveMode::Update, None) => {
            return Err(ConfigError::MissingIndex(db_path.to_path_buf()).into());
        }
    };
    run_pack_pipeline(PackParams {
        operation: mode.name(),
        root,
        archive_dir,
        conn: None,
        existing: &existing,
        max_size: run.max_size,
        next_seq,
        include: &opts.include,
        exclude: &run.exclude,
        follow_links: run.follow_links,
        mtime_window_ns: opts.mtime_window_ns,
        workers: resolve_workers(opts.workers),
        keep: opts.keep,
        retries: opts.retries,
        verbose: opts.verbose,
        remote: None,
        cancel: opts.cancel.clone(),
    })
}
