//! Extract and check: resolve records, obtain containers, read members back and verify them.

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use crate::archive::{db_path_for, ensure_local_index, stored_remote};
use crate::engine::aggregate::{ContainerReader, remove_container_file};
use crate::engine::checksum::checksum_equals;
use crate::engine::db_ops::{
    all_containers, clear_checkpoints, containers, load_config, lookup, lookup_containers,
    open_db, record_checkpoint, verified_containers,
};
use crate::engine::progress::{
    ProgressBar, ProgressBarConfig, create_progress_bar, finish_bar, tick,
};
use crate::engine::tools::{
    matches_any, mtime_changed, mtime_ns, parse_container_ranges, select_containers,
};
use crate::engine::transfer::{RemoteStore, get_with_retries, open_remote};
use crate::error::ConfigError;
use crate::types::{
    ContainerId, ContainerRecord, ExtractMode, ExtractOpts, Failure, FailureKind, FileRecord,
    RunSummary,
};
use crate::utils::{format_size, resolve_workers};
use kdam::Animation;

/// Result of processing one container.
#[derive(Debug, Default)]
struct ContainerOutcome {
    succeeded: usize,
    skipped: usize,
    bytes: u64,
    failures: Vec<Failure>,
    /// Every member verified (eligible for a checkpoint).
    complete: bool,
}

/// Read-only state shared by container workers.
struct WorkerShared<'a> {
    mode: ExtractMode,
    archive_dir: &'a Path,
    dest: &'a Path,
    known: &'a BTreeMap<ContainerId, ContainerRecord>,
    remote: Option<&'a dyn RemoteStore>,
    retries: u32,
    keep: bool,
    keep_going: bool,
    mtime_window_ns: i64,
    /// Set after a container could not be obtained and keep_going is off.
    abort: AtomicBool,
    cancel: Option<Arc<AtomicBool>>,
}

impl WorkerShared<'_> {
    fn stopped(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
            || self
                .cancel
                .as_ref()
                .is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

fn fail_all(
    id: ContainerId,
    records: &[FileRecord],
    kind: FailureKind,
    message: &str,
) -> ContainerOutcome {
    ContainerOutcome {
        failures: records
            .iter()
            .map(|r| Failure {
                path: Some(r.path.clone()),
                container: Some(id),
                kind,
                message: message.to_string(),
            })
            .collect(),
        ..Default::default()
    }
}

/// Local cached copy is usable when it exists and matches the size the index recorded.
fn cache_is_valid(path: &Path, known: Option<&ContainerRecord>) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => known.is_none_or(|k| k.size == meta.len()),
        Err(_) => false,
    }
}

/// Find the container locally, or fetch it. Returns (path, fetched by this run).
fn obtain_container(
    id: ContainerId,
    shared: &WorkerShared<'_>,
) -> Result<(PathBuf, bool), (FailureKind, String)> {
    let path = shared.archive_dir.join(id.file_name());
    let known = shared.known.get(&id);
    if cache_is_valid(&path, known) {
        return Ok((path, false));
    }
    let Some(store) = shared.remote else {
        let msg = if path.exists() {
            "container size differs from the index"
        } else {
            "container missing and no remote store configured"
        };
        return Err((FailureKind::ReadError, msg.to_string()));
    };
    if path.exists() {
        warn!("Cached {} is damaged; fetching it again", id.file_name());
        let _ = remove_container_file(&path);
    }
    get_with_retries(store, &id.file_name(), &path, shared.retries)
        .map_err(|e| (FailureKind::Transfer, e.to_string()))?;
    if !cache_is_valid(&path, known) {
        return Err((
            FailureKind::ReadError,
            "fetched container size differs from the index".to_string(),
        ));
    }
    Ok((path, true))
}

/// Relative index paths must stay under the destination.
fn safe_dest(dest: &Path, rel: &str) -> Option<PathBuf> {
    let rel = Path::new(rel);
    rel.components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| dest.join(rel))
}

fn set_mtime(file: &File, mtime_ns: i64) -> std::io::Result<()> {
    if mtime_ns < 0 {
        return Ok(());
    }
    file.set_modified(UNIX_EPOCH + Duration::from_nanos(mtime_ns as u64))
}

enum MemberResult {
    Ok,
    Identical,
    Failed(FailureKind, String),
}

fn verify_member(reader: &mut ContainerReader, record: &FileRecord) -> MemberResult {
    match reader.read_member(record, None) {
        Ok(digest) if checksum_equals(&digest, &record.checksum) => MemberResult::Ok,
        Ok(digest) => MemberResult::Failed(
            FailureKind::ChecksumMismatch,
            format!("expected {}, got {digest}", record.checksum),
        ),
        Err(e) => MemberResult::Failed(FailureKind::ReadError, e.to_string()),
    }
}

fn extract_member(
    reader: &mut ContainerReader,
    record: &FileRecord,
    shared: &WorkerShared<'_>,
) -> MemberResult {
    let Some(dest) = safe_dest(shared.dest, &record.path) else {
        return MemberResult::Failed(
            FailureKind::ReadError,
            "path escapes the destination directory".to_string(),
        );
    };

    // Same size and mtime on disk: verify the archived copy, leave the file alone.
    if let Ok(meta) = std::fs::metadata(&dest)
        && meta.is_file()
        && meta.len() == record.size
        && !mtime_changed(mtime_ns(&meta), record.mtime_ns, shared.mtime_window_ns)
    {
        return match verify_member(reader, record) {
            MemberResult::Ok => MemberResult::Identical,
            other => other,
        };
    }

    if let Some(parent) = dest.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        return MemberResult::Failed(
            FailureKind::ReadError,
            format!("create {}: {e}", parent.display()),
        );
    }
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{name}.extracting"));
    let mut file = match File::create(&tmp) {
        Ok(f) => f,
        Err(e) => {
            return MemberResult::Failed(
                FailureKind::ReadError,
                format!("create {}: {e}", tmp.display()),
            );
        }
    };
    let result = match reader.read_member(record, Some(&mut file)) {
        Ok(digest) if checksum_equals(&digest, &record.checksum) => {
            let finished = set_mtime(&file, record.mtime_ns)
                .and_then(|_| file.sync_all())
                .and_then(|_| std::fs::rename(&tmp, &dest));
            match finished {
                Ok(()) => MemberResult::Ok,
                Err(e) => MemberResult::Failed(
                    FailureKind::ReadError,
                    format!("write {}: {e}", dest.display()),
                ),
            }
        }
        Ok(digest) => MemberResult::Failed(
            FailureKind::ChecksumMismatch,
            format!("expected {}, got {digest}", record.checksum),
        ),
        Err(e) => MemberResult::Failed(FailureKind::ReadError, e.to_string()),
    };
    if !matches!(result, MemberResult::Ok) {
        drop(file);
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

/// Obtain one container and extract or verify each of its records (sorted by offset).
fn process_container(
    id: ContainerId,
    records: &[FileRecord],
    shared: &WorkerShared<'_>,
) -> Option<ContainerOutcome> {
    if shared.stopped() {
        return None;
    }
    let (path, fetched) = match obtain_container(id, shared) {
        Ok(v) => v,
        Err((kind, msg)) => {
            warn!("Cannot obtain container {id}: {msg}");
            // A damaged or missing local copy is reported per file; only an unreachable
            // remote stops the run.
            if kind == FailureKind::Transfer && !shared.keep_going {
                shared.abort.store(true, Ordering::Relaxed);
            }
            return Some(fail_all(id, records, kind, &msg));
        }
    };
    let mut reader = match ContainerReader::open(&path) {
        Ok(r) => r,
        Err(e) => {
            return Some(fail_all(
                id,
                records,
                FailureKind::ReadError,
                &format!("open {}: {e}", path.display()),
            ));
        }
    };

    let mut outcome = ContainerOutcome::default();
    for record in records {
        let result = match shared.mode {
            ExtractMode::Check => verify_member(&mut reader, record),
            ExtractMode::Extract => extract_member(&mut reader, record, shared),
        };
        match result {
            MemberResult::Ok => {
                outcome.succeeded += 1;
                outcome.bytes += record.size;
            }
            MemberResult::Identical => outcome.skipped += 1,
            MemberResult::Failed(kind, message) => {
                debug!("{kind}: {} in {id}: {message}", record.path);
                outcome.failures.push(Failure {
                    path: Some(record.path.clone()),
                    container: Some(id),
                    kind,
                    message,
                });
            }
        }
    }
    outcome.complete = outcome.failures.is_empty();
    drop(reader);

    if fetched
        && !shared.keep
        && let Err(e) = remove_container_file(&path)
    {
        warn!("Could not remove cached {}: {e:#}", path.display());
    }
    Some(outcome)
}

/// Select records for the run: by container ranges or path patterns, minus exclusions.
fn resolve_records(conn: &rusqlite::Connection, opts: &ExtractOpts) -> Result<Vec<FileRecord>> {
    let mut records = match opts.containers.as_deref() {
        Some(spec) => {
            let ranges = parse_container_ranges(spec)?;
            let ids = select_containers(&ranges, &all_containers(conn)?);
            lookup_containers(conn, &ids)?
        }
        None => lookup(conn, &opts.patterns)?,
    };
    if !opts.exclude.is_empty() {
        records.retain(|r| !matches_any(&r.path, &opts.exclude));
    }
    Ok(records)
}

fn group_by_container(records: Vec<FileRecord>) -> BTreeMap<ContainerId, Vec<FileRecord>> {
    let mut groups: BTreeMap<ContainerId, Vec<FileRecord>> = BTreeMap::new();
    for r in records {
        groups.entry(r.container).or_default().push(r);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|r| r.offset);
    }
    groups
}

/// Extract (or check) the files selected by `opts`, fetching containers through `remote` when
/// they are not available locally.
pub fn extract_with_remote(
    opts: &ExtractOpts,
    remote: Option<&dyn RemoteStore>,
) -> Result<RunSummary> {
    let operation = opts.mode.name();
    let archive_dir = opts.archive_dir.as_path();
    let db_path = db_path_for(archive_dir);
    if !ensure_local_index(archive_dir, remote, opts.retries)? {
        return Err(ConfigError::MissingIndex(db_path).into());
    }
    let conn = open_db(&db_path)?;
    load_config(&conn)?.ok_or_else(|| ConfigError::MissingConfig(db_path.clone()))?;

    let mut summary = RunSummary::new(operation);
    summary.dry_run = opts.dry_run;

    let records = resolve_records(&conn, opts)?;
    if records.is_empty() {
        info!("No files match the request");
        return Ok(summary);
    }
    let mut groups = group_by_container(records);

    if opts.resume && !opts.dry_run {
        let done = verified_containers(&conn, operation)?;
        groups.retain(|id, recs| {
            let keep = !done.contains(id);
            if !keep {
                summary.skipped += recs.len();
            }
            keep
        });
        if !done.is_empty() {
            info!("Resuming: {} container(s) already done", done.len());
        }
    } else if !opts.dry_run {
        clear_checkpoints(&conn, operation)?;
    }

    let known: BTreeMap<ContainerId, ContainerRecord> =
        containers(&conn)?.into_iter().map(|c| (c.id, c)).collect();

    if opts.dry_run {
        for (id, recs) in &groups {
            let bytes: u64 = recs.iter().map(|r| r.size).sum();
            let cached = cache_is_valid(&archive_dir.join(id.file_name()), known.get(id));
            info!(
                "would {operation} {} file(s), {} from {id}{}",
                recs.len(),
                format_size(bytes),
                if cached { " (cached)" } else { "" }
            );
            summary.succeeded += recs.len();
            summary.bytes += bytes;
        }
        return Ok(summary);
    }

    let total_files: usize = groups.values().map(Vec::len).sum();
    let workers = resolve_workers(opts.workers).min(groups.len()).max(1);
    debug!(
        "{operation}: {total_files} files in {} containers with {workers} workers",
        groups.len()
    );
    let bar: Option<ProgressBar> = opts.verbose.then(|| {
        create_progress_bar(ProgressBarConfig::new(
            total_files,
            if opts.mode == ExtractMode::Check {
                "Checking"
            } else {
                "Extracting"
            },
            Animation::Classic,
        ))
    });

    if opts.mode == ExtractMode::Extract {
        std::fs::create_dir_all(&opts.dest)
            .with_context(|| format!("create destination {}", opts.dest.display()))?;
    }
    let shared = WorkerShared {
        mode: opts.mode,
        archive_dir,
        dest: &opts.dest,
        known: &known,
        remote,
        retries: opts.retries,
        keep: opts.keep,
        keep_going: opts.keep_going,
        mtime_window_ns: opts.mtime_window_ns,
        abort: AtomicBool::new(false),
        cancel: opts.cancel.clone(),
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("build worker pool")?;

    let (tx, rx) = unbounded::<(ContainerId, usize, Option<ContainerOutcome>)>();
    let work: Vec<(ContainerId, &Vec<FileRecord>)> = groups.iter().map(|(k, v)| (*k, v)).collect();
    std::thread::scope(|s| -> Result<()> {
        let shared = &shared;
        let work = &work;
        let pool = &pool;
        s.spawn(move || {
            pool.install(|| {
                work.par_iter().for_each_with(tx, |tx, (id, recs)| {
                    let outcome = process_container(*id, recs, shared);
                    let _ = tx.send((*id, recs.len(), outcome));
                });
            });
        });

        // Single writer: checkpoints and the summary are only touched here.
        while let Ok((id, n, outcome)) = rx.recv() {
            tick(bar.as_ref(), n);
            let Some(outcome) = outcome else {
                summary.skipped += n;
                continue;
            };
            if outcome.complete {
                record_checkpoint(&conn, operation, id)?;
            }
            summary.succeeded += outcome.succeeded;
            summary.skipped += outcome.skipped;
            summary.bytes += outcome.bytes;
            summary.failures.extend(outcome.failures);
        }
        Ok(())
    })?;
    finish_bar(bar);

    summary.cancelled = opts
        .cancel
        .as_ref()
        .is_some_and(|c| c.load(Ordering::Relaxed));
    if shared.abort.load(Ordering::Relaxed) {
        warn!("Stopped after the remote store failed to deliver a container (use --keep-going to continue)");
    }
    summary.failures.sort_by(|a, b| {
        (a.container, a.path.as_deref()).cmp(&(b.container, b.path.as_deref()))
    });
    if summary.is_success() {
        clear_checkpoints(&conn, operation)?;
    }
    Ok(summary)
}

/// Extract or check according to `opts.mode`. The remote comes from `opts.remote`, else from the
/// archive's stored configuration.
pub fn extract_archive(opts: &ExtractOpts) -> Result<RunSummary> {
    let spec = opts
        .remote
        .clone()
        .or_else(|| stored_remote(&opts.archive_dir));
    let store = open_remote(spec.as_deref(), &opts.transfer)?;
    extract_with_remote(opts, store.as_deref())
}

/// Re-verify archived files without writing them out.
pub fn check_archive(opts: &ExtractOpts) -> Result<RunSummary> {
    let opts = ExtractOpts {
        mode: ExtractMode::Check,
        ..opts.clone()
    };
    extract_archive(&opts)
}
