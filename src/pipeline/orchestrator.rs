//! Packing run wiring: channels, scoped threads, and the summary they produce.

use anyhow::Result;
use crossbeam_channel::{bounded, unbounded};
use log::debug;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;

use crate::engine::progress::{ProgressBar, create_counter, finish_bar};
use crate::engine::transfer::RemoteStore;
use crate::types::{FileRecord, RunSummary};
use crate::utils::config::{ITEM_SLOTS_PER_WORKER, PIPELINE_CHANNEL_CAP};

use super::committer::{Committer, CommitterParams};
use super::context::{ChannelParams, ReaderShared, create_pipeline_channels};
use super::error_handler::apply_walk_notes;
use super::reader::spawn_reader_workers;
use super::uploader::run_upload_loop;
use super::walk::run_walk_loop;

/// Inputs for one packing run.
pub struct PackParams<'a> {
    pub operation: &'a str,
    /// Canonical source root.
    pub root: &'a Path,
    pub archive_dir: &'a Path,
    /// Read-write index; None for dry runs.
    pub conn: Option<&'a mut Connection>,
    pub existing: &'a HashMap<String, FileRecord>,
    pub max_size: u64,
    pub next_seq: u32,
    pub include: &'a [String],
    pub exclude: &'a [String],
    pub follow_links: bool,
    pub mtime_window_ns: i64,
    pub workers: usize,
    pub keep: bool,
    pub retries: u32,
    pub verbose: bool,
    pub remote: Option<&'a dyn RemoteStore>,
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Walk → readers → committer (→ transfer), all on scoped threads. The committer runs on the
/// calling thread and is the only writer of containers and index.
pub fn run_pack_pipeline(params: PackParams<'_>) -> Result<RunSummary> {
    let dry_run = params.conn.is_none();
    let num_workers = params.workers.max(1);
    let channels = create_pipeline_channels(ChannelParams {
        root: params.root,
        archive_canonical: params.archive_dir.canonicalize().ok(),
        exclude: params.exclude,
        include: params.include,
        follow_links: params.follow_links,
        path_cap: PIPELINE_CHANNEL_CAP,
        item_cap: num_workers * ITEM_SLOTS_PER_WORKER,
    });
    let shared = ReaderShared {
        existing: params.existing,
        mtime_window_ns: params.mtime_window_ns,
        dry_run,
    };
    let mut summary = RunSummary::new(params.operation);
    summary.dry_run = dry_run;
    let bar: Option<ProgressBar> = (params.verbose && !dry_run).then(|| create_counter("Packing"));

    let skipped_paths = Arc::clone(&channels.skipped_paths);
    let error_paths = Arc::clone(&channels.error_paths);
    let remote = if dry_run { None } else { params.remote };
    let retries = params.retries;
    debug!("Packing with {num_workers} reader workers");

    let mut summary = thread::scope(|s| -> Result<RunSummary> {
        let walk_handle = s.spawn(move || run_walk_loop(channels.path_tx, channels.ctx));
        let worker_handles = spawn_reader_workers(
            s,
            &channels.path_rx,
            &channels.item_tx,
            &shared,
            num_workers,
        );
        // Only the workers hold these now; the committer sees the channel close when they finish.
        drop(channels.path_rx);
        drop(channels.item_tx);
        let item_rx = channels.item_rx;

        let (transfer_tx, outcome_rx) = match remote {
            Some(store) => {
                let (job_tx, job_rx) = bounded(PIPELINE_CHANNEL_CAP);
                let (outcome_tx, outcome_rx) = unbounded();
                s.spawn(move || run_upload_loop(store, retries, job_rx, outcome_tx));
                (Some(job_tx), Some(outcome_rx))
            }
            None => (None, None),
        };

        let committer = Committer::new(CommitterParams {
            conn: params.conn,
            archive_dir: params.archive_dir,
            max_size: params.max_size,
            next_seq: params.next_seq,
            summary,
            transfer_tx,
            keep: params.keep,
            cancel: params.cancel.clone(),
            bar: bar.clone(),
        });
        let result = committer.run(&item_rx, outcome_rx.as_ref());
        // Unblock readers and the walk if the committer stopped early.
        drop(item_rx);

        let path_count = walk_handle
            .join()
            .map_err(|_| anyhow::anyhow!("walk thread panicked"))?;
        for h in worker_handles {
            h.join()
                .map_err(|_| anyhow::anyhow!("reader worker panicked"))?;
        }
        debug!("walk sent {path_count} candidates");
        result
    })?;

    finish_bar(bar);
    apply_walk_notes(&mut summary, &skipped_paths, &error_paths, params.verbose);
    Ok(summary)
}
