//! The single writer of a create/update run: places items into containers, seals them, indexes
//! them, and hands them to the transfer stage.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::fs::File;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::engine::aggregate::{
    AggregateWriter, AppendOutcome, Packer, Slot, remove_container_file,
};
use crate::engine::db_ops::{commit_container, refresh_mtimes, set_remote_ref};
use crate::engine::progress::{ProgressBar, tick};
use crate::types::{ContainerId, ContainerRecord, FailureKind, FileRecord, RunSummary};
use crate::utils::config::CANCEL_POLL_MILLIS;
use crate::utils::format_size;

use super::context::{Candidate, PackItem};
use super::uploader::{TransferJob, TransferOutcome};

pub struct Committer<'a> {
    /// None on dry runs.
    conn: Option<&'a mut Connection>,
    packer: Packer,
    writer: AggregateWriter,
    pending: Vec<FileRecord>,
    refreshed: Vec<(String, i64)>,
    summary: RunSummary,
    transfer_tx: Option<Sender<TransferJob>>,
    keep: bool,
    cancel: Option<Arc<AtomicBool>>,
    bar: Option<ProgressBar>,
    /// Containers a dry run would write.
    planned: BTreeSet<ContainerId>,
}

pub struct CommitterParams<'a> {
    pub conn: Option<&'a mut Connection>,
    pub archive_dir: &'a std::path::Path,
    pub max_size: u64,
    pub next_seq: u32,
    pub summary: RunSummary,
    pub transfer_tx: Option<Sender<TransferJob>>,
    pub keep: bool,
    pub cancel: Option<Arc<AtomicBool>>,
    pub bar: Option<ProgressBar>,
}

impl<'a> Committer<'a> {
    pub fn new(params: CommitterParams<'a>) -> Self {
        Self {
            conn: params.conn,
            packer: Packer::new(params.max_size, params.next_seq),
            writer: AggregateWriter::new(params.archive_dir),
            pending: Vec::new(),
            refreshed: Vec::new(),
            summary: params.summary,
            transfer_tx: params.transfer_tx,
            keep: params.keep,
            cancel: params.cancel,
            bar: params.bar,
            planned: BTreeSet::new(),
        }
    }

    fn dry_run(&self) -> bool {
        self.conn.is_none()
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Consume items until the channel closes or the run is cancelled, then seal what is open.
    /// Transfer outcomes are recorded as they arrive.
    pub fn run(
        mut self,
        item_rx: &Receiver<PackItem>,
        outcome_rx: Option<&Receiver<TransferOutcome>>,
    ) -> Result<RunSummary> {
        let poll = Duration::from_millis(CANCEL_POLL_MILLIS);
        loop {
            if self.cancelled() {
                log::info!("Archiving cancelled (Ctrl+C); sealing what was written...");
                self.summary.cancelled = true;
                break;
            }
            match item_rx.recv_timeout(poll) {
                Ok(item) => self.handle(item)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if let Some(rx) = outcome_rx {
                while let Ok(outcome) = rx.try_recv() {
                    self.record_outcome(outcome)?;
                }
            }
        }
        self.finish(outcome_rx)
    }

    fn handle(&mut self, item: PackItem) -> Result<()> {
        match item {
            PackItem::Unchanged { rel } => {
                log::trace!("unchanged: {rel}");
                self.summary.skipped += 1;
            }
            PackItem::Refreshed { rel, mtime_ns } => {
                log::debug!("content unchanged, refreshing mtime: {rel}");
                self.refreshed.push((rel, mtime_ns));
                self.summary.skipped += 1;
            }
            PackItem::Failed { rel, message } => {
                log::warn!("Skipping unreadable file {rel}: {message}");
                self.summary
                    .push_failure(Some(rel), None, FailureKind::SourceRead, message);
            }
            PackItem::Inline {
                candidate,
                data,
                checksum,
            } => self.pack_inline(candidate, &data, checksum)?,
            PackItem::Stream { candidate } => self.pack_stream(candidate)?,
        }
        tick(self.bar.as_ref(), 1);
        Ok(())
    }

    /// Seal the writer's container if it is not the one `slot` targets, then make sure the target is open.
    fn prepare(&mut self, slot: &Slot) -> Result<()> {
        if let Some(cur) = self.writer.current()
            && cur != slot.container
        {
            self.seal_current()?;
        }
        if self.writer.current().is_none() {
            self.writer.open(slot.container)?;
        }
        Ok(())
    }

    fn plan(&mut self, candidate: &Candidate, size: u64) -> Result<()> {
        let slot = self.packer.place(size)?;
        self.planned.insert(slot.container);
        log::info!("would archive {} -> {}", candidate.rel, slot.container);
        self.summary.succeeded += 1;
        self.summary.bytes += size;
        Ok(())
    }

    fn pack_inline(&mut self, candidate: Candidate, data: &[u8], checksum: String) -> Result<()> {
        let size = data.len() as u64;
        if self.dry_run() {
            return self.plan(&candidate, size);
        }
        let slot = self.packer.place(size)?;
        self.prepare(&slot)?;
        let offset = self.writer.append_bytes(data)?;
        debug_assert_eq!(offset, slot.offset);
        self.pending.push(FileRecord {
            path: candidate.rel,
            mtime_ns: candidate.mtime_ns,
            size,
            checksum,
            container: slot.container,
            offset,
        });
        if slot.seal_after {
            self.seal_current()?;
        }
        Ok(())
    }

    fn pack_stream(&mut self, candidate: Candidate) -> Result<()> {
        if self.dry_run() {
            return self.plan(&candidate, candidate.size);
        }
        let mut file = match File::open(&candidate.abs) {
            Ok(f) => f,
            Err(e) => {
                let message = format!("open {}: {e}", candidate.abs.display());
                log::warn!("Skipping unreadable file {}: {e}", candidate.rel);
                self.summary.push_failure(
                    Some(candidate.rel),
                    None,
                    FailureKind::SourceRead,
                    message,
                );
                return Ok(());
            }
        };
        let size = candidate.size;
        let slot = self.packer.place(size)?;
        self.prepare(&slot)?;
        match self.writer.append_stream(&mut file, size)? {
            AppendOutcome::Written { checksum } => {
                self.pending.push(FileRecord {
                    path: candidate.rel,
                    mtime_ns: candidate.mtime_ns,
                    size,
                    checksum,
                    container: slot.container,
                    offset: slot.offset,
                });
                if slot.seal_after {
                    self.seal_current()?;
                }
            }
            AppendOutcome::SourceFailed(e) => {
                self.packer.rollback(&slot, size);
                if slot.seal_after {
                    self.writer.discard();
                }
                log::warn!("Skipping unreadable file {}: {e}", candidate.rel);
                self.summary.push_failure(
                    Some(candidate.rel),
                    None,
                    FailureKind::SourceRead,
                    e.to_string(),
                );
            }
        }
        Ok(())
    }

    /// Seal the open container, index it with its records in one transaction, queue its transfer.
    /// An open container with no records is discarded instead.
    fn seal_current(&mut self) -> Result<()> {
        let records = std::mem::take(&mut self.pending);
        if records.is_empty() {
            self.writer.discard();
            return Ok(());
        }
        let Some(sealed) = self.writer.seal()? else {
            return Ok(());
        };
        let record = ContainerRecord {
            id: sealed.id,
            size: sealed.size,
            checksum: sealed.checksum.clone(),
            file_count: records.len(),
            remote_ref: None,
        };
        if let Some(conn) = self.conn.as_deref_mut() {
            commit_container(conn, &record, &records)
                .with_context(|| format!("index container {}", sealed.id))?;
        }
        log::debug!(
            "Sealed {}: {} files, {}",
            sealed.id,
            records.len(),
            format_size(sealed.size)
        );
        self.summary.succeeded += records.len();
        self.summary.bytes += sealed.size;
        self.summary.containers_written.push(sealed.id);

        if let Some(tx) = &self.transfer_tx
            && tx
                .send(TransferJob {
                    id: sealed.id,
                    path: sealed.path.clone(),
                })
                .is_err()
        {
            self.summary.push_failure(
                None,
                Some(sealed.id),
                FailureKind::Transfer,
                "transfer stage stopped before this container was queued",
            );
        }
        Ok(())
    }

    fn record_outcome(&mut self, outcome: TransferOutcome) -> Result<()> {
        match outcome.result {
            Ok(remote_ref) => {
                if let Some(conn) = self.conn.as_deref() {
                    set_remote_ref(conn, outcome.id, &remote_ref.0)?;
                }
                log::debug!("Transferred {} to {remote_ref}", outcome.id);
                if !self.keep
                    && let Err(e) = remove_container_file(&outcome.path)
                {
                    log::warn!("Could not remove local copy of {}: {e:#}", outcome.id);
                }
            }
            Err(e) => {
                log::warn!(
                    "Transfer of {} failed; local copy kept at {}",
                    outcome.id,
                    outcome.path.display()
                );
                self.summary.push_failure(
                    None,
                    Some(outcome.id),
                    FailureKind::Transfer,
                    e.to_string(),
                );
            }
        }
        Ok(())
    }

    fn finish(mut self, outcome_rx: Option<&Receiver<TransferOutcome>>) -> Result<RunSummary> {
        if self.dry_run() {
            self.packer.finish();
            log::info!(
                "would write {} container(s), {}",
                self.planned.len(),
                format_size(self.summary.bytes)
            );
            return Ok(self.summary);
        }

        self.packer.finish();
        self.seal_current()?;
        if !self.refreshed.is_empty()
            && let Some(conn) = self.conn.as_deref_mut()
        {
            refresh_mtimes(conn, &self.refreshed)?;
        }

        // Close the job channel so the transfer stage drains and exits, then collect the rest.
        self.transfer_tx = None;
        if let Some(rx) = outcome_rx {
            while let Ok(outcome) = rx.recv() {
                self.record_outcome(outcome)?;
            }
        }
        Ok(self.summary)
    }
}
