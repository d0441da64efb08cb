//! Pipeline context: shared data passed into the walk thread, and the items flowing between stages.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::types::FileRecord;

/// A regular file found by the walk.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub abs: PathBuf,
    /// Relative, `/`-separated path (the index key).
    pub rel: String,
    pub size: u64,
    pub mtime_ns: i64,
}

/// What a reader worker decided about one candidate. Consumed by the committer in arrival order.
pub enum PackItem {
    /// Content read and hashed; the committer only writes it.
    Inline {
        candidate: Candidate,
        data: Vec<u8>,
        checksum: String,
    },
    /// Too large to hold in memory; the committer streams it from disk.
    Stream { candidate: Candidate },
    /// Same size and mtime as the stored record.
    Unchanged { rel: String },
    /// Content matches the stored checksum; only the mtime moved.
    Refreshed { rel: String, mtime_ns: i64 },
    Failed { rel: String, message: String },
}

/// Paths the walk did not hand on: (path, reason).
pub type PathNotes = Arc<Mutex<Vec<(String, String)>>>;

/// Shared context for the walk. Built by the orchestrator and moved into the walk thread.
pub struct PipelineContext {
    pub root: PathBuf,
    /// Canonical archive directory, pruned from the walk.
    pub archive_canonical: Option<PathBuf>,
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub follow_links: bool,
    /// Not archived by policy (links not followed, loops).
    pub skipped_paths: PathNotes,
    /// Could not be read (permission denied, vanished).
    pub error_paths: PathNotes,
}

/// Read-only state every reader worker shares.
pub struct ReaderShared<'a> {
    /// Records from the index (empty on create).
    pub existing: &'a HashMap<String, FileRecord>,
    pub mtime_window_ns: i64,
    /// Dry runs classify without reading content.
    pub dry_run: bool,
}

/// Channels between walk → readers → committer.
pub struct PipelineChannels {
    pub path_tx: Sender<Candidate>,
    pub path_rx: Receiver<Candidate>,
    pub item_tx: Sender<PackItem>,
    pub item_rx: Receiver<PackItem>,
    pub skipped_paths: PathNotes,
    pub error_paths: PathNotes,
    pub ctx: PipelineContext,
}

pub struct ChannelParams<'a> {
    pub root: &'a Path,
    pub archive_canonical: Option<PathBuf>,
    pub exclude: &'a [String],
    pub include: &'a [String],
    pub follow_links: bool,
    pub path_cap: usize,
    /// Bounds buffered file content; size it from the worker count.
    pub item_cap: usize,
}

pub fn create_pipeline_channels(params: ChannelParams<'_>) -> PipelineChannels {
    let (path_tx, path_rx) = bounded::<Candidate>(params.path_cap);
    let (item_tx, item_rx) = bounded::<PackItem>(params.item_cap.max(1));
    let skipped_paths: PathNotes = Arc::new(Mutex::new(Vec::new()));
    let error_paths: PathNotes = Arc::new(Mutex::new(Vec::new()));

    let ctx = PipelineContext {
        root: params.root.to_path_buf(),
        archive_canonical: params.archive_canonical,
        exclude: params.exclude.to_vec(),
        include: params.include.to_vec(),
        follow_links: params.follow_links,
        skipped_paths: Arc::clone(&skipped_paths),
        error_paths: Arc::clone(&error_paths),
    };

    PipelineChannels {
        path_tx,
        path_rx,
        item_tx,
        item_rx,
        skipped_paths,
        error_paths,
        ctx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_channel_follows_worker_budget() {
        let channels = create_pipeline_channels(ChannelParams {
            root: Path::new("/src"),
            archive_canonical: None,
            exclude: &[],
            include: &[],
            follow_links: false,
            path_cap: 64,
            item_cap: 6,
        });
        assert_eq!(channels.path_tx.capacity(), Some(64));
        assert_eq!(channels.item_tx.capacity(), Some(6));
        assert!(channels.ctx.exclude.is_empty());
    }
}
