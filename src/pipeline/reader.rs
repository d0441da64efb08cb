//! Reader workers: decide per candidate whether to skip, refresh or read and hash it.

use crossbeam_channel::{Receiver, Sender};
use std::thread::{Scope, ScopedJoinHandle};

use crate::engine::checksum::{checksum_equals, hash_bytes, hash_file};
use crate::engine::tools::mtime_changed;
use crate::utils::config::INLINE_PAYLOAD_THRESHOLD;

use super::context::{Candidate, PackItem, ReaderShared};

/// Decide what to do with one candidate: skip it, refresh its mtime, or hand its content on.
fn classify(candidate: Candidate, shared: &ReaderShared<'_>) -> PackItem {
    if let Some(old) = shared.existing.get(&candidate.rel)
        && old.size == candidate.size
    {
        if !mtime_changed(candidate.mtime_ns, old.mtime_ns, shared.mtime_window_ns) {
            return PackItem::Unchanged { rel: candidate.rel };
        }
        // Same size, mtime moved: the content decides.
        match hash_file(&candidate.abs, candidate.size) {
            Ok(digest) if checksum_equals(&digest, &old.checksum) => {
                return PackItem::Refreshed {
                    rel: candidate.rel,
                    mtime_ns: candidate.mtime_ns,
                };
            }
            Ok(_) => {}
            Err(e) => {
                return PackItem::Failed {
                    rel: candidate.rel,
                    message: format!("{e:#}"),
                };
            }
        }
    }

    if shared.dry_run || candidate.size > INLINE_PAYLOAD_THRESHOLD {
        return PackItem::Stream { candidate };
    }
    match std::fs::read(&candidate.abs) {
        Ok(data) => {
            let checksum = hash_bytes(&data);
            PackItem::Inline {
                candidate,
                data,
                checksum,
            }
        }
        Err(e) => PackItem::Failed {
            rel: candidate.rel,
            message: format!("read {}: {e}", candidate.abs.display()),
        },
    }
}

/// Single reader worker: read candidates from path_rx, classify and read them, send on item_tx.
fn reader_worker_loop(
    path_rx: Receiver<Candidate>,
    item_tx: Sender<PackItem>,
    shared: &ReaderShared<'_>,
) {
    while let Ok(candidate) = path_rx.recv() {
        if item_tx.send(classify(candidate, shared)).is_err() {
            // Committer stopped (cancelled or failed).
            break;
        }
    }
}

/// Spawn reader workers on `scope`. Caller must drop its own `item_tx` so the committer sees the
/// channel close once all workers finish.
pub fn spawn_reader_workers<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    path_rx: &Receiver<Candidate>,
    item_tx: &Sender<PackItem>,
    shared: &'env ReaderShared<'env>,
    num_threads: usize,
) -> Vec<ScopedJoinHandle<'scope, ()>> {
    (0..num_threads)
        .map(|_| {
            let path_rx = path_rx.clone();
            let item_tx = item_tx.clone();
            scope.spawn(move || reader_worker_loop(path_rx, item_tx, shared))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContainerId, FileRecord};
    use std::collections::HashMap;

    fn candidate(dir: &std::path::Path, rel: &str, data: &[u8], mtime_ns: i64) -> Candidate {
        let abs = dir.join(rel);
        std::fs::write(&abs, data).unwrap();
        Candidate {
            abs,
            rel: rel.to_string(),
            size: data.len() as u64,
            mtime_ns,
        }
    }

    fn stored(rel: &str, data: &[u8], mtime_ns: i64) -> FileRecord {
        FileRecord {
            path: rel.to_string(),
            mtime_ns,
            size: data.len() as u64,
            checksum: hash_bytes(data),
            container: ContainerId::regular(0).unwrap(),
            offset: 0,
        }
    }

    #[test]
    fn classification_follows_size_mtime_then_content() {
        let dir = tempfile::tempdir().unwrap();
        let second = 1_000_000_000;
        let mut existing = HashMap::new();
        existing.insert("same".to_string(), stored("same", b"aaaa", 10 * second));
        existing.insert("touched".to_string(), stored("touched", b"bbbb", 10 * second));
        existing.insert("edited".to_string(), stored("edited", b"cccc", 10 * second));
        let shared = ReaderShared {
            existing: &existing,
            mtime_window_ns: second,
            dry_run: false,
        };

        let c = candidate(dir.path(), "same", b"aaaa", 10 * second + 1);
        assert!(matches!(classify(c, &shared), PackItem::Unchanged { .. }));

        let c = candidate(dir.path(), "touched", b"bbbb", 20 * second);
        assert!(matches!(
            classify(c, &shared),
            PackItem::Refreshed { mtime_ns, .. } if mtime_ns == 20 * second
        ));

        let c = candidate(dir.path(), "edited", b"CCCC", 20 * second);
        match classify(c, &shared) {
            PackItem::Inline { data, checksum, .. } => {
                assert_eq!(data, b"CCCC");
                assert_eq!(checksum, hash_bytes(b"CCCC"));
            }
            _ => panic!("edited file should be re-archived"),
        }

        let c = candidate(dir.path(), "new", b"dddd", 0);
        assert!(matches!(classify(c, &shared), PackItem::Inline { .. }));
    }

    #[test]
    fn vanished_file_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let existing = HashMap::new();
        let shared = ReaderShared {
            existing: &existing,
            mtime_window_ns: 0,
            dry_run: false,
        };
        let c = Candidate {
            abs: dir.path().join("gone"),
            rel: "gone".into(),
            size: 3,
            mtime_ns: 0,
        };
        assert!(matches!(classify(c, &shared), PackItem::Failed { .. }));
    }
}
