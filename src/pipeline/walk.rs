//! Walk loop: turns a directory walk into candidates on `path_tx`, recording what it passes over.

use crossbeam_channel::Sender;
use walkdir::WalkDir;

use crate::engine::tools::{
    mtime_ns, passes_include, path_relative_to, path_to_db_string, should_include_in_walk,
};
use crate::utils::config::PackagePaths;

use super::context::{Candidate, PipelineContext};

fn push(notes: &super::context::PathNotes, path: String, reason: String) {
    if let Ok(mut v) = notes.lock() {
        v.push((path, reason));
    }
}

impl PipelineContext {
    fn rel_of(&self, path: &std::path::Path) -> String {
        let rel = path_relative_to(path, &self.root).unwrap_or_else(|| path.to_path_buf());
        path_to_db_string(&rel)
    }

    /// Prune the archive directory and excluded directories before descending.
    fn keep_dir_entry(&self, entry: &walkdir::DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        if entry.file_type().is_dir() {
            // The root is canonical, so walked paths only need resolving once links are followed.
            if let Some(ref archive) = self.archive_canonical
                && (entry.path() == archive
                    || (self.follow_links
                        && entry.path().canonicalize().is_ok_and(|p| p == *archive)))
            {
                return false;
            }
            return should_include_in_walk(&self.rel_of(entry.path()), &self.exclude);
        }
        true
    }
}

/// Walk `ctx.root` in file-name order, sending every included regular file to `path_tx`.
/// Drops `path_tx` when done. Returns the count of candidates sent.
pub fn run_walk_loop(path_tx: Sender<Candidate>, ctx: PipelineContext) -> usize {
    let walker = WalkDir::new(&ctx.root)
        .follow_links(ctx.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| ctx.keep_dir_entry(e));

    let mut count = 0_usize;
    let reserved = PackagePaths::get().reserved_root_files();
    for result in walker {
        match result {
            Ok(entry) => {
                let file_type = entry.file_type();
                if file_type.is_dir() {
                    continue;
                }
                let rel = ctx.rel_of(entry.path());
                if reserved.contains(&rel.as_str()) {
                    push(&ctx.skipped_paths, rel, "settings or results file".to_string());
                    continue;
                }
                if !should_include_in_walk(&rel, &ctx.exclude) || !passes_include(&rel, &ctx.include)
                {
                    continue;
                }
                if file_type.is_symlink() {
                    // A followed link only stays a link when its target cannot be resolved.
                    if ctx.follow_links {
                        push(&ctx.error_paths, rel, "dangling symbolic link".to_string());
                    } else {
                        push(&ctx.skipped_paths, rel, "symbolic link not followed".to_string());
                    }
                    continue;
                }
                if !file_type.is_file() {
                    push(&ctx.skipped_paths, rel, "not a regular file".to_string());
                    continue;
                }
                let meta = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        push(&ctx.error_paths, rel, e.to_string());
                        continue;
                    }
                };
                let candidate = Candidate {
                    abs: entry.into_path(),
                    rel,
                    size: meta.len(),
                    mtime_ns: mtime_ns(&meta),
                };
                if path_tx.send(candidate).is_err() {
                    break;
                }
                count += 1;
            }
            Err(err) => {
                let rel = err
                    .path()
                    .map(|p| ctx.rel_of(p))
                    .unwrap_or_else(|| "<unknown>".to_string());
                if err.loop_ancestor().is_some() {
                    push(&ctx.skipped_paths, rel, err.to_string());
                } else {
                    push(&ctx.error_paths, rel, err.to_string());
                }
            }
        }
    }
    drop(path_tx);
    count
}
