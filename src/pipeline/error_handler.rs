//! Walk notes into the run summary.

use crate::types::{FailureKind, RunSummary};

use super::context::PathNotes;

/// Fold what the walk passed over into the summary: skipped paths count as skipped, unreadable
/// paths as source read failures. Call after joining the walk.
pub fn apply_walk_notes(
    summary: &mut RunSummary,
    skipped_paths: &PathNotes,
    error_paths: &PathNotes,
    verbose: bool,
) {
    let skipped = skipped_paths
        .lock()
        .map(|mut v| std::mem::take(&mut *v))
        .unwrap_or_default();
    if !skipped.is_empty() {
        log::info!("Skipped {} paths (not archivable or reserved)", skipped.len());
        if verbose {
            for (p, reason) in &skipped {
                log::debug!("  skipped: {p} ({reason})");
            }
        }
        summary.skipped += skipped.len();
    }

    let errors = error_paths
        .lock()
        .map(|mut v| std::mem::take(&mut *v))
        .unwrap_or_default();
    if !errors.is_empty() {
        log::warn!(
            "{} paths could not be read due to permission errors or access issues",
            errors.len()
        );
    }
    for (p, msg) in errors {
        summary.push_failure(Some(p), None, FailureKind::SourceRead, msg);
    }
}
