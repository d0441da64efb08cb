//! End-of-run summary: colored counts, per-failure lines, JSON results file.

use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::types::RunSummary;
use crate::utils::config::{LIST_THRESHOLD, PackagePaths};
use crate::utils::{Colors, format_size};

/// Write the summary as pretty JSON to `path`.
pub fn write_report(summary: &RunSummary, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("create report {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), summary)
        .with_context(|| format!("write report {}", path.display()))?;
    Ok(())
}

/// One-line description of a failure for logs.
fn failure_line(f: &crate::types::Failure) -> String {
    let container = f
        .container
        .map(|c| format!(" [{c}]"))
        .unwrap_or_default();
    format!(
        "{}: {}{} ({})",
        f.kind,
        f.path.as_deref().unwrap_or("-"),
        container,
        f.message
    )
}

/// Log the summary. When failures exceed LIST_THRESHOLD the full list goes to the results file in
/// `results_dir` instead of the log. Returns that file's path when written.
pub fn print_summary(summary: &RunSummary, results_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    let mode = if summary.dry_run { " (dry run)" } else { "" };
    info!(
        "{}{}: {} | {} | {} | {} in {} container(s)",
        summary.operation,
        mode,
        Colors::colorize(Colors::SUCCEEDED, &format!("Succeeded: {}", summary.succeeded)),
        Colors::colorize(Colors::SKIPPED, &format!("Skipped: {}", summary.skipped)),
        Colors::colorize(Colors::FAILED, &format!("Failed: {}", summary.failed())),
        format_size(summary.bytes),
        summary.containers_written.len(),
    );
    if summary.cancelled {
        warn!("Run was cancelled; results are partial");
    }

    let mut written = None;
    if summary.failed() > LIST_THRESHOLD
        && let Some(dir) = results_dir
    {
        let path = dir.join(PackagePaths::get().results_filename());
        write_report(summary, &path)?;
        warn!(
            "{} failures; full list written to {}",
            summary.failed(),
            path.display()
        );
        written = Some(path);
    } else {
        for f in &summary.failures {
            warn!("  {}", failure_line(f));
        }
    }

    let failed = summary.failed_containers();
    if !failed.is_empty() {
        let ids: Vec<String> = failed.iter().map(|c| c.to_string()).collect();
        info!("Containers with failures: {}", ids.join(","));
    }
    Ok(written)
}
