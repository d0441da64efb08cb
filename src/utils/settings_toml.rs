//! Load `.hoard.toml` from a directory (CLI only). Lib callers pass everything through the opts structs.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::engine::transfer::TransferSettings;
use crate::utils::config::PackagePaths;
use crate::utils::size::parse_size;
use crate::{ArchiveOpts, ExtractOpts};

#[derive(Debug, Default, Deserialize)]
pub struct HoardToml {
    #[serde(default)]
    settings: SettingsSection,
    #[serde(default)]
    transfer: TransferSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    archive: Option<String>,
    remote: Option<String>,
    max_size: Option<String>,
    workers: Option<usize>,
    exclude: Option<Vec<String>>,
    keep: Option<bool>,
    retries: Option<u32>,
    follow_links: Option<bool>,
    mtime_window: Option<i64>,
    verbose: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TransferSection {
    put_command: Option<String>,
    get_command: Option<String>,
}

/// Load `.hoard.toml` from `dir` if present. Returns None if file missing or unreadable.
pub fn load_settings_toml(dir: &Path) -> Option<HoardToml> {
    let path = dir.join(PackagePaths::get().settings_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($idx:expr, $opts:expr, $idx_field:ident => $opts_field:ident) => {
        if let Some(v) = $idx.$idx_field.clone() {
            $opts.$opts_field = v;
        }
    };
}

impl HoardToml {
    /// True when the file asks for verbose output.
    pub fn verbose(&self) -> bool {
        self.settings.verbose.unwrap_or(false)
    }

    /// Apply file config to archive opts (only fields present in the file). Call before applying CLI.
    pub fn apply_to_archive_opts(&self, opts: &mut ArchiveOpts) {
        let s = &self.settings;
        if let Some(ref p) = s.archive {
            opts.archive_dir = Some(PathBuf::from(p));
        }
        if let Some(ref r) = s.remote {
            opts.remote = Some(r.clone());
        }
        if let Some(ref m) = s.max_size {
            match parse_size(m) {
                Ok(v) => opts.max_size = Some(v),
                Err(e) => log::warn!("ignoring max_size from settings file: {e:#}"),
            }
        }
        if let Some(w) = s.workers {
            opts.workers = Some(w);
        }
        apply_file_opt!(s, opts, exclude => exclude);
        apply_file_opt!(s, opts, keep => keep);
        apply_file_opt!(s, opts, retries => retries);
        apply_file_opt!(s, opts, follow_links => follow_links);
        if let Some(secs) = s.mtime_window {
            opts.mtime_window_ns = secs * 1_000_000_000;
        }
        self.apply_transfer(&mut opts.transfer);
    }

    /// Apply file config to extract/check opts.
    pub fn apply_to_extract_opts(&self, opts: &mut ExtractOpts) {
        let s = &self.settings;
        if let Some(ref p) = s.archive {
            opts.archive_dir = PathBuf::from(p);
        }
        if let Some(ref r) = s.remote {
            opts.remote = Some(r.clone());
        }
        if let Some(w) = s.workers {
            opts.workers = Some(w);
        }
        apply_file_opt!(s, opts, exclude => exclude);
        apply_file_opt!(s, opts, keep => keep);
        apply_file_opt!(s, opts, retries => retries);
        if let Some(secs) = s.mtime_window {
            opts.mtime_window_ns = secs * 1_000_000_000;
        }
        self.apply_transfer(&mut opts.transfer);
    }

    fn apply_transfer(&self, transfer: &mut TransferSettings) {
        if let Some(ref c) = self.transfer.put_command {
            transfer.put_command = Some(c.clone());
        }
        if let Some(ref c) = self.transfer.get_command {
            transfer.get_command = Some(c.clone());
        }
    }
}
