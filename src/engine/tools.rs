//! Path and filter utilities

use anyhow::{Context, Result, bail};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::types::ContainerId;

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Normalize a relative path for storage: forward slashes on every platform.
pub fn path_to_db_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// A trailing `/` selects everything under that directory (`dir/` becomes `dir/*`).
pub fn expand_dir_pattern(pattern: &str) -> String {
    if pattern.ends_with('/') {
        format!("{pattern}*")
    } else {
        pattern.to_string()
    }
}

/// True if `rel` (relative, `/`-separated) or its final component matches any pattern.
pub fn matches_any(rel: &str, patterns: &[String]) -> bool {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    patterns.iter().any(|p| {
        let p = expand_dir_pattern(p);
        glob_match(&p, rel) || glob_match(&p, name)
    })
}

/// Returns true if a walked path should be considered at all (non-empty, not excluded).
/// `rel` is the path relative to the source root.
pub fn should_include_in_walk(rel: &str, exclude_patterns: &[String]) -> bool {
    !rel.is_empty() && (exclude_patterns.is_empty() || !matches_any(rel, exclude_patterns))
}

/// Returns true if a file passes the include filter (empty filter includes everything).
pub fn passes_include(rel: &str, include_patterns: &[String]) -> bool {
    include_patterns.is_empty()
        || include_patterns
            .iter()
            .any(|p| glob_match(&expand_dir_pattern(p), rel))
}

/// Glob matching with `*` (any run, including `/`) and `?` (one character), shell-fnmatch style.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    // Remove leading '!' if present (negation handled by caller)
    let pattern = pattern.strip_prefix('!').unwrap_or(pattern);
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0_usize, 0_usize);
    // Position of the last '*' in the pattern and the text index it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((spi, sti)) = star {
            pi = spi + 1;
            ti = sti + 1;
            star = Some((spi, sti + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Check if mtime has changed beyond tolerance window
pub fn mtime_changed(new_mtime: i64, old_mtime: i64, tolerance_ns: i64) -> bool {
    let mtime_diff = (new_mtime - old_mtime).abs();
    mtime_diff > tolerance_ns
}

/// Modification time of `meta` in nanoseconds since epoch (0 when unavailable or pre-epoch).
pub fn mtime_ns(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Current time in nanoseconds since epoch.
pub fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

pub fn canonicalize_dir(path: &Path) -> Result<PathBuf> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("canonicalize {}", path.display()))?;
    if !canonical.is_dir() {
        anyhow::bail!("input path should be a directory: {}", path.display());
    }
    Ok(canonical)
}

/// Inclusive container id range; an open end is unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerRange {
    pub start: Option<ContainerId>,
    pub end: Option<ContainerId>,
}

impl ContainerRange {
    pub fn contains(&self, id: ContainerId) -> bool {
        self.start.is_none_or(|s| id >= s) && self.end.is_none_or(|e| id <= e)
    }
}

fn parse_bound(s: &str) -> Result<Option<ContainerId>> {
    let s = s.trim();
    if s.is_empty() {
        Ok(None)
    } else {
        s.parse().map(Some)
    }
}

/// Parse `000002-000004,000007,-000001,00000a-` into ranges.
pub fn parse_container_ranges(spec: &str) -> Result<Vec<ContainerRange>> {
    let mut ranges = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let range = match part.split_once('-') {
            Some((a, b)) => ContainerRange {
                start: parse_bound(a)?,
                end: parse_bound(b)?,
            },
            None => {
                let id = part.parse()?;
                ContainerRange {
                    start: Some(id),
                    end: Some(id),
                }
            }
        };
        if let (Some(s), Some(e)) = (range.start, range.end)
            && s > e
        {
            bail!("container range {part:?} ends before it starts");
        }
        ranges.push(range);
    }
    if ranges.is_empty() {
        bail!("empty container selection {spec:?}");
    }
    Ok(ranges)
}

/// Ids from `available` that fall in any range.
pub fn select_containers(
    ranges: &[ContainerRange],
    available: &BTreeSet<ContainerId>,
) -> BTreeSet<ContainerId> {
    available
        .iter()
        .copied()
        .filter(|id| ranges.iter().any(|r| r.contains(*id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_crosses_separators() {
        assert!(glob_match("dir/*", "dir/a/b.txt"));
        assert!(glob_match("*.nc", "run/out/file.nc"));
        assert!(!glob_match("*.nc", "file.nc4"));
    }

    #[test]
    fn backtracking_star() {
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(glob_match("a*b*c", "abcbc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("?", ""));
    }

    #[test]
    fn trailing_slash_selects_directory() {
        assert!(matches_any("build/obj/x.o", &["build/".to_string()]));
        assert!(!matches_any("src/build.rs", &["build/".to_string()]));
        assert!(passes_include("build/obj/x.o", &["build/".to_string()]));
    }

    #[test]
    fn os_metadata_files_are_walked_like_any_other() {
        assert!(should_include_in_walk("a/.DS_Store", &[]));
        assert!(should_include_in_walk("a/._thing", &[]));
        assert!(should_include_in_walk("Thumbs.db", &[]));
        assert!(!should_include_in_walk("a/.DS_Store", &[".DS_Store".to_string()]));
    }

    #[test]
    fn container_ranges() {
        let ranges = parse_container_ranges("000002-000003, 000005,-000000,00000a-").unwrap();
        let all: BTreeSet<ContainerId> = (0..12)
            .map(|n| ContainerId::regular(n).unwrap())
            .collect();
        let picked: Vec<String> = select_containers(&ranges, &all)
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(
            picked,
            ["000000", "000002", "000003", "000005", "00000a", "00000b"]
        );
        assert!(parse_container_ranges("000003-000001").is_err());
        assert!(parse_container_ranges("").is_err());
        assert!(parse_container_ranges("xyz").is_err());
    }
}
