//! Remote store adapter: push/pull containers and the index to a slower storage tier.
//!
//! The store is opaque. Everything the archive needs is `put` a local file under its own name and
//! `get` a named file back into a local path; both may fail transiently and are retried.

use anyhow::{Result, bail};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::error::{ConfigError, TransferError};
use crate::utils::config::{PackagePaths, TransferConsts};

/// External transfer command templates for `cmd://` remotes (from `.hoard.toml` `[transfer]`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferSettings {
    pub put_command: Option<String>,
    pub get_command: Option<String>,
}

/// Where the store says a file now lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRef(pub String);

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait RemoteStore: Send + Sync {
    /// Copy `local` into the store under its file name.
    fn put(&self, local: &Path) -> Result<RemoteRef, TransferError>;

    /// Copy the stored file `name` to `local`, replacing it.
    fn get(&self, name: &str, local: &Path) -> Result<(), TransferError>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

fn file_name_of(path: &Path) -> Result<String, TransferError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::Io {
            action: "resolve name of",
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
        })
}

fn io_err(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> TransferError {
    let path = path.to_path_buf();
    move |source| TransferError::Io {
        action,
        path,
        source,
    }
}

/// Copy `src` to `dst` through a hidden sibling temp file, so `dst` is either absent or complete.
fn copy_via_temp(src: &Path, dst: &Path) -> Result<(), TransferError> {
    let name = file_name_of(dst)?;
    let tmp = dst
        .parent()
        .unwrap_or(Path::new("."))
        .join(format!(".{name}.incoming"));
    std::fs::copy(src, &tmp).map_err(io_err("copy to", &tmp))?;
    // A read-only destination from an earlier copy would block the rename on some platforms.
    if let Ok(meta) = std::fs::metadata(dst) {
        let mut perms = meta.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            let _ = std::fs::set_permissions(dst, perms);
        }
    }
    std::fs::rename(&tmp, dst).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        TransferError::Io {
            action: "rename into",
            path: dst.to_path_buf(),
            source: e,
        }
    })
}

// ---- Directory store ----

/// A directory reachable through the filesystem (mounted share, scratch disk, test fixture).
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RemoteStore for DirStore {
    fn put(&self, local: &Path) -> Result<RemoteRef, TransferError> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            TransferError::Unavailable(format!("{}: {e}", self.root.display()))
        })?;
        let dst = self.root.join(file_name_of(local)?);
        copy_via_temp(local, &dst)?;
        Ok(RemoteRef(dst.display().to_string()))
    }

    fn get(&self, name: &str, local: &Path) -> Result<(), TransferError> {
        if !self.root.is_dir() {
            return Err(TransferError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        let src = self.root.join(name);
        if !src.is_file() {
            return Err(TransferError::NotFound(name.to_string()));
        }
        copy_via_temp(&src, local)
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

// ---- External command store ----

/// Runs one shell command per transfer. Templates may use `{file}` (local path), `{name}` (file
/// name), `{dir}` (local directory) and `{remote}` (remote location); values are shell-quoted.
pub struct CommandStore {
    remote: String,
    put_template: String,
    get_template: String,
}

const HSI_PUT: &str = "hsi -q mkdir -p {remote} && hsi -q put {file} : {remote}/{name}";
const HSI_GET: &str = "hsi -q get {file} : {remote}/{name}";

/// Quote `s` for `sh` unless it is made only of characters the shell leaves alone.
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=+@%,".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

impl CommandStore {
    pub fn new(remote: &str, put_template: &str, get_template: &str) -> Self {
        Self {
            remote: remote.to_string(),
            put_template: put_template.to_string(),
            get_template: get_template.to_string(),
        }
    }

    /// HPSS through the `hsi` client.
    pub fn hsi(remote: &str) -> Self {
        Self::new(remote, HSI_PUT, HSI_GET)
    }

    pub fn render(&self, template: &str, local: &Path, name: &str) -> String {
        let dir = local.parent().unwrap_or(Path::new("."));
        template
            .replace("{file}", &shell_quote(&local.to_string_lossy()))
            .replace("{name}", &shell_quote(name))
            .replace("{dir}", &shell_quote(&dir.to_string_lossy()))
            .replace("{remote}", &shell_quote(&self.remote))
    }

    fn run(&self, command: String) -> Result<(), TransferError> {
        log::debug!("transfer: {command}");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .map_err(io_err("spawn shell for", Path::new("sh")))?;
        if output.status.success() {
            return Ok(());
        }
        Err(TransferError::CommandFailed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

impl RemoteStore for CommandStore {
    fn put(&self, local: &Path) -> Result<RemoteRef, TransferError> {
        let name = file_name_of(local)?;
        self.run(self.render(&self.put_template, local, &name))?;
        Ok(RemoteRef(format!("{}/{}", self.remote.trim_end_matches('/'), name)))
    }

    fn get(&self, name: &str, local: &Path) -> Result<(), TransferError> {
        self.run(self.render(&self.get_template, local, name))?;
        if !local.is_file() {
            return Err(TransferError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("command store {}", self.remote)
    }
}

// ---- Construction ----

/// Normalize a remote spec: empty and `none` mean local-only.
pub fn normalize_remote_spec(spec: Option<&str>) -> Option<String> {
    spec.map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
        .map(str::to_string)
}

fn env_template(kind: &str) -> Option<String> {
    let var = format!(
        "{}_{kind}_CMD",
        PackagePaths::get().pkg_name().to_uppercase()
    );
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Build the store named by `spec`:
/// `file://PATH` or a bare path (directory), `hsi://PATH` (HPSS via `hsi`),
/// `cmd://PATH` (templates from settings or `HOARD_PUT_CMD` / `HOARD_GET_CMD`), `none`.
pub fn open_remote(
    spec: Option<&str>,
    settings: &TransferSettings,
) -> Result<Option<Box<dyn RemoteStore>>> {
    let Some(spec) = normalize_remote_spec(spec) else {
        return Ok(None);
    };
    let store: Box<dyn RemoteStore> = match spec.split_once("://") {
        None => Box::new(DirStore::new(&spec)),
        Some(("file", path)) => Box::new(DirStore::new(path)),
        Some(("hsi", path)) => Box::new(CommandStore::hsi(path)),
        Some(("cmd", path)) => {
            let put = settings.put_command.clone().or_else(|| env_template("PUT"));
            let get = settings.get_command.clone().or_else(|| env_template("GET"));
            match (put, get) {
                (Some(put), Some(get)) => Box::new(CommandStore::new(path, &put, &get)),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "transfer.put_command/get_command".to_string(),
                        value: spec.clone(),
                    }
                    .into());
                }
            }
        }
        Some((scheme, _)) => bail!("unsupported remote scheme {scheme:?} in {spec:?}"),
    };
    log::debug!("Remote store: {}", store.describe());
    Ok(Some(store))
}

// ---- Retries ----

fn backoff(attempt: u32) {
    std::thread::sleep(Duration::from_millis(
        TransferConsts::BACKOFF_STEP_MILLIS * u64::from(attempt),
    ));
}

/// `put` with up to `retries` further attempts after the first failure.
pub fn put_with_retries(
    store: &dyn RemoteStore,
    local: &Path,
    retries: u32,
) -> Result<RemoteRef, TransferError> {
    let mut attempt = 0;
    loop {
        match store.put(local) {
            Ok(r) => return Ok(r),
            Err(e) if attempt < retries => {
                attempt += 1;
                log::warn!(
                    "put {} failed ({e}); retry {attempt}/{retries}",
                    local.display()
                );
                backoff(attempt);
            }
            Err(e) => return Err(e),
        }
    }
}

/// `get` with up to `retries` further attempts after the first failure.
pub fn get_with_retries(
    store: &dyn RemoteStore,
    name: &str,
    local: &Path,
    retries: u32,
) -> Result<(), TransferError> {
    let mut attempt = 0;
    loop {
        match store.get(name, local) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retries => {
                attempt += 1;
                log::warn!("get {name} failed ({e}); retry {attempt}/{retries}");
                backoff(attempt);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn quoting_leaves_plain_paths_alone() {
        assert_eq!(shell_quote("/arch/000001.pack"), "/arch/000001.pack");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn render_fills_placeholders() {
        let store = CommandStore::new("/hpss/run 1", "put {file} {remote}/{name}", "get");
        let cmd = store.render(&store.put_template, Path::new("/tmp/a/000002.pack"), "000002.pack");
        assert_eq!(cmd, "put /tmp/a/000002.pack '/hpss/run 1'/000002.pack");
    }

    #[test]
    fn none_means_local_only() {
        let settings = TransferSettings::default();
        assert!(open_remote(None, &settings).unwrap().is_none());
        assert!(open_remote(Some("none"), &settings).unwrap().is_none());
        assert!(open_remote(Some("s3://bucket"), &settings).is_err());
    }

    struct Flaky {
        failures_left: AtomicU32,
    }

    impl RemoteStore for Flaky {
        fn put(&self, local: &Path) -> Result<RemoteRef, TransferError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(TransferError::Unavailable("tape busy".into()));
            }
            Ok(RemoteRef(local.display().to_string()))
        }

        fn get(&self, name: &str, _local: &Path) -> Result<(), TransferError> {
            Err(TransferError::NotFound(name.to_string()))
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    #[test]
    fn retries_are_bounded() {
        let store = Flaky {
            failures_left: AtomicU32::new(1),
        };
        assert!(put_with_retries(&store, Path::new("x.pack"), 1).is_ok());

        let store = Flaky {
            failures_left: AtomicU32::new(2),
        };
        assert!(put_with_retries(&store, Path::new("x.pack"), 1).is_err());
        assert!(get_with_retries(&store, "x.pack", Path::new("x.pack"), 0).is_err());
    }

    #[test]
    fn dir_store_round_trip() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let src = local.path().join("000000.pack");
        std::fs::write(&src, b"payload").unwrap();

        let store = DirStore::new(remote.path().join("tier"));
        let r = store.put(&src).unwrap();
        assert!(r.0.ends_with("000000.pack"));

        let back = local.path().join("copy.pack");
        store.get("000000.pack", &back).unwrap();
        assert_eq!(std::fs::read(&back).unwrap(), b"payload");
        assert!(matches!(
            store.get("missing.pack", &back),
            Err(TransferError::NotFound(_))
        ));
    }
}
