//! Container files on disk: append members to `<id>.pack.part`, seal by fsync + rename.

use anyhow::{Context, Result, bail};
use blake3::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::engine::checksum::hash_exact;
use crate::error::ChecksumError;
use crate::types::ContainerId;
use crate::utils::config::HashingConsts;

/// A container that was fully written and renamed to its final name.
#[derive(Clone, Debug)]
pub struct SealedContainer {
    pub id: ContainerId,
    pub path: PathBuf,
    pub size: u64,
    pub checksum: String,
}

/// Result of streaming one member from its source.
pub enum AppendOutcome {
    Written { checksum: String },
    /// The source could not be read in full; the container was rolled back to the member's offset.
    SourceFailed(ChecksumError),
}

/// Writer tee: every byte written also feeds the container-wide hash.
struct HashingWriter<'a> {
    file: &'a mut File,
    hasher: &'a mut Hasher,
}

impl Write for HashingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

struct OpenContainer {
    id: ContainerId,
    path: PathBuf,
    file: File,
    written: u64,
    hasher: Hasher,
}

/// Owns at most one open container at a time. Errors from here are container write errors (fatal).
pub struct AggregateWriter {
    dir: PathBuf,
    open: Option<OpenContainer>,
}

impl AggregateWriter {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            open: None,
        }
    }

    pub fn current(&self) -> Option<ContainerId> {
        self.open.as_ref().map(|c| c.id)
    }

    /// Bytes written to the open container.
    pub fn position(&self) -> u64 {
        self.open.as_ref().map_or(0, |c| c.written)
    }

    /// Start a new container. Any partial file with the same name is replaced.
    pub fn open(&mut self, id: ContainerId) -> Result<()> {
        if let Some(cur) = &self.open {
            bail!("container {} still open while opening {}", cur.id, id);
        }
        let path = self.dir.join(id.partial_file_name());
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("create container {}", path.display()))?;
        self.open = Some(OpenContainer {
            id,
            path,
            file,
            written: 0,
            hasher: Hasher::new(),
        });
        Ok(())
    }

    fn open_mut(&mut self) -> Result<&mut OpenContainer> {
        self.open
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no container open"))
    }

    /// Append an in-memory member. Returns its offset.
    pub fn append_bytes(&mut self, data: &[u8]) -> Result<u64> {
        let c = self.open_mut()?;
        let offset = c.written;
        c.file
            .write_all(data)
            .with_context(|| format!("write container {}", c.path.display()))?;
        c.hasher.update(data);
        c.written += data.len() as u64;
        Ok(offset)
    }

    /// Stream exactly `len` bytes from `reader` into the container, hashing the member on the way.
    /// A short or failing source rolls the container back; a failing container write is fatal.
    pub fn append_stream<R: Read>(&mut self, reader: &mut R, len: u64) -> Result<AppendOutcome> {
        let c = self.open_mut()?;
        let offset = c.written;
        let result = {
            let mut tee = HashingWriter {
                file: &mut c.file,
                hasher: &mut c.hasher,
            };
            hash_exact(reader, len, Some(&mut tee))
        };
        match result {
            Ok(checksum) => {
                c.written += len;
                Ok(AppendOutcome::Written { checksum })
            }
            Err(ChecksumError::Sink(e)) => {
                Err(e).with_context(|| format!("write container {}", c.path.display()))
            }
            Err(e) => {
                truncate_to(c, offset)?;
                Ok(AppendOutcome::SourceFailed(e))
            }
        }
    }

    /// fsync, rename to the final name and make read-only. None if nothing is open.
    pub fn seal(&mut self) -> Result<Option<SealedContainer>> {
        let Some(c) = self.open.take() else {
            return Ok(None);
        };
        c.file
            .sync_all()
            .with_context(|| format!("sync container {}", c.path.display()))?;
        drop(c.file);
        let final_path = self.dir.join(c.id.file_name());
        std::fs::rename(&c.path, &final_path)
            .with_context(|| format!("seal container {}", final_path.display()))?;
        set_readonly(&final_path, true);
        Ok(Some(SealedContainer {
            id: c.id,
            path: final_path,
            size: c.written,
            checksum: c.hasher.finalize().to_hex().to_string(),
        }))
    }

    /// Drop the open container without sealing (nothing in it was indexed).
    pub fn discard(&mut self) {
        if let Some(c) = self.open.take() {
            drop(c.file);
            let _ = std::fs::remove_file(&c.path);
            log::debug!("Discarded unfinished container {}", c.id);
        }
    }
}

impl Drop for AggregateWriter {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Cut the container back to `offset` and rebuild the running hash from what remains.
fn truncate_to(c: &mut OpenContainer, offset: u64) -> Result<()> {
    c.file
        .set_len(offset)
        .and_then(|_| c.file.seek(SeekFrom::Start(0)))
        .with_context(|| format!("roll back container {}", c.path.display()))?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; HashingConsts::HASH_READ_CHUNK_SIZE];
    let mut remaining = offset;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        c.file
            .read_exact(&mut buf[..want])
            .with_context(|| format!("re-read container {}", c.path.display()))?;
        hasher.update(&buf[..want]);
        remaining -= want as u64;
    }
    c.file
        .seek(SeekFrom::Start(offset))
        .with_context(|| format!("roll back container {}", c.path.display()))?;
    c.hasher = hasher;
    c.written = offset;
    Ok(())
}

pub fn set_readonly(path: &Path, readonly: bool) {
    if let Ok(meta) = std::fs::metadata(path) {
        let mut perms = meta.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(readonly);
        let _ = std::fs::set_permissions(path, perms);
    }
}

/// Delete a local container copy (clearing read-only first).
pub fn remove_container_file(path: &Path) -> Result<()> {
    set_readonly(path, false);
    std::fs::remove_file(path).with_context(|| format!("remove {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::checksum::hash_bytes;
    use std::io::Cursor;

    #[test]
    fn seal_renames_and_hashes_whole_container() {
        let dir = tempfile::tempdir().unwrap();
        let id = ContainerId::regular(0).unwrap();
        let mut w = AggregateWriter::new(dir.path());
        w.open(id).unwrap();
        assert!(dir.path().join("000000.pack.part").exists());
        assert_eq!(w.append_bytes(b"abc").unwrap(), 0);
        assert_eq!(w.append_bytes(b"defg").unwrap(), 3);
        let sealed = w.seal().unwrap().unwrap();
        assert_eq!(sealed.size, 7);
        assert_eq!(sealed.checksum, hash_bytes(b"abcdefg"));
        assert!(!dir.path().join("000000.pack.part").exists());
        assert_eq!(std::fs::read(&sealed.path).unwrap(), b"abcdefg");
        assert!(w.seal().unwrap().is_none());
    }

    #[test]
    fn short_source_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = AggregateWriter::new(dir.path());
        w.open(ContainerId::regular(1).unwrap()).unwrap();
        w.append_bytes(b"keep").unwrap();
        let outcome = w
            .append_stream(&mut Cursor::new(b"short".to_vec()), 100)
            .unwrap();
        assert!(matches!(
            outcome,
            AppendOutcome::SourceFailed(ChecksumError::Truncated { .. })
        ));
        assert_eq!(w.position(), 4);
        match w
            .append_stream(&mut Cursor::new(b"tail".to_vec()), 4)
            .unwrap()
        {
            AppendOutcome::Written { checksum } => assert_eq!(checksum, hash_bytes(b"tail")),
            AppendOutcome::SourceFailed(e) => panic!("unexpected {e}"),
        }
        let sealed = w.seal().unwrap().unwrap();
        assert_eq!(std::fs::read(&sealed.path).unwrap(), b"keeptail");
        assert_eq!(sealed.checksum, hash_bytes(b"keeptail"));
    }

    #[test]
    fn dropping_writer_discards_partial() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut w = AggregateWriter::new(dir.path());
            w.open(ContainerId::regular(2).unwrap()).unwrap();
            w.append_bytes(b"x").unwrap();
        }
        assert!(!dir.path().join("000002.pack.part").exists());
        assert!(!dir.path().join("000002.pack").exists());
    }
}
