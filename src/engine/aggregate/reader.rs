//! Reading members back out of sealed containers.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::engine::checksum::hash_exact;
use crate::error::ChecksumError;
use crate::types::FileRecord;

/// Random access to members of one sealed container.
pub struct ContainerReader {
    file: File,
    path: PathBuf,
    len: u64,
}

impl ContainerReader {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the member described by `record`, hashing it and optionally copying it into `sink`.
    /// A member reaching past the end of the container is reported as truncated without reading.
    pub fn read_member(
        &mut self,
        record: &FileRecord,
        sink: Option<&mut dyn Write>,
    ) -> Result<String, ChecksumError> {
        if record.end() > self.len {
            return Err(ChecksumError::Truncated {
                expected: record.size,
                actual: self.len.saturating_sub(record.offset),
            });
        }
        self.file.seek(SeekFrom::Start(record.offset))?;
        let mut member = (&self.file).take(record.size);
        hash_exact(&mut member, record.size, sink)
    }
}
