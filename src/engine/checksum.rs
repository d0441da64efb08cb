//! Content checksums (blake3, hex text in the index).

use anyhow::{Context, Result};
use blake3::Hasher;
use memmap2::Mmap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::ChecksumError;
use crate::utils::config::HashingConsts;

/// Hash a file with blake3. Uses memory-mapped I/O for files above threshold, chunked reading otherwise.
pub fn hash_file(path: &Path, size: u64) -> Result<String> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Hasher::new();

    if size > HashingConsts::HASH_MMAP_THRESHOLD {
        // Memory-mapped I/O for large files (Blake3 already uses SIMD internally)
        let mmap = unsafe { Mmap::map(&file)? };
        hasher.update(&mmap);
    } else {
        let mut reader =
            std::io::BufReader::with_capacity(HashingConsts::HASH_READ_CHUNK_SIZE, file);
        let mut buffer = vec![0u8; HashingConsts::HASH_READ_CHUNK_SIZE];
        loop {
            let n = reader
                .read(&mut buffer)
                .with_context(|| format!("read {}", path.display()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Read exactly `len` bytes from `reader`, hashing them and copying them into `sink` if given.
///
/// Fails with [`ChecksumError::Truncated`] when the stream ends early, so a short container or
/// a file that shrank mid-read is never mistaken for content.
pub fn hash_exact<R: Read>(
    reader: &mut R,
    len: u64,
    mut sink: Option<&mut dyn Write>,
) -> Result<String, ChecksumError> {
    let mut hasher = Hasher::new();
    let chunk = HashingConsts::HASH_READ_CHUNK_SIZE.min(len.max(1) as usize);
    let mut buffer = vec![0u8; chunk];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let n = match reader.read(&mut buffer[..want]) {
            Ok(0) => {
                return Err(ChecksumError::Truncated {
                    expected: len,
                    actual: len - remaining,
                });
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ChecksumError::Io(e)),
        };
        hasher.update(&buffer[..n]);
        if let Some(w) = sink.as_deref_mut() {
            w.write_all(&buffer[..n]).map_err(ChecksumError::Sink)?;
        }
        remaining -= n as u64;
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Compare a freshly computed digest against a stored one (case-insensitive hex).
pub fn checksum_equals(computed: &str, stored: &str) -> bool {
    computed.eq_ignore_ascii_case(stored)
}
