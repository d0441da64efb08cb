//! Typed errors callers match on. Everything else travels as `anyhow::Error` with context.

use std::path::PathBuf;
use thiserror::Error;

/// Archive configuration problems. Always fatal, raised before any container I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("archive at {0} already has file records; use `update` to extend it")]
    AlreadyPopulated(PathBuf),
    #[error("no archive index at {0} and no remote to fetch it from")]
    MissingIndex(PathBuf),
    #[error("archive index at {0} has no configuration")]
    MissingConfig(PathBuf),
    #[error("config `{key}` is {stored:?} in the archive but {requested:?} was requested")]
    Conflict {
        key: String,
        stored: String,
        requested: String,
    },
    #[error("index schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("maximum container size must be greater than zero")]
    InvalidMaxSize,
    #[error("invalid config value for `{key}`: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Remote transfer failures. All kinds are retryable.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} not found in remote store")]
    NotFound(String),
}

/// Failures while hashing a byte stream of known length.
#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("stream ended after {actual} of {expected} bytes")]
    Truncated { expected: u64, actual: u64 },
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("write failed: {0}")]
    Sink(#[source] std::io::Error),
}
