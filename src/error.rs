use std::io;

use thiserror::Error;

/// Unified error type for the storage engine.
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from disk read/write/sync.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed WAL, segment or manifest data (CRC mismatch, bad format, etc).
    #[error("Corruption: {0}")]
    Corruption(String),

    /// A compaction job failed. Recoverable: the input segments are untouched.
    #[error("Compaction failed: {0}")]
    CompactionFailed(String),

    /// Operation attempted after `close`.
    #[error("Engine is closed")]
    EngineClosed,

    /// Flushes keep failing and the memtable reached its hard cap.
    #[error("Memtable full: {size} bytes buffered, hard cap is {cap} bytes")]
    MemtableFull { size: usize, cap: usize },

    /// Rejected configuration.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

impl Error {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
