use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::wal::reader::{Replay, WALReader};
use crate::wal::record::{Operation, WALRecord};

/// Writes WAL records to a file on disk.
///
/// Every write must be durable before it's acknowledged to the client:
/// `append` fsyncs before returning. The WAL ensures crash recovery:
/// on restart, replay the WAL to reconstruct the memtable.
///
/// Takes `&mut self` everywhere; the owner serializes callers, so records
/// land in commit order.
pub struct WALWriter {
    path: PathBuf,
    file: File,
    offset: u64,
}

impl WALWriter {
    /// Create (or open) the WAL at `path` for appending.
    ///
    /// Any bytes behind the last valid record are cut off first, so new
    /// records never land after a torn tail that replay would stop at.
    /// Returns the writer together with what the existing log replays to.
    pub fn open(path: &Path) -> Result<(Self, Replay)> {
        let replay = WALReader::new(path)?.replay();

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if replay.corrupt_tail {
            tracing::warn!(
                path = %path.display(),
                valid_len = replay.valid_len,
                "truncating torn WAL tail"
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }

        let writer = WALWriter {
            path: path.to_path_buf(),
            file,
            offset: replay.valid_len,
        };
        Ok((writer, replay))
    }

    /// Append a record and fsync it. Returns the offset it was written at.
    ///
    /// On failure nothing is acknowledged: a partially written record is cut
    /// back off (best effort) and the error is returned to the caller.
    pub fn append(&mut self, operation: Operation, sequence: u64, key: &[u8], value: &[u8]) -> Result<u64> {
        let record = WALRecord::new(self.offset, sequence, operation, key.to_vec(), value.to_vec());
        let encoded = record.encode();

        let written = self.file.write_all(&encoded).and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(rollback) = self.file.set_len(self.offset) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back partial WAL record"
                );
            }
            return Err(e.into());
        }

        let at = self.offset;
        self.offset += encoded.len() as u64;
        Ok(at)
    }

    /// Truncate the log to empty. Only call once the memtable these records
    /// describe is durable in a published segment.
    pub fn clear(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.offset = 0;
        Ok(())
    }

    /// Force fsync to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
