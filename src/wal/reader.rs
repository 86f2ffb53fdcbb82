use std::fs;
use std::io;
use std::path::Path;

use crate::error::Result;
use crate::wal::record::WALRecord;

/// Reads WAL records from a file for crash recovery.
///
/// Loads the entire file into memory, then iterates record by record.
/// If CRC fails on a record, stop: it was a partial write from a crash.
/// All preceding records are valid.
pub struct WALReader {
    data: Vec<u8>,
}

/// Outcome of a full replay pass.
#[derive(Debug, Default)]
pub struct Replay {
    /// Valid records in the order they were written.
    pub records: Vec<WALRecord>,
    /// Byte length of the valid prefix of the log.
    pub valid_len: u64,
    /// Whether bytes past `valid_len` had to be ignored.
    pub corrupt_tail: bool,
}

impl WALReader {
    /// Open a WAL file for reading. A missing file reads as an empty log.
    pub fn new(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(WALReader { data })
    }

    /// Create an iterator over all valid records in the WAL.
    pub fn iter(&self) -> WALIterator<'_> {
        WALIterator {
            data: &self.data,
            offset: 0,
        }
    }

    /// Collect every valid record and report where valid history ends.
    pub fn replay(&self) -> Replay {
        let mut iter = self.iter();
        let records: Vec<WALRecord> = iter.by_ref().collect();
        let valid_len = iter.offset() as u64;
        Replay {
            records,
            valid_len,
            corrupt_tail: valid_len < self.data.len() as u64,
        }
    }
}

/// Iterator over WAL records. Yields records until EOF or corruption.
///
/// On CRC mismatch (or a record claiming the wrong offset) iteration stops.
/// WAL writes are sequential and append-only, so a corrupted record means
/// the crash happened here and nothing valid can follow.
pub struct WALIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl WALIterator<'_> {
    /// Byte offset just past the last record yielded.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for WALIterator<'_> {
    type Item = WALRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let record = WALRecord::decode(&self.data[self.offset..]).ok()?;
        if record.offset != self.offset as u64 {
            return None;
        }
        self.offset += record.encoded_size();
        Some(record)
    }
}
