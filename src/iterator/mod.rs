pub mod merge;

use crate::error::Result;
use crate::types::Entry;

pub use merge::MergeIterator;

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (memtable snapshot, SSTable, merged view)
/// implements this trait. This enables composability: MergeIterator
/// takes Vec<Box<dyn StorageIterator>> and merges them.
///
/// Sources yield entries in ascending key order, at most one entry per key.
pub trait StorageIterator {
    /// Returns the current entry. Only valid when is_valid() is true.
    fn entry(&self) -> &Entry;

    /// Returns the current key. Only valid when is_valid() is true.
    fn key(&self) -> &[u8] {
        &self.entry().key
    }

    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Advances to the next entry. Returns error on IO failure.
    fn next(&mut self) -> Result<()>;
}

/// Iterator over an owned, already sorted run of entries.
pub struct VecIterator {
    entries: Vec<Entry>,
    pos: usize,
}

impl VecIterator {
    pub fn new(entries: Vec<Entry>) -> Self {
        VecIterator { entries, pos: 0 }
    }
}

impl StorageIterator for VecIterator {
    fn entry(&self) -> &Entry {
        &self.entries[self.pos]
    }

    fn is_valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn next(&mut self) -> Result<()> {
        if self.pos < self.entries.len() {
            self.pos += 1;
        }
        Ok(())
    }
}

/// Drain a storage iterator into a Vec. Mostly useful in tests and tooling.
pub fn collect(iter: &mut dyn StorageIterator) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    while iter.is_valid() {
        out.push(iter.entry().clone());
        iter.next()?;
    }
    Ok(out)
}
