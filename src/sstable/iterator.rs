use std::sync::Arc;
use std::vec::IntoIter;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::reader::SSTable;
use crate::types::Entry;

/// Sequential scan over one SSTable, one data block in memory at a time.
///
/// Holds its own handle on the table, so a compaction can keep reading a
/// segment that the live version no longer references.
pub struct SSTableIterator {
    table: Arc<SSTable>,
    /// Index of the next block to load.
    next_block: usize,
    entries: IntoIter<Entry>,
    current: Option<Entry>,
}

impl SSTableIterator {
    pub fn new(table: Arc<SSTable>) -> Result<Self> {
        let mut iter = SSTableIterator {
            table,
            next_block: 0,
            entries: Vec::new().into_iter(),
            current: None,
        };
        iter.advance()?;
        Ok(iter)
    }

    fn advance(&mut self) -> Result<()> {
        loop {
            if let Some(entry) = self.entries.next() {
                self.current = Some(entry);
                return Ok(());
            }
            let Some(handle) = self.table.index().entries().get(self.next_block) else {
                self.current = None;
                return Ok(());
            };
            let block = self.table.read_block(handle)?;
            self.entries = block.entries()?.into_iter();
            self.next_block += 1;
        }
    }
}

impl StorageIterator for SSTableIterator {
    fn entry(&self) -> &Entry {
        self.current.as_ref().expect("entry() called on exhausted iterator")
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        self.advance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::FilterPolicy;
    use crate::iterator::collect;
    use crate::sstable::builder::SSTableBuilder;
    use crate::sstable::segment_path;
    use tempfile::tempdir;

    #[test]
    fn scan_crosses_block_boundaries_in_order() {
        let dir = tempdir().unwrap();
        let mut builder = SSTableBuilder::new(dir.path(), 1, 0, 128, FilterPolicy::default()).unwrap();
        let mut expected = Vec::new();
        for i in 0..300u64 {
            let e = Entry::put(format!("k{:04}", i).into_bytes(), vec![b'v'; (i % 7) as usize], i);
            builder.add(&e).unwrap();
            expected.push(e);
        }
        builder.finish().unwrap();

        let table = Arc::new(SSTable::open(&segment_path(dir.path(), 1)).unwrap());
        assert!(table.index().len() > 10);
        let mut iter = table.iter().unwrap();
        assert_eq!(collect(&mut iter).unwrap(), expected);
        assert!(!iter.is_valid());
    }
}
