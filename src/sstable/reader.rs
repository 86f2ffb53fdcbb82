use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::bloom::BloomFilter;
use crate::error::{Error, Result};
use crate::sstable::block::Block;
use crate::sstable::footer::{Footer, SSTableMeta};
use crate::sstable::index::{IndexEntry, SparseIndex};
use crate::sstable::iterator::SSTableIterator;
use crate::sstable::{parse_segment_file_name, read_exact_at, unseal};
use crate::types::Entry;

/// An opened SSTable file. Supports point lookups and full scans.
///
/// On open:
/// 1. Read footer (last 64 bytes) → find index, filter and meta regions
/// 2. Read and check every region, parse the sparse index into memory
/// 3. Deserialize the bloom filter
/// 4. Ready for queries (data blocks read on demand)
///
/// Reads are positioned, so one handle serves any number of threads.
pub struct SSTable {
    path: PathBuf,
    file: File,
    index: SparseIndex,
    filter: BloomFilter,
    meta: SSTableMeta,
    /// Set when compaction has replaced this segment. The file is removed
    /// once the last reader drops its handle.
    obsolete: AtomicBool,
}

impl SSTable {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{}: file too short to contain footer",
                path.display()
            )));
        }

        let mut footer_buf = [0u8; Footer::SIZE];
        read_exact_at(&file, &mut footer_buf, file_size - Footer::SIZE as u64)?;
        let footer = Footer::decode(&footer_buf)?;
        footer.validate(file_size)?;

        let index_region = read_region(&file, footer.index_block_offset, footer.index_block_size)?;
        let index = SparseIndex::decode(unseal(&index_region, "index")?)?;

        let filter_region = read_region(&file, footer.filter_block_offset, footer.filter_block_size)?;
        let filter = BloomFilter::deserialize(unseal(&filter_region, "filter")?)?;

        let meta_region = read_region(&file, footer.meta_block_offset, footer.meta_block_size)?;
        let meta = SSTableMeta::decode(unseal(&meta_region, "meta")?, file_size)?;

        if meta.entry_count != footer.entry_count {
            return Err(Error::Corruption(format!(
                "{}: footer counts {} entries, meta counts {}",
                path.display(),
                footer.entry_count,
                meta.entry_count
            )));
        }
        let named = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_segment_file_name);
        if named.is_some_and(|g| g != meta.generation) {
            return Err(Error::Corruption(format!(
                "{}: file holds generation {}",
                path.display(),
                meta.generation
            )));
        }

        Ok(SSTable {
            path: path.to_path_buf(),
            file,
            index,
            filter,
            meta,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Cheap pre-check: `false` means `key` is definitely not in this segment.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        key >= self.meta.min_key.as_slice() && key <= self.meta.max_key.as_slice() && self.filter.may_contain(key)
    }

    /// Point lookup. A tombstone comes back as an entry with no value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        if !self.may_contain(key) {
            return Ok(None);
        }
        let Some(handle) = self.index.find(key) else {
            return Ok(None);
        };
        self.read_block(handle)?.get(key)
    }

    pub(crate) fn read_block(&self, handle: &IndexEntry) -> Result<Block> {
        let raw = read_region(&self.file, handle.offset, handle.size)?;
        Block::decode(raw).map_err(|e| match e {
            Error::Corruption(msg) => Error::Corruption(format!(
                "{} block at {}: {msg}",
                self.path.display(),
                handle.offset
            )),
            other => other,
        })
    }

    /// Scan every entry in key order.
    pub fn iter(self: &Arc<Self>) -> Result<SSTableIterator> {
        SSTableIterator::new(Arc::clone(self))
    }

    pub fn index(&self) -> &SparseIndex {
        &self.index
    }

    pub fn meta(&self) -> &SSTableMeta {
        &self.meta
    }

    pub fn generation(&self) -> u64 {
        self.meta.generation
    }

    pub fn level(&self) -> u32 {
        self.meta.level
    }

    pub fn file_size(&self) -> u64 {
        self.meta.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schedule the file for deletion once every handle is gone.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl Drop for SSTable {
    fn drop(&mut self) {
        if self.is_obsolete() {
            match fs::remove_file(&self.path) {
                Ok(()) => tracing::debug!(generation = self.meta.generation, "removed obsolete segment"),
                Err(e) => tracing::warn!(
                    generation = self.meta.generation,
                    error = %e,
                    "failed to remove obsolete segment"
                ),
            }
        }
    }
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("path", &self.path)
            .field("meta", &self.meta)
            .field("blocks", &self.index.len())
            .finish()
    }
}

fn read_region(file: &File, offset: u64, size: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; size as usize];
    read_exact_at(file, &mut buf, offset)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::FilterPolicy;
    use crate::sstable::builder::SSTableBuilder;
    use crate::sstable::segment_path;
    use tempfile::tempdir;

    fn build(dir: &Path, generation: u64, n: u64, block_size: usize) -> Arc<SSTable> {
        let mut builder = SSTableBuilder::new(dir, generation, 0, block_size, FilterPolicy::default()).unwrap();
        for i in 0..n {
            let key = format!("key_{:05}", i * 2);
            let entry = if i % 10 == 9 {
                Entry::tombstone(key.into_bytes(), i + 1)
            } else {
                Entry::put(key.into_bytes(), format!("val_{i}").into_bytes(), i + 1)
            };
            builder.add(&entry).unwrap();
        }
        builder.finish().unwrap();
        Arc::new(SSTable::open(&segment_path(dir, generation)).unwrap())
    }

    #[test]
    fn get_hits_misses_and_tombstones() {
        let dir = tempdir().unwrap();
        let sst = build(dir.path(), 1, 200, 256);
        assert!(sst.index().len() > 1);

        let e = sst.get(b"key_00000").unwrap().unwrap();
        assert_eq!(e.value.as_deref(), Some(&b"val_0"[..]));
        let e = sst.get(b"key_00198").unwrap().unwrap();
        assert_eq!(e.value.as_deref(), Some(&b"val_99"[..]));
        assert!(sst.get(b"key_00018").unwrap().unwrap().is_tombstone());

        // odd keys fall between entries
        assert_eq!(sst.get(b"key_00001").unwrap(), None);
        assert_eq!(sst.get(b"a").unwrap(), None);
        assert_eq!(sst.get(b"z").unwrap(), None);
    }

    #[test]
    fn every_written_key_may_be_contained() {
        let dir = tempdir().unwrap();
        let sst = build(dir.path(), 1, 500, 1024);
        for i in 0..500u64 {
            assert!(sst.may_contain(format!("key_{:05}", i * 2).as_bytes()));
        }
    }

    #[test]
    fn flipped_byte_in_data_block_is_corruption() {
        let dir = tempdir().unwrap();
        build(dir.path(), 1, 50, 4096);
        let path = segment_path(dir.path(), 1);
        let mut bytes = fs::read(&path).unwrap();
        bytes[10] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let sst = SSTable::open(&path).unwrap();
        let err = sst.get(b"key_00000").unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn truncated_file_fails_to_open() {
        let dir = tempdir().unwrap();
        build(dir.path(), 1, 50, 4096);
        let path = segment_path(dir.path(), 1);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
        assert!(SSTable::open(&path).is_err());
    }

    #[test]
    fn obsolete_file_removed_after_last_handle() {
        let dir = tempdir().unwrap();
        let sst = build(dir.path(), 4, 10, 4096);
        let reader = Arc::clone(&sst);
        sst.mark_obsolete();
        drop(sst);
        assert!(segment_path(dir.path(), 4).exists());
        assert!(reader.get(b"key_00000").unwrap().is_some());
        drop(reader);
        assert!(!segment_path(dir.path(), 4).exists());
    }
}
