use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::bloom::FilterPolicy;
use crate::bloom::builder::BloomFilterBuilder;
use crate::error::{Error, Result};
use crate::sstable::block::BlockBuilder;
use crate::sstable::footer::{Footer, SSTABLE_MAGIC, SSTableMeta};
use crate::sstable::index::{IndexEntry, SparseIndex};
use crate::sstable::{seal, segment_path, sync_dir, tmp_path};
use crate::types::Entry;

/// Builds an SSTable file from a sorted stream of entries.
///
/// Used during:
/// - Memtable flush (sorted memtable → SSTable)
/// - Compaction (merged iterators → new SSTables)
///
/// Build process:
/// 1. Add entries one by one (strictly ascending keys)
/// 2. Entries fill up blocks; when a block is full it's written out and
///    its first key goes into the sparse index
/// 3. finish() flushes the last block, writes filter, index, meta and
///    footer, fsyncs, and renames the temporary file into place
///
/// Dropping an unfinished builder removes the temporary file.
pub struct SSTableBuilder {
    dir: PathBuf,
    generation: u64,
    level: u32,
    /// Current block being filled with entries.
    block_builder: BlockBuilder,
    /// First key of the current block.
    block_first_key: Option<Vec<u8>>,
    index: SparseIndex,
    filter: BloomFilterBuilder,
    /// Tracks current write position in the file.
    offset: u64,
    writer: Option<BufWriter<File>>,
    block_size: usize,
    min_key: Option<Vec<u8>>,
    /// Last key added; used for the ordering check and as max_key.
    last_key: Option<Vec<u8>>,
    min_sequence: u64,
    max_sequence: u64,
    entry_count: u64,
    /// Set once the file is renamed to its final name.
    finished: bool,
}

impl SSTableBuilder {
    /// Start writing segment `generation` into `dir`.
    pub fn new(dir: &Path, generation: u64, level: u32, block_size: usize, policy: FilterPolicy) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp_path(dir, generation))?;
        Ok(SSTableBuilder {
            dir: dir.to_path_buf(),
            generation,
            level,
            block_builder: BlockBuilder::new(block_size),
            block_first_key: None,
            index: SparseIndex::new(),
            filter: BloomFilterBuilder::new(policy),
            offset: 0,
            writer: Some(BufWriter::new(file)),
            block_size,
            min_key: None,
            last_key: None,
            min_sequence: u64::MAX,
            max_sequence: 0,
            entry_count: 0,
            finished: false,
        })
    }

    /// Add an entry. Keys MUST be strictly ascending: one entry per key.
    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        if let Some(last) = &self.last_key {
            if entry.key.as_slice() <= last.as_slice() {
                return Err(Error::Corruption(format!(
                    "segment {} keys out of order: {:?} after {:?}",
                    self.generation, entry.key, last
                )));
            }
        }

        if !self.block_builder.add(entry) {
            self.flush_block()?;
            // A fresh block always accepts its first entry.
            self.block_builder.add(entry);
        }
        if self.block_first_key.is_none() {
            self.block_first_key = Some(entry.key.clone());
        }

        self.filter.add_key(&entry.key);
        if self.min_key.is_none() {
            self.min_key = Some(entry.key.clone());
        }
        self.last_key = Some(entry.key.clone());
        self.min_sequence = self.min_sequence.min(entry.sequence);
        self.max_sequence = self.max_sequence.max(entry.sequence);
        self.entry_count += 1;
        Ok(())
    }

    /// Bytes written so far plus the pending block.
    pub fn estimated_size(&self) -> u64 {
        self.offset + self.block_builder.estimated_size() as u64
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Write the current block to disk and record an index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.block_builder.is_empty() {
            return Ok(());
        }
        let old_builder = std::mem::replace(&mut self.block_builder, BlockBuilder::new(self.block_size));
        let block = old_builder.build();
        let first_key = self
            .block_first_key
            .take()
            .ok_or_else(|| Error::corruption("non-empty block without a first key"))?;

        self.write(&block)?;
        self.index.push(IndexEntry {
            first_key,
            offset: self.offset,
            size: block.len() as u64,
        });
        self.offset += block.len() as u64;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::corruption("segment builder already finished"))?;
        writer.write_all(bytes)?;
        Ok(())
    }

    /// Finalize the SSTable and publish it under its final name.
    pub fn finish(mut self) -> Result<SSTableMeta> {
        if self.entry_count == 0 {
            return Err(Error::Corruption(format!(
                "segment {} has no entries",
                self.generation
            )));
        }
        self.flush_block()?;

        let filter = std::mem::replace(&mut self.filter, BloomFilterBuilder::new(FilterPolicy::default()));
        let filter = seal(filter.build().serialize());
        let filter_offset = self.offset;
        self.write(&filter)?;
        self.offset += filter.len() as u64;

        let index = seal(self.index.encode());
        let index_offset = self.offset;
        self.write(&index)?;
        self.offset += index.len() as u64;

        let mut meta = SSTableMeta {
            generation: self.generation,
            level: self.level,
            min_key: self.min_key.take().unwrap_or_default(),
            max_key: self.last_key.take().unwrap_or_default(),
            min_sequence: self.min_sequence,
            max_sequence: self.max_sequence,
            entry_count: self.entry_count,
            file_size: 0,
        };
        let meta_region = seal(meta.encode());
        let meta_offset = self.offset;
        self.write(&meta_region)?;
        self.offset += meta_region.len() as u64;

        let footer = Footer {
            index_block_offset: index_offset,
            index_block_size: index.len() as u64,
            filter_block_offset: filter_offset,
            filter_block_size: filter.len() as u64,
            meta_block_offset: meta_offset,
            meta_block_size: meta_region.len() as u64,
            entry_count: self.entry_count,
            magic: SSTABLE_MAGIC,
        };
        self.write(&footer.encode())?;
        self.offset += Footer::SIZE as u64;

        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::corruption("segment builder already finished"))?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(tmp_path(&self.dir, self.generation), segment_path(&self.dir, self.generation))?;
        self.finished = true;
        sync_dir(&self.dir)?;

        meta.file_size = self.offset;
        tracing::debug!(
            generation = meta.generation,
            level = meta.level,
            entries = meta.entry_count,
            bytes = meta.file_size,
            "segment written"
        );
        Ok(meta)
    }
}

impl Drop for SSTableBuilder {
    fn drop(&mut self) {
        if !self.finished {
            self.writer.take();
            let _ = fs::remove_file(tmp_path(&self.dir, self.generation));
        }
    }
}
