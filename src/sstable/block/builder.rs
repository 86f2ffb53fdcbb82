use crate::sstable::block::{TRAILER_SIZE, encode_entry};
use crate::types::Entry;

/// Accumulates sorted entries and serializes them into a data block.
///
/// The target size is the sparse-index granularity: one index entry per
/// block, so a bigger block means a smaller index and a longer scan per lookup.
///
/// On-disk layout of a block:
/// ```text
/// ┌──────────────────────────────────────────────────────────────────────┐
/// │ Entry 0: [key_len(4B)][val_len(4B)][seq(8B)][type(1B)][key][value]   │
/// │ Entry 1: ...                                                         │
/// │ Entry N: ...                                                         │
/// ├──────────────────────────────────────────────────────────────────────┤
/// │ Num entries (4B)                                                     │
/// │ CRC32 of everything above (4B)                                       │
/// └──────────────────────────────────────────────────────────────────────┘
/// ```
///
/// No offset array: lookups land on a block through the sparse index and
/// scan it front to back.
pub struct BlockBuilder {
    data: Vec<u8>,
    count: u32,
    block_size: usize,
}

impl BlockBuilder {
    /// Create a new block builder with target block size.
    pub fn new(block_size: usize) -> Self {
        BlockBuilder {
            data: Vec::new(),
            count: 0,
            block_size,
        }
    }

    /// Add an entry to the block.
    /// Returns false if the block is full (entry doesn't fit).
    /// First entry is always accepted even if it exceeds block_size.
    /// Entries MUST be added in sorted key order.
    pub fn add(&mut self, entry: &Entry) -> bool {
        if self.count > 0 && self.estimated_size() + entry.encoded_size() > self.block_size {
            return false;
        }
        encode_entry(&mut self.data, entry);
        self.count += 1;
        true
    }

    /// Finalize the block: append entry count and checksum.
    pub fn build(self) -> Vec<u8> {
        let mut block = self.data;
        block.extend_from_slice(&self.count.to_le_bytes());
        let crc = crc32fast::hash(&block);
        block.extend_from_slice(&crc.to_le_bytes());
        block
    }

    /// Current estimated size of the block (data + trailer).
    pub fn estimated_size(&self) -> usize {
        self.data.len() + TRAILER_SIZE
    }

    /// Whether the block is empty (no entries added).
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }
}
