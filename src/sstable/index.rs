use crate::error::{Error, Result};

/// One sparse-index entry: where a data block starts and the first key in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// First (smallest) key in the block.
    pub first_key: Vec<u8>,
    /// Byte offset of the block in the file.
    pub offset: u64,
    /// Size of the block in bytes, trailer included.
    pub size: u64,
}

impl IndexEntry {
    /// Encode this index entry to bytes.
    /// Format: [key_len(4B)][key][offset(8B)][size(8B)]
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.first_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.first_key);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
    }

    /// Decode an index entry from bytes, returning (entry, bytes_consumed).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(Error::corruption("index entry too short"));
        }
        let key_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let total = 4 + key_len + 16;
        if data.len() < total {
            return Err(Error::corruption("index entry truncated"));
        }
        let first_key = data[4..4 + key_len].to_vec();
        let mut word = [0u8; 8];
        word.copy_from_slice(&data[4 + key_len..12 + key_len]);
        let offset = u64::from_le_bytes(word);
        word.copy_from_slice(&data[12 + key_len..20 + key_len]);
        let size = u64::from_le_bytes(word);
        Ok((
            IndexEntry {
                first_key,
                offset,
                size,
            },
            total,
        ))
    }
}

/// Coarse key → offset map with one entry per data block.
///
/// Granularity trades index memory for scan cost: the whole index stays in
/// memory, and every lookup scans at most one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseIndex {
    entries: Vec<IndexEntry>,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block. Blocks arrive in file order, so first keys ascend.
    pub fn push(&mut self, entry: IndexEntry) {
        debug_assert!(
            self.entries
                .last()
                .is_none_or(|last| last.first_key < entry.first_key)
        );
        self.entries.push(entry);
    }

    /// The block that could hold `key`: the last entry whose first key is
    /// ≤ `key`. `None` means `key` sorts before every block.
    pub fn find(&self, key: &[u8]) -> Option<&IndexEntry> {
        let idx = self.entries.partition_point(|e| e.first_key.as_slice() <= key);
        idx.checked_sub(1).map(|i| &self.entries[i])
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            entry.encode(&mut buf);
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("index block too short"));
        }
        let count = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let mut entries = Vec::with_capacity(count.min(data.len() / 20));
        let mut offset = 4;
        for _ in 0..count {
            let (entry, consumed) = IndexEntry::decode(&data[offset..])?;
            entries.push(entry);
            offset += consumed;
        }
        if offset != data.len() {
            return Err(Error::corruption("trailing bytes after index entries"));
        }
        Ok(SparseIndex { entries })
    }
}
