use crate::error::{Error, Result};

/// Magic number to identify SSTable files.
pub const SSTABLE_MAGIC: u64 = 0x4C534D5F53535401; // "LSM_SST\x01"

/// Metadata about an SSTable file, stored in its meta region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableMeta {
    /// Generation number; also names the file.
    pub generation: u64,
    /// Level this SSTable belongs to (0 = freshly flushed).
    pub level: u32,
    /// Smallest key in the SSTable.
    pub min_key: Vec<u8>,
    /// Largest key in the SSTable.
    pub max_key: Vec<u8>,
    /// Smallest sequence number of any entry.
    pub min_sequence: u64,
    /// Largest sequence number of any entry.
    pub max_sequence: u64,
    /// Number of entries (including tombstones).
    pub entry_count: u64,
    /// File size in bytes. Not stored; filled in from the file on open.
    pub file_size: u64,
}

impl SSTableMeta {
    /// Format:
    /// [generation(8B)][level(4B)][min_key_len(4B)][min_key][max_key_len(4B)][max_key]
    /// [min_seq(8B)][max_seq(8B)][entry_count(8B)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(44 + self.min_key.len() + self.max_key.len());
        buf.extend_from_slice(&self.generation.to_le_bytes());
        buf.extend_from_slice(&self.level.to_le_bytes());
        buf.extend_from_slice(&(self.min_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.min_key);
        buf.extend_from_slice(&(self.max_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.max_key);
        buf.extend_from_slice(&self.min_sequence.to_le_bytes());
        buf.extend_from_slice(&self.max_sequence.to_le_bytes());
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8], file_size: u64) -> Result<Self> {
        let mut cur = Cursor { data, pos: 0 };
        let generation = cur.u64("generation")?;
        let level = cur.u32("level")?;
        let min_len = cur.u32("min_key_len")? as usize;
        let min_key = cur.bytes(min_len, "min_key")?;
        let max_len = cur.u32("max_key_len")? as usize;
        let max_key = cur.bytes(max_len, "max_key")?;
        let min_sequence = cur.u64("min_sequence")?;
        let max_sequence = cur.u64("max_sequence")?;
        let entry_count = cur.u64("entry_count")?;
        if cur.pos != data.len() {
            return Err(Error::corruption("trailing bytes in meta block"));
        }
        Ok(SSTableMeta {
            generation,
            level,
            min_key,
            max_key,
            min_sequence,
            max_sequence,
            entry_count,
            file_size,
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn bytes(&mut self, n: usize, what: &str) -> Result<Vec<u8>> {
        if self.data.len() < self.pos + n {
            return Err(Error::Corruption(format!("meta block too short for {what}")));
        }
        let out = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.bytes(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        let b = self.bytes(8, what)?;
        let mut w = [0u8; 8];
        w.copy_from_slice(&b);
        Ok(u64::from_le_bytes(w))
    }
}

/// The footer sits at the end of the SSTable file.
/// It tells the reader where to find the index, filter and meta regions,
/// so a segment file is self-describing.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Index block offset (8B)              │
/// │ Index block size (8B)                │
/// │ Filter block offset (8B)             │
/// │ Filter block size (8B)               │
/// │ Meta block offset (8B)               │
/// │ Meta block size (8B)                 │
/// │ Entry count (8B)                     │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub index_block_offset: u64,
    pub index_block_size: u64,
    pub filter_block_offset: u64,
    pub filter_block_size: u64,
    pub meta_block_offset: u64,
    pub meta_block_size: u64,
    pub entry_count: u64,
    pub magic: u64,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const SIZE: usize = 8 * 8; // 64 bytes

    /// Encode footer to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        for word in [
            self.index_block_offset,
            self.index_block_size,
            self.filter_block_offset,
            self.filter_block_size,
            self.meta_block_offset,
            self.meta_block_size,
            self.entry_count,
            self.magic,
        ] {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Decode footer from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::corruption("footer too short"));
        }
        let word = |i: usize| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&data[i * 8..i * 8 + 8]);
            u64::from_le_bytes(w)
        };

        let magic = word(7);
        if magic != SSTABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {:#x}, got {:#x}",
                SSTABLE_MAGIC, magic
            )));
        }

        Ok(Footer {
            index_block_offset: word(0),
            index_block_size: word(1),
            filter_block_offset: word(2),
            filter_block_size: word(3),
            meta_block_offset: word(4),
            meta_block_size: word(5),
            entry_count: word(6),
            magic,
        })
    }

    /// Check that every region lies inside the file, before the footer.
    pub fn validate(&self, file_size: u64) -> Result<()> {
        let body_end = file_size.saturating_sub(Self::SIZE as u64);
        for (name, offset, size) in [
            ("index", self.index_block_offset, self.index_block_size),
            ("filter", self.filter_block_offset, self.filter_block_size),
            ("meta", self.meta_block_offset, self.meta_block_size),
        ] {
            let end = offset.checked_add(size);
            if end.is_none_or(|end| end > body_end) {
                return Err(Error::Corruption(format!(
                    "{name} region [{offset}, +{size}) outside file body of {body_end} bytes"
                )));
            }
        }
        Ok(())
    }
}
