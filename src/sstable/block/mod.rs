pub mod builder;

pub use builder::BlockBuilder;

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::types::{ENTRY_HEADER_SIZE, Entry, ValueType};

/// num_entries(4B) + crc32(4B)
pub const TRAILER_SIZE: usize = 8;

pub(crate) fn encode_entry(buf: &mut Vec<u8>, entry: &Entry) {
    let value: &[u8] = entry.value.as_deref().unwrap_or_default();
    buf.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(&entry.sequence.to_le_bytes());
    buf.push(entry.value_type() as u8);
    buf.extend_from_slice(&entry.key);
    buf.extend_from_slice(value);
}

/// Borrowed view of one encoded entry.
struct RawEntry<'a> {
    key: &'a [u8],
    value: &'a [u8],
    sequence: u64,
    value_type: ValueType,
}

impl RawEntry<'_> {
    fn to_entry(&self) -> Entry {
        match self.value_type {
            ValueType::Put => Entry::put(self.key.to_vec(), self.value.to_vec(), self.sequence),
            ValueType::Delete => Entry::tombstone(self.key.to_vec(), self.sequence),
        }
    }
}

/// A decoded, checksum-verified data block.
pub struct Block {
    /// Entry region only (trailer stripped).
    data: Vec<u8>,
    count: u32,
}

impl Block {
    /// Verify the trailer checksum and strip it.
    pub fn decode(mut raw: Vec<u8>) -> Result<Self> {
        if raw.len() < TRAILER_SIZE {
            return Err(Error::corruption("block too short"));
        }
        let crc_at = raw.len() - 4;
        let stored = u32::from_le_bytes([raw[crc_at], raw[crc_at + 1], raw[crc_at + 2], raw[crc_at + 3]]);
        if crc32fast::hash(&raw[..crc_at]) != stored {
            return Err(Error::corruption("block CRC mismatch"));
        }
        let count_at = raw.len() - TRAILER_SIZE;
        let count = u32::from_le_bytes([
            raw[count_at],
            raw[count_at + 1],
            raw[count_at + 2],
            raw[count_at + 3],
        ]);
        raw.truncate(count_at);
        Ok(Block { data: raw, count })
    }

    /// Number of entries in the block.
    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Linear scan for `key`. Entries are sorted, so the scan stops as soon
    /// as it passes where `key` would be.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let mut pos = 0;
        for _ in 0..self.count {
            let (raw, next) = self.parse_at(pos)?;
            match raw.key.cmp(key) {
                Ordering::Less => pos = next,
                Ordering::Equal => return Ok(Some(raw.to_entry())),
                Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Decode every entry in order.
    pub fn entries(&self) -> Result<Vec<Entry>> {
        let mut out = Vec::with_capacity(self.count as usize);
        let mut pos = 0;
        for _ in 0..self.count {
            let (raw, next) = self.parse_at(pos)?;
            out.push(raw.to_entry());
            pos = next;
        }
        if pos != self.data.len() {
            return Err(Error::corruption("trailing bytes after last block entry"));
        }
        Ok(out)
    }

    fn parse_at(&self, pos: usize) -> Result<(RawEntry<'_>, usize)> {
        let data = &self.data;
        if pos + ENTRY_HEADER_SIZE > data.len() {
            return Err(Error::corruption("block entry header truncated"));
        }
        let key_len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let val_len = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]) as usize;
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&data[pos + 8..pos + 16]);
        let value_type = ValueType::from_u8(data[pos + 16])
            .ok_or_else(|| Error::Corruption(format!("invalid value type {}", data[pos + 16])))?;

        let key_at = pos + ENTRY_HEADER_SIZE;
        let end = key_at + key_len + val_len;
        if end > data.len() {
            return Err(Error::corruption("block entry body truncated"));
        }
        let raw = RawEntry {
            key: &data[key_at..key_at + key_len],
            value: &data[key_at + key_len..end],
            sequence: u64::from_le_bytes(seq),
            value_type,
        };
        Ok((raw, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(entries: &[Entry], block_size: usize) -> Vec<u8> {
        let mut b = BlockBuilder::new(block_size);
        for e in entries {
            assert!(b.add(e));
        }
        b.build()
    }

    #[test]
    fn get_finds_values_and_tombstones() {
        let entries = vec![
            Entry::put(b"apple".to_vec(), b"red".to_vec(), 3),
            Entry::tombstone(b"banana".to_vec(), 4),
            Entry::put(b"cherry".to_vec(), b"dark".to_vec(), 1),
        ];
        let block = Block::decode(build(&entries, 4096)).unwrap();

        assert_eq!(block.len(), 3);
        assert_eq!(block.get(b"apple").unwrap(), Some(entries[0].clone()));
        assert!(block.get(b"banana").unwrap().unwrap().is_tombstone());
        assert_eq!(block.get(b"blueberry").unwrap(), None);
        assert_eq!(block.get(b"zucchini").unwrap(), None);
        assert_eq!(block.entries().unwrap(), entries);
    }

    #[test]
    fn first_entry_always_fits() {
        let mut b = BlockBuilder::new(8);
        let big = Entry::put(b"k".to_vec(), vec![0u8; 100], 1);
        assert!(b.add(&big));
        assert!(!b.add(&Entry::put(b"l".to_vec(), b"v".to_vec(), 2)));
    }

    #[test]
    fn corrupted_block_rejected() {
        let mut raw = build(&[Entry::put(b"k".to_vec(), b"v".to_vec(), 1)], 4096);
        raw[2] ^= 0xFF;
        assert!(Block::decode(raw).is_err());
    }
}
