use crate::error::{Error, Result};
use crate::types::Entry;

/// Kind of mutation a WAL record describes.
///
/// INSERT and UPDATE replay identically; the distinction records whether the
/// key was already buffered when the write was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert = 0x01,
    Update = 0x02,
    Delete = 0x03,
}

impl Operation {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Operation::Insert),
            0x02 => Ok(Operation::Update),
            0x03 => Ok(Operation::Delete),
            _ => Err(Error::Corruption(format!("invalid WAL operation: {}", byte))),
        }
    }
}

/// A single record in the WAL.
///
/// On-disk format:
/// ```text
/// ┌─────────┬─────────┬────────────┬──────────┬────────┬────────────┬───────────┬───────────┐
/// │ CRC (4B)│ Len (4B)│ Offset (8B)│ Seq (8B) │ Op (1B)│ Key Len(4B)│ Key (var) │ Val (var) │
/// └─────────┴─────────┴────────────┴──────────┴────────┴────────────┴───────────┴───────────┘
/// ```
///
/// CRC covers everything after the CRC field itself. `Offset` is the byte
/// position the record was written at; a record whose stored offset does not
/// match where it was found is treated like a CRC failure.
/// A delete carries an empty value; the operation itself is the tombstone marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WALRecord {
    pub offset: u64,
    pub sequence: u64,
    pub operation: Operation,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

// Header sizes
const CRC_SIZE: usize = 4;
const LEN_SIZE: usize = 4;
const OFFSET_SIZE: usize = 8;
const SEQ_SIZE: usize = 8;
const OP_SIZE: usize = 1;
const KEY_LEN_SIZE: usize = 4;
pub const HEADER_SIZE: usize = CRC_SIZE + LEN_SIZE + OFFSET_SIZE + SEQ_SIZE + OP_SIZE + KEY_LEN_SIZE;

impl WALRecord {
    pub fn new(offset: u64, sequence: u64, operation: Operation, key: Vec<u8>, value: Vec<u8>) -> Self {
        WALRecord {
            offset,
            sequence,
            operation,
            key,
            value,
        }
    }

    /// Serialize this record to bytes (including CRC header).
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = OFFSET_SIZE + SEQ_SIZE + OP_SIZE + KEY_LEN_SIZE + self.key.len() + self.value.len();
        let mut buf = Vec::with_capacity(CRC_SIZE + LEN_SIZE + payload_len);

        // Reserve space for CRC (filled at the end)
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.extend_from_slice(&(payload_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.push(self.operation as u8);
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[0..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserialize a record from bytes. Returns error if CRC doesn't match.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corruption("record too short".into()));
        }

        let stored_crc = read_u32(data, 0);
        let payload_len = read_u32(data, CRC_SIZE) as usize;

        let total_len = CRC_SIZE + LEN_SIZE + payload_len;
        if payload_len < HEADER_SIZE - CRC_SIZE - LEN_SIZE || data.len() < total_len {
            return Err(Error::Corruption("record truncated".into()));
        }

        let computed_crc = crc32fast::hash(&data[CRC_SIZE..total_len]);
        if stored_crc != computed_crc {
            return Err(Error::Corruption("CRC mismatch".into()));
        }

        let mut pos = CRC_SIZE + LEN_SIZE;
        let offset = read_u64(data, pos);
        pos += OFFSET_SIZE;
        let sequence = read_u64(data, pos);
        pos += SEQ_SIZE;
        let operation = Operation::from_u8(data[pos])?;
        pos += OP_SIZE;
        let key_len = read_u32(data, pos) as usize;
        pos += KEY_LEN_SIZE;

        if pos + key_len > total_len {
            return Err(Error::Corruption("key length exceeds record".into()));
        }
        let key = data[pos..pos + key_len].to_vec();
        pos += key_len;

        // Value is the rest of the record
        let value = data[pos..total_len].to_vec();

        Ok(WALRecord {
            offset,
            sequence,
            operation,
            key,
            value,
        })
    }

    /// Size of this record when serialized on disk.
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.len()
    }

    /// The memtable entry this record replays to.
    pub fn into_entry(self) -> Entry {
        match self.operation {
            Operation::Insert | Operation::Update => Entry::put(self.key, self.value, self.sequence),
            Operation::Delete => Entry::tombstone(self.key, self.sequence),
        }
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(b)
}
