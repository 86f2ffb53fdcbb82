use std::cmp::Ordering;

/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// Distinguishes puts from deletes in the storage engine.
/// A Delete writes a tombstone. The key isn't removed, it's marked as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A normal put operation.
    Put = 0x01,
    /// A delete (tombstone marker).
    Delete = 0x02,
}

impl ValueType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(ValueType::Put),
            0x02 => Some(ValueType::Delete),
            _ => None,
        }
    }
}

/// Fixed per-entry overhead in the serialized form:
/// key_len(4) + value_len(4) + sequence(8) + value_type(1).
pub const ENTRY_HEADER_SIZE: usize = 4 + 4 + 8 + 1;

/// One versioned mutation: a key, its value (or a tombstone) and the
/// sequence number that orders it against every other mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    /// `None` is a tombstone.
    pub value: Option<Value>,
    pub sequence: u64,
}

impl Entry {
    pub fn put(key: Key, value: Value, sequence: u64) -> Self {
        Entry {
            key,
            value: Some(value),
            sequence,
        }
    }

    pub fn tombstone(key: Key, sequence: u64) -> Self {
        Entry {
            key,
            value: None,
            sequence,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn value_type(&self) -> ValueType {
        match self.value {
            Some(_) => ValueType::Put,
            None => ValueType::Delete,
        }
    }

    /// Bytes this entry occupies when serialized into a data block.
    /// The memtable charges the same amount against its flush threshold.
    pub fn encoded_size(&self) -> usize {
        ENTRY_HEADER_SIZE + self.key.len() + self.value.as_ref().map_or(0, Vec::len)
    }

    /// The key under which this entry is ordered during merges.
    pub fn internal_key(&self) -> InternalKey {
        InternalKey {
            user_key: self.key.clone(),
            sequence: self.sequence,
            value_type: self.value_type(),
        }
    }
}

/// Internal key format: user key + sequence number + value type.
///
/// Ordering: (user_key ASC, sequence DESC).
/// This ensures the newest version of a key always comes first during merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Key,
    pub sequence: u64,
    pub value_type: ValueType,
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
