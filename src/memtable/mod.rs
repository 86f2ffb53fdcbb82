pub mod avl;

use parking_lot::RwLock;

use crate::iterator::VecIterator;
use crate::types::{ENTRY_HEADER_SIZE, Entry, Key, Value};
use avl::AvlTree;

/// What the tree stores per key: the latest value (or tombstone) and its sequence.
#[derive(Debug, Clone)]
struct Slot {
    value: Option<Value>,
    sequence: u64,
}

struct Inner {
    tree: AvlTree<Key, Slot>,
    size: usize,
}

/// In-memory sorted buffer for writes. Wraps an AVL tree.
///
/// Every write goes here first. When size reaches the threshold, the engine
/// freezes the memtable (swaps in a fresh one) and flushes it to an SSTable.
///
/// Deletes are handled via tombstones: you can't just remove the key
/// because older versions may exist in SSTables on disk. `get` therefore
/// returns the entry itself so callers can tell "deleted here" apart from
/// "never seen here".
///
/// The tree sits behind a lock so a frozen memtable can keep serving reads
/// through an `Arc` while the flush iterates it. Only the engine's write path
/// mutates the active memtable.
pub struct MemTable {
    inner: RwLock<Inner>,
    size_limit: usize,
}

impl MemTable {
    /// Create a new empty memtable with given size limit.
    pub fn new(size_limit: usize) -> Self {
        MemTable {
            inner: RwLock::new(Inner {
                tree: AvlTree::new(),
                size: 0,
            }),
            size_limit,
        }
    }

    /// Insert or update a key-value pair.
    pub fn insert(&self, key: Key, value: Value, sequence: u64) {
        self.apply(Entry::put(key, value, sequence));
    }

    /// Mark a key as deleted by writing a tombstone.
    pub fn delete(&self, key: Key, sequence: u64) {
        self.apply(Entry::tombstone(key, sequence));
    }

    /// Record an entry, replacing whatever was stored for its key.
    /// Last write wins regardless of sequence: callers apply in commit order.
    pub fn apply(&self, entry: Entry) {
        let added = entry.encoded_size();
        let key_len = entry.key.len();
        let slot = Slot {
            value: entry.value,
            sequence: entry.sequence,
        };

        let mut inner = self.inner.write();
        let replaced = inner.tree.insert(entry.key, slot);
        inner.size += added;
        if let Some(old) = replaced {
            let old_size = ENTRY_HEADER_SIZE + key_len + old.value.map_or(0, |v| v.len());
            debug_assert!(inner.size >= old_size);
            inner.size -= old_size;
        }
    }

    /// Look up a key. `Some` with a tombstone means "deleted"; the caller must
    /// not fall through to older storage in that case.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        let inner = self.inner.read();
        inner.tree.get(key).map(|slot| Entry {
            key: key.to_vec(),
            value: slot.value.clone(),
            sequence: slot.sequence,
        })
    }

    /// Whether any entry (value or tombstone) exists for `key`.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.inner.read().tree.get(key).is_some()
    }

    /// Serialized size of all buffered entries in bytes.
    pub fn size_bytes(&self) -> usize {
        self.inner.read().size
    }

    /// Check if memtable has reached the flush threshold.
    pub fn is_above_threshold(&self) -> bool {
        self.size_bytes() >= self.size_limit
    }

    /// Size after writing `value_len` bytes under `key`. An overwrite
    /// counts only the difference from the entry it replaces.
    pub fn size_after(&self, key: &[u8], value_len: usize) -> usize {
        let inner = self.inner.read();
        let added = ENTRY_HEADER_SIZE + key.len() + value_len;
        let replaced = inner
            .tree
            .get(key)
            .map_or(0, |old| ENTRY_HEADER_SIZE + key.len() + old.value.as_ref().map_or(0, Vec::len));
        inner.size + added - replaced
    }

    pub fn len(&self) -> usize {
        self.inner.read().tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().tree.is_empty()
    }

    /// Largest sequence number buffered, or 0 when empty.
    pub fn max_sequence(&self) -> u64 {
        let inner = self.inner.read();
        inner
            .tree
            .iter()
            .map(|(_, slot)| slot.sequence)
            .max()
            .unwrap_or(0)
    }

    /// Sorted snapshot of every entry, tombstones included.
    ///
    /// Taken under the read lock, so the snapshot never observes a
    /// half-applied write.
    pub fn iter_sorted(&self) -> VecIterator {
        let inner = self.inner.read();
        let entries = inner
            .tree
            .iter()
            .map(|(key, slot)| Entry {
                key: key.clone(),
                value: slot.value.clone(),
                sequence: slot.sequence,
            })
            .collect();
        VecIterator::new(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacing_entry_adjusts_size() {
        let mt = MemTable::new(1024);
        mt.insert(b"key".to_vec(), b"12345".to_vec(), 1);
        assert_eq!(mt.size_bytes(), ENTRY_HEADER_SIZE + 3 + 5);

        mt.insert(b"key".to_vec(), b"1".to_vec(), 2);
        assert_eq!(mt.size_bytes(), ENTRY_HEADER_SIZE + 3 + 1);

        mt.delete(b"key".to_vec(), 3);
        assert_eq!(mt.size_bytes(), ENTRY_HEADER_SIZE + 3);
        assert_eq!(mt.len(), 1);
    }

    #[test]
    fn size_after_counts_overwrite_as_delta() {
        let mt = MemTable::new(1024);
        mt.insert(b"a".to_vec(), b"1234".to_vec(), 1);
        let before = mt.size_bytes();
        assert_eq!(mt.size_after(b"a", 4), before);
        assert_eq!(mt.size_after(b"a", 0), before - 4);
        assert_eq!(mt.size_after(b"b", 4), before * 2);
    }

    #[test]
    fn tombstone_is_distinguishable_from_absent() {
        let mt = MemTable::new(1024);
        mt.delete(b"gone".to_vec(), 7);

        let entry = mt.get(b"gone").expect("tombstone present");
        assert!(entry.is_tombstone());
        assert_eq!(entry.sequence, 7);
        assert!(mt.get(b"never").is_none());
    }
}
