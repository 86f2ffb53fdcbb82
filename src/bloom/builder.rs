use crate::bloom::{BloomFilter, FilterPolicy};

/// Collects key hashes while an SSTable is being written and sizes the
/// filter once the final key count is known.
///
/// Usage during SSTable build:
/// 1. Create BloomFilterBuilder with the segment's filter policy
/// 2. Call add_key() for every key written to the SSTable
/// 3. Call build() to get the final BloomFilter for serialization
///
/// Only the 128-bit hash of each key is buffered: a compaction output does
/// not know its key count up front, so the bitset can't be sized earlier.
pub struct BloomFilterBuilder {
    hashes: Vec<(u64, u64)>,
    policy: FilterPolicy,
}

impl BloomFilterBuilder {
    pub fn new(policy: FilterPolicy) -> Self {
        BloomFilterBuilder {
            hashes: Vec::new(),
            policy,
        }
    }

    /// Add a key to the bloom filter being built.
    pub fn add_key(&mut self, key: &[u8]) {
        self.hashes.push(BloomFilter::hash_key(key));
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Finalize and return the bloom filter.
    pub fn build(self) -> BloomFilter {
        let mut filter = BloomFilter::with_policy(self.hashes.len(), self.policy);
        for (h1, h2) in self.hashes {
            filter.insert_hashes(h1, h2);
        }
        filter
    }
}
