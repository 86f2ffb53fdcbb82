pub mod builder;

pub use builder::BloomFilterBuilder;

use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};

/// How a segment's membership filter is sized.
///
/// `bits_per_key` sets the bitset size relative to the expected key count,
/// `num_hashes` the number of probes per key. Both trade filter memory
/// against wasted segment probes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterPolicy {
    pub bits_per_key: f64,
    pub num_hashes: u32,
}

impl FilterPolicy {
    /// Optimal sizing for a target false positive rate:
    ///   bits_per_key = -1.44 * log2(false_positive_rate)
    ///   num_hashes = bits_per_key * ln(2)
    ///
    ///   1% FPR  → ~10 bits/key, 7 hashes
    ///   0.1% FPR → ~14 bits/key, 10 hashes
    ///
    /// # Panics
    /// Panics if FPR is not in (0, 1).
    pub fn from_false_positive_rate(false_positive_rate: f64) -> Self {
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "FPR must be in (0, 1)"
        );
        let bits_per_key = -1.44 * false_positive_rate.log2();
        let num_hashes = ((bits_per_key * 2.0f64.ln()).ceil() as u32).max(1);
        FilterPolicy {
            bits_per_key,
            num_hashes,
        }
    }

    /// Explicit sizing.
    pub fn new(bits_per_key: f64, num_hashes: u32) -> Self {
        FilterPolicy {
            bits_per_key,
            num_hashes: num_hashes.max(1),
        }
    }

    /// Expected false positive rate for this sizing: (1 - e^(-k/b))^k.
    pub fn expected_false_positive_rate(&self) -> f64 {
        let k = self.num_hashes as f64;
        (1.0 - (-k / self.bits_per_key).exp()).powf(k)
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self::from_false_positive_rate(0.01)
    }
}

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any bit is 0 → key is DEFINITELY NOT in the set
/// - If all bits are 1 → key is PROBABLY in the set (false positive possible)
///
/// Used in SSTable reads to skip SSTables that definitely don't contain
/// the target key.
///
/// Hash trick: don't need k independent hash functions.
/// Use double hashing: h_i(key) = h1(key) + i * h2(key) (mod m)
/// where h1, h2 come from splitting a 128-bit hash into two 64-bit halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

impl BloomFilter {
    /// Create a new bloom filter sized for expected_items at the given FPR.
    ///
    /// # Panics
    /// Panics if FPR is not in (0, 1).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        Self::with_policy(
            expected_items,
            FilterPolicy::from_false_positive_rate(false_positive_rate),
        )
    }

    /// Create a filter for `expected_items` keys using an explicit policy.
    pub fn with_policy(expected_items: usize, policy: FilterPolicy) -> Self {
        let num_bits = ((expected_items.max(1) as f64) * policy.bits_per_key).ceil() as u32;
        Self::with_params(num_bits, policy.num_hashes)
    }

    /// Create a filter with an exact bitset size and hash count.
    pub fn with_params(num_bits: u32, num_hashes: u32) -> Self {
        // Ensure at least some bits
        let num_bits = num_bits.max(64);
        let num_hashes = num_hashes.max(1);
        let num_u64s = (num_bits as usize).div_ceil(64);
        Self {
            bits: vec![0u64; num_u64s],
            num_hashes,
            num_bits,
        }
    }

    /// Add a key to the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_key(key);
        self.insert_hashes(h1, h2);
    }

    /// Set the bits for a key already run through `hash_key`.
    pub(crate) fn insert_hashes(&mut self, h1: u64, h2: u64) {
        for i in 0..self.num_hashes {
            let pos = self.get_position(h1, h2, i);
            self.set_bit(pos);
        }
    }

    /// Check if a key MIGHT be in the set.
    /// false → definitely not here. true → probably here.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_key(key);
        (0..self.num_hashes).all(|i| self.check_bit(self.get_position(h1, h2, i)))
    }

    /// Serialize the bloom filter to bytes (for writing into SSTable).
    ///
    /// Format: [num_bits(4B)][num_hashes(4B)][bit words (8B each)...]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.bits.len() * 8);
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        for word in &self.bits {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Deserialize a bloom filter from bytes (when opening an SSTable).
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::corruption("bloom filter too short"));
        }
        let num_bits = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let num_hashes = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if num_bits == 0 || num_hashes == 0 {
            return Err(Error::corruption("bloom filter has zero bits or hashes"));
        }

        let words = (num_bits as usize).div_ceil(64);
        let body = &data[8..];
        if body.len() != words * 8 {
            return Err(Error::Corruption(format!(
                "bloom filter size mismatch: expected {} bytes, got {}",
                words * 8,
                body.len()
            )));
        }
        let bits = body
            .chunks_exact(8)
            .map(|c| {
                let mut w = [0u8; 8];
                w.copy_from_slice(c);
                u64::from_le_bytes(w)
            })
            .collect();

        Ok(Self {
            bits,
            num_hashes,
            num_bits,
        })
    }

    /// Get the number of hash functions used.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Get the total number of bits in the filter.
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Hash a key and return two 64-bit hashes (h1, h2) for double hashing.
    pub(crate) fn hash_key(key: &[u8]) -> (u64, u64) {
        let hash128 = xxh3_128(key);
        let h1 = hash128 as u64;
        let h2 = (hash128 >> 64) as u64;
        (h1, h2)
    }

    /// Calculate bit position using double hashing.
    fn get_position(&self, h1: u64, h2: u64, i: u32) -> u32 {
        // h_i = (h1 + i * h2) mod num_bits
        let pos = h1.wrapping_add((i as u64).wrapping_mul(h2)) % (self.num_bits as u64);
        pos as u32
    }

    fn set_bit(&mut self, pos: u32) {
        self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
    }

    fn check_bit(&self, pos: u32) -> bool {
        (self.bits[(pos / 64) as usize] >> (pos % 64)) & 1 == 1
    }
}
