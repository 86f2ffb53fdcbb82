//! Engine configuration.

use crate::bloom::FilterPolicy;
use crate::error::{Error, Result};

/// Tunables for opening a [`DB`](crate::DB).
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Target size of a data block; one sparse-index entry per block.
    pub block_size: usize,

    /// Memtable size at which a flush is triggered.
    pub max_memtable_size: usize,

    /// Absolute memtable limit while flushes are failing. Writes beyond
    /// it fail with `MemtableFull`.
    pub memtable_hard_cap: usize,

    /// Membership filter sizing for new segments.
    pub filter_policy: FilterPolicy,

    /// A level holding more than this many segments gets compacted.
    pub compaction_fan_in: usize,

    /// Number of levels; the last one compacts into itself.
    pub max_levels: u32,

    /// Compaction output is split into segments of roughly this size.
    pub target_segment_size: u64,

    /// Run compaction on a background thread after each flush. When
    /// disabled, compaction only happens through `DB::compact`.
    pub background_compaction: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            block_size: 10 * 1024,              // 10 KiB
            max_memtable_size: 16 * 1024,       // 16 KiB
            memtable_hard_cap: 4 * 16 * 1024,   // 64 KiB
            filter_policy: FilterPolicy::default(),
            compaction_fan_in: 5,
            max_levels: 4,
            target_segment_size: 2 * 1024 * 1024, // 2 MiB
            background_compaction: true,
        }
    }
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    #[must_use]
    pub const fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the flush threshold. The hard cap follows at four times the
    /// threshold unless set explicitly afterwards.
    #[must_use]
    pub const fn max_memtable_size(mut self, size: usize) -> Self {
        self.max_memtable_size = size;
        self.memtable_hard_cap = size.saturating_mul(4);
        self
    }

    #[must_use]
    pub const fn memtable_hard_cap(mut self, size: usize) -> Self {
        self.memtable_hard_cap = size;
        self
    }

    #[must_use]
    pub const fn filter_policy(mut self, policy: FilterPolicy) -> Self {
        self.filter_policy = policy;
        self
    }

    /// Sets the filter policy from a target false positive rate.
    /// Out-of-range rates are reported by `validate`.
    #[must_use]
    pub fn false_positive_rate(mut self, rate: f64) -> Self {
        if rate > 0.0 && rate < 1.0 {
            self.filter_policy = FilterPolicy::from_false_positive_rate(rate);
        } else {
            self.filter_policy = FilterPolicy {
                bits_per_key: 0.0,
                num_hashes: 0,
            };
        }
        self
    }

    #[must_use]
    pub const fn compaction_fan_in(mut self, fan_in: usize) -> Self {
        self.compaction_fan_in = fan_in;
        self
    }

    #[must_use]
    pub const fn max_levels(mut self, levels: u32) -> Self {
        self.max_levels = levels;
        self
    }

    #[must_use]
    pub const fn target_segment_size(mut self, size: u64) -> Self {
        self.target_segment_size = size;
        self
    }

    #[must_use]
    pub const fn background_compaction(mut self, value: bool) -> Self {
        self.background_compaction = value;
        self
    }

    /// Reject settings the engine can't run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidOptions(msg));
        if self.block_size == 0 {
            return invalid("block_size must be positive".into());
        }
        if self.max_memtable_size == 0 {
            return invalid("max_memtable_size must be positive".into());
        }
        if self.memtable_hard_cap < self.max_memtable_size {
            return invalid(format!(
                "memtable_hard_cap ({}) is below max_memtable_size ({})",
                self.memtable_hard_cap, self.max_memtable_size
            ));
        }
        let bits = self.filter_policy.bits_per_key;
        if !(bits.is_finite() && bits > 0.0) || self.filter_policy.num_hashes == 0 {
            return invalid(format!("unusable filter policy {:?}", self.filter_policy));
        }
        if self.compaction_fan_in < 2 {
            return invalid("compaction_fan_in must be at least 2".into());
        }
        if self.max_levels == 0 {
            return invalid("max_levels must be at least 1".into());
        }
        if self.target_segment_size == 0 {
            return invalid("target_segment_size must be positive".into());
        }
        Ok(())
    }
}
