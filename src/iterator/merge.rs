use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{Entry, InternalKey};

/// Heap slot: the head of one source.
struct HeapItem {
    key: InternalKey,
    source: usize,
}

impl Ord for HeapItem {
    /// Reversed so the max-heap pops the smallest internal key first
    /// (smallest user key, highest sequence), then the lowest source index.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for compaction and for draining everything the engine holds.
/// Sources are ordered by priority: index 0 = newest. A key present in
/// several sources is yielded once, as the version with the highest
/// sequence number; the source index only breaks exact sequence ties.
pub struct MergeIterator {
    iters: Vec<Box<dyn StorageIterator>>,
    heap: BinaryHeap<HeapItem>,
    current: Option<Entry>,
    drop_tombstones: bool,
}

impl MergeIterator {
    pub fn new(iters: Vec<Box<dyn StorageIterator>>) -> Result<Self> {
        Self::build(iters, false)
    }

    /// Like [`MergeIterator::new`], but winning tombstones are consumed
    /// instead of yielded. Only valid when no older data for these keys
    /// exists outside the merged sources.
    pub fn dropping_tombstones(iters: Vec<Box<dyn StorageIterator>>) -> Result<Self> {
        Self::build(iters, true)
    }

    fn build(iters: Vec<Box<dyn StorageIterator>>, drop_tombstones: bool) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(iters.len());
        for (source, iter) in iters.iter().enumerate() {
            if iter.is_valid() {
                heap.push(head_of(iter.as_ref(), source));
            }
        }
        let mut merged = MergeIterator {
            iters,
            heap,
            current: None,
            drop_tombstones,
        };
        merged.advance()?;
        Ok(merged)
    }

    /// Step `source` forward and put its new head back in the heap.
    fn step(&mut self, source: usize) -> Result<()> {
        let iter = &mut self.iters[source];
        iter.next()?;
        if iter.is_valid() {
            self.heap.push(head_of(iter.as_ref(), source));
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        while let Some(top) = self.heap.pop() {
            let winner = self.iters[top.source].entry().clone();
            self.step(top.source)?;

            // Shadowed versions of the same key from other sources.
            while self.heap.peek().is_some_and(|next| next.key.user_key == winner.key) {
                if let Some(item) = self.heap.pop() {
                    self.step(item.source)?;
                }
            }

            if self.drop_tombstones && winner.is_tombstone() {
                continue;
            }
            self.current = Some(winner);
            return Ok(());
        }
        self.current = None;
        Ok(())
    }
}

fn head_of(iter: &dyn StorageIterator, source: usize) -> HeapItem {
    HeapItem {
        key: iter.entry().internal_key(),
        source,
    }
}

impl StorageIterator for MergeIterator {
    fn entry(&self) -> &Entry {
        self.current.as_ref().expect("entry() called on exhausted iterator")
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        self.advance()
    }
}
