//! Live segment set.
//!
//! A [`Version`] is an immutable snapshot of the live segments. Readers
//! clone the current `Arc<Version>` and probe it without holding any lock;
//! flush and compaction build a new version from an edit, record it in the
//! manifest, and swap it in.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::manifest::{Manifest, SegmentRef};
use crate::sstable::{SSTable, SSTableMeta};
use crate::types::Entry;

/// Segments ordered newest first: level ascending, then generation
/// descending. Every segment at level `L` holds newer data than every
/// segment at level `L + 1`.
#[derive(Debug, Default)]
pub struct Version {
    segments: Vec<Arc<SSTable>>,
}

impl Version {
    pub fn new(mut segments: Vec<Arc<SSTable>>) -> Self {
        segments.sort_by(|a, b| a.level().cmp(&b.level()).then(b.generation().cmp(&a.generation())));
        Version { segments }
    }

    /// All segments in read order.
    pub fn segments(&self) -> &[Arc<SSTable>] {
        &self.segments
    }

    pub fn level(&self, level: u32) -> Vec<Arc<SSTable>> {
        self.segments
            .iter()
            .filter(|s| s.level() == level)
            .cloned()
            .collect()
    }

    pub fn level_len(&self, level: u32) -> usize {
        self.segments.iter().filter(|s| s.level() == level).count()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Newest version of `key` across all segments, tombstones included.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        for segment in &self.segments {
            if let Some(entry) = segment.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Whether any segment outside `excluded` sits at a level deeper than `level`.
    pub fn has_data_below(&self, level: u32, excluded: &[u64]) -> bool {
        self.segments
            .iter()
            .any(|s| s.level() > level && !excluded.contains(&s.generation()))
    }

    pub fn max_sequence(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.meta().max_sequence)
            .max()
            .unwrap_or(0)
    }

    pub fn metas(&self) -> Vec<SSTableMeta> {
        self.segments.iter().map(|s| s.meta().clone()).collect()
    }

    fn apply(&self, edit: &VersionEdit) -> Version {
        let mut segments: Vec<Arc<SSTable>> = self
            .segments
            .iter()
            .filter(|s| !edit.removed.contains(&s.generation()))
            .cloned()
            .collect();
        segments.extend(edit.added.iter().cloned());
        Version::new(segments)
    }

    fn to_manifest(&self, next_generation: u64) -> Manifest {
        Manifest {
            next_generation,
            segments: self
                .segments
                .iter()
                .map(|s| SegmentRef {
                    generation: s.generation(),
                    level: s.level(),
                })
                .collect(),
        }
    }
}

/// Segments to add and generations to drop, applied as one step.
#[derive(Debug, Default)]
pub struct VersionEdit {
    pub added: Vec<Arc<SSTable>>,
    pub removed: Vec<u64>,
}

impl VersionEdit {
    pub fn add(segment: Arc<SSTable>) -> Self {
        VersionEdit {
            added: vec![segment],
            removed: Vec::new(),
        }
    }
}

/// Owner of the current version and the generation counter.
pub struct VersionSet {
    dir: PathBuf,
    current: RwLock<Arc<Version>>,
    /// Serializes edits together with their manifest writes.
    edit_lock: Mutex<()>,
    next_generation: AtomicU64,
}

impl VersionSet {
    pub fn new(dir: &Path, version: Version, next_generation: u64) -> Self {
        VersionSet {
            dir: dir.to_path_buf(),
            current: RwLock::new(Arc::new(version)),
            edit_lock: Mutex::new(()),
            next_generation: AtomicU64::new(next_generation),
        }
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current.read())
    }

    /// Reserve a fresh generation number.
    pub fn new_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_generation(&self) -> u64 {
        self.next_generation.load(Ordering::SeqCst)
    }

    /// Write the current version to the manifest without changing it.
    pub fn persist(&self) -> Result<()> {
        let _guard = self.edit_lock.lock();
        self.current().to_manifest(self.next_generation()).store(&self.dir)
    }

    /// Apply `edit` to the current version, make it durable in the
    /// manifest, then publish it. Removed segments are marked obsolete and
    /// their files disappear once in-flight readers let go of them.
    ///
    /// If the manifest write fails nothing is published.
    pub fn apply(&self, edit: VersionEdit) -> Result<Arc<Version>> {
        let _guard = self.edit_lock.lock();
        let base = self.current();
        let next = Arc::new(base.apply(&edit));
        next.to_manifest(self.next_generation()).store(&self.dir)?;
        *self.current.write() = Arc::clone(&next);

        for segment in base.segments() {
            if edit.removed.contains(&segment.generation()) {
                segment.mark_obsolete();
            }
        }
        Ok(next)
    }

    /// Drop every segment handle. Files stay on disk and the manifest is
    /// left as it was.
    pub fn release(&self) {
        let _guard = self.edit_lock.lock();
        *self.current.write() = Arc::new(Version::default());
    }
}
