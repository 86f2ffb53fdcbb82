//! The engine: routes writes through WAL and memtable, reads through
//! memtables and segments, and drives flush and compaction.

mod recovery;

pub use recovery::WAL_FILE;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::compaction::{CompactionWorker, Compactor};
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::memtable::MemTable;
use crate::options::Options;
use crate::sstable::{SSTable, SSTableBuilder, SSTableMeta, segment_path};
use crate::types::{ENTRY_HEADER_SIZE, Entry, Value};
use crate::version::{VersionEdit, VersionSet};
use crate::wal::{Operation, WALWriter};

/// State owned by the single write path.
struct WriteState {
    /// Taken by `close`.
    wal: Option<WALWriter>,
    last_sequence: u64,
    /// The last flush attempt failed; writes are being buffered past the
    /// flush threshold.
    flush_failed: bool,
}

impl WriteState {
    fn wal(&mut self) -> Result<&mut WALWriter> {
        self.wal.as_mut().ok_or(Error::EngineClosed)
    }
}

struct MemState {
    active: Arc<MemTable>,
    /// Frozen memtable being written out. Still serves reads.
    immutable: Option<Arc<MemTable>>,
}

/// Snapshot of engine internals.
#[derive(Debug, Clone)]
pub struct Stats {
    pub memtable_bytes: usize,
    pub memtable_entries: usize,
    pub last_sequence: u64,
    pub wal_bytes: u64,
    /// Live segments in read order.
    pub segments: Vec<SSTableMeta>,
    /// Segment count per level.
    pub level_counts: Vec<usize>,
    pub next_generation: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub compactions: u64,
    pub compaction_failures: u64,
}

/// An LSM-tree key-value store rooted at one directory.
///
/// All methods take `&self`; share the handle across threads with an `Arc`.
///
/// ```no_run
/// use lsm_kv::DB;
///
/// let db = DB::open("/tmp/lsm-demo")?;
/// db.put(b"hello", b"world")?;
/// assert_eq!(db.get(b"hello")?, Some(b"world".to_vec()));
/// db.delete(b"hello")?;
/// assert_eq!(db.get(b"hello")?, None);
/// db.close()?;
/// # Ok::<(), lsm_kv::Error>(())
/// ```
pub struct DB {
    dir: PathBuf,
    options: Options,
    write: Mutex<WriteState>,
    mem: RwLock<MemState>,
    versions: Arc<VersionSet>,
    compactor: Arc<Compactor>,
    /// Read-locked to talk to the worker, write-locked to stop it.
    worker: RwLock<Option<CompactionWorker>>,
    closed: AtomicBool,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
}

impl DB {
    /// Open (or create) the store in `dir` with default options.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(dir, Options::default())
    }

    /// Open the store in `dir`, recovering whatever a previous run left.
    pub fn open_with(dir: impl AsRef<Path>, options: Options) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let recovered = recovery::recover(&dir, &options)?;

        let versions = Arc::new(recovered.versions);
        let compactor = Arc::new(Compactor::new(&dir, Arc::clone(&versions), options.clone()));
        let worker = if options.background_compaction {
            Some(CompactionWorker::spawn(Arc::clone(&compactor))?)
        } else {
            None
        };

        let db = DB {
            dir,
            write: Mutex::new(WriteState {
                wal: Some(recovered.wal),
                last_sequence: recovered.last_sequence,
                flush_failed: false,
            }),
            mem: RwLock::new(MemState {
                active: Arc::new(recovered.memtable),
                immutable: None,
            }),
            versions,
            compactor,
            worker: RwLock::new(worker),
            closed: AtomicBool::new(false),
            flushes: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            options,
        };

        if db.active().is_above_threshold() {
            let mut state = db.write.lock();
            db.flush_locked(&mut state)?;
        }
        db.notify_compactor();
        Ok(db)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(key, Some(value))
    }

    /// Delete `key`. Deleting an absent key still records a tombstone,
    /// since older segments may hold a value for it.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.write(key, None)
    }

    /// Latest value for `key`, or `None` if it was never written or was deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        self.ensure_open()?;
        // Memtables first, then the version: a flush publishes its segment
        // before it retires the frozen memtable.
        let (active, immutable) = {
            let mem = self.mem.read();
            (Arc::clone(&mem.active), mem.immutable.clone())
        };
        if let Some(entry) = active.get(key) {
            return Ok(entry.value);
        }
        if let Some(entry) = immutable.and_then(|m| m.get(key)) {
            return Ok(entry.value);
        }
        let version = self.versions.current();
        Ok(version.get(key)?.and_then(|entry| entry.value))
    }

    /// Write the memtable out as a segment now, if it holds anything.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.write.lock();
        self.ensure_open()?;
        let flushed = self.flush_locked(&mut state)?;
        drop(state);
        if flushed {
            self.notify_compactor();
        }
        Ok(())
    }

    /// Merge every segment into the last level and wait for it.
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;
        let worker = self.worker.read();
        match worker.as_ref() {
            Some(worker) => worker.compact(),
            None => self.compactor.compact_all(),
        }
    }

    pub fn stats(&self) -> Stats {
        let (last_sequence, wal_bytes) = {
            let state = self.write.lock();
            (state.last_sequence, state.wal.as_ref().map_or(0, WALWriter::offset))
        };
        let active = self.active();
        let version = self.versions.current();
        let level_counts = (0..self.options.max_levels).map(|l| version.level_len(l)).collect();
        Stats {
            memtable_bytes: active.size_bytes(),
            memtable_entries: active.len(),
            last_sequence,
            wal_bytes,
            segments: version.metas(),
            level_counts,
            next_generation: self.versions.next_generation(),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            compactions: self.compactor.completed(),
            compaction_failures: self.compactor.failed(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Stop background compaction, flush the memtable, sync the WAL and
    /// release every open file. Every later call fails with `EngineClosed`.
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.write.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut worker) = self.worker.write().take() {
            worker.shutdown();
        }
        let flushed = self.flush_locked(&mut state);
        let synced = state.wal().and_then(|wal| wal.sync());
        state.wal = None;
        self.versions.release();
        tracing::info!(dir = %self.dir.display(), "closed");
        flushed.and(synced)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::EngineClosed);
        }
        Ok(())
    }

    fn active(&self) -> Arc<MemTable> {
        Arc::clone(&self.mem.read().active)
    }

    fn notify_compactor(&self) {
        if let Some(worker) = self.worker.read().as_ref() {
            worker.notify();
        }
    }

    fn write(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let mut state = self.write.lock();
        self.ensure_open()?;

        let value_len = value.map_or(0, <[u8]>::len);
        let mut flushed = false;
        let active = self.active();
        // The memtable reached the threshold on an earlier write; this one
        // flushes it first.
        if active.is_above_threshold() {
            let retrying = state.flush_failed;
            match self.flush_locked(&mut state) {
                Ok(did_flush) => flushed = did_flush,
                Err(e) => {
                    if !retrying {
                        return Err(e);
                    }
                    let size = active.size_after(key, value_len);
                    if size > self.options.memtable_hard_cap {
                        return Err(Error::MemtableFull {
                            size,
                            cap: self.options.memtable_hard_cap,
                        });
                    }
                }
            }
        }

        let active = self.active();
        let sequence = state.last_sequence + 1;
        let operation = match value {
            None => Operation::Delete,
            Some(_) if active.contains(key) => Operation::Update,
            Some(_) => Operation::Insert,
        };
        state.wal()?.append(operation, sequence, key, value.unwrap_or_default())?;
        state.last_sequence = sequence;
        active.apply(match value {
            Some(v) => Entry::put(key.to_vec(), v.to_vec(), sequence),
            None => Entry::tombstone(key.to_vec(), sequence),
        });

        // An entry larger than the threshold is written straight out.
        let entry_size = ENTRY_HEADER_SIZE + key.len() + value_len;
        if entry_size > self.options.max_memtable_size && !state.flush_failed {
            match self.flush_locked(&mut state) {
                Ok(did_flush) => flushed |= did_flush,
                Err(e) => {
                    tracing::warn!(error = %e, "flush after oversized write failed; data stays in the WAL");
                }
            }
        }
        drop(state);

        if flushed {
            self.notify_compactor();
        }
        Ok(())
    }

    /// Freeze the active memtable, write it as a level-0 segment, publish
    /// the segment, then retire the memtable and empty the WAL.
    ///
    /// On failure the frozen memtable becomes active again, the WAL is left
    /// alone and later writes buffer past the threshold until a flush
    /// succeeds. Returns whether a segment was written.
    fn flush_locked(&self, state: &mut WriteState) -> Result<bool> {
        let frozen = {
            let mut mem = self.mem.write();
            if mem.active.is_empty() {
                return Ok(false);
            }
            let fresh = Arc::new(MemTable::new(self.options.max_memtable_size));
            let frozen = std::mem::replace(&mut mem.active, fresh);
            mem.immutable = Some(Arc::clone(&frozen));
            frozen
        };

        let started = Instant::now();
        match self.write_level0(&frozen) {
            Ok(segment) => {
                let meta = segment.meta().clone();
                self.mem.write().immutable = None;
                state.flush_failed = false;
                state.wal()?.clear()?;
                self.flushes.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    generation = meta.generation,
                    entries = meta.entry_count,
                    bytes = meta.file_size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "memtable flushed"
                );
                Ok(true)
            }
            Err(e) => {
                {
                    let mut mem = self.mem.write();
                    mem.active = frozen;
                    mem.immutable = None;
                }
                state.flush_failed = true;
                self.flush_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "memtable flush failed");
                Err(e)
            }
        }
    }

    /// Build, open and publish a level-0 segment from `memtable`.
    fn write_level0(&self, memtable: &MemTable) -> Result<Arc<SSTable>> {
        let generation = self.versions.new_generation();
        let mut builder = SSTableBuilder::new(
            &self.dir,
            generation,
            0,
            self.options.block_size,
            self.options.filter_policy,
        )?;
        let mut entries = memtable.iter_sorted();
        while entries.is_valid() {
            builder.add(entries.entry())?;
            entries.next()?;
        }
        builder.finish()?;

        let path = segment_path(&self.dir, generation);
        let segment = match SSTable::open(&path) {
            Ok(table) => Arc::new(table),
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };
        if let Err(e) = self.versions.apply(VersionEdit::add(Arc::clone(&segment))) {
            segment.mark_obsolete();
            return Err(e);
        }
        Ok(segment)
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB")
            .field("dir", &self.dir)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
