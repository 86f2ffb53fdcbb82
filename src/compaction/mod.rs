//! Compaction: merge segments into fewer, larger ones.
//!
//! A job merges its inputs with a [`MergeIterator`], writes the surviving
//! entries into new segments, records the swap in the manifest, and only
//! then retires the inputs. If anything fails before the manifest write,
//! the new files are removed and the live set is unchanged.

pub mod picker;
pub mod worker;

pub use picker::{CompactionJob, pick, pick_all};
pub use worker::{CompactionRequest, CompactionWorker};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::iterator::{MergeIterator, StorageIterator};
use crate::options::Options;
use crate::sstable::{SSTable, SSTableBuilder, segment_path};
use crate::version::{VersionEdit, VersionSet};

/// Runs compaction jobs against a [`VersionSet`]. Jobs never overlap.
pub struct Compactor {
    dir: PathBuf,
    versions: Arc<VersionSet>,
    options: Options,
    /// Held for the whole of a job.
    running: Mutex<()>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Compactor {
    pub fn new(dir: &Path, versions: Arc<VersionSet>, options: Options) -> Self {
        Compactor {
            dir: dir.to_path_buf(),
            versions,
            options,
            running: Mutex::new(()),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Run picked jobs until no level is over-full.
    pub fn run_pending(&self) -> Result<usize> {
        let _running = self.running.lock();
        let mut jobs = 0;
        while let Some(job) = pick(&self.versions.current(), &self.options) {
            self.execute(job)?;
            jobs += 1;
        }
        Ok(jobs)
    }

    /// Merge every live segment into the last level.
    pub fn compact_all(&self) -> Result<()> {
        let _running = self.running.lock();
        match pick_all(&self.versions.current(), &self.options) {
            Some(job) => self.execute(job),
            None => Ok(()),
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn execute(&self, job: CompactionJob) -> Result<()> {
        let started = Instant::now();
        let inputs = job.input_generations();
        let input_bytes = job.input_bytes();
        let output_level = job.output_level;

        let outputs = match self.merge(&job) {
            Ok(outputs) => outputs,
            Err(e) => return Err(self.fail(&inputs, e)),
        };
        let output_generations: Vec<u64> = outputs.iter().map(|s| s.generation()).collect();
        let output_bytes: u64 = outputs.iter().map(|s| s.file_size()).sum();

        let edit = VersionEdit {
            added: outputs.clone(),
            removed: inputs.clone(),
        };
        if let Err(e) = self.versions.apply(edit) {
            for segment in &outputs {
                segment.mark_obsolete();
            }
            return Err(self.fail(&inputs, e));
        }

        self.completed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            ?inputs,
            outputs = ?output_generations,
            output_level,
            input_bytes,
            output_bytes,
            dropped_tombstones = job.drop_tombstones,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compaction finished"
        );
        Ok(())
    }

    /// Write the merged inputs out as segments at the job's output level.
    /// On error every segment written so far is deleted.
    fn merge(&self, job: &CompactionJob) -> Result<Vec<Arc<SSTable>>> {
        let mut sources: Vec<Box<dyn StorageIterator>> = Vec::with_capacity(job.inputs.len());
        for input in &job.inputs {
            sources.push(Box::new(input.iter()?));
        }
        let mut merged = if job.drop_tombstones {
            MergeIterator::dropping_tombstones(sources)?
        } else {
            MergeIterator::new(sources)?
        };

        let mut outputs: Vec<Arc<SSTable>> = Vec::new();
        let result = self.write_outputs(&mut merged, job.output_level, &mut outputs);
        if result.is_err() {
            for segment in &outputs {
                segment.mark_obsolete();
            }
            outputs.clear();
        }
        result.map(|()| outputs)
    }

    fn write_outputs(
        &self,
        merged: &mut MergeIterator,
        level: u32,
        outputs: &mut Vec<Arc<SSTable>>,
    ) -> Result<()> {
        let target = self.options.target_segment_size;
        let mut builder: Option<SSTableBuilder> = None;
        while merged.is_valid() {
            if builder.is_none() {
                builder = Some(SSTableBuilder::new(
                    &self.dir,
                    self.versions.new_generation(),
                    level,
                    self.options.block_size,
                    self.options.filter_policy,
                )?);
            }
            if let Some(current) = builder.as_mut() {
                current.add(merged.entry())?;
            }
            if builder.as_ref().is_some_and(|b| b.estimated_size() >= target) {
                if let Some(full) = builder.take() {
                    outputs.push(self.seal(full)?);
                }
            }
            merged.next()?;
        }
        if let Some(last) = builder.take() {
            outputs.push(self.seal(last)?);
        }
        Ok(())
    }

    fn seal(&self, builder: SSTableBuilder) -> Result<Arc<SSTable>> {
        let generation = builder.generation();
        builder.finish()?;
        let path = segment_path(&self.dir, generation);
        match SSTable::open(&path) {
            Ok(table) => Ok(Arc::new(table)),
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }

    fn fail(&self, inputs: &[u64], cause: Error) -> Error {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(?inputs, error = %cause, "compaction failed; inputs left in place");
        match cause {
            Error::CompactionFailed(_) => cause,
            other => Error::CompactionFailed(other.to_string()),
        }
    }
}
