//! Startup: rebuild the live segment set and the memtable from disk.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::memtable::MemTable;
use crate::options::Options;
use crate::sstable::{SSTable, TMP_EXTENSION, parse_segment_file_name, segment_path, sync_dir};
use crate::version::{Version, VersionSet};
use crate::wal::WALWriter;

pub const WAL_FILE: &str = "wal.log";

pub(crate) struct Recovered {
    pub versions: VersionSet,
    pub memtable: MemTable,
    pub wal: WALWriter,
    pub last_sequence: u64,
}

/// Bring `dir` back to a consistent state:
///
/// 1. remove `*.tmp` leftovers of interrupted writes
/// 2. open the segments the manifest lists (or every `.sst` if there is no
///    manifest yet) and delete segment files it doesn't list
/// 3. replay the WAL into a fresh memtable, skipping records that an
///    already-published segment holds
pub(crate) fn recover(dir: &Path, options: &Options) -> Result<Recovered> {
    prepare_dir(dir, options)?;
    remove_tmp_files(dir)?;

    let on_disk = scan_segments(dir)?;
    let (version, next_generation) = match Manifest::load(dir)? {
        Some(manifest) => load_listed(dir, &manifest, &on_disk)?,
        None => load_unlisted(&on_disk)?,
    };
    let segments = version.len();
    let segment_max_sequence = version.max_sequence();
    let versions = VersionSet::new(dir, version, next_generation);
    versions.persist()?;

    let (wal, replay) = WALWriter::open(&dir.join(WAL_FILE))?;
    let memtable = MemTable::new(options.max_memtable_size);
    let mut skipped = 0usize;
    for record in replay.records {
        if record.sequence <= segment_max_sequence {
            skipped += 1;
            continue;
        }
        memtable.apply(record.into_entry());
    }
    let last_sequence = segment_max_sequence.max(memtable.max_sequence());

    tracing::info!(
        dir = %dir.display(),
        segments,
        next_generation,
        replayed = memtable.len(),
        skipped,
        torn_tail = replay.corrupt_tail,
        last_sequence,
        "recovered"
    );

    Ok(Recovered {
        versions,
        memtable,
        wal,
        last_sequence,
    })
}

fn prepare_dir(dir: &Path, options: &Options) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} is not a directory", dir.display()),
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound && options.create_if_missing => {
            fs::create_dir_all(dir)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn remove_tmp_files(dir: &Path) -> Result<()> {
    let mut removed = false;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == TMP_EXTENSION) {
            tracing::debug!(path = %path.display(), "removing leftover temporary file");
            fs::remove_file(&path)?;
            removed = true;
        }
    }
    if removed {
        sync_dir(dir)?;
    }
    Ok(())
}

/// Segment files present in `dir`, by generation.
fn scan_segments(dir: &Path) -> Result<BTreeMap<u64, PathBuf>> {
    let mut found = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(generation) = name.to_str().and_then(parse_segment_file_name) {
            found.insert(generation, entry.path());
        }
    }
    Ok(found)
}

fn load_listed(dir: &Path, manifest: &Manifest, on_disk: &BTreeMap<u64, PathBuf>) -> Result<(Version, u64)> {
    let mut segments = Vec::with_capacity(manifest.segments.len());
    for listed in &manifest.segments {
        let path = segment_path(dir, listed.generation);
        if !on_disk.contains_key(&listed.generation) {
            return Err(Error::Corruption(format!(
                "manifest lists segment {} but {} is missing",
                listed.generation,
                path.display()
            )));
        }
        let table = SSTable::open(&path)?;
        if table.level() != listed.level {
            return Err(Error::Corruption(format!(
                "segment {} is level {} but the manifest says {}",
                listed.generation,
                table.level(),
                listed.level
            )));
        }
        segments.push(Arc::new(table));
    }

    let mut orphans = 0;
    for (generation, path) in on_disk {
        if manifest.segments.iter().all(|s| s.generation != *generation) {
            tracing::info!(generation, "removing orphan segment");
            fs::remove_file(path)?;
            orphans += 1;
        }
    }
    if orphans > 0 {
        sync_dir(dir)?;
    }

    let next_generation = on_disk
        .keys()
        .next_back()
        .map_or(manifest.next_generation, |max| manifest.next_generation.max(max + 1));
    Ok((Version::new(segments), next_generation.max(1)))
}

fn load_unlisted(on_disk: &BTreeMap<u64, PathBuf>) -> Result<(Version, u64)> {
    let mut segments = Vec::with_capacity(on_disk.len());
    for path in on_disk.values() {
        segments.push(Arc::new(SSTable::open(path)?));
    }
    let next_generation = on_disk.keys().next_back().map_or(1, |max| max + 1);
    Ok((Version::new(segments), next_generation))
}
