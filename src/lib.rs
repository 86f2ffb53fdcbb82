//! # LSM-Tree Key-Value Engine
//!
//! An embeddable key-value store using the Log-Structured Merge-Tree design.
//!
//! ## Core idea
//! Instead of updating data in place (B-Tree), buffer writes in memory,
//! flush them as sorted files, and merge those files in the background.
//! This turns random writes into sequential writes.
//!
//! ## Write path
//! `put`/`delete` → WAL append (fsync) → memtable. When the memtable reaches
//! its threshold it's written out as a level-0 segment, published in the
//! manifest, and the WAL is emptied.
//!
//! ## Read path
//! Active memtable → frozen memtable → segments newest first, each gated by
//! its bloom filter and located through its sparse index.
//!
//! ## Files
//! - `wal.log`: mutations not yet in a segment
//! - `MANIFEST`: live segment generations and their levels
//! - `0000000042.sst`: immutable sorted segments

pub mod bloom;
pub mod compaction;
pub mod db;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod options;
pub mod sstable;
pub mod types;
pub mod version;
pub mod wal;

// Public re-exports for the top-level API
pub use bloom::FilterPolicy;
pub use db::{DB, Stats};
pub use error::{Error, Result};
pub use options::Options;
