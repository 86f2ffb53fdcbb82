//! Write-ahead log: the durability half of the write path.
//!
//! Ordering contract with the rest of the engine:
//! 1. `append` + fsync, then apply to the memtable.
//! 2. Flush writes a segment and makes it durable and visible.
//! 3. Only then `clear` the log.
//!
//! A crash between 2 and 3 leaves records behind that the new segment
//! already holds. Recovery skips every record whose sequence number is at
//! or below the highest one in any segment, so replaying twice is harmless.

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::{Replay, WALReader};
pub use record::{Operation, WALRecord};
pub use writer::WALWriter;
