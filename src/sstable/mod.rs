//! Immutable sorted segment files.
//!
//! ```text
//! ┌───────────────┐
//! │ Data block 0  │  sorted entries + [count][crc32]
//! │ ...           │
//! │ Data block N  │
//! ├───────────────┤
//! │ Filter region │  serialized bloom filter + crc32
//! │ Index region  │  one (first_key, offset, size) per block + crc32
//! │ Meta region   │  generation, level, key/sequence bounds + crc32
//! ├───────────────┤
//! │ Footer (64B)  │
//! └───────────────┘
//! ```
//!
//! A segment is written to `<generation>.sst.tmp`, fsynced, and renamed
//! into place, so a `.sst` file name is only ever visible for a complete file.

pub mod block;
pub mod builder;
pub mod footer;
pub mod index;
pub mod iterator;
pub mod reader;

pub use builder::SSTableBuilder;
pub use footer::{Footer, SSTableMeta};
pub use iterator::SSTableIterator;
pub use reader::SSTable;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const SEGMENT_EXTENSION: &str = "sst";
pub const TMP_EXTENSION: &str = "tmp";

/// `<dir>/0000000042.sst`
pub fn segment_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{generation:010}.{SEGMENT_EXTENSION}"))
}

/// `<dir>/0000000042.sst.tmp`
pub fn tmp_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{generation:010}.{SEGMENT_EXTENSION}.{TMP_EXTENSION}"))
}

/// Generation encoded in a segment file name, if `name` is one.
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".sst")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Fsync a directory so renames and unlinks inside it are durable.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

/// Positioned read that does not move a shared cursor, so concurrent
/// readers can share one file handle.
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(buf, offset)
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;
        let mut done = 0;
        while done < buf.len() {
            let n = file.seek_read(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }
            done += n;
        }
        Ok(())
    }
}

/// Append a crc32 of `region` to it.
pub(crate) fn seal(mut region: Vec<u8>) -> Vec<u8> {
    let crc = crc32fast::hash(&region);
    region.extend_from_slice(&crc.to_le_bytes());
    region
}

/// Verify and strip the trailing crc32 written by [`seal`].
pub(crate) fn unseal<'a>(region: &'a [u8], what: &str) -> Result<&'a [u8]> {
    if region.len() < 4 {
        return Err(Error::Corruption(format!("{what} region too short")));
    }
    let (body, crc) = region.split_at(region.len() - 4);
    let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    if crc32fast::hash(body) != stored {
        return Err(Error::Corruption(format!("{what} region CRC mismatch")));
    }
    Ok(body)
}
