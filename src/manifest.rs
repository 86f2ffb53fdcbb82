//! Durable list of live segments.
//!
//! The manifest is rewritten whole on every flush and compaction: written
//! to `MANIFEST.tmp`, fsynced, renamed over `MANIFEST`, directory fsynced.
//! A segment file exists in the live set exactly when the current manifest
//! names it.
//!
//! Layout (little endian):
//! ```text
//! [magic(4B)][next_generation(8B)][count(4B)]
//! [generation(8B)][level(4B)] × count
//! [crc32 of everything above(4B)]
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::sstable::sync_dir;

pub const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP_FILE: &str = "MANIFEST.tmp";
const MANIFEST_MAGIC: u32 = 0x4D414E31; // "MAN1"

/// One live segment as recorded in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRef {
    pub generation: u64,
    pub level: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Every generation handed out so far is below this.
    pub next_generation: u64,
    pub segments: Vec<SegmentRef>,
}

impl Manifest {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20 + self.segments.len() * 12);
        buf.extend_from_slice(&MANIFEST_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.next_generation.to_le_bytes());
        buf.extend_from_slice(&(self.segments.len() as u32).to_le_bytes());
        for seg in &self.segments {
            buf.extend_from_slice(&seg.generation.to_le_bytes());
            buf.extend_from_slice(&seg.level.to_le_bytes());
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 20 {
            return Err(Error::corruption("manifest too short"));
        }
        let (body, crc) = data.split_at(data.len() - 4);
        if crc32fast::hash(body) != u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]) {
            return Err(Error::corruption("manifest CRC mismatch"));
        }
        let magic = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        if magic != MANIFEST_MAGIC {
            return Err(Error::Corruption(format!("bad manifest magic {magic:#x}")));
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&body[4..12]);
        let next_generation = u64::from_le_bytes(word);
        let count = u32::from_le_bytes([body[12], body[13], body[14], body[15]]) as usize;
        if body.len() != 16 + count * 12 {
            return Err(Error::Corruption(format!(
                "manifest lists {count} segments but holds {} bytes",
                body.len()
            )));
        }

        let segments = body[16..]
            .chunks_exact(12)
            .map(|rec| {
                word.copy_from_slice(&rec[..8]);
                SegmentRef {
                    generation: u64::from_le_bytes(word),
                    level: u32::from_le_bytes([rec[8], rec[9], rec[10], rec[11]]),
                }
            })
            .collect::<Vec<_>>();
        if let Some(seg) = segments.iter().find(|s| s.generation >= next_generation) {
            return Err(Error::Corruption(format!(
                "manifest lists generation {} at or past next generation {next_generation}",
                seg.generation
            )));
        }

        Ok(Manifest {
            next_generation,
            segments,
        })
    }

    /// Read the manifest in `dir`; `None` if there isn't one yet.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        match fs::read(Self::path(dir)) {
            Ok(data) => Self::decode(&data).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the manifest in `dir`.
    pub fn store(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(MANIFEST_TMP_FILE);
        let mut file: File = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&self.encode())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, Self::path(dir))?;
        sync_dir(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Manifest {
        Manifest {
            next_generation: 12,
            segments: vec![
                SegmentRef { generation: 11, level: 0 },
                SegmentRef { generation: 7, level: 1 },
                SegmentRef { generation: 3, level: 3 },
            ],
        }
    }

    #[test]
    fn store_then_load() {
        let dir = tempdir().unwrap();
        assert_eq!(Manifest::load(dir.path()).unwrap(), None);

        sample().store(dir.path()).unwrap();
        assert_eq!(Manifest::load(dir.path()).unwrap(), Some(sample()));
        assert!(!dir.path().join(MANIFEST_TMP_FILE).exists());
    }

    #[test]
    fn corrupt_manifest_rejected() {
        let mut bytes = sample().encode();
        bytes[17] ^= 0x40;
        assert!(matches!(Manifest::decode(&bytes), Err(Error::Corruption(_))));
        assert!(Manifest::decode(&bytes[..10]).is_err());
    }

    #[test]
    fn generation_past_counter_rejected() {
        let bad = Manifest {
            next_generation: 3,
            segments: vec![SegmentRef { generation: 5, level: 0 }],
        };
        assert!(Manifest::decode(&bad.encode()).is_err());
    }
}
