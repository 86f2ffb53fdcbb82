use std::sync::Arc;

use crate::options::Options;
use crate::sstable::SSTable;
use crate::version::Version;

/// One unit of compaction work: merge `inputs` into fresh segments at
/// `output_level`.
#[derive(Debug)]
pub struct CompactionJob {
    pub inputs: Vec<Arc<SSTable>>,
    pub output_level: u32,
    /// True when nothing older than the inputs exists, so a winning
    /// tombstone has nothing left to shadow.
    pub drop_tombstones: bool,
}

impl CompactionJob {
    pub fn input_generations(&self) -> Vec<u64> {
        self.inputs.iter().map(|s| s.generation()).collect()
    }

    pub fn input_bytes(&self) -> u64 {
        self.inputs.iter().map(|s| s.file_size()).sum()
    }
}

/// Size-tiered picker: the lowest level holding more than `fan_in`
/// segments moves down one level as a whole. The last level compacts into
/// itself, but only when the merged output would be split into fewer files
/// than it already has.
pub fn pick(version: &Version, options: &Options) -> Option<CompactionJob> {
    let top = options.max_levels.saturating_sub(1);
    for level in 0..options.max_levels {
        let inputs = version.level(level);
        if inputs.len() <= options.compaction_fan_in {
            continue;
        }
        if level == top {
            let bytes: u64 = inputs.iter().map(|s| s.file_size()).sum();
            let expected_outputs = bytes.div_ceil(options.target_segment_size) as usize;
            if expected_outputs >= inputs.len() {
                continue;
            }
        }
        return Some(job(version, inputs, level, (level + 1).min(top)));
    }
    None
}

/// Everything into the last level, tombstones dropped.
pub fn pick_all(version: &Version, options: &Options) -> Option<CompactionJob> {
    if version.is_empty() {
        return None;
    }
    let top = options.max_levels.saturating_sub(1);
    Some(CompactionJob {
        inputs: version.segments().to_vec(),
        output_level: top,
        drop_tombstones: true,
    })
}

fn job(version: &Version, inputs: Vec<Arc<SSTable>>, level: u32, output_level: u32) -> CompactionJob {
    let generations: Vec<u64> = inputs.iter().map(|s| s.generation()).collect();
    CompactionJob {
        drop_tombstones: !version.has_data_below(level, &generations),
        inputs,
        output_level,
    }
}
