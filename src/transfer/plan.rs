//! Split a file into numbered parts and pair each with any part already
//! stored under the upload session.
use std::collections::BTreeMap;

use crate::store::RemotePart;

/// S3 accepts at most this many parts per multipart upload.
pub const MAX_PARTS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    /// 1-based.
    pub number: i32,
    pub offset: u64,
    pub len: u64,
    pub existing: Option<RemotePart>,
}

/// Number of parts for a file. An empty file is still one (empty) part.
pub fn part_count(size: u64, part_size: u64) -> u64 {
    if size == 0 || part_size == 0 { 1 } else { size.div_ceil(part_size) }
}

/// Every part is `part_size` bytes except the last, which holds the remainder.
pub fn plan_parts(
    file_size: u64,
    part_size: u64,
    remote: &BTreeMap<i32, RemotePart>,
) -> Vec<PartPlan> {
    let count = part_count(file_size, part_size);
    (0..count)
        .map(|i| {
            let offset = i * part_size;
            let len = part_size.min(file_size - offset.min(file_size));
            let number = (i + 1) as i32;
            PartPlan { number, offset, len, existing: remote.get(&number).cloned() }
        })
        .collect()
}
