use serde::{Deserialize, Serialize};

/// Contiguous offset range owned by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkChunk {
    pub index: usize,
    pub start: u64,
    pub length: u64,
}

impl WorkChunk {
    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// Split `[start, end)` into at most `workers` chunks of
/// `ceil((end - start) / workers)` offsets, clipping the last one
pub fn partition(start: u64, end: u64, workers: usize) -> Vec<WorkChunk> {
    if end <= start {
        return Vec::new();
    }
    let total = end - start;
    let per_worker = total.div_ceil(workers.max(1) as u64);

    let mut chunks = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let length = per_worker.min(end - cursor);
        chunks.push(WorkChunk {
            index: chunks.len(),
            start: cursor,
            length,
        });
        cursor += length;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partition_clips_last_chunk() {
        let chunks = partition(0, 100, 3);
        let ranges: Vec<(u64, u64)> = chunks.iter().map(|c| (c.start, c.end())).collect();
        assert_eq!(ranges, vec![(0, 34), (34, 68), (68, 100)]);
        assert_eq!(chunks[2].index, 2);
    }

    #[test]
    fn test_partition_small_range() {
        assert_eq!(partition(10, 12, 15).len(), 2);
        assert!(partition(5, 5, 3).is_empty());
        assert_eq!(partition(0, 7, 0).len(), 1);
    }

    proptest! {
        #[test]
        fn chunks_cover_range_exactly(start in 0u64..10_000, len in 1u64..10_000, workers in 1usize..40) {
            let chunks = partition(start, start + len, workers);
            prop_assert!(chunks.len() <= workers);
            prop_assert_eq!(chunks[0].start, start);
            prop_assert_eq!(chunks.last().map(|c| c.end()), Some(start + len));
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[0].end(), pair[1].start);
            }
        }
    }
}
