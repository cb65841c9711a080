use crate::error::{DemuxError, Result};
use crate::sample::SampleMeta;

#[derive(Debug, Clone, Copy)]
pub struct SampleToChunkEntry {
    pub first_chunk: u32, // 1-based
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeToSampleEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CompositionOffsetEntry {
    pub sample_count: u32,
    pub sample_offset: i32,
}

/// Classical (non-fragmented) sample table, populated from the stbl children
/// via box-specific setters and queried for per-sample metadata and
/// closest-sample seeks.
#[derive(Debug, Default)]
pub struct SampleTable {
    chunk_offsets: Vec<u64>,
    sample_to_chunk: Vec<SampleToChunkEntry>,
    fixed_sample_size: u32,
    sample_count: u32,
    sample_sizes: Vec<u32>,
    time_to_sample: Vec<TimeToSampleEntry>,
    composition_offsets: Vec<CompositionOffsetEntry>,
    sync_samples: Option<Vec<u32>>, // 1-based; None = every sample is sync

    // resolved per-sample index, built once all setters have run
    samples: Vec<ResolvedSample>,
}

#[derive(Debug, Clone, Copy)]
struct ResolvedSample {
    offset: u64,
    size: u32,
    timestamp: u64,
    duration: u32,
    composition_offset: i32,
    is_sync: bool,
}

impl SampleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    pub fn set_sample_to_chunk(&mut self, entries: Vec<SampleToChunkEntry>) {
        self.sample_to_chunk = entries;
    }

    pub fn set_sample_sizes(&mut self, fixed_size: u32, count: u32, sizes: Vec<u32>) {
        self.fixed_sample_size = fixed_size;
        self.sample_count = count;
        self.sample_sizes = sizes;
    }

    pub fn set_time_to_sample(&mut self, entries: Vec<TimeToSampleEntry>) {
        self.time_to_sample = entries;
    }

    pub fn set_composition_offsets(&mut self, entries: Vec<CompositionOffsetEntry>) {
        self.composition_offsets = entries;
    }

    pub fn set_sync_samples(&mut self, sample_numbers: Vec<u32>) {
        self.sync_samples = Some(sample_numbers);
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    fn size_of(&self, index: u32) -> u32 {
        if self.fixed_sample_size > 0 {
            self.fixed_sample_size
        } else {
            self.sample_sizes.get(index as usize).copied().unwrap_or(0)
        }
    }

    /// Sum of all sample sizes.
    pub fn total_size(&self) -> u64 {
        (0..self.sample_count).map(|i| self.size_of(i) as u64).sum()
    }

    pub fn max_sample_size(&self) -> u32 {
        (0..self.sample_count).map(|i| self.size_of(i)).max().unwrap_or(0)
    }

    /// Resolve the chunk layout and timing tables into a flat per-sample
    /// index. Called once when the owning trak closes; queries before this
    /// see an empty table.
    pub fn build(&mut self) -> Result<()> {
        let err = |reason| DemuxError::malformed(crate::boxes::FourCC(*b"stbl"), reason);
        self.samples.clear();
        if self.sample_count == 0 {
            return Ok(());
        }
        if self.chunk_offsets.is_empty() || self.sample_to_chunk.is_empty() {
            return Err(err("missing chunk tables"));
        }

        // expand stsc runs across the chunk list
        let mut per_chunk = Vec::with_capacity(self.chunk_offsets.len());
        for (i, entry) in self.sample_to_chunk.iter().enumerate() {
            if entry.first_chunk == 0 {
                return Err(err("stsc first_chunk is zero"));
            }
            let last = match self.sample_to_chunk.get(i + 1) {
                Some(next) => next.first_chunk - 1,
                None => self.chunk_offsets.len() as u32,
            };
            for _ in entry.first_chunk..=last {
                per_chunk.push(entry.samples_per_chunk);
            }
        }
        if per_chunk.len() != self.chunk_offsets.len() {
            return Err(err("stsc does not cover the chunk list"));
        }

        // timing cursors over stts/ctts runs
        let mut stts_iter = self.time_to_sample.iter();
        let mut stts_cur = stts_iter.next().copied();
        let mut stts_left = stts_cur.map(|e| e.sample_count).unwrap_or(0);
        let mut ctts_iter = self.composition_offsets.iter();
        let mut ctts_cur = ctts_iter.next().copied();
        let mut ctts_left = ctts_cur.map(|e| e.sample_count).unwrap_or(0);

        let mut timestamp = 0u64;
        let mut index = 0u32;
        'chunks: for (chunk, &samples_here) in per_chunk.iter().enumerate() {
            let mut offset = self.chunk_offsets[chunk];
            for _ in 0..samples_here {
                if index >= self.sample_count {
                    break 'chunks;
                }
                let duration = match stts_cur {
                    Some(e) if stts_left > 0 => e.sample_delta,
                    _ => return Err(err("stts does not cover all samples")),
                };
                stts_left -= 1;
                if stts_left == 0 {
                    stts_cur = stts_iter.next().copied();
                    stts_left = stts_cur.map(|e| e.sample_count).unwrap_or(0);
                }

                let composition_offset = match ctts_cur {
                    Some(e) if ctts_left > 0 => {
                        ctts_left -= 1;
                        if ctts_left == 0 {
                            ctts_cur = ctts_iter.next().copied();
                            ctts_left = ctts_cur.map(|e| e.sample_count).unwrap_or(0);
                        }
                        e.sample_offset
                    }
                    _ => 0,
                };

                let size = self.size_of(index);
                let is_sync = match &self.sync_samples {
                    Some(nums) => nums.binary_search(&(index + 1)).is_ok(),
                    None => true,
                };
                self.samples.push(ResolvedSample {
                    offset,
                    size,
                    timestamp,
                    duration,
                    composition_offset,
                    is_sync,
                });
                offset += size as u64;
                timestamp += duration as u64;
                index += 1;
            }
        }

        if self.samples.len() != self.sample_count as usize {
            return Err(err("chunk layout does not cover all samples"));
        }
        Ok(())
    }

    pub fn meta_for_sample(&self, index: u32) -> Option<SampleMeta> {
        self.samples.get(index as usize).map(|s| SampleMeta {
            timestamp: s.timestamp,
            duration: s.duration,
            size: s.size,
            data_offset: s.offset,
            composition_offset: s.composition_offset,
            flags: 0,
            is_sync: s.is_sync,
            encryption: None,
        })
    }

    /// Index of the sample whose decode window contains `time`, optionally
    /// restricted to sync samples. Before the first sync sample, the first
    /// one is returned rather than failing.
    pub fn find_closest_sample(&self, time: u64, sync_only: bool) -> Result<u32> {
        if self.samples.is_empty() {
            return Err(DemuxError::OutOfRange);
        }
        let mut best = 0usize;
        for (i, s) in self.samples.iter().enumerate() {
            if sync_only && !s.is_sync {
                continue;
            }
            if s.timestamp <= time {
                best = i;
            } else {
                break;
            }
        }
        if sync_only && !self.samples[best].is_sync {
            // no sync sample at or before `time`; take the first sync one
            best = self
                .samples
                .iter()
                .position(|s| s.is_sync)
                .ok_or(DemuxError::OutOfRange)?;
        }
        Ok(best as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SampleTable {
        // two chunks at 1000 and 5000, 2 samples each, sizes 10/20/30/40,
        // constant duration 100, syncs at samples 1 and 3 (1-based)
        let mut t = SampleTable::new();
        t.set_chunk_offsets(vec![1000, 5000]);
        t.set_sample_to_chunk(vec![SampleToChunkEntry {
            first_chunk: 1,
            samples_per_chunk: 2,
            sample_description_index: 1,
        }]);
        t.set_sample_sizes(0, 4, vec![10, 20, 30, 40]);
        t.set_time_to_sample(vec![TimeToSampleEntry { sample_count: 4, sample_delta: 100 }]);
        t.set_sync_samples(vec![1, 3]);
        t.build().unwrap();
        t
    }

    #[test]
    fn resolves_offsets_within_chunks() {
        let t = table();
        let offs: Vec<u64> = (0..4).map(|i| t.meta_for_sample(i).unwrap().data_offset).collect();
        assert_eq!(offs, vec![1000, 1010, 5000, 5030]);
    }

    #[test]
    fn timing_accumulates() {
        let t = table();
        let m = t.meta_for_sample(3).unwrap();
        assert_eq!(m.timestamp, 300);
        assert_eq!(m.duration, 100);
    }

    #[test]
    fn total_size_matches_sum() {
        let t = table();
        assert_eq!(t.total_size(), 100);
        assert_eq!(t.max_sample_size(), 40);
    }

    #[test]
    fn closest_sample_respects_sync_flag() {
        let t = table();
        // time 250 is inside sample 2 (ts 200), a sync sample
        assert_eq!(t.find_closest_sample(250, true).unwrap(), 2);
        // sample 1 (ts 100) is not sync, so sync-only falls back to sample 0
        assert_eq!(t.find_closest_sample(150, true).unwrap(), 0);
        assert_eq!(t.find_closest_sample(150, false).unwrap(), 1);
    }

    #[test]
    fn missing_stts_coverage_is_malformed() {
        let mut t = SampleTable::new();
        t.set_chunk_offsets(vec![0]);
        t.set_sample_to_chunk(vec![SampleToChunkEntry {
            first_chunk: 1,
            samples_per_chunk: 2,
            sample_description_index: 1,
        }]);
        t.set_sample_sizes(100, 2, vec![]);
        t.set_time_to_sample(vec![TimeToSampleEntry { sample_count: 1, sample_delta: 10 }]);
        assert!(t.build().is_err());
    }
}
