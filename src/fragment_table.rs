use crate::error::{DemuxError, Result};
use crate::fragment::TrackFragment;
use crate::random_access::TfraEntry;
use crate::sample::{SampleLookup, SampleMeta};

/// Number of leading sync samples examined when picking a thumbnail.
const THUMBNAIL_SCAN_LIMIT: u32 = 20;

/// One row of the table: a fragment position known either from the
/// random-access index (traf still pending) or from an actually parsed traf.
/// Keyed by (moof offset, traf number); kept in ascending moof-offset order
/// regardless of arrival order.
#[derive(Debug)]
struct FragmentEntry {
    moof_offset: u64,
    traf_number: u32,
    traf: Option<TrackFragment>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    entry: usize,
    run: usize,
    sample: usize,
}

#[derive(Debug, Clone, Copy)]
struct ThumbnailCandidate {
    entry: usize,
    run: usize,
    sample: usize,
    size: u32,
}

/// Per-track fragment table: merges the (optional) random-access index with
/// fragments as they are parsed, drives the sequential cursor, and answers
/// closest-sample seeks. Samples living in fragments that are not resident
/// yet are reported as `SampleLookup::NeedFragment`.
#[derive(Debug)]
pub struct TrackFragmentTable {
    track_id: u32,
    is_video: bool,
    entries: Vec<FragmentEntry>,
    random_access: Option<Vec<TfraEntry>>,
    cursor: Cursor,
    max_sample_size: u32,
    thumbnail_budget: u32,
    thumbnail: Option<ThumbnailCandidate>,
}

impl TrackFragmentTable {
    pub fn new(track_id: u32, is_video: bool) -> Self {
        TrackFragmentTable {
            track_id,
            is_video,
            entries: Vec::new(),
            random_access: None,
            cursor: Cursor::default(),
            max_sample_size: 0,
            thumbnail_budget: if is_video { THUMBNAIL_SCAN_LIMIT } else { 0 },
            thumbnail: None,
        }
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn max_sample_size(&self) -> u32 {
        self.max_sample_size
    }

    /// Install the tfra index. Consecutive entries sharing (moof offset,
    /// traf number) collapse into one pending row. Write-once: later calls
    /// are ignored.
    pub fn set_random_access_info(&mut self, entries: Vec<TfraEntry>) {
        if self.random_access.is_some() {
            return;
        }
        for e in &entries {
            let duplicate = self
                .entries
                .last()
                .map(|row| row.moof_offset == e.moof_offset && row.traf_number == e.traf_number)
                .unwrap_or(false);
            if !duplicate {
                self.entries.push(FragmentEntry {
                    moof_offset: e.moof_offset,
                    traf_number: e.traf_number,
                    traf: None,
                });
            }
        }
        if self.is_video {
            self.thumbnail_budget = (entries.len() as u32).min(THUMBNAIL_SCAN_LIMIT);
        }
        self.random_access = Some(entries);
    }

    /// Locate the row for (moof offset, traf number), starting the scan at
    /// `hint` before falling back to the head of the table.
    fn find_entry(&self, moof_offset: u64, traf_number: u32, hint: usize) -> Option<usize> {
        let matches = |row: &FragmentEntry| {
            row.moof_offset == moof_offset && row.traf_number == traf_number
        };
        if let Some(found) = self.entries[hint.min(self.entries.len())..]
            .iter()
            .position(matches)
        {
            return Some(hint.min(self.entries.len()) + found);
        }
        self.entries[..hint.min(self.entries.len())].iter().position(matches)
    }

    /// Merge a freshly parsed traf into the table.
    ///
    /// With an index present, a row that the index did not predict is
    /// inserted in ascending moof-offset order; if its timestamps do not
    /// chain onto its neighbors, earlier resident fragments are shifted to
    /// restore `ts[i+1] == ts[i] + dur[i]` across the seam. Without an
    /// index, fragments are appended in arrival order.
    pub fn update_table(&mut self, traf: TrackFragment) {
        debug_assert_eq!(traf.track_id, self.track_id);
        self.max_sample_size = self.max_sample_size.max(traf.max_sample_size);

        let idx = match self.find_entry(traf.moof_offset, traf.traf_number, self.cursor.entry) {
            Some(i) => {
                if self.entries[i].traf.is_some() {
                    return; // raced with another reader; first parse wins
                }
                self.entries[i].traf = Some(traf);
                i
            }
            None if self.random_access.is_some() => {
                // two-pointer walk to the first row past the new offset
                let mut pos = 0;
                while pos < self.entries.len() && self.entries[pos].moof_offset < traf.moof_offset {
                    pos += 1;
                }
                self.entries.insert(pos, FragmentEntry {
                    moof_offset: traf.moof_offset,
                    traf_number: traf.traf_number,
                    traf: Some(traf),
                });
                // the insert shifted rows right; keep the cursor on the row
                // it was walking, or samples already delivered would repeat.
                // A row it has not started yet is served after the new one.
                if pos < self.cursor.entry
                    || (pos == self.cursor.entry
                        && (self.cursor.run > 0 || self.cursor.sample > 0))
                {
                    self.cursor.entry += 1;
                }
                self.fix_up_before(pos);
                pos
            }
            None => {
                self.entries.push(FragmentEntry {
                    moof_offset: traf.moof_offset,
                    traf_number: traf.traf_number,
                    traf: Some(traf),
                });
                self.entries.len() - 1
            }
        };
        self.scan_thumbnail(idx);
    }

    /// Walk backwards from the entry before `pos`, shifting resident
    /// fragments whose end timestamp does not meet the first timestamp of
    /// their successor. Stops at the first already-consistent (or absent)
    /// neighbor.
    fn fix_up_before(&mut self, pos: usize) {
        let mut expected_end = match &self.entries[pos].traf {
            Some(t) => t.first_timestamp,
            None => return,
        };
        let mut i = pos;
        while i > 0 {
            i -= 1;
            let traf = match &mut self.entries[i].traf {
                Some(t) => t,
                None => return,
            };
            let end = traf.end_timestamp();
            if end == expected_end {
                return;
            }
            let delta = expected_end as i64 - end as i64;
            traf.shift_timestamps(delta);
            tracing::debug!(
                track_id = self.track_id,
                entry = i,
                delta,
                "adjusted fragment timestamps after out-of-order insert"
            );
            expected_end = traf.first_timestamp;
        }
    }

    /// Bounded scan over the sync samples of a newly resident fragment,
    /// keeping the largest seen as the thumbnail candidate.
    fn scan_thumbnail(&mut self, entry_idx: usize) {
        if !self.is_video || self.thumbnail_budget == 0 {
            return;
        }
        let traf = match &self.entries[entry_idx].traf {
            Some(t) => t,
            None => return,
        };
        let mut best = self.thumbnail;
        'runs: for (run_idx, run) in traf.runs.iter().enumerate() {
            for (sample_idx, s) in run.samples.iter().enumerate() {
                if self.thumbnail_budget == 0 {
                    break 'runs;
                }
                if !s.is_sync() {
                    continue;
                }
                self.thumbnail_budget -= 1;
                if best.map(|b| s.size > b.size).unwrap_or(true) {
                    best = Some(ThumbnailCandidate {
                        entry: entry_idx,
                        run: run_idx,
                        sample: sample_idx,
                        size: s.size,
                    });
                }
            }
        }
        self.thumbnail = best;
    }

    /// The largest sync sample among the first `min(index, 20)` scanned.
    pub fn thumbnail_candidate(&self) -> Option<SampleMeta> {
        let c = self.thumbnail?;
        let traf = self.entries.get(c.entry)?.traf.as_ref()?;
        let run = traf.runs.get(c.run)?;
        let s = run.samples.get(c.sample)?;
        let global = global_sample_index(traf, c.run, c.sample);
        Some(sample_meta(traf, s, global))
    }

    /// Offset where top-level scanning should resume to extend this table:
    /// just past the last resident fragment's moof, or the first pending
    /// row's moof.
    fn resume_offset(&self) -> u64 {
        for row in self.entries.iter().rev() {
            if let Some(traf) = &row.traf {
                return traf.moof_offset + traf.moof_size;
            }
        }
        self.entries.first().map(|r| r.moof_offset).unwrap_or(0)
    }

    /// Sequential path: metadata for the sample under the cursor, advancing
    /// past it. Runs off the end of loaded fragments as `NeedFragment`.
    pub fn next_sample(&mut self) -> SampleLookup {
        loop {
            let Some(row) = self.entries.get(self.cursor.entry) else {
                return SampleLookup::NeedFragment { moof_offset: self.resume_offset() };
            };
            let Some(traf) = &row.traf else {
                return SampleLookup::NeedFragment { moof_offset: row.moof_offset };
            };
            let Some(run) = traf.runs.get(self.cursor.run) else {
                self.cursor.entry += 1;
                self.cursor.run = 0;
                self.cursor.sample = 0;
                continue;
            };
            let Some(s) = run.samples.get(self.cursor.sample) else {
                self.cursor.run += 1;
                self.cursor.sample = 0;
                continue;
            };
            let global = global_sample_index(traf, self.cursor.run, self.cursor.sample);
            let meta = sample_meta(traf, s, global);
            self.cursor.sample += 1;
            return SampleLookup::Ready(meta);
        }
    }

    /// Seek path: the sync sample bracketing `time` per the random-access
    /// index, refined within the fragment unless `sync_only`. When `time`
    /// precedes the first index entry, the first entry is used. The
    /// sequential cursor is advanced past the returned sample.
    pub fn find_closest_sample(&mut self, time: u64, sync_only: bool) -> Result<SampleLookup> {
        let index = self.random_access.as_ref().ok_or(DemuxError::OutOfRange)?;
        if index.is_empty() {
            return Err(DemuxError::OutOfRange);
        }
        let tfra = index
            .iter()
            .rev()
            .find(|e| e.time <= time)
            .unwrap_or(&index[0])
            .clone();

        let entry_idx = self
            .find_entry(tfra.moof_offset, tfra.traf_number, self.cursor.entry)
            .ok_or(DemuxError::OutOfRange)?;
        let Some(traf) = &self.entries[entry_idx].traf else {
            return Ok(SampleLookup::NeedFragment { moof_offset: tfra.moof_offset });
        };

        let (run_idx, sample_idx) = if sync_only {
            let run_idx = tfra.trun_number.saturating_sub(1) as usize;
            let sample_idx = tfra.sample_number.saturating_sub(1) as usize;
            let run = traf.runs.get(run_idx).ok_or_else(|| {
                DemuxError::malformed(crate::boxes::FourCC(*b"tfra"), "trun number out of range")
            })?;
            if sample_idx >= run.samples.len() {
                return Err(DemuxError::malformed(
                    crate::boxes::FourCC(*b"tfra"),
                    "sample number out of range",
                ));
            }
            (run_idx, sample_idx)
        } else {
            // refine by timestamp bracketing; fall back to the last sample
            let mut found = None;
            'runs: for (ri, run) in traf.runs.iter().enumerate() {
                for (si, s) in run.samples.iter().enumerate() {
                    if s.timestamp <= time && time < s.timestamp + s.duration as u64 {
                        found = Some((ri, si));
                        break 'runs;
                    }
                }
            }
            found.unwrap_or_else(|| {
                if time < traf.first_timestamp {
                    (0, 0)
                } else {
                    let ri = traf.runs.len().saturating_sub(1);
                    let si = traf
                        .runs
                        .last()
                        .map(|r| r.samples.len().saturating_sub(1))
                        .unwrap_or(0);
                    (ri, si)
                }
            })
        };

        let run = &traf.runs[run_idx];
        let s = &run.samples[sample_idx];
        let global = global_sample_index(traf, run_idx, sample_idx);
        let meta = sample_meta(traf, s, global);
        self.cursor = Cursor { entry: entry_idx, run: run_idx, sample: sample_idx + 1 };
        Ok(SampleLookup::Ready(meta))
    }

    /// Row order of moof offsets, for consistency checks.
    pub fn row_offsets(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.moof_offset).collect()
    }
}

fn global_sample_index(traf: &TrackFragment, run_idx: usize, sample_idx: usize) -> u32 {
    let before: u32 = traf.runs[..run_idx].iter().map(|r| r.samples.len() as u32).sum();
    before + sample_idx as u32
}

fn sample_meta(traf: &TrackFragment, s: &crate::fragment::FragmentSample, global: u32) -> SampleMeta {
    SampleMeta {
        timestamp: s.timestamp,
        duration: s.duration,
        size: s.size,
        data_offset: s.data_offset,
        composition_offset: s.composition_offset,
        flags: s.flags,
        is_sync: s.is_sync(),
        encryption: traf.encryption_for(global).cloned(),
    }
}
