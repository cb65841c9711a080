use crate::meta::{MetaData, MetaKey};
use crate::sample_table::SampleTable;

/// Per-track defaults from the `trex` box, the fallback for `tfhd` fields
/// that a fragment does not override.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrexDefaults {
    pub sample_description_index: u32,
    pub sample_duration: u32,
    pub sample_size: u32,
    pub sample_flags: u32,
}

/// One `trak` worth of state: format metadata plus the classical sample
/// table. Created when the trak opens, finalized when it closes; whether the
/// classical table or a fragment table serves samples is decided later by
/// `mvex` presence.
#[derive(Debug)]
pub struct Track {
    pub id: u32,
    pub meta: MetaData,
    pub timescale: u32,
    pub duration: u64,
    pub is_video: bool,
    /// AVC NAL length-prefix size from avcC, 1..=4.
    pub nal_length_size: Option<u8>,
    /// Set when the track cannot be served (e.g. multi-codec stsd).
    pub skip: bool,
    pub sample_table: SampleTable,
}

impl Track {
    pub fn new() -> Self {
        Track {
            id: 0,
            meta: MetaData::new(),
            timescale: 0,
            duration: 0,
            is_video: false,
            nal_length_size: None,
            skip: false,
            sample_table: SampleTable::new(),
        }
    }

    /// Finalize on trak close: resolve the classical table and decide
    /// whether the track is usable. A failed check marks the track skipped
    /// instead of failing the whole parse.
    pub fn verify(&mut self) {
        if self.skip {
            return;
        }
        if self.id == 0 || self.timescale == 0 || !self.meta.contains(MetaKey::Mime) {
            tracing::warn!(track_id = self.id, "dropping track with incomplete format");
            self.skip = true;
            return;
        }
        if self.sample_table.sample_count() > 0 {
            if let Err(e) = self.sample_table.build() {
                tracing::warn!(track_id = self.id, error = %e, "dropping track with bad sample table");
                self.skip = true;
                return;
            }
        }
        self.meta.set_int(MetaKey::TrackId, self.id as i64);
        self.meta.set_int(MetaKey::Timescale, self.timescale as i64);
        self.meta.set_int(MetaKey::Duration, self.duration as i64);
    }

    pub fn mime(&self) -> Option<&str> {
        self.meta.str(MetaKey::Mime)
    }
}

impl Default for Track {
    fn default() -> Self {
        Self::new()
    }
}
