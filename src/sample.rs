use serde::Serialize;

/// Sample flag bit: set when the sample is NOT a sync sample.
pub const SAMPLE_FLAG_NON_SYNC: u32 = 0x0001_0000;

/// One clear/encrypted byte-range pair of a PIFF subsample mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubSampleRange {
    pub clear_bytes: u16,
    pub encrypted_bytes: u32,
}

/// Per-sample encryption metadata: the IV and, when subsample mapping is
/// present, the clear/encrypted ranges. Decryption itself is out of scope.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EncryptionInfo {
    pub iv: Vec<u8>,
    pub subsamples: Vec<SubSampleRange>,
}

/// Decode-ready metadata for one sample, independent of which table
/// (classical or fragment) produced it.
#[derive(Debug, Clone, Serialize)]
pub struct SampleMeta {
    /// Decode timestamp in track timescale units.
    pub timestamp: u64,
    /// Duration in track timescale units.
    pub duration: u32,
    /// Size in bytes.
    pub size: u32,
    /// Absolute file offset of the sample data.
    pub data_offset: u64,
    /// Composition (presentation) offset relative to the decode timestamp.
    pub composition_offset: i32,
    /// Fragment sample flags; zero for classical-table samples.
    pub flags: u32,
    pub is_sync: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionInfo>,
}

impl SampleMeta {
    /// Presentation timestamp in track timescale units.
    pub fn pts(&self) -> u64 {
        (self.timestamp as i64 + self.composition_offset as i64).max(0) as u64
    }
}

/// Outcome of asking a table for a sample.
///
/// `NeedFragment` is the demand-paging contract between the fragment table
/// and the reader: the requested sample lives in a moof that has not been
/// parsed yet, and scanning should resume at `moof_offset`. It never
/// surfaces past the reader.
#[derive(Debug, Clone)]
pub enum SampleLookup {
    Ready(SampleMeta),
    NeedFragment { moof_offset: u64 },
    EndOfStream,
}
