use crate::boxes::{BoxHeader, FourCC, UUID_PIFF_PSSH, UUID_PIFF_SAMPLE_ENCRYPTION};
use crate::error::{DemuxError, Result};
use crate::parser::{read_full_box_header, read_i32, read_u16, read_u32, read_uint};
use crate::sample::{EncryptionInfo, SubSampleRange, SAMPLE_FLAG_NON_SYNC};
use crate::source::{read_slice_at, ByteSource};
use crate::track::TrexDefaults;
use byteorder::ReadBytesExt;
use std::collections::HashMap;
use std::io::{Cursor, Read};

// tfhd presence flags
const TFHD_BASE_DATA_OFFSET: u32 = 0x000001;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x000002;
const TFHD_DEFAULT_SAMPLE_DURATION: u32 = 0x000008;
const TFHD_DEFAULT_SAMPLE_SIZE: u32 = 0x000010;
const TFHD_DEFAULT_SAMPLE_FLAGS: u32 = 0x000020;

// trun presence flags
const TRUN_DATA_OFFSET: u32 = 0x000001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x000004;
const TRUN_SAMPLE_DURATION: u32 = 0x000100;
const TRUN_SAMPLE_SIZE: u32 = 0x000200;
const TRUN_SAMPLE_FLAGS: u32 = 0x000400;
const TRUN_SAMPLE_COMPOSITION_OFFSET: u32 = 0x000800;

// moof payloads are metadata-only; anything this large is not a real moof
const MAX_MOOF_PAYLOAD: u64 = 8 << 20;

/// One sample expanded from a trun entry. `timestamp` comes from the
/// track's running decode-time cursor, `data_offset` from walking the run's
/// data forward.
#[derive(Debug, Clone, Copy)]
pub struct FragmentSample {
    pub index: u32,
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
    pub composition_offset: i32,
    pub timestamp: u64,
    pub data_offset: u64,
}

impl FragmentSample {
    pub fn is_sync(&self) -> bool {
        self.flags & SAMPLE_FLAG_NON_SYNC == 0
    }
}

/// One `trun` worth of samples.
#[derive(Debug, Clone)]
pub struct TrackRun {
    pub run_index: u32,
    pub data_offset: u64,
    pub first_sample_flags: Option<u32>,
    pub samples: Vec<FragmentSample>,
}

/// Defaults resolved from tfhd with trex fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentDefaults {
    pub sample_description_index: u32,
    pub sample_duration: u32,
    pub sample_size: u32,
    pub sample_flags: u32,
}

/// PIFF sample-encryption table attached to a traf.
#[derive(Debug, Clone, Default)]
pub struct SampleEncryption {
    /// Override algorithm id when the box carries its own (flags & 1).
    pub algorithm_id: Option<u32>,
    pub iv_size: u8,
    pub key_id: Option<[u8; 16]>,
    pub entries: Vec<EncryptionInfo>,
}

/// One `traf` worth of fragment data for a single track.
#[derive(Debug, Clone)]
pub struct TrackFragment {
    pub track_id: u32,
    /// 1-based position of this traf within its moof, matching tfra numbering.
    pub traf_number: u32,
    pub moof_offset: u64,
    pub moof_size: u64,
    pub base_data_offset: u64,
    pub defaults: FragmentDefaults,
    pub first_timestamp: u64,
    pub runs: Vec<TrackRun>,
    pub max_sample_size: u32,
    pub encryption: Option<SampleEncryption>,
}

impl TrackFragment {
    pub fn sample_count(&self) -> u32 {
        self.runs.iter().map(|r| r.samples.len() as u32).sum()
    }

    /// Decode timestamp one past the last sample.
    pub fn end_timestamp(&self) -> u64 {
        self.runs
            .last()
            .and_then(|r| r.samples.last())
            .map(|s| s.timestamp + s.duration as u64)
            .unwrap_or(self.first_timestamp)
    }

    /// Shift every sample timestamp by `delta` (out-of-order fixup).
    pub fn shift_timestamps(&mut self, delta: i64) {
        self.first_timestamp = (self.first_timestamp as i64 + delta).max(0) as u64;
        for run in &mut self.runs {
            for s in &mut run.samples {
                s.timestamp = (s.timestamp as i64 + delta).max(0) as u64;
            }
        }
    }

    /// Encryption metadata for the traf-global sample index, if any.
    pub fn encryption_for(&self, sample_index: u32) -> Option<&EncryptionInfo> {
        self.encryption
            .as_ref()
            .and_then(|e| e.entries.get(sample_index as usize))
    }
}

/// One `moof` worth of fragments across all tracks.
#[derive(Debug, Clone)]
pub struct MovieFragment {
    pub offset: u64,
    pub size: u64,
    pub sequence_number: u32,
    pub trafs: Vec<TrackFragment>,
    /// Raw payloads of PIFF PSSH uuid boxes seen inside this moof.
    pub pssh: Vec<Vec<u8>>,
}

/// Cross-fragment parse state: the per-track trex defaults and the running
/// decode-timestamp cursor advanced by every sample parsed.
#[derive(Debug, Default)]
pub struct FragmentContext {
    pub trex: HashMap<u32, TrexDefaults>,
    pub timestamp_cursor: HashMap<u32, u64>,
}

/// Parse a complete `moof` box whose header has already been read.
pub fn parse_moof<S: ByteSource + ?Sized>(
    src: &mut S,
    header: &BoxHeader,
    ctx: &mut FragmentContext,
) -> Result<MovieFragment> {
    if &header.typ.0 != b"moof" {
        return Err(DemuxError::malformed(header.typ, "expected moof"));
    }
    if header.size == 0 || header.size <= header.header_size {
        return Err(DemuxError::malformed(header.typ, "empty moof"));
    }
    let payload_len = header.size - header.header_size;
    if payload_len > MAX_MOOF_PAYLOAD {
        return Err(DemuxError::BufferTooSmall { typ: header.typ, len: payload_len });
    }
    let payload = read_slice_at(src, header.payload_start(), payload_len)?;

    let mut frag = MovieFragment {
        offset: header.start,
        size: header.size,
        sequence_number: 0,
        trafs: Vec::new(),
        pssh: Vec::new(),
    };

    // data chained across trafs when no explicit base offset is given
    let mut data_cursor = header.start;

    let mut pos = 0u64;
    while pos < payload_len {
        let child = child_header(&payload, pos, header)?;
        let body = child_body(&payload, &child, payload_len);
        match &child.typ.0 {
            b"mfhd" => {
                let mut cur = Cursor::new(body);
                let _full = read_full_box_header(&mut cur)?;
                frag.sequence_number = read_u32(&mut cur)?;
            }
            b"traf" => {
                let traf_number = frag.trafs.len() as u32 + 1;
                let traf = parse_traf(body, header, traf_number, &mut data_cursor, ctx)?;
                frag.trafs.push(traf);
            }
            b"uuid" => {
                if child.uuid == Some(UUID_PIFF_PSSH) {
                    frag.pssh.push(body.to_vec());
                }
            }
            _ => {}
        }
        pos = child_end(&child, pos, payload_len);
    }

    tracing::debug!(
        offset = frag.offset,
        sequence = frag.sequence_number,
        trafs = frag.trafs.len(),
        "parsed movie fragment"
    );
    Ok(frag)
}

/// Read a child box header from an in-memory payload at `pos`, reporting
/// offsets relative to the enclosing file position.
fn child_header(payload: &[u8], pos: u64, parent: &BoxHeader) -> Result<BoxHeader> {
    let mut cur = Cursor::new(&payload[pos as usize..]);
    let mut h = crate::parser::read_box_header(&mut cur, 0)?;
    if h.size == 0 {
        h.size = payload.len() as u64 - pos;
    }
    if pos + h.size > payload.len() as u64 {
        return Err(DemuxError::malformed(parent.typ, "child box overruns parent"));
    }
    h.start = pos;
    Ok(h)
}

fn child_body<'a>(payload: &'a [u8], child: &BoxHeader, parent_len: u64) -> &'a [u8] {
    let start = (child.start + child.header_size) as usize;
    let end = child.end(parent_len) as usize;
    &payload[start..end]
}

fn child_end(child: &BoxHeader, pos: u64, parent_len: u64) -> u64 {
    child.end(parent_len).max(pos + 8)
}

fn parse_traf(
    body: &[u8],
    moof: &BoxHeader,
    traf_number: u32,
    data_cursor: &mut u64,
    ctx: &mut FragmentContext,
) -> Result<TrackFragment> {
    let mut frag: Option<TrackFragment> = None;
    let mut encryption = None;

    let len = body.len() as u64;
    let mut pos = 0u64;
    while pos < len {
        let child = child_header(body, pos, moof)?;
        let child_bytes = child_body(body, &child, len);
        match &child.typ.0 {
            b"tfhd" => {
                let f = parse_tfhd(child_bytes, moof, traf_number, data_cursor, ctx)?;
                frag = Some(f);
            }
            b"tfdt" => {
                let frag = frag
                    .as_mut()
                    .ok_or_else(|| DemuxError::malformed(child.typ, "tfdt before tfhd"))?;
                let mut cur = Cursor::new(child_bytes);
                let full = read_full_box_header(&mut cur)?;
                let base_decode_time = crate::parser::read_versioned(&mut cur, full.version)?;
                ctx.timestamp_cursor.insert(frag.track_id, base_decode_time);
            }
            b"trun" => {
                let frag = frag
                    .as_mut()
                    .ok_or_else(|| DemuxError::malformed(child.typ, "trun before tfhd"))?;
                parse_trun(child_bytes, frag, data_cursor, ctx)?;
            }
            b"uuid" => {
                if child.uuid == Some(UUID_PIFF_SAMPLE_ENCRYPTION) {
                    encryption = Some(parse_sample_encryption(child_bytes, child.typ)?);
                }
            }
            _ => {}
        }
        pos = child_end(&child, pos, len);
    }

    let mut frag = frag.ok_or_else(|| DemuxError::malformed(moof.typ, "traf without tfhd"))?;
    frag.first_timestamp = frag
        .runs
        .first()
        .and_then(|r| r.samples.first())
        .map(|s| s.timestamp)
        .unwrap_or_else(|| ctx.timestamp_cursor.get(&frag.track_id).copied().unwrap_or(0));
    frag.encryption = encryption;
    Ok(frag)
}

fn parse_tfhd(
    body: &[u8],
    moof: &BoxHeader,
    traf_number: u32,
    data_cursor: &mut u64,
    ctx: &mut FragmentContext,
) -> Result<TrackFragment> {
    let mut cur = Cursor::new(body);
    let full = read_full_box_header(&mut cur)?;
    let flags = full.flags;
    let track_id = read_u32(&mut cur)?;

    let trex = ctx.trex.get(&track_id).copied().unwrap_or_default();
    let mut defaults = FragmentDefaults {
        sample_description_index: trex.sample_description_index,
        sample_duration: trex.sample_duration,
        sample_size: trex.sample_size,
        sample_flags: trex.sample_flags,
    };

    let base_data_offset = if flags & TFHD_BASE_DATA_OFFSET != 0 {
        read_uint(&mut cur, 8)?
    } else if traf_number == 1 {
        moof.start
    } else {
        // chained from the end of the previous traf's data
        *data_cursor
    };
    *data_cursor = base_data_offset;

    if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
        defaults.sample_description_index = read_u32(&mut cur)?;
    }
    if flags & TFHD_DEFAULT_SAMPLE_DURATION != 0 {
        defaults.sample_duration = read_u32(&mut cur)?;
    }
    if flags & TFHD_DEFAULT_SAMPLE_SIZE != 0 {
        defaults.sample_size = read_u32(&mut cur)?;
    }
    if flags & TFHD_DEFAULT_SAMPLE_FLAGS != 0 {
        defaults.sample_flags = read_u32(&mut cur)?;
    }

    Ok(TrackFragment {
        track_id,
        traf_number,
        moof_offset: moof.start,
        moof_size: moof.size,
        base_data_offset,
        defaults,
        first_timestamp: 0,
        runs: Vec::new(),
        max_sample_size: 0,
        encryption: None,
    })
}

fn parse_trun(
    body: &[u8],
    frag: &mut TrackFragment,
    data_cursor: &mut u64,
    ctx: &mut FragmentContext,
) -> Result<()> {
    let mut cur = Cursor::new(body);
    let full = read_full_box_header(&mut cur)?;
    let flags = full.flags;
    let entry_count = read_u32(&mut cur)?;

    let run_start = if flags & TRUN_DATA_OFFSET != 0 {
        let rel = read_i32(&mut cur)? as i64;
        (frag.base_data_offset as i64 + rel).max(0) as u64
    } else {
        // no per-run offset: continue where the previous run left off
        *data_cursor
    };
    let first_sample_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        Some(read_u32(&mut cur)?)
    } else {
        None
    };

    let ts = ctx.timestamp_cursor.entry(frag.track_id).or_insert(0);
    let mut sample_offset = run_start;
    let mut samples = Vec::with_capacity(entry_count as usize);
    for i in 0..entry_count {
        let duration = if flags & TRUN_SAMPLE_DURATION != 0 {
            read_u32(&mut cur)?
        } else {
            frag.defaults.sample_duration
        };
        let size = if flags & TRUN_SAMPLE_SIZE != 0 {
            read_u32(&mut cur)?
        } else {
            frag.defaults.sample_size
        };
        let mut sflags = if flags & TRUN_SAMPLE_FLAGS != 0 {
            read_u32(&mut cur)?
        } else {
            frag.defaults.sample_flags
        };
        if i == 0 {
            if let Some(f) = first_sample_flags {
                sflags = f;
            }
        }
        let composition_offset = if flags & TRUN_SAMPLE_COMPOSITION_OFFSET != 0 {
            if full.version == 0 {
                read_u32(&mut cur)? as i32
            } else {
                read_i32(&mut cur)?
            }
        } else {
            0
        };

        samples.push(FragmentSample {
            index: i,
            duration,
            size,
            flags: sflags,
            composition_offset,
            timestamp: *ts,
            data_offset: sample_offset,
        });
        *ts += duration as u64;
        sample_offset += size as u64;
        frag.max_sample_size = frag.max_sample_size.max(size);
    }
    *data_cursor = sample_offset;

    frag.runs.push(TrackRun {
        run_index: frag.runs.len() as u32,
        data_offset: run_start,
        first_sample_flags,
        samples,
    });
    Ok(())
}

/// PIFF sample-encryption table: optional algorithm override, then one IV
/// (and optional clear/encrypted subsample pairs) per sample.
fn parse_sample_encryption(body: &[u8], typ: FourCC) -> Result<SampleEncryption> {
    const FLAG_OVERRIDE_PARAMS: u32 = 0x000001;
    const FLAG_SUBSAMPLE_DATA: u32 = 0x000002;

    let mut cur = Cursor::new(body);
    let full = read_full_box_header(&mut cur)?;

    let mut enc = SampleEncryption { iv_size: 8, ..Default::default() };
    if full.flags & FLAG_OVERRIDE_PARAMS != 0 {
        enc.algorithm_id = Some(read_uint(&mut cur, 3)? as u32);
        enc.iv_size = cur.read_u8()?;
        let mut kid = [0u8; 16];
        cur.read_exact(&mut kid)?;
        enc.key_id = Some(kid);
    }
    if enc.iv_size == 0 || enc.iv_size > 16 {
        return Err(DemuxError::malformed(typ, "bad IV size"));
    }

    let sample_count = read_u32(&mut cur)?;
    let remaining = body.len() as u64 - cur.position();
    if (sample_count as u64) * enc.iv_size as u64 > remaining {
        return Err(DemuxError::malformed(typ, "encryption entry count overruns box"));
    }
    for _ in 0..sample_count {
        let mut iv = vec![0u8; enc.iv_size as usize];
        cur.read_exact(&mut iv)?;
        let mut info = EncryptionInfo { iv, subsamples: Vec::new() };
        if full.flags & FLAG_SUBSAMPLE_DATA != 0 {
            let pairs = read_u16(&mut cur)?;
            for _ in 0..pairs {
                let clear_bytes = read_u16(&mut cur)?;
                let encrypted_bytes = read_u32(&mut cur)?;
                info.subsamples.push(SubSampleRange { clear_bytes, encrypted_bytes });
            }
        }
        enc.entries.push(info);
    }
    Ok(enc)
}

/// Parse `trex` payload (FullBox already included in `body`).
pub fn parse_trex(body: &[u8]) -> Result<(u32, TrexDefaults)> {
    let mut cur = Cursor::new(body);
    let _full = read_full_box_header(&mut cur)?;
    let track_id = read_u32(&mut cur)?;
    let defaults = TrexDefaults {
        sample_description_index: read_u32(&mut cur)?,
        sample_duration: read_u32(&mut cur)?,
        sample_size: read_u32(&mut cur)?,
        sample_flags: read_u32(&mut cur)?,
    };
    Ok((track_id, defaults))
}
