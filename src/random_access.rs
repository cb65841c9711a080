use crate::error::{DemuxError, Result};
use crate::parser::{read_box_header, read_full_box_header, read_u32, read_uint, read_versioned};
use crate::source::{read_exact_at, read_slice_at, ByteSource};
use std::io::Cursor;

/// One tfra row: where the sync sample at `time` lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TfraEntry {
    pub time: u64,
    pub moof_offset: u64,
    /// 1-based traf number within the moof.
    pub traf_number: u32,
    /// 1-based trun number within the traf.
    pub trun_number: u32,
    /// 1-based sample number within the trun.
    pub sample_number: u32,
}

/// Per-track random-access index parsed from one `tfra` box. Parsed at most
/// once per track and read-only afterwards.
#[derive(Debug, Clone)]
pub struct TrackRandomAccess {
    pub track_id: u32,
    pub entries: Vec<TfraEntry>,
}

/// Locate and parse the trailing `mfra` index, if the file carries one.
///
/// The last 16 bytes of the file are an `mfro` box whose final field is the
/// size of the `mfra` box it closes. A file without the trailer is not an
/// error; the result is simply empty.
pub fn parse_mfra<S: ByteSource + ?Sized>(src: &mut S, file_len: u64) -> Result<Vec<TrackRandomAccess>> {
    if file_len < 16 {
        return Ok(Vec::new());
    }
    let mut trailer = [0u8; 16];
    read_exact_at(src, file_len - 16, &mut trailer)?;
    let size = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if size != 16 || &trailer[4..8] != b"mfro" {
        return Ok(Vec::new());
    }
    let mfra_size = u32::from_be_bytes([trailer[12], trailer[13], trailer[14], trailer[15]]) as u64;
    if mfra_size > file_len || mfra_size < 8 {
        return Ok(Vec::new());
    }

    let mfra_offset = file_len - mfra_size;
    let header = read_box_header(src, mfra_offset)?;
    if &header.typ.0 != b"mfra" || header.size != mfra_size {
        return Err(DemuxError::malformed(header.typ, "mfro does not point at an mfra box"));
    }

    let payload = read_slice_at(src, header.payload_start(), header.size - header.header_size)?;
    let mut indices = Vec::new();
    let len = payload.len() as u64;
    let mut pos = 0u64;
    while pos + 8 <= len {
        let mut cur = Cursor::new(&payload[pos as usize..]);
        let mut child = read_box_header(&mut cur, 0)?;
        if child.size == 0 {
            child.size = len - pos;
        }
        if pos + child.size > len {
            return Err(DemuxError::malformed(header.typ, "child box overruns mfra"));
        }
        if &child.typ.0 == b"tfra" {
            let body = &payload[(pos + child.header_size) as usize..(pos + child.size) as usize];
            indices.push(parse_tfra(body)?);
        }
        pos += child.size;
    }

    tracing::debug!(tracks = indices.len(), "parsed random-access trailer");
    Ok(indices)
}

fn parse_tfra(body: &[u8]) -> Result<TrackRandomAccess> {
    let typ = crate::boxes::FourCC(*b"tfra");
    let mut cur = Cursor::new(body);
    let full = read_full_box_header(&mut cur)?;
    if full.version > 1 {
        return Err(DemuxError::malformed(typ, "unknown tfra version"));
    }
    let track_id = read_u32(&mut cur)?;

    // 26 reserved bits, then three 2-bit (length - 1) fields
    let packed = read_u32(&mut cur)?;
    let traf_width = ((packed >> 4) & 0x3) as usize + 1;
    let trun_width = ((packed >> 2) & 0x3) as usize + 1;
    let sample_width = (packed & 0x3) as usize + 1;

    let entry_count = read_u32(&mut cur)?;
    let entry_size = if full.version == 1 { 16 } else { 8 } + traf_width + trun_width + sample_width;
    let remaining = body.len() as u64 - cur.position();
    if entry_count as u64 * entry_size as u64 > remaining {
        return Err(DemuxError::malformed(typ, "entry count overruns box"));
    }

    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let time = read_versioned(&mut cur, full.version)?;
        let moof_offset = read_versioned(&mut cur, full.version)?;
        let traf_number = read_uint(&mut cur, traf_width)? as u32;
        let trun_number = read_uint(&mut cur, trun_width)? as u32;
        let sample_number = read_uint(&mut cur, sample_width)? as u32;
        entries.push(TfraEntry { time, moof_offset, traf_number, trun_number, sample_number });
    }

    Ok(TrackRandomAccess { track_id, entries })
}
