use crate::boxes::{is_container, BoxHeader, FourCC, UUID_PIFF_PSSH};
use crate::error::{DemuxError, Result};
use crate::meta::{MetaData, MetaKey};
use crate::parser::{read_box_header, read_full_box_header, read_i32, read_u16, read_u32, read_versioned};
use crate::sample_table::{CompositionOffsetEntry, SampleToChunkEntry, TimeToSampleEntry};
use crate::source::{read_slice_at, ByteSource};
use crate::track::{Track, TrexDefaults};
use byteorder::ReadBytesExt;
use std::collections::HashMap;
use std::io::{Cursor, Read};

/// Codec-config payloads (esds, avcC) are decoded through a bounded scratch
/// buffer; anything larger is rejected rather than trusted.
const CODEC_CONFIG_CAP: u64 = 4096;
/// Upper bound for sample-table payloads read into memory at once.
const TABLE_PAYLOAD_CAP: u64 = 64 << 20;

/// MPEG-4 audio sampling-rate table indexed by the esds frequency index.
const SAMPLE_RATE_TABLE: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Everything learned from the metadata pass: tracks, file-level metadata,
/// and the fragment defaults. `metadata_complete` is the explicit "end of
/// moov reached" signal.
#[derive(Debug, Default)]
pub struct MovieMetadata {
    pub tracks: Vec<Track>,
    pub file_meta: MetaData,
    pub trex: HashMap<u32, TrexDefaults>,
    pub has_mvex: bool,
    pub metadata_complete: bool,
}

/// Walk top-level boxes until the end of `moov`. Fragments (`moof`) are not
/// touched here; they are parsed on demand later.
pub fn parse_metadata<S: ByteSource + ?Sized>(src: &mut S, file_len: u64) -> Result<MovieMetadata> {
    let mut parser = TreeParser {
        src,
        out: MovieMetadata::default(),
    };

    let mut offset = 0u64;
    while offset < file_len && !parser.out.metadata_complete {
        let header = read_box_header(parser.src, offset)?;
        let end = header.end(file_len);
        match &header.typ.0 {
            b"moov" => {
                let mut path = vec![header.typ];
                parser.walk(header.payload_start(), end, &mut path)?;
                parser.out.metadata_complete = true;
            }
            b"uuid" if header.uuid == Some(UUID_PIFF_PSSH) => {
                let body = parser.read_payload(&header, end, TABLE_PAYLOAD_CAP)?;
                parser.out.file_meta.set_blob(MetaKey::Pssh, body);
            }
            _ => {}
        }
        if end <= offset {
            return Err(DemuxError::malformed(header.typ, "box does not advance"));
        }
        offset = end;
    }

    tracing::debug!(
        tracks = parser.out.tracks.len(),
        fragmented = parser.out.has_mvex,
        "metadata pass finished"
    );
    Ok(parser.out)
}

struct TreeParser<'a, S: ?Sized> {
    src: &'a mut S,
    out: MovieMetadata,
}

impl<S: ByteSource + ?Sized> TreeParser<'_, S> {
    fn read_payload(&mut self, header: &BoxHeader, end: u64, cap: u64) -> Result<Vec<u8>> {
        let start = header.payload_start();
        let len = end.saturating_sub(start);
        if len > cap {
            return Err(DemuxError::BufferTooSmall { typ: header.typ, len });
        }
        Ok(read_slice_at(self.src, start, len)?)
    }

    fn current_track(&mut self) -> Option<&mut Track> {
        self.out.tracks.last_mut()
    }

    /// Recursive descent over the children of [start, end). `path` carries
    /// the ancestry for context-sensitive boxes (ilst values, cprt
    /// exclusion) and is restored before returning.
    fn walk(&mut self, start: u64, end: u64, path: &mut Vec<FourCC>) -> Result<()> {
        let mut offset = start;
        while offset + 8 <= end {
            let header = read_box_header(self.src, offset)?;
            let box_end = header.end(end);
            if box_end > end || box_end <= offset {
                return Err(DemuxError::malformed(header.typ, "child box overruns parent"));
            }

            let in_ilst = path.last().map(|t| &t.0 == b"ilst").unwrap_or(false);
            if is_container(&header.typ) || in_ilst && &header.typ.0 != b"data" {
                if &header.typ.0 == b"trak" {
                    self.out.tracks.push(Track::new());
                }
                if &header.typ.0 == b"mvex" {
                    self.out.has_mvex = true;
                }
                path.push(header.typ);
                self.walk(header.payload_start(), box_end, path)?;
                path.pop();
                if &header.typ.0 == b"trak" {
                    if let Some(track) = self.current_track() {
                        track.verify();
                    }
                }
            } else if &header.typ.0 == b"meta" {
                // FullBox container: version/flags precede the children
                path.push(header.typ);
                self.walk(header.payload_start() + 4, box_end, path)?;
                path.pop();
            } else {
                self.leaf(&header, box_end, path)?;
            }
            offset = box_end;
        }
        Ok(())
    }

    fn leaf(&mut self, header: &BoxHeader, end: u64, path: &[FourCC]) -> Result<()> {
        match &header.typ.0 {
            b"mvhd" => self.on_mvhd(header, end),
            b"tkhd" => self.on_tkhd(header, end),
            b"mdhd" => self.on_mdhd(header, end),
            b"hdlr" => self.on_hdlr(header, end, path),
            b"stsd" => self.on_stsd(header, end),
            b"stts" => self.on_stts(header, end),
            b"ctts" => self.on_ctts(header, end),
            b"stsc" => self.on_stsc(header, end),
            b"stsz" => self.on_stsz(header, end),
            b"stz2" => self.on_stz2(header, end),
            b"stco" => self.on_chunk_offsets(header, end, 4),
            b"co64" => self.on_chunk_offsets(header, end, 8),
            b"stss" => self.on_stss(header, end),
            b"trex" => self.on_trex(header, end),
            b"pssh" => {
                let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
                self.out.file_meta.set_blob(MetaKey::Pssh, body);
                Ok(())
            }
            b"data" => self.on_ilst_data(header, end, path),
            _ => Ok(()),
        }
    }

    fn on_mvhd(&mut self, header: &BoxHeader, end: u64) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(body);
        let full = read_full_box_header(&mut cur)?;
        let _creation = read_versioned(&mut cur, full.version)?;
        let _modification = read_versioned(&mut cur, full.version)?;
        let timescale = read_u32(&mut cur)?;
        let duration = read_versioned(&mut cur, full.version)?;
        self.out.file_meta.set_int(MetaKey::Timescale, timescale as i64);
        self.out.file_meta.set_int(MetaKey::Duration, duration as i64);
        Ok(())
    }

    fn on_tkhd(&mut self, header: &BoxHeader, end: u64) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(body);
        let full = read_full_box_header(&mut cur)?;
        let _creation = read_versioned(&mut cur, full.version)?;
        let _modification = read_versioned(&mut cur, full.version)?;
        let track_id = read_u32(&mut cur)?;
        if let Some(track) = self.current_track() {
            track.id = track_id;
        }
        Ok(())
    }

    fn on_mdhd(&mut self, header: &BoxHeader, end: u64) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(body);
        let full = read_full_box_header(&mut cur)?;
        let _creation = read_versioned(&mut cur, full.version)?;
        let _modification = read_versioned(&mut cur, full.version)?;
        let timescale = read_u32(&mut cur)?;
        let duration = read_versioned(&mut cur, full.version)?;
        if timescale == 0 {
            return Err(DemuxError::malformed(header.typ, "zero timescale"));
        }
        if let Some(track) = self.current_track() {
            track.timescale = timescale;
            track.duration = duration;
        }
        Ok(())
    }

    /// Only the mdia-level handler declares the track's media type; hdlr
    /// boxes under meta are ignored.
    fn on_hdlr(&mut self, header: &BoxHeader, end: u64, path: &[FourCC]) -> Result<()> {
        if path.last().map(|t| &t.0 != b"mdia").unwrap_or(true) {
            return Ok(());
        }
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(body);
        let _full = read_full_box_header(&mut cur)?;
        let _pre_defined = read_u32(&mut cur)?;
        let mut handler = [0u8; 4];
        cur.read_exact(&mut handler)?;
        if let Some(track) = self.current_track() {
            track.is_video = &handler == b"vide";
        }
        Ok(())
    }

    // ---- stbl tables --------------------------------------------------

    fn on_stts(&mut self, header: &BoxHeader, end: u64) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(body);
        let _full = read_full_box_header(&mut cur)?;
        let entry_count = read_u32(&mut cur)?;
        let mut entries = Vec::with_capacity(entry_count.min(1 << 20) as usize);
        for _ in 0..entry_count {
            entries.push(TimeToSampleEntry {
                sample_count: read_u32(&mut cur)?,
                sample_delta: read_u32(&mut cur)?,
            });
        }
        if let Some(track) = self.current_track() {
            track.sample_table.set_time_to_sample(entries);
        }
        Ok(())
    }

    fn on_ctts(&mut self, header: &BoxHeader, end: u64) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(body);
        let _full = read_full_box_header(&mut cur)?;
        let entry_count = read_u32(&mut cur)?;
        let mut entries = Vec::with_capacity(entry_count.min(1 << 20) as usize);
        for _ in 0..entry_count {
            entries.push(CompositionOffsetEntry {
                sample_count: read_u32(&mut cur)?,
                sample_offset: read_i32(&mut cur)?,
            });
        }
        if let Some(track) = self.current_track() {
            track.sample_table.set_composition_offsets(entries);
        }
        Ok(())
    }

    fn on_stsc(&mut self, header: &BoxHeader, end: u64) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(body);
        let _full = read_full_box_header(&mut cur)?;
        let entry_count = read_u32(&mut cur)?;
        let mut entries = Vec::with_capacity(entry_count.min(1 << 20) as usize);
        for _ in 0..entry_count {
            entries.push(SampleToChunkEntry {
                first_chunk: read_u32(&mut cur)?,
                samples_per_chunk: read_u32(&mut cur)?,
                sample_description_index: read_u32(&mut cur)?,
            });
        }
        if let Some(track) = self.current_track() {
            track.sample_table.set_sample_to_chunk(entries);
        }
        Ok(())
    }

    fn on_stsz(&mut self, header: &BoxHeader, end: u64) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(body);
        let _full = read_full_box_header(&mut cur)?;
        let fixed_size = read_u32(&mut cur)?;
        let sample_count = read_u32(&mut cur)?;
        let mut sizes = Vec::new();
        if fixed_size == 0 {
            sizes.reserve(sample_count.min(1 << 22) as usize);
            for _ in 0..sample_count {
                sizes.push(read_u32(&mut cur)?);
            }
        }
        if let Some(track) = self.current_track() {
            track.sample_table.set_sample_sizes(fixed_size, sample_count, sizes);
        }
        Ok(())
    }

    fn on_stz2(&mut self, header: &BoxHeader, end: u64) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(body);
        let _full = read_full_box_header(&mut cur)?;
        let packed = read_u32(&mut cur)?; // 24 bits reserved + field_size
        let field_size = (packed & 0xff) as u8;
        let sample_count = read_u32(&mut cur)?;
        let mut sizes = Vec::with_capacity(sample_count.min(1 << 22) as usize);
        match field_size {
            4 => {
                let mut i = 0;
                while i < sample_count {
                    let byte = cur.read_u8()?;
                    sizes.push((byte >> 4) as u32);
                    i += 1;
                    if i < sample_count {
                        sizes.push((byte & 0x0f) as u32);
                        i += 1;
                    }
                }
            }
            8 => {
                for _ in 0..sample_count {
                    sizes.push(cur.read_u8()? as u32);
                }
            }
            16 => {
                for _ in 0..sample_count {
                    sizes.push(read_u16(&mut cur)? as u32);
                }
            }
            _ => return Err(DemuxError::malformed(header.typ, "bad stz2 field size")),
        }
        if let Some(track) = self.current_track() {
            track.sample_table.set_sample_sizes(0, sample_count, sizes);
        }
        Ok(())
    }

    fn on_chunk_offsets(&mut self, header: &BoxHeader, end: u64, width: usize) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(body);
        let _full = read_full_box_header(&mut cur)?;
        let entry_count = read_u32(&mut cur)?;
        let mut offsets = Vec::with_capacity(entry_count.min(1 << 22) as usize);
        for _ in 0..entry_count {
            offsets.push(crate::parser::read_uint(&mut cur, width)?);
        }
        if let Some(track) = self.current_track() {
            track.sample_table.set_chunk_offsets(offsets);
        }
        Ok(())
    }

    fn on_stss(&mut self, header: &BoxHeader, end: u64) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(body);
        let _full = read_full_box_header(&mut cur)?;
        let entry_count = read_u32(&mut cur)?;
        let mut numbers = Vec::with_capacity(entry_count.min(1 << 22) as usize);
        for _ in 0..entry_count {
            numbers.push(read_u32(&mut cur)?);
        }
        if let Some(track) = self.current_track() {
            track.sample_table.set_sync_samples(numbers);
        }
        Ok(())
    }

    fn on_trex(&mut self, header: &BoxHeader, end: u64) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let (track_id, defaults) = crate::fragment::parse_trex(&body)?;
        self.out.trex.insert(track_id, defaults);
        Ok(())
    }

    // ---- stsd and codec configuration ---------------------------------

    fn on_stsd(&mut self, header: &BoxHeader, end: u64) -> Result<()> {
        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        let mut cur = Cursor::new(&body[..]);
        let _full = read_full_box_header(&mut cur)?;
        let entry_count = read_u32(&mut cur)?;
        if entry_count != 1 {
            // single codec per track only; drop the track, keep the file
            if let Some(track) = self.current_track() {
                tracing::warn!(entries = entry_count, "multi-codec stsd, skipping track");
                track.skip = true;
            }
            return Ok(());
        }

        let entry_start = cur.position() as usize;
        let entry_size = read_u32(&mut cur)? as usize;
        let mut codec = [0u8; 4];
        cur.read_exact(&mut codec)?;
        if entry_size < 8 || entry_start + entry_size > body.len() {
            return Err(DemuxError::malformed(header.typ, "sample entry overruns stsd"));
        }
        let entry = &body[entry_start..entry_start + entry_size];

        match &codec {
            b"avc1" => self.on_visual_entry(entry, "video/avc", header.start + 8)?,
            b"s263" => self.on_visual_entry(entry, "video/3gpp", header.start + 8)?,
            b"mp4a" => self.on_audio_entry(entry)?,
            other => {
                if let Some(track) = self.current_track() {
                    tracing::warn!(codec = %FourCC(*other), "unsupported sample entry, skipping track");
                    track.skip = true;
                }
            }
        }
        Ok(())
    }

    /// Visual sample entry: 8-byte box header, 6 reserved, 2 dri, 16
    /// pre-defined, width, height, then 50 more fixed bytes before any
    /// child boxes (avcC and friends).
    fn on_visual_entry(&mut self, entry: &[u8], mime: &str, _file_offset: u64) -> Result<()> {
        let typ = FourCC([entry[4], entry[5], entry[6], entry[7]]);
        if entry.len() < 86 {
            return Err(DemuxError::malformed(typ, "visual sample entry too short"));
        }
        let width = u16::from_be_bytes([entry[32], entry[33]]);
        let height = u16::from_be_bytes([entry[34], entry[35]]);
        if let Some(track) = self.current_track() {
            track.meta.set_str(MetaKey::Mime, mime);
            track.meta.set_int(MetaKey::Width, width as i64);
            track.meta.set_int(MetaKey::Height, height as i64);
            track.is_video = true;
        }
        self.visit_entry_children(&entry[86..], typ)
    }

    /// Audio sample entry: 8-byte box header, 6 reserved, 2 dri, 8
    /// reserved, channels, sample size, 4 reserved, 16.16 sample rate,
    /// then child boxes (esds).
    fn on_audio_entry(&mut self, entry: &[u8]) -> Result<()> {
        let typ = FourCC(*b"mp4a");
        if entry.len() < 36 {
            return Err(DemuxError::malformed(typ, "audio sample entry too short"));
        }
        let channels = u16::from_be_bytes([entry[24], entry[25]]);
        let sample_rate = u32::from_be_bytes([entry[32], entry[33], entry[34], entry[35]]) >> 16;
        if let Some(track) = self.current_track() {
            track.meta.set_str(MetaKey::Mime, "audio/mp4a-latm");
            track.meta.set_int(MetaKey::ChannelCount, channels as i64);
            track.meta.set_int(MetaKey::SampleRate, sample_rate as i64);
        }
        self.visit_entry_children(&entry[36..], typ)
    }

    fn visit_entry_children(&mut self, mut rest: &[u8], parent: FourCC) -> Result<()> {
        while rest.len() >= 8 {
            let size = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            let typ = FourCC([rest[4], rest[5], rest[6], rest[7]]);
            if size < 8 || size > rest.len() {
                return Err(DemuxError::malformed(parent, "sample entry child overruns entry"));
            }
            let body = &rest[8..size];
            match &typ.0 {
                b"avcC" => self.on_avcc(typ, body)?,
                b"esds" => self.on_esds(typ, body)?,
                _ => {}
            }
            rest = &rest[size..];
        }
        Ok(())
    }

    fn on_avcc(&mut self, typ: FourCC, body: &[u8]) -> Result<()> {
        if body.len() as u64 > CODEC_CONFIG_CAP {
            return Err(DemuxError::BufferTooSmall { typ, len: body.len() as u64 });
        }
        if body.len() < 7 || body[0] != 1 {
            return Err(DemuxError::malformed(typ, "bad AVC configuration"));
        }
        let nal_length_size = (body[4] & 0x03) + 1;
        if let Some(track) = self.current_track() {
            track.nal_length_size = Some(nal_length_size);
            track.meta.set_int(MetaKey::NalLengthSize, nal_length_size as i64);
            track.meta.set_blob(MetaKey::AvcConfig, body.to_vec());
        }
        Ok(())
    }

    fn on_esds(&mut self, typ: FourCC, body: &[u8]) -> Result<()> {
        if body.len() as u64 > CODEC_CONFIG_CAP {
            return Err(DemuxError::BufferTooSmall { typ, len: body.len() as u64 });
        }
        let mut cur = Cursor::new(body);
        let _full = read_full_box_header(&mut cur)?;
        let info = parse_es_descriptor(&mut cur, typ)?;

        if let Some(track) = self.current_track() {
            track.meta.set_blob(MetaKey::EsdsConfig, body.to_vec());
            if info.qcelp {
                track.meta.set_str(MetaKey::Mime, "audio/qcelp");
                return Ok(());
            }
            if let Some(rate) = info.sample_rate {
                track.meta.set_int(MetaKey::SampleRate, rate as i64);
            }
            if let Some(ch) = info.channels {
                track.meta.set_int(MetaKey::ChannelCount, ch as i64);
            }
        }
        Ok(())
    }

    // ---- iTunes metadata ----------------------------------------------

    /// `data` box values are only metadata inside moov/udta/meta/ilst, and
    /// never under a cprt atom.
    fn on_ilst_data(&mut self, header: &BoxHeader, end: u64, path: &[FourCC]) -> Result<()> {
        let n = path.len();
        if n < 4
            || &path[n - 4].0 != b"udta"
            || &path[n - 3].0 != b"meta"
            || &path[n - 2].0 != b"ilst"
        {
            return Ok(());
        }
        let atom = path[n - 1];
        if &atom.0 == b"cprt" {
            return Ok(());
        }
        let key = match &atom.0 {
            [0xa9, b'n', b'a', b'm'] => MetaKey::Title,
            [0xa9, b'A', b'R', b'T'] => MetaKey::Artist,
            [0xa9, b'a', b'l', b'b'] => MetaKey::Album,
            [0xa9, b'd', b'a', b'y'] => MetaKey::Year,
            [0xa9, b'w', b'r', b't'] => MetaKey::Writer,
            [0xa9, b'g', b'e', b'n'] | b"gnre" => MetaKey::Genre,
            b"covr" => MetaKey::CoverArt,
            _ => return Ok(()),
        };

        let body = self.read_payload(header, end, TABLE_PAYLOAD_CAP)?;
        if body.len() < 8 {
            return Err(DemuxError::malformed(header.typ, "data box too short"));
        }
        let type_indicator = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        let value = &body[8..];
        if key == MetaKey::CoverArt || type_indicator != 1 {
            self.out.file_meta.set_blob(key, value.to_vec());
        } else {
            self.out
                .file_meta
                .set_str(key, String::from_utf8_lossy(value).to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct EsdsInfo {
    object_type: u8,
    sample_rate: Option<u32>,
    channels: Option<u8>,
    qcelp: bool,
}

/// Expandable descriptor length: up to four bytes of 7-bit groups with a
/// continuation bit.
fn read_descriptor_header<R: Read>(r: &mut R) -> Result<(u8, u32)> {
    let tag = r.read_u8()?;
    let mut len = 0u32;
    for _ in 0..4 {
        let b = r.read_u8()?;
        len = (len << 7) | (b & 0x7f) as u32;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok((tag, len))
}

/// Field-by-field decode of the ES descriptor chain down to the MPEG-4
/// AudioSpecificConfig.
fn parse_es_descriptor<R: Read>(r: &mut R, typ: FourCC) -> Result<EsdsInfo> {
    const TAG_ES_DESCRIPTOR: u8 = 0x03;
    const TAG_DECODER_CONFIG: u8 = 0x04;
    const TAG_DECODER_SPECIFIC: u8 = 0x05;
    const OBJECT_TYPE_QCELP: u8 = 0xe1;

    let (tag, _len) = read_descriptor_header(r)?;
    if tag != TAG_ES_DESCRIPTOR {
        return Err(DemuxError::malformed(typ, "missing ES descriptor"));
    }
    let _es_id = read_u16(r)?;
    let es_flags = r.read_u8()?;
    if es_flags & 0x80 != 0 {
        let _depends_on = read_u16(r)?;
    }
    if es_flags & 0x40 != 0 {
        let url_len = r.read_u8()?;
        crate::parser::skip(r, url_len as u64)?;
    }
    if es_flags & 0x20 != 0 {
        let _ocr_es_id = read_u16(r)?;
    }

    let (tag, _len) = read_descriptor_header(r)?;
    if tag != TAG_DECODER_CONFIG {
        return Err(DemuxError::malformed(typ, "missing decoder config descriptor"));
    }
    let object_type = r.read_u8()?;
    let mut info = EsdsInfo { object_type, ..Default::default() };
    if object_type == OBJECT_TYPE_QCELP {
        // QCELP masquerading as MPEG-4 audio; no AudioSpecificConfig follows
        info.qcelp = true;
        return Ok(info);
    }

    let _stream_type = r.read_u8()?;
    crate::parser::skip(r, 3)?; // buffer size
    let _max_bitrate = read_u32(r)?;
    let _avg_bitrate = read_u32(r)?;

    let (tag, len) = read_descriptor_header(r)?;
    if tag != TAG_DECODER_SPECIFIC || len < 2 {
        return Err(DemuxError::malformed(typ, "missing decoder specific info"));
    }

    // AudioSpecificConfig: 5 bits object type, 4 bits frequency index,
    // (24-bit explicit rate when index == 15), 4 bits channel configuration
    let b0 = r.read_u8()?;
    let b1 = r.read_u8()?;
    let _audio_object_type = b0 >> 3;
    let freq_index = ((b0 & 0x07) << 1) | (b1 >> 7);
    let (rate, channels) = if freq_index == 15 {
        if len < 5 {
            return Err(DemuxError::malformed(typ, "truncated explicit sample rate"));
        }
        let b2 = r.read_u8()?;
        let b3 = r.read_u8()?;
        let b4 = r.read_u8()?;
        // 24 bits of rate starting below the frequency index
        let rate = ((b1 & 0x7f) as u32) << 17
            | (b2 as u32) << 9
            | (b3 as u32) << 1
            | (b4 >> 7) as u32;
        let channels = (b4 >> 3) & 0x0f;
        (rate, channels)
    } else {
        let rate = *SAMPLE_RATE_TABLE
            .get(freq_index as usize)
            .ok_or_else(|| DemuxError::Unsupported(format!("frequency index {freq_index}")))?;
        let channels = (b1 >> 3) & 0x0f;
        (rate, channels)
    };

    info.sample_rate = Some(rate);
    info.channels = Some(channels);
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_length_continuation() {
        // tag 0x03, length 0x81 0x10 -> 0x90
        let data = [0x03u8, 0x81, 0x10];
        let mut cur = Cursor::new(&data[..]);
        let (tag, len) = read_descriptor_header(&mut cur).unwrap();
        assert_eq!(tag, 0x03);
        assert_eq!(len, 0x90);
    }

    fn esds_payload(object_type: u8, asc: &[u8]) -> Vec<u8> {
        let mut dsi = vec![0x05, asc.len() as u8];
        dsi.extend_from_slice(asc);
        let mut dcd = vec![
            0x04,
            (13 + dsi.len()) as u8,
            object_type,
            0x15, // stream type
            0, 0, 0, // buffer size
            0, 0, 0, 0, // max bitrate
            0, 0, 0, 0, // avg bitrate
        ];
        dcd.extend_from_slice(&dsi);
        let mut esd = vec![0x03, (3 + dcd.len()) as u8, 0, 1, 0];
        esd.extend_from_slice(&dcd);
        esd
    }

    #[test]
    fn aac_config_via_rate_table() {
        // AAC LC, frequency index 4 (44100), 2 channels:
        // 00010 0100 0010 ... -> bytes 0x12 0x10
        let payload = esds_payload(0x40, &[0x12, 0x10]);
        let mut cur = Cursor::new(&payload[..]);
        let info = parse_es_descriptor(&mut cur, FourCC(*b"esds")).unwrap();
        assert_eq!(info.object_type, 0x40);
        assert_eq!(info.sample_rate, Some(44100));
        assert_eq!(info.channels, Some(2));
        assert!(!info.qcelp);
    }

    #[test]
    fn explicit_sample_rate() {
        // frequency index 15 -> 24-bit explicit rate 48000, 1 channel
        // bits: 00010 111 1 <24 bits rate> 0001 ...
        let rate: u32 = 48000;
        let mut bits = 0u64;
        let mut nbits = 0;
        let mut push = |val: u64, n: u32| {
            bits = (bits << n) | val;
            nbits += n;
        };
        push(2, 5); // object type
        push(15, 4); // frequency index
        push(rate as u64, 24);
        push(1, 4); // channels
        push(0, 3); // pad to 40 bits
        let b = bits.to_be_bytes();
        let asc = &b[8 - (nbits as usize / 8)..];
        let payload = esds_payload(0x40, asc);
        let mut cur = Cursor::new(&payload[..]);
        let info = parse_es_descriptor(&mut cur, FourCC(*b"esds")).unwrap();
        assert_eq!(info.sample_rate, Some(48000));
        assert_eq!(info.channels, Some(1));
    }

    #[test]
    fn qcelp_object_type() {
        let payload = esds_payload(0xe1, &[0x12, 0x10]);
        let mut cur = Cursor::new(&payload[..]);
        let info = parse_es_descriptor(&mut cur, FourCC(*b"esds")).unwrap();
        assert!(info.qcelp);
    }

    #[test]
    fn reserved_frequency_index_rejected() {
        // frequency index 13 is reserved
        let payload = esds_payload(0x40, &[0x16, 0x90]);
        let mut cur = Cursor::new(&payload[..]);
        assert!(matches!(
            parse_es_descriptor(&mut cur, FourCC(*b"esds")),
            Err(DemuxError::Unsupported(_))
        ));
    }
}
