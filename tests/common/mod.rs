//! Builders for synthetic MP4 byte streams used across the integration
//! tests. Everything is assembled in memory and read through `Cursor`.
#![allow(dead_code)]

pub fn boxx(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
    out.extend_from_slice(typ);
    out.extend_from_slice(payload);
    out
}

pub fn full_box(typ: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = vec![version, (flags >> 16) as u8, (flags >> 8) as u8, flags as u8];
    payload.extend_from_slice(body);
    boxx(typ, &payload)
}

pub fn uuid_box(uuid: &[u8; 16], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + payload.len());
    out.extend_from_slice(&((24 + payload.len()) as u32).to_be_bytes());
    out.extend_from_slice(b"uuid");
    out.extend_from_slice(uuid);
    out.extend_from_slice(payload);
    out
}

pub fn container(typ: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = children.iter().flatten().copied().collect();
    boxx(typ, &payload)
}

pub fn ftyp() -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(b"isom");
    p.extend_from_slice(&0u32.to_be_bytes());
    p.extend_from_slice(b"isom");
    p.extend_from_slice(b"iso2");
    boxx(b"ftyp", &p)
}

// ---- moov ------------------------------------------------------------

pub fn mvhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&0u32.to_be_bytes()); // creation
    b.extend_from_slice(&0u32.to_be_bytes()); // modification
    b.extend_from_slice(&timescale.to_be_bytes());
    b.extend_from_slice(&duration.to_be_bytes());
    b.extend_from_slice(&[0u8; 80]); // rate .. next_track_id
    full_box(b"mvhd", 0, 0, &b)
}

pub fn tkhd(track_id: u32) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&0u32.to_be_bytes()); // creation
    b.extend_from_slice(&0u32.to_be_bytes()); // modification
    b.extend_from_slice(&track_id.to_be_bytes());
    b.extend_from_slice(&[0u8; 68]); // reserved .. height
    full_box(b"tkhd", 0, 0, &b)
}

pub fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&0u32.to_be_bytes());
    b.extend_from_slice(&0u32.to_be_bytes());
    b.extend_from_slice(&timescale.to_be_bytes());
    b.extend_from_slice(&duration.to_be_bytes());
    b.extend_from_slice(&[0x55, 0xc4, 0, 0]); // language "und" + pre_defined
    full_box(b"mdhd", 0, 0, &b)
}

pub fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&0u32.to_be_bytes());
    b.extend_from_slice(handler);
    b.extend_from_slice(&[0u8; 12]);
    b.push(0); // empty name
    full_box(b"hdlr", 0, 0, &b)
}

/// Minimal valid avcC: configuration version 1, 4-byte NAL length prefixes.
pub fn avcc() -> Vec<u8> {
    boxx(b"avcC", &[1, 0x64, 0x00, 0x1f, 0xff, 0xe1, 0x00])
}

pub fn avc1_entry(width: u16, height: u16) -> Vec<u8> {
    let mut body = vec![0u8; 78];
    body[6] = 0; body[7] = 1; // data_reference_index
    body[24..26].copy_from_slice(&width.to_be_bytes());
    body[26..28].copy_from_slice(&height.to_be_bytes());
    let mut entry = Vec::new();
    let child = avcc();
    entry.extend_from_slice(&((8 + body.len() + child.len()) as u32).to_be_bytes());
    entry.extend_from_slice(b"avc1");
    entry.extend_from_slice(&body);
    entry.extend_from_slice(&child);
    entry
}

/// AAC LC, 44100 Hz, stereo AudioSpecificConfig.
pub fn esds() -> Vec<u8> {
    let asc = [0x12u8, 0x10];
    let mut dsi = vec![0x05, asc.len() as u8];
    dsi.extend_from_slice(&asc);
    let mut dcd = vec![0x04, (13 + dsi.len()) as u8, 0x40, 0x15, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    dcd.extend_from_slice(&dsi);
    let mut esd = vec![0x03, (3 + dcd.len()) as u8, 0, 1, 0];
    esd.extend_from_slice(&dcd);
    full_box(b"esds", 0, 0, &esd)
}

pub fn mp4a_entry(channels: u16, sample_rate: u32) -> Vec<u8> {
    let mut body = vec![0u8; 28];
    body[6] = 0; body[7] = 1; // data_reference_index
    body[16..18].copy_from_slice(&channels.to_be_bytes());
    body[18..20].copy_from_slice(&16u16.to_be_bytes()); // sample size
    body[24..28].copy_from_slice(&(sample_rate << 16).to_be_bytes());
    let mut entry = Vec::new();
    let child = esds();
    entry.extend_from_slice(&((8 + body.len() + child.len()) as u32).to_be_bytes());
    entry.extend_from_slice(b"mp4a");
    entry.extend_from_slice(&body);
    entry.extend_from_slice(&child);
    entry
}

pub fn stsd(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for e in entries {
        b.extend_from_slice(e);
    }
    full_box(b"stsd", 0, 0, &b)
}

pub fn stts(entries: &[(u32, u32)]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for &(count, delta) in entries {
        b.extend_from_slice(&count.to_be_bytes());
        b.extend_from_slice(&delta.to_be_bytes());
    }
    full_box(b"stts", 0, 0, &b)
}

pub fn stsc(entries: &[(u32, u32, u32)]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for &(first, per, sdi) in entries {
        b.extend_from_slice(&first.to_be_bytes());
        b.extend_from_slice(&per.to_be_bytes());
        b.extend_from_slice(&sdi.to_be_bytes());
    }
    full_box(b"stsc", 0, 0, &b)
}

pub fn stsz(sizes: &[u32]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&0u32.to_be_bytes());
    b.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
    for s in sizes {
        b.extend_from_slice(&s.to_be_bytes());
    }
    full_box(b"stsz", 0, 0, &b)
}

pub fn stco(offsets: &[u32]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&(offsets.len() as u32).to_be_bytes());
    for o in offsets {
        b.extend_from_slice(&o.to_be_bytes());
    }
    full_box(b"stco", 0, 0, &b)
}

pub fn stss(numbers: &[u32]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&(numbers.len() as u32).to_be_bytes());
    for n in numbers {
        b.extend_from_slice(&n.to_be_bytes());
    }
    full_box(b"stss", 0, 0, &b)
}

pub fn trex(track_id: u32, duration: u32, size: u32, flags: u32) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&track_id.to_be_bytes());
    b.extend_from_slice(&1u32.to_be_bytes()); // sample description index
    b.extend_from_slice(&duration.to_be_bytes());
    b.extend_from_slice(&size.to_be_bytes());
    b.extend_from_slice(&flags.to_be_bytes());
    full_box(b"trex", 0, 0, &b)
}

pub fn video_trak(track_id: u32, timescale: u32, stbl_extra: &[Vec<u8>]) -> Vec<u8> {
    let mut stbl_children = vec![stsd(&[avc1_entry(640, 480)])];
    stbl_children.extend_from_slice(stbl_extra);
    container(b"trak", &[
        tkhd(track_id),
        container(b"mdia", &[
            mdhd(timescale, 0),
            hdlr(b"vide"),
            container(b"minf", &[container(b"stbl", &stbl_children)]),
        ]),
    ])
}

pub fn audio_trak(track_id: u32, timescale: u32, stbl_extra: &[Vec<u8>]) -> Vec<u8> {
    let mut stbl_children = vec![stsd(&[mp4a_entry(2, 44100)])];
    stbl_children.extend_from_slice(stbl_extra);
    container(b"trak", &[
        tkhd(track_id),
        container(b"mdia", &[
            mdhd(timescale, 0),
            hdlr(b"soun"),
            container(b"minf", &[container(b"stbl", &stbl_children)]),
        ]),
    ])
}

// ---- fragments -------------------------------------------------------

/// One traf's worth of samples for `moof_with`. All per-sample fields are
/// written explicitly in the trun.
pub struct TrafSpec {
    pub track_id: u32,
    /// (duration, size, flags) per sample.
    pub samples: Vec<(u32, u32, u32)>,
    /// Emit a tfdt with this base decode time.
    pub base_decode_time: Option<u64>,
    /// Extra boxes appended to the traf (e.g. a PIFF senc uuid box).
    pub extra: Vec<Vec<u8>>,
}

impl TrafSpec {
    pub fn new(track_id: u32, samples: Vec<(u32, u32, u32)>) -> Self {
        TrafSpec { track_id, samples, base_decode_time: None, extra: Vec::new() }
    }
}

fn tfhd(track_id: u32) -> Vec<u8> {
    full_box(b"tfhd", 0, 0, &track_id.to_be_bytes())
}

fn tfdt(time: u64) -> Vec<u8> {
    full_box(b"tfdt", 1, 0, &time.to_be_bytes())
}

fn trun(samples: &[(u32, u32, u32)], data_offset: Option<i32>) -> Vec<u8> {
    let mut flags = 0x100 | 0x200 | 0x400;
    if data_offset.is_some() {
        flags |= 0x1;
    }
    let mut b = Vec::new();
    b.extend_from_slice(&(samples.len() as u32).to_be_bytes());
    if let Some(off) = data_offset {
        b.extend_from_slice(&off.to_be_bytes());
    }
    for &(duration, size, sflags) in samples {
        b.extend_from_slice(&duration.to_be_bytes());
        b.extend_from_slice(&size.to_be_bytes());
        b.extend_from_slice(&sflags.to_be_bytes());
    }
    full_box(b"trun", 0, flags, &b)
}

/// One sample's worth of bytes shaped as a single 4-byte-length-prefixed
/// NAL unit, `size` bytes total.
pub fn nal_sample(size: u32, fill: u8) -> Vec<u8> {
    assert!(size >= 4);
    let mut out = (size - 4).to_be_bytes().to_vec();
    out.extend(std::iter::repeat(fill).take(size as usize - 4));
    out
}

/// Concatenated fill bytes matching the declared sample sizes of `trafs`.
pub fn fill_payload(trafs: &[TrafSpec], fill: u8) -> Vec<u8> {
    let total: usize = trafs
        .iter()
        .flat_map(|t| t.samples.iter().map(|&(_, size, _)| size as usize))
        .sum();
    vec![fill; total]
}

/// Build a `moof` followed by the matching `mdat`. The first traf's trun
/// carries an explicit data offset pointing at the mdat payload; later
/// trafs chain off the end of the previous one's data. `mdat_payload` must
/// match the declared sample sizes, traf by traf.
pub fn moof_and_mdat(sequence: u32, trafs: &[TrafSpec], mdat_payload: &[u8]) -> Vec<u8> {
    let emit = |data_offset: i32| -> Vec<u8> {
        let mut children = vec![full_box(b"mfhd", 0, 0, &sequence.to_be_bytes())];
        for (i, t) in trafs.iter().enumerate() {
            let mut traf_children = vec![tfhd(t.track_id)];
            if let Some(time) = t.base_decode_time {
                traf_children.push(tfdt(time));
            }
            let off = if i == 0 { Some(data_offset) } else { None };
            traf_children.push(trun(&t.samples, off));
            traf_children.extend(t.extra.iter().cloned());
            children.push(container(b"traf", &traf_children));
        }
        container(b"moof", &children)
    };

    let moof_len = emit(0).len();
    let moof = emit(moof_len as i32 + 8);

    let total: usize = trafs
        .iter()
        .flat_map(|t| t.samples.iter().map(|&(_, size, _)| size as usize))
        .sum();
    assert_eq!(total, mdat_payload.len(), "mdat payload does not match sample sizes");
    let mut out = moof;
    out.extend_from_slice(&boxx(b"mdat", mdat_payload));
    out
}

// ---- mfra ------------------------------------------------------------

/// (time, moof_offset, traf_number, trun_number, sample_number)
pub type TfraRow = (u32, u32, u8, u8, u8);

pub fn tfra(track_id: u32, rows: &[TfraRow]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&track_id.to_be_bytes());
    b.extend_from_slice(&0u32.to_be_bytes()); // 1-byte traf/trun/sample numbers
    b.extend_from_slice(&(rows.len() as u32).to_be_bytes());
    for &(time, moof, traf_n, trun_n, sample_n) in rows {
        b.extend_from_slice(&time.to_be_bytes());
        b.extend_from_slice(&moof.to_be_bytes());
        b.push(traf_n);
        b.push(trun_n);
        b.push(sample_n);
    }
    full_box(b"tfra", 0, 0, &b)
}

/// mfra with the closing mfro, ready to append to a file.
pub fn mfra(tfras: &[Vec<u8>]) -> Vec<u8> {
    let inner: usize = tfras.iter().map(Vec::len).sum();
    let total = 8 + inner + 16;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(b"mfra");
    for t in tfras {
        out.extend_from_slice(t);
    }
    out.extend_from_slice(&full_box(b"mfro", 0, 0, &(total as u32).to_be_bytes()));
    out
}
