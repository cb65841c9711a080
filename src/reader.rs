use crate::error::{DemuxError, Result};
use crate::extractor::{Mp4Extractor, TableKind};
use crate::sample::{SampleLookup, SampleMeta};
use crate::source::ByteSource;

/// A sample's payload, reframed for the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleData {
    /// Raw bytes as stored in the file.
    Raw(Vec<u8>),
    /// One buffer per NAL unit, length prefixes stripped (fragment mode).
    Nals(Vec<Vec<u8>>),
    /// One contiguous buffer with 4-byte Annex-B start codes (whole-unit mode).
    AnnexB(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct ReadSample {
    pub meta: SampleMeta,
    pub data: SampleData,
}

/// Per-track pull iterator over either the classical sample table or the
/// fragment table. Runs the fetch-and-retry loop: a `NeedFragment` answer
/// from the table triggers parsing of the indicated moof and the same table
/// call again, until a sample is produced or the stream ends.
pub struct SampleReader<'a, S: ByteSource> {
    extractor: &'a Mp4Extractor<S>,
    track_index: usize,
    /// Next classical-table sample; fragment tracks keep their cursor in
    /// the table itself.
    classic_position: u32,
    scratch: Vec<u8>,
    nal_length_size: Option<u8>,
    fragmented: bool,
}

impl<'a, S: ByteSource> SampleReader<'a, S> {
    pub(crate) fn new(extractor: &'a Mp4Extractor<S>, track_index: usize) -> Self {
        let track = extractor.track(track_index);
        let fragmented = matches!(extractor.table(track_index), TableKind::Fragmented(_));
        SampleReader {
            extractor,
            track_index,
            classic_position: 0,
            scratch: Vec::new(),
            nal_length_size: track.nal_length_size,
            fragmented,
        }
    }

    /// Next sample in decode order, or `None` at end of stream.
    pub fn next_sample(&mut self) -> Result<Option<ReadSample>> {
        let meta = match self.next_meta()? {
            Some(m) => m,
            None => return Ok(None),
        };
        let data = self.load(&meta)?;
        Ok(Some(ReadSample { meta, data }))
    }

    /// Seek to the sample bracketing `time` (track timescale units) and
    /// return it. `sync_only` restricts the result to sync samples. A
    /// target beyond the available index ends the stream instead of
    /// failing.
    pub fn seek(&mut self, time: u64, sync_only: bool) -> Result<Option<ReadSample>> {
        let meta = match self.seek_meta(time, sync_only) {
            Ok(Some(m)) => m,
            Ok(None) => return Ok(None),
            Err(DemuxError::OutOfRange) => return Ok(None),
            Err(e) => return Err(e),
        };
        let data = self.load(&meta)?;
        Ok(Some(ReadSample { meta, data }))
    }

    fn next_meta(&mut self) -> Result<Option<SampleMeta>> {
        match self.extractor.table(self.track_index) {
            TableKind::Classical => {
                let track = self.extractor.track(self.track_index);
                let meta = track.sample_table.meta_for_sample(self.classic_position);
                if meta.is_some() {
                    self.classic_position += 1;
                }
                Ok(meta)
            }
            TableKind::Fragmented(table) => loop {
                let lookup = table.lock().next_sample();
                match lookup {
                    SampleLookup::Ready(meta) => return Ok(Some(meta)),
                    SampleLookup::NeedFragment { moof_offset } => {
                        if !self.extractor.load_fragment(moof_offset)? {
                            return Ok(None);
                        }
                    }
                    SampleLookup::EndOfStream => return Ok(None),
                }
            },
        }
    }

    fn seek_meta(&mut self, time: u64, sync_only: bool) -> Result<Option<SampleMeta>> {
        match self.extractor.table(self.track_index) {
            TableKind::Classical => {
                let track = self.extractor.track(self.track_index);
                let index = track.sample_table.find_closest_sample(time, sync_only)?;
                self.classic_position = index + 1;
                Ok(track.sample_table.meta_for_sample(index))
            }
            TableKind::Fragmented(table) => loop {
                let lookup = table.lock().find_closest_sample(time, sync_only)?;
                match lookup {
                    SampleLookup::Ready(meta) => return Ok(Some(meta)),
                    SampleLookup::NeedFragment { moof_offset } => {
                        if !self.extractor.load_fragment(moof_offset)? {
                            return Ok(None);
                        }
                    }
                    SampleLookup::EndOfStream => return Ok(None),
                }
            },
        }
    }

    /// Read the sample bytes and reframe AVC tracks. The scratch buffer
    /// grows with the table's running max-sample-size estimate so steady
    /// state does not reallocate.
    fn load(&mut self, meta: &SampleMeta) -> Result<SampleData> {
        let mut want = meta.size as usize;
        if let TableKind::Fragmented(table) = self.extractor.table(self.track_index) {
            want = want.max(table.lock().max_sample_size() as usize);
        }
        if self.scratch.len() < want {
            self.scratch.resize(want, 0);
        }
        let buf = &mut self.scratch[..meta.size as usize];
        self.extractor.read_data(meta.data_offset, buf)?;

        match self.nal_length_size {
            Some(n) if self.fragmented => Ok(SampleData::Nals(split_nals(buf, n as usize)?)),
            Some(n) => Ok(SampleData::AnnexB(annex_b(buf, n as usize)?)),
            None => Ok(SampleData::Raw(buf.to_vec())),
        }
    }
}

fn nal_len(buf: &[u8], prefix: usize) -> usize {
    let mut len = 0usize;
    for &b in &buf[..prefix] {
        len = (len << 8) | b as usize;
    }
    len
}

/// Split a length-prefixed AVC sample into one buffer per NAL unit.
fn split_nals(mut buf: &[u8], prefix: usize) -> Result<Vec<Vec<u8>>> {
    let typ = crate::boxes::FourCC(*b"avcC");
    let mut out = Vec::new();
    while !buf.is_empty() {
        if buf.len() < prefix {
            return Err(DemuxError::malformed(typ, "truncated NAL length prefix"));
        }
        let len = nal_len(buf, prefix);
        if buf.len() < prefix + len {
            return Err(DemuxError::malformed(typ, "NAL unit overruns sample"));
        }
        out.push(buf[prefix..prefix + len].to_vec());
        buf = &buf[prefix + len..];
    }
    Ok(out)
}

/// Rewrite length prefixes into 4-byte Annex-B start codes in one
/// contiguous buffer.
fn annex_b(mut buf: &[u8], prefix: usize) -> Result<Vec<u8>> {
    let typ = crate::boxes::FourCC(*b"avcC");
    let mut out = Vec::with_capacity(buf.len() + 8);
    while !buf.is_empty() {
        if buf.len() < prefix {
            return Err(DemuxError::malformed(typ, "truncated NAL length prefix"));
        }
        let len = nal_len(buf, prefix);
        if buf.len() < prefix + len {
            return Err(DemuxError::malformed(typ, "NAL unit overruns sample"));
        }
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(&buf[prefix..prefix + len]);
        buf = &buf[prefix + len..];
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nal_split_with_two_byte_prefix() {
        let sample = [0x00, 0x02, 0xaa, 0xbb, 0x00, 0x01, 0xcc];
        let nals = split_nals(&sample, 2).unwrap();
        assert_eq!(nals, vec![vec![0xaa, 0xbb], vec![0xcc]]);
    }

    #[test]
    fn annex_b_reframing() {
        let sample = [0x00, 0x00, 0x00, 0x02, 0xaa, 0xbb];
        let out = annex_b(&sample, 4).unwrap();
        assert_eq!(out, vec![0, 0, 0, 1, 0xaa, 0xbb]);
    }

    #[test]
    fn truncated_nal_rejected() {
        let sample = [0x00, 0x05, 0xaa];
        assert!(split_nals(&sample, 2).is_err());
        assert!(annex_b(&sample, 2).is_err());
    }
}
