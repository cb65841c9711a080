use crate::error::{DemuxError, Result};
use crate::fragment::{parse_moof, FragmentContext};
use crate::fragment_table::TrackFragmentTable;
use crate::meta::{MetaData, MetaKey};
use crate::moov::parse_metadata;
use crate::parser::read_box_header;
use crate::random_access::parse_mfra;
use crate::reader::SampleReader;
use crate::sample::SampleMeta;
use crate::source::{read_exact_at, ByteSource};
use crate::track::Track;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Which table serves a track's samples. Decided once, by `mvex` presence.
pub enum TableKind {
    Classical,
    Fragmented(Mutex<TrackFragmentTable>),
}

/// Scanner state behind the extractor-wide lock: the byte source and
/// everything mutated while walking top-level boxes for fragments.
struct Scanner<S> {
    source: S,
    file_len: u64,
    ctx: FragmentContext,
    parsed_moofs: HashSet<u64>,
    /// PSSH payloads found inside moofs, in arrival order.
    pssh: Vec<Vec<u8>>,
}

/// The demuxer. Construction runs the metadata pass (everything up to the
/// end of `moov`, plus the optional `mfra` trailer); fragments are parsed
/// on demand as readers pull samples.
///
/// Locking: the scanner lock serializes box-tree scanning and source reads;
/// each fragment table carries its own lock so readers on independent
/// tracks do not block each other. Table locks are never held while taking
/// the scanner lock.
pub struct Mp4Extractor<S> {
    scanner: Mutex<Scanner<S>>,
    tracks: Vec<TrackSlot>,
    file_meta: MetaData,
    fragmented: bool,
}

struct TrackSlot {
    track: Track,
    table: TableKind,
}

impl<S: ByteSource> Mp4Extractor<S> {
    pub fn new(mut source: S) -> Result<Self> {
        let file_len = source.len()?;
        let movie = parse_metadata(&mut source, file_len)?;
        if !movie.metadata_complete {
            return Err(DemuxError::malformed(
                crate::boxes::FourCC(*b"moov"),
                "no movie header found",
            ));
        }

        let fragmented = movie.has_mvex;
        let mut tracks = Vec::new();
        for track in movie.tracks {
            if track.skip {
                continue;
            }
            let table = if fragmented {
                TableKind::Fragmented(Mutex::new(TrackFragmentTable::new(
                    track.id,
                    track.is_video,
                )))
            } else {
                TableKind::Classical
            };
            tracks.push(TrackSlot { track, table });
        }

        let mut extractor = Mp4Extractor {
            scanner: Mutex::new(Scanner {
                source,
                file_len,
                ctx: FragmentContext {
                    trex: movie.trex,
                    timestamp_cursor: Default::default(),
                },
                parsed_moofs: HashSet::new(),
                pssh: Vec::new(),
            }),
            tracks,
            file_meta: movie.file_meta,
            fragmented,
        };

        if extractor.fragmented {
            extractor.attach_random_access()?;
        }
        Ok(extractor)
    }

    /// Parse the trailing mfra (when present) and hand each track its
    /// index. The index is installed at most once.
    fn attach_random_access(&mut self) -> Result<()> {
        let indices = {
            let mut scanner = self.scanner.lock();
            let len = scanner.file_len;
            parse_mfra(&mut scanner.source, len)?
        };
        for index in indices {
            if let Some(slot) = self.tracks.iter().find(|s| s.track.id == index.track_id) {
                if let TableKind::Fragmented(table) = &slot.table {
                    table.lock().set_random_access_info(index.entries);
                }
            }
        }
        Ok(())
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragmented
    }

    pub fn file_meta(&self) -> &MetaData {
        &self.file_meta
    }

    /// All protection-system headers seen so far: the moov-level one plus
    /// any carried inside already-parsed moofs.
    pub fn pssh_data(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(blob) = self.file_meta.blob(MetaKey::Pssh) {
            out.push(blob.to_vec());
        }
        out.extend(self.scanner.lock().pssh.iter().cloned());
        out
    }

    pub fn track(&self, index: usize) -> &Track {
        &self.tracks[index].track
    }

    pub fn track_meta(&self, index: usize) -> &MetaData {
        &self.tracks[index].track.meta
    }

    pub(crate) fn table(&self, index: usize) -> &TableKind {
        &self.tracks[index].table
    }

    /// A pull reader over the given track.
    pub fn reader(&self, index: usize) -> SampleReader<'_, S> {
        SampleReader::new(self, index)
    }

    /// Thumbnail candidate for a fragmented video track: the largest sync
    /// sample among the bounded scan window.
    pub fn thumbnail_sample(&self, index: usize) -> Option<SampleMeta> {
        match &self.tracks[index].table {
            TableKind::Fragmented(table) => table.lock().thumbnail_candidate(),
            TableKind::Classical => None,
        }
    }

    /// Read raw sample bytes through the scanner lock.
    pub(crate) fn read_data(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut scanner = self.scanner.lock();
        read_exact_at(&mut scanner.source, offset, buf)?;
        Ok(())
    }

    /// Satisfy a `NeedFragment{moof_offset}` signal: scan top-level boxes
    /// from `moof_offset` and parse the first moof not yet resident.
    /// Returns false when the scan runs off the end of the stream.
    pub(crate) fn load_fragment(&self, moof_offset: u64) -> Result<bool> {
        let moof = {
            let mut scanner = self.scanner.lock();
            let mut offset = moof_offset;
            loop {
                if offset + 8 > scanner.file_len {
                    return Ok(false);
                }
                let header = read_box_header(&mut scanner.source, offset)?;
                let end = header.end(scanner.file_len);
                if end <= offset {
                    return Err(DemuxError::malformed(header.typ, "box does not advance"));
                }
                if &header.typ.0 == b"moof" && !scanner.parsed_moofs.contains(&header.start) {
                    let scanner = &mut *scanner;
                    let moof = parse_moof(&mut scanner.source, &header, &mut scanner.ctx)?;
                    scanner.parsed_moofs.insert(header.start);
                    break moof;
                }
                if &header.typ.0 == b"mfra" {
                    // trailing index; no sample data past this point
                    return Ok(false);
                }
                offset = end;
            }
        };

        if !moof.pssh.is_empty() {
            let mut scanner = self.scanner.lock();
            scanner.pssh.extend(moof.pssh.iter().cloned());
        }

        for traf in moof.trafs {
            if let Some(slot) = self.tracks.iter().find(|s| s.track.id == traf.track_id) {
                if let TableKind::Fragmented(table) = &slot.table {
                    table.lock().update_table(traf);
                }
            }
        }
        Ok(true)
    }
}
