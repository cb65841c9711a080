use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub fn as_str_lossy(&self) -> String {
        self.0.iter().map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect()
    }
}
impl fmt::Debug for FourCC { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str_lossy()) } }
impl fmt::Display for FourCC { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str_lossy()) } }

/// PIFF sample-encryption extension box (pre-CENC `senc` equivalent).
pub const UUID_PIFF_SAMPLE_ENCRYPTION: [u8; 16] = [
    0xa2, 0x39, 0x4f, 0x52, 0x5a, 0x9b, 0x4f, 0x14,
    0xa2, 0x44, 0x6c, 0x42, 0x7c, 0x64, 0x8d, 0xf4,
];

/// PIFF protection-system-specific-header extension box.
pub const UUID_PIFF_PSSH: [u8; 16] = [
    0xd0, 0x8a, 0x4f, 0x18, 0x10, 0xf3, 0x4a, 0x82,
    0xb6, 0xc8, 0x32, 0xd8, 0xab, 0xa1, 0x83, 0xd3,
];

#[derive(Debug, Clone)]
pub struct BoxHeader {
    pub size: u64,          // total size including header, or 0=to parent end
    pub typ: FourCC,        // 4CC or b"uuid"
    pub uuid: Option<[u8; 16]>,
    pub header_size: u64,   // 8, 16, 24, or 32
    pub start: u64,         // file offset of header start
}

impl BoxHeader {
    /// Offset of the first payload byte.
    pub fn payload_start(&self) -> u64 {
        self.start + self.header_size
    }

    /// Offset one past the last byte of the box, given the enclosing extent.
    pub fn end(&self, parent_end: u64) -> u64 {
        if self.size == 0 { parent_end } else { self.start + self.size }
    }
}

// Known containers from ISOBMFF / MP4. `meta` and `stsd` carry extra
// leading fields before their children and are handled in the tree walk.
pub fn is_container(typ: &FourCC) -> bool {
    matches!(&typ.0,
        b"moov" | b"trak" | b"mdia" | b"minf" | b"dinf" | b"stbl" |
        b"mvex" | b"moof" | b"traf" | b"mfra" | b"skip" | b"udta" |
        b"ilst" | b"edts"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_display() {
        let cc = FourCC(*b"moov");
        assert_eq!(cc.to_string(), "moov");
        let odd = FourCC([0x00, b'a', 0xff, b'z']);
        assert_eq!(odd.as_str_lossy(), ".a.z");
    }

    #[test]
    fn header_extent() {
        let h = BoxHeader { size: 24, typ: FourCC(*b"trun"), uuid: None, header_size: 8, start: 100 };
        assert_eq!(h.payload_start(), 108);
        assert_eq!(h.end(1000), 124);
        let open = BoxHeader { size: 0, typ: FourCC(*b"mdat"), uuid: None, header_size: 8, start: 100 };
        assert_eq!(open.end(1000), 1000);
    }
}
