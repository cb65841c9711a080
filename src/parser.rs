use crate::boxes::{BoxHeader, FourCC};
use crate::error::{DemuxError, Result};
use crate::source::{read_exact_at, ByteSource};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

/// Read an 8-byte box header at `offset`, extending it by the 8-byte large
/// size and/or the 16-byte extended type when present.
pub fn read_box_header<S: ByteSource + ?Sized>(src: &mut S, offset: u64) -> Result<BoxHeader> {
    let mut head = [0u8; 8];
    read_exact_at(src, offset, &mut head)?;
    let size32 = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let typ = FourCC([head[4], head[5], head[6], head[7]]);

    let mut header_size = 8u64;
    let mut size = size32 as u64;
    if size32 == 1 {
        let mut large = [0u8; 8];
        read_exact_at(src, offset + header_size, &mut large)?;
        size = u64::from_be_bytes(large);
        header_size += 8;
    }

    let mut uuid = None;
    if &typ.0 == b"uuid" {
        let mut u = [0u8; 16];
        read_exact_at(src, offset + header_size, &mut u)?;
        uuid = Some(u);
        header_size += 16;
    }

    if size != 0 && size < header_size {
        return Err(DemuxError::malformed(typ, "declared size smaller than header"));
    }

    Ok(BoxHeader { size, typ, uuid, header_size, start: offset })
}

/// Version + 24-bit flags prefix shared by all FullBox types.
#[derive(Debug, Clone, Copy)]
pub struct FullBoxHeader {
    pub version: u8,
    pub flags: u32,
}

pub fn read_full_box_header<R: Read>(r: &mut R) -> Result<FullBoxHeader> {
    let version = r.read_u8()?;
    let mut f = [0u8; 3];
    r.read_exact(&mut f)?;
    let flags = ((f[0] as u32) << 16) | ((f[1] as u32) << 8) | (f[2] as u32);
    Ok(FullBoxHeader { version, flags })
}

/// Big-endian unsigned integer of 1..=8 bytes.
///
/// Unifies the "version 0 vs version 1 field width" branches (mdhd, tkhd,
/// tfdt, tfra, ...) and the tfra variable-width entry numbers into one
/// width-parameterized decode.
pub fn read_uint<R: Read>(r: &mut R, width: usize) -> Result<u64> {
    debug_assert!((1..=8).contains(&width));
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf[8 - width..])?;
    Ok(u64::from_be_bytes(buf))
}

/// 32-bit field for version 0, 64-bit for version 1.
pub fn read_versioned<R: Read>(r: &mut R, version: u8) -> Result<u64> {
    read_uint(r, if version == 1 { 8 } else { 4 })
}

/// Big-endian u32 read used throughout box payload decoding.
pub fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    Ok(r.read_u32::<BigEndian>()?)
}

pub fn read_u16<R: Read>(r: &mut R) -> Result<u16> {
    Ok(r.read_u16::<BigEndian>()?)
}

pub fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    Ok(r.read_i32::<BigEndian>()?)
}

pub fn skip<R: Read>(r: &mut R, n: u64) -> Result<()> {
    std::io::copy(&mut r.take(n), &mut std::io::sink())?;
    Ok(())
}
