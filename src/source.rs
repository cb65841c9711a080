use std::io::{Read, Seek, SeekFrom};

/// Positioned-read access to the underlying MP4 bytes.
///
/// The demuxer never streams forward through the source; every access is an
/// absolute `(offset, length)` read, which is what both file- and
/// network-backed sources provide.
pub trait ByteSource {
    /// Read up to `buf.len()` bytes at `offset`. Short reads are allowed at
    /// end of data; reading past the end returns 0.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Total length of the source in bytes.
    fn len(&mut self) -> std::io::Result<u64>;
}

impl<R: Read + Seek> ByteSource for R {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        self.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            let n = self.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn len(&mut self) -> std::io::Result<u64> {
        let pos = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(end)
    }
}

/// `read_at` that fails with `UnexpectedEof` instead of short-reading.
pub fn read_exact_at<S: ByteSource + ?Sized>(
    src: &mut S,
    offset: u64,
    buf: &mut [u8],
) -> std::io::Result<()> {
    let n = src.read_at(offset, buf)?;
    if n != buf.len() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("short read at {offset}: wanted {}, got {n}", buf.len()),
        ));
    }
    Ok(())
}

/// Read `len` bytes at `offset` into a fresh buffer.
pub fn read_slice_at<S: ByteSource + ?Sized>(
    src: &mut S,
    offset: u64,
    len: u64,
) -> std::io::Result<Vec<u8>> {
    let mut v = vec![0u8; len as usize];
    read_exact_at(src, offset, &mut v)?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn cursor_positioned_reads() {
        let mut c = Cursor::new(vec![1u8, 2, 3, 4, 5]);
        assert_eq!(ByteSource::len(&mut c).unwrap(), 5);
        let mut buf = [0u8; 2];
        assert_eq!(c.read_at(3, &mut buf).unwrap(), 2);
        assert_eq!(buf, [4, 5]);
        // past the end: short read, then zero
        assert_eq!(c.read_at(4, &mut buf).unwrap(), 1);
        assert_eq!(c.read_at(9, &mut buf).unwrap(), 0);
    }

    #[test]
    fn exact_read_rejects_short() {
        let mut c = Cursor::new(vec![0u8; 4]);
        let mut buf = [0u8; 8];
        assert!(read_exact_at(&mut c, 0, &mut buf).is_err());
    }
}
