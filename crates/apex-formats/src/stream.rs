//! Little-endian binary stream helpers
//!
//! [`ArchiveReader`] and [`ArchiveWriter`] wrap any seekable byte source and
//! expose the fixed-width reads and writes that every Apex container format
//! is built from. [`SubsetFile`] restricts a stream to a `[start, end)`
//! window, which is how nested blobs are exposed without copying.

use crate::error::{FormatError, FormatResult};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Object-safe combination of `Read` and `Seek`
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Fill `buf` as far as the source allows, returning the number of bytes read
fn read_full<R: Read + ?Sized>(inner: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match inner.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Typed little-endian reader over a seekable source
#[derive(Debug)]
pub struct ArchiveReader<R> {
    inner: R,
}

macro_rules! read_le {
    ($(#[$doc:meta] $name:ident, $try_name:ident, $bulk:ident, $ty:ty);* $(;)?) => {
        $(
            #[$doc]
            pub fn $name(&mut self) -> FormatResult<$ty> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                self.inner.read_exact(&mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }

            /// Like the plain read, but a short read yields `None`
            pub fn $try_name(&mut self) -> FormatResult<Option<$ty>> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                if read_full(&mut self.inner, &mut buf)? < buf.len() {
                    return Ok(None);
                }
                Ok(Some(<$ty>::from_le_bytes(buf)))
            }

            /// Read `n` consecutive values
            pub fn $bulk(&mut self, n: usize) -> FormatResult<Vec<$ty>> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                let raw = self.read_bytes(n * WIDTH)?;
                Ok(raw
                    .chunks_exact(WIDTH)
                    .map(|c| {
                        let mut buf = [0u8; WIDTH];
                        buf.copy_from_slice(c);
                        <$ty>::from_le_bytes(buf)
                    })
                    .collect())
            }
        )*
    };
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Wrap a source
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Unwrap the source
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Borrow the source
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    read_le! {
        /// Read a `u8`
        read_u8, try_read_u8, read_u8s, u8;
        /// Read an `i8`
        read_s8, try_read_s8, read_s8s, i8;
        /// Read a little-endian `u16`
        read_u16, try_read_u16, read_u16s, u16;
        /// Read a little-endian `i16`
        read_s16, try_read_s16, read_s16s, i16;
        /// Read a little-endian `u32`
        read_u32, try_read_u32, read_u32s, u32;
        /// Read a little-endian `i32`
        read_s32, try_read_s32, read_s32s, i32;
        /// Read a little-endian `u64`
        read_u64, try_read_u64, read_u64s, u64;
        /// Read a little-endian `i64`
        read_s64, try_read_s64, read_s64s, i64;
        /// Read a little-endian `f32`
        read_f32, try_read_f32, read_f32s, f32;
        /// Read a little-endian `f64`
        read_f64, try_read_f64, read_f64s, f64;
    }

    /// Read exactly `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> FormatResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read up to `n` bytes, stopping early at end of stream
    pub fn read_up_to(&mut self, n: usize) -> FormatResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let got = read_full(&mut self.inner, &mut buf)?;
        buf.truncate(got);
        Ok(buf)
    }

    /// Read a NUL-terminated byte string; `None` if the stream ends first
    pub fn try_read_strz(&mut self) -> FormatResult<Option<Vec<u8>>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            let got = read_full(&mut self.inner, &mut chunk)?;
            if let Some(nul) = chunk[..got].iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                let unread = (got - nul - 1) as i64;
                if unread > 0 {
                    self.inner.seek(SeekFrom::Current(-unread))?;
                }
                return Ok(Some(out));
            }
            out.extend_from_slice(&chunk[..got]);
            if got < chunk.len() {
                return Ok(None);
            }
        }
    }

    /// Read a NUL-terminated byte string
    pub fn read_strz(&mut self) -> FormatResult<Vec<u8>> {
        self.try_read_strz()?.ok_or(FormatError::OutOfData)
    }

    /// Read a `u32` length followed by that many bytes
    pub fn read_strl_u32(&mut self) -> FormatResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// Current position
    pub fn position(&mut self) -> FormatResult<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Seek to an absolute position
    pub fn seek(&mut self, pos: u64) -> FormatResult<u64> {
        Ok(self.inner.seek(SeekFrom::Start(pos))?)
    }

    /// Advance the position by `n` bytes
    pub fn skip(&mut self, n: i64) -> FormatResult<u64> {
        Ok(self.inner.seek(SeekFrom::Current(n))?)
    }

    /// Total size of the source; the position is preserved
    pub fn size(&mut self) -> FormatResult<u64> {
        let here = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(here))?;
        Ok(end)
    }

    /// Skip forward to the next multiple of `n`
    pub fn align(&mut self, n: u64) -> FormatResult<u64> {
        let pos = self.position()?;
        let aligned = pos.next_multiple_of(n);
        self.seek(aligned)
    }
}

impl<R: Read> Read for ArchiveReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for ArchiveReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Typed little-endian writer over a seekable sink
#[derive(Debug)]
pub struct ArchiveWriter<W> {
    inner: W,
}

macro_rules! write_le {
    ($($name:ident, $ty:ty);* $(;)?) => {
        $(
            #[doc = concat!("Write a little-endian `", stringify!($ty), "`")]
            pub fn $name(&mut self, value: $ty) -> FormatResult<()> {
                self.inner.write_all(&value.to_le_bytes())?;
                Ok(())
            }
        )*
    };
}

impl<W: Write + Seek> ArchiveWriter<W> {
    /// Wrap a sink
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Unwrap the sink
    pub fn into_inner(self) -> W {
        self.inner
    }

    write_le! {
        write_u8, u8;
        write_s8, i8;
        write_u16, u16;
        write_s16, i16;
        write_u32, u32;
        write_s32, i32;
        write_u64, u64;
        write_s64, i64;
        write_f32, f32;
        write_f64, f64;
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, data: &[u8]) -> FormatResult<()> {
        self.inner.write_all(data)?;
        Ok(())
    }

    /// Write bytes followed by a NUL
    pub fn write_strz(&mut self, data: &[u8]) -> FormatResult<()> {
        self.inner.write_all(data)?;
        self.inner.write_all(&[0])?;
        Ok(())
    }

    /// Write `n` zero bytes
    pub fn write_zeros(&mut self, n: u64) -> FormatResult<()> {
        io::copy(&mut io::repeat(0).take(n), &mut self.inner)?;
        Ok(())
    }

    /// Zero-pad up to the next multiple of `n`
    pub fn align(&mut self, n: u64) -> FormatResult<u64> {
        let pos = self.position()?;
        let aligned = pos.next_multiple_of(n);
        self.write_zeros(aligned - pos)?;
        Ok(aligned)
    }

    /// Current position
    pub fn position(&mut self) -> FormatResult<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Seek to an absolute position
    pub fn seek(&mut self, pos: u64) -> FormatResult<u64> {
        Ok(self.inner.seek(SeekFrom::Start(pos))?)
    }
}

/// A `[start, end)` window over another stream
///
/// Positions are relative to `start`. Reads stop at `end`; writes that would
/// pass `end` fail.
#[derive(Debug)]
pub struct SubsetFile<F> {
    inner: F,
    start: u64,
    end: u64,
    pos: u64,
}

impl<F: Seek> SubsetFile<F> {
    /// Create a window of `len` bytes starting at `start`
    pub fn new(mut inner: F, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            start,
            end: start + len,
            pos: start,
        })
    }

    /// Window length
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Unwrap the underlying stream
    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: Read + Seek> Read for SubsetFile<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.pos);
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        if want == 0 {
            return Ok(0);
        }
        self.inner.seek(SeekFrom::Start(self.pos))?;
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<F: Write + Seek> Write for SubsetFile<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pos + buf.len() as u64 > self.end {
            return Err(io::Error::other("write beyond end of file"));
        }
        self.inner.seek(SeekFrom::Start(self.pos))?;
        let n = self.inner.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<F: Seek> Seek for SubsetFile<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(self.start.saturating_add(p)),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => self.end.checked_add_signed(d),
        };
        match target {
            Some(t) if t >= self.start => {
                self.pos = t;
                Ok(t - self.start)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of window",
            )),
        }
    }
}
