//! AAF compressed wrapper
//!
//! An AAF file is a 48-byte header followed by sections. Each section holds
//! at most `section_max` bytes of the payload as a raw deflate stream:
//!
//! ```text
//! u32 compressed_len
//! u32 uncompressed_len
//! u32 padded_len          section length including this 16-byte header
//! [u8; 4] "EWAM"
//! [u8; compressed_len]    raw deflate
//! ```
//!
//! The next section begins `padded_len` bytes after the start of the current
//! one.

use crate::error::{FormatError, FormatResult};
use crate::stream::ArchiveReader;
use binrw::{BinRead, BinWrite};
use flate2::Compression;
use flate2::read::{DeflateDecoder, DeflateEncoder};
use std::io::{Cursor, Read, Seek, SeekFrom};

/// Size of the fixed header
pub const AAF_HEADER_SIZE: usize = 48;

/// Reserved header bytes written by the engine's tools
pub const AAF_RESERVED: [u8; 28] = *b"AVALANCHEARCHIVEFORMATISCOOL";

/// Section magic
pub const EWAM_MAGIC: [u8; 4] = *b"EWAM";

/// Default maximum uncompressed bytes per section (32 MiB)
pub const DEFAULT_SECTION_MAX: u32 = 32 * 1024 * 1024;

/// AAF header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct AafHeader {
    /// "AAF\0", compared case-insensitively on the first three bytes
    #[br(assert(magic[..3].eq_ignore_ascii_case(b"AAF"), "Invalid AAF magic: {:?}", magic))]
    pub magic: [u8; 4],
    /// Format version
    pub version: u32,
    /// Reserved bytes
    pub reserved: [u8; 28],
    /// Uncompressed length of the whole payload
    pub size_u: u32,
    /// Largest uncompressed section
    pub section_max: u32,
    /// Number of sections
    pub section_count: u32,
}

/// Per-section header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct AafSection {
    /// Compressed length, excluding padding
    pub compressed_len: u32,
    /// Uncompressed length
    pub uncompressed_len: u32,
    /// Padded section length, header included
    pub padded_len: u32,
    /// "EWAM"
    #[br(assert(magic == EWAM_MAGIC, "Invalid AAF section magic: {:?}", magic))]
    pub magic: [u8; 4],
}

impl AafHeader {
    /// Parse a header from the start of `data`
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        Ok(Self::read(&mut Cursor::new(data))?)
    }

    /// Read a header from a stream at its current position
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> FormatResult<Self> {
        Ok(Self::read(reader)?)
    }
}

fn inflate_section(input: &[u8], expected: usize) -> FormatResult<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    DeflateDecoder::new(input)
        .take(expected as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| FormatError::incorrect(format!("AAF section inflate failed: {e}")))?;
    Ok(out)
}

/// Decompress an AAF stream read from the current position of `reader`
pub fn extract_aaf<R: Read + Seek>(reader: &mut R) -> FormatResult<Vec<u8>> {
    let header = AafHeader::read_from(reader)?;
    let mut out = Vec::with_capacity(header.size_u as usize);
    let mut r = ArchiveReader::new(reader);

    for index in 0..header.section_count {
        let section_start = r.position()?;
        let section = AafSection::read(r.get_mut())?;
        let input = r.read_bytes(section.compressed_len as usize)?;
        let decoded = inflate_section(&input, section.uncompressed_len as usize)?;
        if decoded.len() != section.uncompressed_len as usize {
            return Err(FormatError::incorrect(format!(
                "AAF section {index}/{}: expected {} bytes, got {}",
                header.section_count,
                section.uncompressed_len,
                decoded.len()
            )));
        }
        out.extend_from_slice(&decoded);
        r.get_mut()
            .seek(SeekFrom::Start(section_start + u64::from(section.padded_len)))?;
    }

    Ok(out)
}

/// Wrap `data` in an AAF container with sections of at most `section_max` bytes
pub fn compress_aaf(data: &[u8], section_max: u32) -> FormatResult<Vec<u8>> {
    if section_max == 0 {
        return Err(FormatError::incorrect("AAF section size must be non-zero"));
    }
    let size_u = u32::try_from(data.len())
        .map_err(|_| FormatError::Unsupported("AAF payload larger than 4 GiB".to_string()))?;

    let chunks: Vec<&[u8]> = if data.is_empty() {
        Vec::new()
    } else {
        data.chunks(section_max as usize).collect()
    };

    let header = AafHeader {
        magic: *b"AAF\0",
        version: 1,
        reserved: AAF_RESERVED,
        size_u,
        section_max: chunks.iter().map(|c| c.len() as u32).max().unwrap_or(0),
        section_count: chunks.len() as u32,
    };

    let mut out = Cursor::new(Vec::new());
    header.write(&mut out)?;

    for chunk in chunks {
        let mut compressed = Vec::new();
        DeflateEncoder::new(chunk, Compression::default())
            .read_to_end(&mut compressed)
            .map_err(|e| FormatError::incorrect(format!("AAF section deflate failed: {e}")))?;
        let padded = (16 + compressed.len()).next_multiple_of(16);
        let section = AafSection {
            compressed_len: compressed.len() as u32,
            uncompressed_len: chunk.len() as u32,
            padded_len: padded as u32,
            magic: EWAM_MAGIC,
        };
        section.write(&mut out)?;
        let buf = out.get_mut();
        buf.extend_from_slice(&compressed);
        buf.resize(buf.len() + padded - 16 - compressed.len(), 0);
        out.seek(SeekFrom::End(0))?;
    }

    Ok(out.into_inner())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        let data = compress_aaf(b"abc", DEFAULT_SECTION_MAX).expect("Test operation should succeed");
        let header = AafHeader::parse(&data).expect("Test operation should succeed");
        assert_eq!(header.size_u, 3);
        assert_eq!(header.section_count, 1);
        assert_eq!(header.reserved, AAF_RESERVED);
        assert_eq!(&data[AAF_HEADER_SIZE + 12..AAF_HEADER_SIZE + 16], b"EWAM");
    }

    #[test]
    fn test_multi_section_round_trip() {
        let payload: Vec<u8> = (0..1000u32).flat_map(u32::to_le_bytes).collect();
        let data = compress_aaf(&payload, 1024).expect("Test operation should succeed");
        let header = AafHeader::parse(&data).expect("Test operation should succeed");
        assert_eq!(header.section_count, 4);
        assert_eq!(header.section_max, 1024);

        let out = extract_aaf(&mut Cursor::new(&data)).expect("Test operation should succeed");
        assert_eq!(out, payload);
    }

    #[test]
    fn test_sections_are_16_byte_aligned() {
        let payload = vec![7u8; 5000];
        let data = compress_aaf(&payload, 2000).expect("Test operation should succeed");
        let mut pos = AAF_HEADER_SIZE;
        for _ in 0..3 {
            let section =
                AafSection::read(&mut Cursor::new(&data[pos..])).expect("Test operation should succeed");
            assert_eq!(section.padded_len % 16, 0);
            pos += section.padded_len as usize;
        }
        assert_eq!(pos, data.len());
    }

    #[test]
    fn test_bad_magic() {
        let mut data = compress_aaf(b"abc", 16).expect("Test operation should succeed");
        data[0] = b'X';
        assert!(matches!(
            extract_aaf(&mut Cursor::new(&data)),
            Err(FormatError::IncorrectFormat(_))
        ));
    }

    #[test]
    fn test_length_mismatch_is_incorrect_format() {
        let mut data = compress_aaf(b"hello world", 64).expect("Test operation should succeed");
        // uncompressed_len of section 0
        data[AAF_HEADER_SIZE + 4] = 99;
        assert!(matches!(
            extract_aaf(&mut Cursor::new(&data)),
            Err(FormatError::IncorrectFormat(_))
        ));
    }
}
