//! SARC sub-archives
//!
//! ```text
//! u32 4
//! [u8; 4] "SARC"
//! u32 version             2 or 3
//! u32 dir_block_len       directory size, the data region starts at 16 + dir_block_len
//! ```
//!
//! Version 2 directories are a list of `(u32 path_len, path, u32 offset,
//! u32 length)` records, the path NUL-padded to a multiple of four. Version 3
//! directories hold a NUL-separated string table followed by one 20-byte
//! record per string: `(string_offset, offset, length, v_hash, ext_hash)`.
//!
//! An entry with offset zero is a symlink: its bytes live in another archive
//! under the same path.

use crate::error::{FormatError, FormatResult};
use crate::stream::{ArchiveReader, ArchiveWriter};
use apex_hash::{ext_hash, hash32};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

/// SARC magic at offset 4
pub const SARC_MAGIC: [u8; 4] = *b"SARC";

/// Entries may not cross a multiple of this size
pub const SARC_BOUNDARY: u64 = 32 * 1024 * 1024;

/// Size of the fixed header
pub const SARC_HEADER_SIZE: u64 = 16;

/// One directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SarcEntry {
    /// Position in the directory
    pub index: usize,
    /// Virtual path
    pub v_path: Vec<u8>,
    /// Offset of the path in the v3 string table
    pub string_offset: u32,
    /// Offset of the body in the archive; zero for symlinks
    pub offset: u32,
    /// Body length
    pub length: u32,
    /// H32 of `v_path`
    pub v_hash: u32,
    /// H32 of the extension (v3 only)
    pub ext_hash: Option<u32>,
    /// Whether the body lives elsewhere
    pub symlink: bool,
}

impl SarcEntry {
    /// Create an entry for `v_path` with hashes computed from the path
    pub fn new(index: usize, v_path: &[u8], length: u32, symlink: bool) -> Self {
        Self {
            index,
            v_path: v_path.to_vec(),
            string_offset: 0,
            offset: 0,
            length,
            v_hash: hash32(v_path),
            ext_hash: Some(ext_hash(v_path)),
            symlink,
        }
    }
}

/// A parsed SARC directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SarcFile {
    /// Directory layout, 2 or 3
    pub version: u32,
    /// Directory length as stored
    pub dir_block_len: u32,
    /// Entries in directory order
    pub entries: Vec<SarcEntry>,
}

impl SarcFile {
    /// Empty archive of the given layout
    pub fn new(version: u32) -> FormatResult<Self> {
        if !matches!(version, 2 | 3) {
            return Err(FormatError::Unsupported(format!("SARC version {version}")));
        }
        Ok(Self {
            version,
            dir_block_len: 0,
            entries: Vec::new(),
        })
    }

    /// Parse the directory of an in-memory archive
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        Self::read_header(&mut Cursor::new(data))
    }

    /// Parse the directory from the current position of a stream
    pub fn read_header<R: Read + Seek>(reader: &mut R) -> FormatResult<Self> {
        let mut r = ArchiveReader::new(reader);
        let start = r.position()?;
        let file_version = r.read_u32()?;
        let magic = r.read_bytes(4)?;
        let version = r.read_u32()?;
        let dir_block_len = r.read_u32()?;

        if file_version != 4 || magic != SARC_MAGIC {
            return Err(FormatError::incorrect(format!(
                "SARC header: version {file_version}, magic {magic:?}"
            )));
        }

        let mut entries = Vec::new();
        match version {
            2 => {
                let end = start + SARC_HEADER_SIZE + u64::from(dir_block_len);
                while r.position()? + 12 <= end {
                    let raw = r.read_strl_u32()?;
                    if raw.is_empty() {
                        // zero padding up to the block length
                        break;
                    }
                    let v_path: Vec<u8> = raw.into_iter().filter(|&b| b != 0).collect();
                    let offset = r.read_u32()?;
                    let length = r.read_u32()?;
                    entries.push(SarcEntry {
                        index: entries.len(),
                        v_hash: hash32(&v_path),
                        v_path,
                        string_offset: 0,
                        offset,
                        length,
                        ext_hash: None,
                        symlink: offset == 0,
                    });
                }
            }
            3 => {
                let string_len = r.read_u32()?;
                let strings = r.read_bytes(string_len as usize)?;
                for (index, v_path) in strings.split(|&b| b == 0).filter(|s| !s.is_empty()).enumerate() {
                    let string_offset = r.read_u32()?;
                    let offset = r.read_u32()?;
                    let length = r.read_u32()?;
                    let v_hash = r.read_u32()?;
                    let ext = r.read_u32()?;
                    if v_hash != hash32(v_path) || ext != ext_hash(v_path) {
                        return Err(FormatError::incorrect(format!(
                            "SARC entry {index}: stored hashes do not match {:?}",
                            String::from_utf8_lossy(v_path)
                        )));
                    }
                    entries.push(SarcEntry {
                        index,
                        v_path: v_path.to_vec(),
                        string_offset,
                        offset,
                        length,
                        v_hash,
                        ext_hash: Some(ext),
                        symlink: offset == 0,
                    });
                }
            }
            other => return Err(FormatError::Unsupported(format!("SARC version {other}"))),
        }

        Ok(Self {
            version,
            dir_block_len,
            entries,
        })
    }

    /// Start of the data region
    pub fn data_start(&self) -> u64 {
        SARC_HEADER_SIZE + u64::from(self.dir_block_len)
    }

    /// Recompute the directory length, string offsets, hashes and body offsets
    ///
    /// Bodies are packed in entry order from the end of the directory,
    /// aligned to four bytes. A body that would straddle a 32 MiB boundary is
    /// moved to the next boundary. Returns the total archive size.
    pub fn layout(&mut self) -> FormatResult<u64> {
        let dir_block_len = match self.version {
            2 => self
                .entries
                .iter()
                .map(|e| 12 + e.v_path.len().next_multiple_of(4))
                .sum::<usize>(),
            3 => {
                let mut string_offset = 0u32;
                for e in &mut self.entries {
                    e.string_offset = string_offset;
                    e.v_hash = hash32(&e.v_path);
                    e.ext_hash = Some(ext_hash(&e.v_path));
                    string_offset += e.v_path.len() as u32 + 1;
                }
                4 + string_offset as usize + 20 * self.entries.len()
            }
            other => return Err(FormatError::Unsupported(format!("SARC version {other}"))),
        };
        self.dir_block_len = dir_block_len.next_multiple_of(16) as u32;

        let mut pos = self.data_start();
        for e in &mut self.entries {
            e.offset = 0;
            if e.symlink {
                continue;
            }
            let size = u64::from(e.length);
            if size > SARC_BOUNDARY {
                return Err(FormatError::Unsupported(format!(
                    "SARC entry {:?} is larger than 32 MiB",
                    String::from_utf8_lossy(&e.v_path)
                )));
            }
            if (pos + size) / SARC_BOUNDARY > pos / SARC_BOUNDARY {
                pos = pos.next_multiple_of(SARC_BOUNDARY);
            }
            e.offset = u32::try_from(pos)
                .map_err(|_| FormatError::Unsupported("SARC larger than 4 GiB".to_string()))?;
            pos = (pos + size).next_multiple_of(4);
        }
        Ok(pos)
    }

    /// Serialise the header and directory, zero-padded to the data start
    ///
    /// Call [`Self::layout`] first so offsets and lengths are consistent.
    pub fn build_header(&self) -> FormatResult<Vec<u8>> {
        let mut w = ArchiveWriter::new(Cursor::new(Vec::new()));
        w.write_u32(4)?;
        w.write_bytes(&SARC_MAGIC)?;
        w.write_u32(self.version)?;
        w.write_u32(self.dir_block_len)?;

        match self.version {
            2 => {
                for e in &self.entries {
                    let padded = e.v_path.len().next_multiple_of(4);
                    w.write_u32(padded as u32)?;
                    w.write_bytes(&e.v_path)?;
                    w.write_zeros((padded - e.v_path.len()) as u64)?;
                    w.write_u32(e.offset)?;
                    w.write_u32(e.length)?;
                }
            }
            3 => {
                let strings: Vec<u8> = self
                    .entries
                    .iter()
                    .flat_map(|e| e.v_path.iter().copied().chain(std::iter::once(0)))
                    .collect();
                w.write_u32(strings.len() as u32)?;
                w.write_bytes(&strings)?;
                for e in &self.entries {
                    w.write_u32(e.string_offset)?;
                    w.write_u32(e.offset)?;
                    w.write_u32(e.length)?;
                    w.write_u32(e.v_hash)?;
                    w.write_u32(e.ext_hash.unwrap_or_else(|| ext_hash(&e.v_path)))?;
                }
            }
            other => return Err(FormatError::Unsupported(format!("SARC version {other}"))),
        }

        let pos = w.position()?;
        let data_start = self.data_start();
        if pos > data_start {
            return Err(FormatError::incorrect("SARC directory overruns its block length"));
        }
        w.write_zeros(data_start - pos)?;
        Ok(w.into_inner().into_inner())
    }

    /// Lay out and write a complete archive
    ///
    /// `body` is called once per non-symlink entry, in entry order, and must
    /// return exactly `entry.length` bytes. Gaps between bodies are zero.
    pub fn write_archive<W, F>(&mut self, out: &mut W, mut body: F) -> FormatResult<u64>
    where
        W: Write + Seek,
        F: FnMut(&SarcEntry) -> FormatResult<Vec<u8>>,
    {
        let total = self.layout()?;
        let header = self.build_header()?;
        let mut w = ArchiveWriter::new(out);
        w.write_bytes(&header)?;

        for e in self.entries.iter().filter(|e| !e.symlink) {
            let bytes = body(e)?;
            if bytes.len() != e.length as usize {
                return Err(FormatError::incorrect(format!(
                    "SARC entry {:?}: expected {} bytes, got {}",
                    String::from_utf8_lossy(&e.v_path),
                    e.length,
                    bytes.len()
                )));
            }
            let pos = w.position()?;
            w.write_zeros(u64::from(e.offset) - pos)?;
            w.write_bytes(&bytes)?;
        }
        let pos = w.position()?;
        w.write_zeros(total - pos)?;
        Ok(total)
    }

    /// Read the body of one entry from an archive stream
    pub fn read_entry<R: Read + Seek>(reader: &mut R, entry: &SarcEntry) -> FormatResult<Vec<u8>> {
        if entry.symlink {
            return Err(FormatError::incorrect("symlink entries have no body"));
        }
        reader.seek(SeekFrom::Start(u64::from(entry.offset)))?;
        ArchiveReader::new(reader).read_bytes(entry.length as usize)
    }
}
