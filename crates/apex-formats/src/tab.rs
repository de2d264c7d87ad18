//! TAB index archives
//!
//! Every on-disk `.arc` data archive is paired with a `.tab` index listing
//! the blobs stored in it. Three layouts exist:
//!
//! - **v3**: `(u32 hash, u32 offset, u32 size)` entries until end of file
//! - **v4**: a block table of `(compressed, uncompressed)` lengths, then
//!   20-byte entries carrying both sizes, the first block index, and the
//!   compression type and flags
//! - **v5**: explicit file and block counts, 64-bit hashes
//!
//! All three share the 12-byte header `"TAB\0", u16 version, u16, u32 alignment`.

use crate::error::{FormatError, FormatResult};
use crate::stream::{ArchiveReader, ArchiveWriter};
use binrw::{BinRead, BinWrite};
use std::io::Cursor;

/// TAB magic
pub const TAB_MAGIC: [u8; 4] = *b"TAB\0";

/// Block table marker for "entry has no block list"
pub const NO_BLOCK: TabBlock = TabBlock {
    compressed_len: 0xffff_ffff,
    uncompressed_len: 0xffff_ffff,
};

/// Common header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct TabHeader {
    /// "TAB\0"
    #[br(assert(magic == TAB_MAGIC, "Invalid TAB magic: {:?}", magic))]
    pub magic: [u8; 4],
    /// Layout version; 2 for v3/v4, 3 for v5
    pub version: u16,
    /// Always 1
    pub minor: u16,
    /// Data archive alignment
    pub alignment: u32,
}

/// One row of the v4/v5 block table
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct TabBlock {
    /// Compressed length
    pub compressed_len: u32,
    /// Uncompressed length
    pub uncompressed_len: u32,
}

/// Index layout, selected by the project's archive generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabVersion {
    /// 12-byte entries, no compression
    V3,
    /// Block table plus 20-byte entries
    V4,
    /// Counted block table plus 24-byte entries with 64-bit hashes
    V5,
}

impl TabVersion {
    /// Map a project archive generation to a layout
    pub fn from_archive_version(version: u32) -> Option<Self> {
        match version {
            3 => Some(Self::V3),
            4 => Some(Self::V4),
            5 => Some(Self::V5),
            _ => None,
        }
    }

    fn entry_size(self) -> usize {
        match self {
            Self::V3 => 12,
            Self::V4 => 20,
            Self::V5 => 24,
        }
    }
}

/// One index entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabEntry {
    /// Path hash (32-bit for v3/v4)
    pub hash: u64,
    /// Offset in the data archive
    pub offset: u32,
    /// Stored size
    pub size_c: u32,
    /// Uncompressed size
    pub size_u: u32,
    /// First row of the block table used by this entry
    pub block_index: u16,
    /// Compression variant code
    pub compression_type: u8,
    /// Compression sub-flags
    pub compression_flags: u8,
}

/// A resolved block of an entry, positioned in the data archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryBlock {
    /// Absolute offset in the data archive
    pub offset: u64,
    /// Compressed length
    pub compressed_len: u32,
    /// Uncompressed length
    pub uncompressed_len: u32,
}

/// A parsed index archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabFile {
    /// Header
    pub header: TabHeader,
    /// Layout
    pub version: TabVersion,
    /// Three header words of unknown meaning (v4/v5), preserved
    pub unknown: [u32; 3],
    /// Block table (v4/v5)
    pub blocks: Vec<TabBlock>,
    /// Entries in file order
    pub entries: Vec<TabEntry>,
}

impl TabFile {
    /// Parse an index of the given layout
    pub fn parse(data: &[u8], version: TabVersion) -> FormatResult<Self> {
        let mut r = ArchiveReader::new(Cursor::new(data));
        let header = TabHeader::read(r.get_mut())?;

        let expected_major = if version == TabVersion::V5 { 3 } else { 2 };
        if header.version != expected_major || header.minor != 1 {
            return Err(FormatError::incorrect(format!(
                "TAB {version:?}: unexpected version {}.{}",
                header.version, header.minor
            )));
        }

        let mut unknown = [0u32; 3];
        let mut blocks = Vec::new();
        let mut file_count = None;

        match version {
            TabVersion::V3 => {}
            TabVersion::V4 => {
                for w in &mut unknown {
                    *w = r.read_u32()?;
                }
                let block_count = r.read_u32()?;
                blocks = read_blocks(&mut r, block_count)?;
            }
            TabVersion::V5 => {
                file_count = Some(r.read_u32()? as usize);
                let block_count = r.read_u32()?;
                for w in &mut unknown {
                    *w = r.read_u32()?;
                }
                blocks = read_blocks(&mut r, block_count)?;
            }
        }

        let start = r.position()? as usize;
        let available = data.len().saturating_sub(start) / version.entry_size();
        let count = match file_count {
            Some(n) if n > available => return Err(FormatError::OutOfData),
            Some(n) => n,
            None => available,
        };

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = match version {
                TabVersion::V3 => {
                    let hash = u64::from(r.read_u32()?);
                    let offset = r.read_u32()?;
                    let size = r.read_u32()?;
                    TabEntry {
                        hash,
                        offset,
                        size_c: size,
                        size_u: size,
                        block_index: 0,
                        compression_type: 0,
                        compression_flags: 0,
                    }
                }
                TabVersion::V4 | TabVersion::V5 => {
                    let hash = if version == TabVersion::V5 {
                        r.read_u64()?
                    } else {
                        u64::from(r.read_u32()?)
                    };
                    TabEntry {
                        hash,
                        offset: r.read_u32()?,
                        size_c: r.read_u32()?,
                        size_u: r.read_u32()?,
                        block_index: r.read_u16()?,
                        compression_type: r.read_u8()?,
                        compression_flags: r.read_u8()?,
                    }
                }
            };
            entries.push(entry);
        }

        let tab = Self {
            header,
            version,
            unknown,
            blocks,
            entries,
        };
        tab.check_block_ownership()?;
        Ok(tab)
    }

    /// Blocks of an entry positioned in the data archive
    ///
    /// `None` when the entry is stored as a single unsegmented blob. Blocks
    /// are taken from the table starting at `block_index` until their
    /// compressed lengths add up to the entry's stored size.
    pub fn entry_blocks(&self, entry: &TabEntry) -> FormatResult<Option<Vec<EntryBlock>>> {
        let mut idx = entry.block_index as usize;
        match self.blocks.get(idx) {
            None => return Ok(None),
            Some(b) if *b == NO_BLOCK => return Ok(None),
            Some(_) => {}
        }

        let mut out = Vec::new();
        let mut consumed = 0u64;
        let mut offset = u64::from(entry.offset);
        while consumed < u64::from(entry.size_c) {
            let block = self.blocks.get(idx).ok_or_else(|| {
                FormatError::incorrect(format!(
                    "TAB entry {:08x}: block table exhausted at {idx}",
                    entry.hash
                ))
            })?;
            out.push(EntryBlock {
                offset,
                compressed_len: block.compressed_len,
                uncompressed_len: block.uncompressed_len,
            });
            offset += u64::from(block.compressed_len);
            consumed += u64::from(block.compressed_len);
            idx += 1;
        }

        if consumed != u64::from(entry.size_c) {
            return Err(FormatError::incorrect(format!(
                "TAB entry {:08x}: blocks cover {consumed} bytes, entry has {}",
                entry.hash, entry.size_c
            )));
        }
        Ok(Some(out))
    }

    fn check_block_ownership(&self) -> FormatResult<()> {
        let mut owner: Vec<Option<usize>> = vec![None; self.blocks.len()];
        for (i, entry) in self.entries.iter().enumerate() {
            let Some(blocks) = self.entry_blocks(entry)? else {
                continue;
            };
            for k in 0..blocks.len() {
                let row = entry.block_index as usize + k;
                if let Some(prev) = owner[row] {
                    return Err(FormatError::incorrect(format!(
                        "TAB block {row} claimed by entries {prev} and {i}"
                    )));
                }
                owner[row] = Some(i);
            }
        }
        Ok(())
    }

    /// Serialise the index
    pub fn build(&self) -> FormatResult<Vec<u8>> {
        let mut w = ArchiveWriter::new(Cursor::new(Vec::new()));
        w.write_bytes(&self.header.magic)?;
        w.write_u16(self.header.version)?;
        w.write_u16(self.header.minor)?;
        w.write_u32(self.header.alignment)?;

        match self.version {
            TabVersion::V3 => {}
            TabVersion::V4 => {
                for word in self.unknown {
                    w.write_u32(word)?;
                }
                w.write_u32(self.blocks.len() as u32)?;
            }
            TabVersion::V5 => {
                w.write_u32(self.entries.len() as u32)?;
                w.write_u32(self.blocks.len() as u32)?;
                for word in self.unknown {
                    w.write_u32(word)?;
                }
            }
        }
        for block in &self.blocks {
            w.write_u32(block.compressed_len)?;
            w.write_u32(block.uncompressed_len)?;
        }

        for e in &self.entries {
            match self.version {
                TabVersion::V3 => {
                    w.write_u32(e.hash as u32)?;
                    w.write_u32(e.offset)?;
                    w.write_u32(e.size_c)?;
                }
                TabVersion::V4 | TabVersion::V5 => {
                    if self.version == TabVersion::V5 {
                        w.write_u64(e.hash)?;
                    } else {
                        w.write_u32(e.hash as u32)?;
                    }
                    w.write_u32(e.offset)?;
                    w.write_u32(e.size_c)?;
                    w.write_u32(e.size_u)?;
                    w.write_u16(e.block_index)?;
                    w.write_u8(e.compression_type)?;
                    w.write_u8(e.compression_flags)?;
                }
            }
        }
        Ok(w.into_inner().into_inner())
    }
}

fn read_blocks(r: &mut ArchiveReader<Cursor<&[u8]>>, count: u32) -> FormatResult<Vec<TabBlock>> {
    let words = r.read_u32s(count as usize * 2)?;
    Ok(words
        .chunks_exact(2)
        .map(|p| TabBlock {
            compressed_len: p[0],
            uncompressed_len: p[1],
        })
        .collect())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn header(version: u16) -> TabHeader {
        TabHeader {
            magic: TAB_MAGIC,
            version,
            minor: 1,
            alignment: 4096,
        }
    }

    #[test]
    fn test_v3_entries_until_eof() {
        let tab = TabFile {
            header: header(2),
            version: TabVersion::V3,
            unknown: [0; 3],
            blocks: Vec::new(),
            entries: vec![TabEntry {
                hash: 0xDEAD_BEEF,
                offset: 0,
                size_c: 16,
                size_u: 16,
                block_index: 0,
                compression_type: 0,
                compression_flags: 0,
            }],
        };
        let mut data = tab.build().expect("Test operation should succeed");
        assert_eq!(data.len(), 24);
        // trailing partial entry is ignored
        data.extend_from_slice(&[1, 2, 3]);

        let parsed = TabFile::parse(&data, TabVersion::V3).expect("Test operation should succeed");
        assert_eq!(parsed, tab);
        assert_eq!(parsed.entry_blocks(&parsed.entries[0]).expect("Test operation should succeed"), None);
    }

    #[test]
    fn test_v4_block_resolution() {
        let tab = TabFile {
            header: header(2),
            version: TabVersion::V4,
            unknown: [7, 8, 9],
            blocks: vec![
                NO_BLOCK,
                TabBlock { compressed_len: 100, uncompressed_len: 200 },
                TabBlock { compressed_len: 50, uncompressed_len: 200 },
            ],
            entries: vec![
                TabEntry {
                    hash: 1,
                    offset: 4096,
                    size_c: 150,
                    size_u: 400,
                    block_index: 1,
                    compression_type: 3,
                    compression_flags: 0,
                },
                TabEntry {
                    hash: 2,
                    offset: 8192,
                    size_c: 10,
                    size_u: 10,
                    block_index: 0,
                    compression_type: 0,
                    compression_flags: 0,
                },
            ],
        };
        let data = tab.build().expect("Test operation should succeed");
        let parsed = TabFile::parse(&data, TabVersion::V4).expect("Test operation should succeed");
        assert_eq!(parsed, tab);

        let blocks = parsed
            .entry_blocks(&parsed.entries[0])
            .expect("Test operation should succeed")
            .expect("entry should have blocks");
        assert_eq!(
            blocks,
            vec![
                EntryBlock { offset: 4096, compressed_len: 100, uncompressed_len: 200 },
                EntryBlock { offset: 4196, compressed_len: 50, uncompressed_len: 200 },
            ]
        );
        assert_eq!(parsed.entry_blocks(&parsed.entries[1]).expect("Test operation should succeed"), None);
    }

    #[test]
    fn test_v5_counts_and_wide_hash() {
        let tab = TabFile {
            header: header(3),
            version: TabVersion::V5,
            unknown: [0, 0, 0],
            blocks: vec![NO_BLOCK],
            entries: vec![TabEntry {
                hash: 0x0123_4567_89AB_CDEF,
                offset: 0,
                size_c: 4,
                size_u: 4,
                block_index: 0,
                compression_type: 0,
                compression_flags: 0,
            }],
        };
        let data = tab.build().expect("Test operation should succeed");
        let parsed = TabFile::parse(&data, TabVersion::V5).expect("Test operation should succeed");
        assert_eq!(parsed.entries[0].hash, 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn test_shared_block_rejected() {
        let entry = |hash| TabEntry {
            hash,
            offset: 0,
            size_c: 100,
            size_u: 200,
            block_index: 0,
            compression_type: 1,
            compression_flags: 0,
        };
        let tab = TabFile {
            header: header(2),
            version: TabVersion::V4,
            unknown: [0; 3],
            blocks: vec![TabBlock { compressed_len: 100, uncompressed_len: 200 }],
            entries: vec![entry(1), entry(2)],
        };
        let data = tab.build().expect("Test operation should succeed");
        assert!(matches!(
            TabFile::parse(&data, TabVersion::V4),
            Err(FormatError::IncorrectFormat(_))
        ));
    }

    #[test]
    fn test_wrong_layout_version() {
        let mut data = Vec::new();
        data.extend_from_slice(&TAB_MAGIC);
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&4096u32.to_le_bytes());
        assert!(matches!(
            TabFile::parse(&data, TabVersion::V5),
            Err(FormatError::IncorrectFormat(_))
        ));
    }
}
