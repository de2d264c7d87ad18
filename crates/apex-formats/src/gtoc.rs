//! GT0C sub-index files
//!
//! A GT0C file describes archives that are not listed in any TAB index. It
//! holds one record per archive (path hash, archive magic and a block list
//! pointing into a shared file table) followed by the file table itself:
//! `(path_hash32, ext_hash32, file_size, path\0)` records aligned to four
//! bytes. Block record ids are relative to the position of the id field.

use crate::error::{FormatError, FormatResult};
use crate::stream::{ArchiveReader, ArchiveWriter};
use std::collections::HashMap;
use std::io::Cursor;

/// GT0C magic
pub const GTOC_MAGIC: [u8; 4] = *b"GT0C";

/// A file listed for one archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtocFileEntry {
    /// Body offset inside the archive
    pub offset_in_archive: u32,
    /// H32 of `path`
    pub path_hash32: u32,
    /// H32 of the extension of `path`
    pub ext_hash32: u32,
    /// Body size
    pub file_size: u32,
    /// Virtual path
    pub path: Vec<u8>,
}

/// An archive described by the sub-index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtocArchive {
    /// H32 of the archive's path
    pub path_hash32: u32,
    /// First four bytes of the archive
    pub archive_magic: u32,
    /// Files in block order
    pub file_entries: Vec<GtocFileEntry>,
}

/// A parsed sub-index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtocFile {
    /// Archive definitions
    pub archives: Vec<GtocArchive>,
    /// Every path in the file table, in table order
    pub paths: Vec<Vec<u8>>,
}

struct FileRecord {
    path_hash32: u32,
    ext_hash32: u32,
    file_size: u32,
    path: Vec<u8>,
}

impl GtocFile {
    /// Parse a sub-index buffer
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        let mut r = ArchiveReader::new(Cursor::new(data));
        let magic = r.read_bytes(4)?;
        if magic != GTOC_MAGIC {
            return Err(FormatError::incorrect(format!("Invalid GT0C magic: {magic:?}")));
        }
        let archive_count = r.read_u32()?;

        let mut raw_archives = Vec::with_capacity(archive_count as usize);
        for _ in 0..archive_count {
            let path_hash32 = r.read_u32()?;
            let archive_magic = r.read_u32()?;
            let block_len = r.read_u32()?;
            let mut blocks = Vec::with_capacity(block_len as usize);
            for _ in 0..block_len {
                let field_pos = r.position()?;
                let record_id = field_pos + u64::from(r.read_u32()?);
                let offset_in_archive = r.read_u32()?;
                blocks.push((record_id, offset_in_archive));
            }
            raw_archives.push((path_hash32, archive_magic, blocks));
        }

        let mut records = HashMap::new();
        let mut paths = Vec::new();
        loop {
            let offset = r.position()?;
            let (Some(path_hash32), Some(ext_hash32), Some(file_size)) =
                (r.try_read_u32()?, r.try_read_u32()?, r.try_read_u32()?)
            else {
                break;
            };
            let Some(path) = r.try_read_strz()? else {
                break;
            };
            r.align(4)?;
            paths.push(path.clone());
            records.insert(
                offset,
                FileRecord {
                    path_hash32,
                    ext_hash32,
                    file_size,
                    path,
                },
            );
        }

        let archives = raw_archives
            .into_iter()
            .map(|(path_hash32, archive_magic, blocks)| {
                let file_entries = blocks
                    .into_iter()
                    .map(|(record_id, offset_in_archive)| {
                        let rec = records.get(&record_id).ok_or_else(|| {
                            FormatError::incorrect(format!("GT0C record {record_id} not found"))
                        })?;
                        Ok(GtocFileEntry {
                            offset_in_archive,
                            path_hash32: rec.path_hash32,
                            ext_hash32: rec.ext_hash32,
                            file_size: rec.file_size,
                            path: rec.path.clone(),
                        })
                    })
                    .collect::<FormatResult<Vec<_>>>()?;
                Ok(GtocArchive {
                    path_hash32,
                    archive_magic,
                    file_entries,
                })
            })
            .collect::<FormatResult<Vec<_>>>()?;

        Ok(Self { archives, paths })
    }

    /// Serialise with one file record per distinct file
    pub fn build(&self) -> FormatResult<Vec<u8>> {
        let key = |e: &GtocFileEntry| (e.path_hash32, e.ext_hash32, e.file_size, e.path.clone());

        let mut order = Vec::new();
        let mut seen = HashMap::new();
        for e in self.archives.iter().flat_map(|a| &a.file_entries) {
            seen.entry(key(e)).or_insert_with(|| {
                order.push(e.clone());
                order.len() - 1
            });
        }

        let archives_len: u64 = self
            .archives
            .iter()
            .map(|a| 12 + 8 * a.file_entries.len() as u64)
            .sum();
        let mut record_offsets = Vec::with_capacity(order.len());
        let mut pos = 8 + archives_len;
        for e in &order {
            record_offsets.push(pos);
            pos = (pos + 12 + e.path.len() as u64 + 1).next_multiple_of(4);
        }

        let mut w = ArchiveWriter::new(Cursor::new(Vec::new()));
        w.write_bytes(&GTOC_MAGIC)?;
        w.write_u32(self.archives.len() as u32)?;
        for a in &self.archives {
            w.write_u32(a.path_hash32)?;
            w.write_u32(a.archive_magic)?;
            w.write_u32(a.file_entries.len() as u32)?;
            for e in &a.file_entries {
                let field_pos = w.position()?;
                let record = record_offsets[seen[&key(e)]];
                w.write_u32((record - field_pos) as u32)?;
                w.write_u32(e.offset_in_archive)?;
            }
        }
        for e in &order {
            w.write_u32(e.path_hash32)?;
            w.write_u32(e.ext_hash32)?;
            w.write_u32(e.file_size)?;
            w.write_strz(&e.path)?;
            w.align(4)?;
        }
        Ok(w.into_inner().into_inner())
    }
}

impl crate::ApexFormat for GtocFile {
    fn parse(data: &[u8]) -> FormatResult<Self> {
        Self::parse(data)
    }

    fn build(&self) -> FormatResult<Vec<u8>> {
        Self::build(self)
    }
}
