//! Global data-container directories
//!
//! A GDCC instance packs many small typed blobs into one buffer. Its
//! directory lists each blob's virtual path and type; RTPC blobs carry a
//! second-level header holding their real offset and size.

use crate::bytes::{strz_at, u32_at};
use crate::error::{FormatError, FormatResult};

/// Type hash of the GDCC directory instance
pub const GDCC_TYPE_HASH: u32 = 0x1788_42FE;

/// File-type hash marking RTPC blobs inside a directory
pub const RTPC_FILETYPE_HASH: u32 = 0xD74C_C4CB;

/// One blob listed in a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdcEntry {
    /// Position in the directory
    pub index: usize,
    /// Offset of the blob from the start of the directory buffer
    pub offset: u64,
    /// Blob size, known only for RTPC blobs
    pub size: Option<u64>,
    /// Virtual path of the blob
    pub v_path: Vec<u8>,
    /// H32 of `v_path`
    pub v_hash: u32,
    /// File-type hash from the directory
    pub filetype_hash: u32,
    /// ADF type of the blob when it is a bare typed instance
    pub adf_type_hash: Option<u32>,
}

fn expect_word(buf: &[u8], pos: usize, want: u32, what: &str) -> FormatResult<()> {
    let got = u32_at(buf, pos)?;
    if got != want {
        return Err(FormatError::incorrect(format!(
            "GDCC {what}: expected {want}, got {got}"
        )));
    }
    Ok(())
}

/// Parse a directory starting at `buf[0]`
pub fn parse_gdc_directory(buf: &[u8]) -> FormatResult<Vec<GdcEntry>> {
    let mut counts = [0u32; 8];
    for (i, c) in counts.iter_mut().enumerate() {
        *c = u32_at(buf, i * 4)?;
    }
    expect_word(buf, 0, 32, "header word 0")?;
    expect_word(buf, 4, 16, "header word 1")?;
    expect_word(buf, 12, 0, "header word 3")?;
    expect_word(buf, 20, 16, "header word 5")?;
    expect_word(buf, 28, 0, "header word 7")?;
    if counts[2] != counts[6] {
        return Err(FormatError::incorrect(format!(
            "GDCC entry counts disagree: {} vs {}",
            counts[2], counts[6]
        )));
    }

    let mut entries = Vec::with_capacity(counts[2] as usize);
    for index in 0..counts[2] as usize {
        let base = 32 + index * 32;
        let data_offset = u32_at(buf, base)?;
        expect_word(buf, base + 4, 16, "entry word 1")?;
        let filetype_hash = u32_at(buf, base + 8)?;
        expect_word(buf, base + 12, 0, "entry word 3")?;
        let vpath_offset = u32_at(buf, base + 16)?;
        expect_word(buf, base + 20, 16, "entry word 5")?;
        expect_word(buf, base + 24, 0, "entry word 6")?;
        expect_word(buf, base + 28, 0, "entry word 7")?;

        let v_path = strz_at(buf, vpath_offset as usize)?;
        let v_hash = apex_hash::hash32(&v_path);

        let (offset, size, adf_type_hash) = if filetype_hash == RTPC_FILETYPE_HASH {
            let at = data_offset as usize;
            (
                u64::from(u32_at(buf, at)?),
                Some(u64::from(u32_at(buf, at + 8)?)),
                None,
            )
        } else {
            (u64::from(data_offset), None, Some(filetype_hash))
        };

        entries.push(GdcEntry {
            index,
            offset,
            size,
            v_path,
            v_hash,
            filetype_hash,
            adf_type_hash,
        });
    }
    Ok(entries)
}
