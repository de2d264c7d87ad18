//! AVTX texture header
//!
//! Textures are split across a header file (`.ddsc`, 128-byte header plus
//! the smallest mips) and optional tail files sharing the same stem
//! (`.hmddsc`, `.atx1`, `.atx2`, ...) carrying the larger mips.

use crate::error::FormatResult;
use binrw::{BinRead, BinWrite};
use std::io::Cursor;

/// AVTX magic
pub const AVTX_MAGIC: [u8; 4] = *b"AVTX";

/// Header size
pub const AVTX_HEADER_SIZE: usize = 128;

/// Extensions of files that may carry mip tails for a `.ddsc` header
pub const MIP_TAIL_EXTENSIONS: [&str; 3] = [".hmddsc", ".atx1", ".atx2"];

/// Fixed 128-byte texture header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct AvtxHeader {
    /// "AVTX"
    #[br(assert(magic == AVTX_MAGIC, "Invalid AVTX magic: {:?}", magic))]
    pub magic: [u8; 4],
    /// Format version
    pub version: u16,
    /// Unknown
    pub unknown0: u8,
    /// Dimension count
    pub dim: u8,
    /// DXGI pixel format
    pub pixel_format: u32,
    /// Width of mip 0
    pub width: u16,
    /// Height of mip 0
    pub height: u16,
    /// Depth
    pub depth: u16,
    /// Flags
    pub flags: u16,
    /// Mips in the full chain
    pub full_mip_count: u8,
    /// Mips stored in the header file
    pub mip_count: u8,
    /// Unknown
    pub unknown1: u16,
    /// Remainder of the header, not interpreted
    pub reserved: [u32; 26],
}

impl AvtxHeader {
    /// Parse the header at the start of `data`
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        Ok(Self::read(&mut Cursor::new(data))?)
    }

    /// Serialise the header
    pub fn build(&self) -> FormatResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::with_capacity(AVTX_HEADER_SIZE));
        self.write(&mut out)?;
        Ok(out.into_inner())
    }

    /// `(width, height)` of every mip in the full chain, largest first
    pub fn mip_dims(&self) -> Vec<(u32, u32)> {
        let (mut w, mut h) = (u32::from(self.width), u32::from(self.height));
        let mut dims = Vec::with_capacity(self.full_mip_count as usize);
        for _ in 0..self.full_mip_count {
            dims.push((w, h));
            w /= 2;
            h /= 2;
        }
        dims
    }

    /// Index of the first mip stored in the header file
    ///
    /// Mips before this index live in tail files.
    pub fn first_stored_mip(&self) -> usize {
        usize::from(self.full_mip_count.saturating_sub(self.mip_count))
    }
}

impl crate::ApexFormat for AvtxHeader {
    fn parse(data: &[u8]) -> FormatResult<Self> {
        Self::parse(data)
    }

    fn build(&self) -> FormatResult<Vec<u8>> {
        Self::build(self)
    }
}
