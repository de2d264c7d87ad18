//! Block codecs for segmented archive entries

use crate::error::{FormatError, FormatResult};
use flate2::Compression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Maximum allowed decompression size (1 GiB)
///
/// Limits the output of a single block so a corrupt length cannot exhaust
/// memory.
pub const MAX_DECOMPRESSION_SIZE: usize = 1024 * 1024 * 1024;

/// Compression variant carried in a node's flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionType {
    /// Raw bytes within the parent
    #[default]
    None = 0x00,
    /// Segmented, zlib per block
    V4Zlib = 0x01,
    /// Segmented, codec not identified
    V4Unknown = 0x02,
    /// Segmented, Zstandard per block
    V4Zstd = 0x03,
    /// Segmented, engine native LZ per block
    V4Oo = 0x04,
    /// AAF wrapper
    V3Zlib = 0xff,
}

impl CompressionType {
    /// Decode a flag byte
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::None),
            0x01 => Some(Self::V4Zlib),
            0x02 => Some(Self::V4Unknown),
            0x03 => Some(Self::V4Zstd),
            0x04 => Some(Self::V4Oo),
            0xff => Some(Self::V3Zlib),
            _ => None,
        }
    }

    /// Flag byte
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the bytes are stored as a list of independently coded blocks
    pub fn is_block_coded(self) -> bool {
        matches!(self, Self::V4Zlib | Self::V4Zstd | Self::V4Oo)
    }
}

/// Engine native LZ decoder
///
/// The decoder lives in a vendor library that is not linked here; callers
/// that have access to it inject an implementation.
pub trait NativeLz: Send + Sync {
    /// Decode `input` into exactly `uncompressed_len` bytes
    fn decompress(&self, input: &[u8], uncompressed_len: usize) -> FormatResult<Vec<u8>>;
}

fn read_limited<R: Read>(mut decoder: R, what: &str) -> FormatResult<Vec<u8>> {
    let mut decompressed = Vec::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = decoder
            .read(&mut buffer)
            .map_err(|e| FormatError::incorrect(format!("{what} decompression failed: {e}")))?;

        if bytes_read == 0 {
            break;
        }

        if decompressed.len() + bytes_read > MAX_DECOMPRESSION_SIZE {
            return Err(FormatError::incorrect(format!(
                "decompressed size exceeds limit of {MAX_DECOMPRESSION_SIZE} bytes"
            )));
        }

        decompressed.extend_from_slice(&buffer[..bytes_read]);
    }
    Ok(decompressed)
}

/// Decode one block
///
/// A block whose compressed and uncompressed lengths are equal is stored
/// verbatim. The returned buffer may be shorter or longer than
/// `uncompressed_len`; the caller decides what to do with a mismatch.
pub fn decode_block(
    compression: CompressionType,
    input: &[u8],
    uncompressed_len: usize,
    native: Option<&dyn NativeLz>,
) -> FormatResult<Vec<u8>> {
    if input.len() == uncompressed_len {
        return Ok(input.to_vec());
    }
    if uncompressed_len > MAX_DECOMPRESSION_SIZE {
        return Err(FormatError::incorrect(format!(
            "block size {uncompressed_len} exceeds limit of {MAX_DECOMPRESSION_SIZE} bytes"
        )));
    }

    match compression {
        CompressionType::V4Zlib => read_limited(ZlibDecoder::new(input), "zlib"),
        CompressionType::V4Zstd => {
            let decoder = zstd::stream::read::Decoder::new(input)
                .map_err(|e| FormatError::incorrect(format!("zstd init failed: {e}")))?;
            read_limited(decoder, "zstd")
        }
        CompressionType::V4Oo => match native {
            Some(lz) => lz.decompress(input, uncompressed_len),
            None => Err(FormatError::UnknownCompressionType(compression.code())),
        },
        other => Err(FormatError::UnknownCompressionType(other.code())),
    }
}

/// Encode one block with zlib or Zstandard
pub fn encode_block(compression: CompressionType, input: &[u8]) -> FormatResult<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(input.to_vec()),
        CompressionType::V4Zlib => {
            let mut encoder = ZlibEncoder::new(input, Compression::default());
            let mut compressed = Vec::new();
            encoder
                .read_to_end(&mut compressed)
                .map_err(|e| FormatError::incorrect(format!("zlib compression failed: {e}")))?;
            Ok(compressed)
        }
        CompressionType::V4Zstd => zstd::bulk::compress(input, 0)
            .map_err(|e| FormatError::incorrect(format!("zstd compression failed: {e}"))),
        other => Err(FormatError::UnknownCompressionType(other.code())),
    }
}
