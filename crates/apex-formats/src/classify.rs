//! Blob classification by magic window and content heuristics

use crate::aaf::AafHeader;
use crate::error::FormatResult;
use crate::kind::FileKind;
use std::io::{Read, Seek, SeekFrom};

/// Bytes inspected for magic probes
pub const MAGIC_WINDOW: usize = 256;

/// Windows shorter than this are never probed for magic
pub const MIN_PROBE_LEN: usize = 20;

const ADF5_PREFIX: &[u8] = b"\x01\x01\x00\x00\x00 FDA";
const H2014_SIGNATURE: &[u8] = b"\x57\xE0\xE0\x57\x10\xC0\xC0\x10";
const RBMDL_PREFIX: &[u8] = b"\x05\x00\x00\x00RBMDL";
const DX10_FOURCC: &[u8] = b"DX10";

/// Result of classifying a blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Detected kind
    pub kind: FileKind,
    /// Uncompressed size; differs from the input size only for AAF
    pub size_u: u64,
    /// First four bytes as a little-endian `u32`, when at least 20 bytes were available
    pub magic: Option<u32>,
    /// Format-specific discriminator
    pub sub_kind: Option<u32>,
}

fn u32_at(buf: &[u8], pos: usize) -> Option<u32> {
    buf.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Probe the magic window; `None` if no magic matched
fn probe(window: &[u8]) -> Option<(FileKind, Option<u32>)> {
    let head4 = &window[0..4];
    let head3 = &window[0..3];

    let found = match head4 {
        b" FDA" => (FileKind::Adf, None),
        b"\x00FDA" => (FileKind::Adf0, u32_at(window, 4)),
        _ if window.starts_with(ADF5_PREFIX) => (FileKind::Adf5, None),
        b"AVTX" => (FileKind::Avtx, u32_at(window, 8)),
        b"DDS " => {
            let sub = if window.get(84..88) == Some(DX10_FOURCC) {
                u32_at(window, 128)
            } else {
                u32_at(window, 84)
            };
            (FileKind::Dds, sub)
        }
        _ if head3.eq_ignore_ascii_case(b"AAF") => (FileKind::Aaf, None),
        b"RTPC" => (FileKind::Rtpc, None),
        _ if head3 == b"CFX" || head3 == b"GFX" => (FileKind::Gfx, None),
        b"RIFF" => (FileKind::Riff, None),
        b"OggS" => (FileKind::Ogg, None),
        _ if head3 == b"BM6" || head3 == b"BM8" => (FileKind::Bmp, None),
        b"MDI\0" => (FileKind::Mdi, None),
        b"PFX\0" => (FileKind::Pfx, None),
        _ if &window[4..8] == b"SARC" => (FileKind::Sarc, None),
        _ if &window[4..8] == b"TAG0" => (FileKind::Tag0, None),
        _ if &window[16..20] == b"FSB5" => (FileKind::Fsb5c, None),
        _ if window.starts_with(H2014_SIGNATURE) => (FileKind::H2014, None),
        _ if window.starts_with(RBMDL_PREFIX) => (FileKind::Rbmdl, None),
        _ if head3 == b"KB2" => (FileKind::BinkKb2, None),
        _ if head3 == b"BIK" => (FileKind::BinkBik, None),
        b"GT0C" => (FileKind::Gtoc, None),
        _ => return None,
    };
    Some(found)
}

fn is_text_byte(b: u8) -> bool {
    matches!(b, 9 | 10 | 13 | 20..=127)
}

/// Classify `size` bytes starting at the reader's current position
///
/// Probes the magic window first, then the object-placement size heuristic,
/// then a text scan over the whole blob. The reader is left at an unspecified
/// position.
pub fn classify<R: Read + Seek>(reader: &mut R, size: u64) -> FormatResult<Classification> {
    let start = reader.stream_position()?;
    let mut window = Vec::with_capacity(MAGIC_WINDOW);
    reader
        .by_ref()
        .take(MAGIC_WINDOW.min(size as usize) as u64)
        .read_to_end(&mut window)?;

    let mut result = Classification {
        kind: FileKind::Unknown,
        size_u: size,
        magic: None,
        sub_kind: None,
    };

    if window.len() >= MIN_PROBE_LEN {
        result.magic = u32_at(&window, 0);
        if let Some((kind, sub_kind)) = probe(&window) {
            result.kind = kind;
            result.sub_kind = sub_kind;
            if kind == FileKind::Aaf {
                reader.seek(SeekFrom::Start(start))?;
                result.size_u = u64::from(AafHeader::read_from(reader)?.size_u);
            }
            return Ok(result);
        }
    }

    if let (Some(ver), Some(count)) = (u32_at(&window, 0), u32_at(&window, 4))
        && ver == 4
        && u64::from(count) * 80 + 8 == size
    {
        result.kind = FileKind::Obc;
        return Ok(result);
    }

    reader.seek(SeekFrom::Start(start))?;
    let mut remaining = size;
    let mut chunk = vec![0u8; 1024 * 1024];
    let mut all_text = true;
    while remaining > 0 {
        let want = chunk.len().min(remaining as usize);
        let got = reader.read(&mut chunk[..want])?;
        if got == 0 {
            break;
        }
        if !chunk[..got].iter().copied().all(is_text_byte) {
            all_text = false;
            break;
        }
        remaining -= got as u64;
    }
    if all_text {
        result.kind = FileKind::Txt;
    }

    Ok(result)
}

/// Classify an in-memory blob
pub fn classify_bytes(data: &[u8]) -> FormatResult<Classification> {
    classify(&mut std::io::Cursor::new(data), data.len() as u64)
}

/// Refine a kind from a virtual path once one is known
///
/// Mip tail files carry no magic, so they can only be recognised by name.
pub fn classify_by_name(v_path: &[u8]) -> Option<FileKind> {
    let ext = apex_hash::extension(v_path);
    if ext.starts_with(b".atx") {
        Some(FileKind::Atx)
    } else if ext == b".hmddsc" {
        Some(FileKind::Hmddsc)
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn padded(prefix: &[u8]) -> Vec<u8> {
        let mut v = prefix.to_vec();
        v.resize(64, 0xEE);
        v
    }

    #[test]
    fn test_magic_probes() {
        let cases: &[(&[u8], FileKind)] = &[
            (b" FDA", FileKind::Adf),
            (b"\x00FDA", FileKind::Adf0),
            (ADF5_PREFIX, FileKind::Adf5),
            (b"RTPC", FileKind::Rtpc),
            (b"GFX", FileKind::Gfx),
            (b"CFX", FileKind::Gfx),
            (b"RIFF", FileKind::Riff),
            (b"OggS", FileKind::Ogg),
            (b"BM6", FileKind::Bmp),
            (b"MDI\0", FileKind::Mdi),
            (b"PFX\0", FileKind::Pfx),
            (b"\x04\0\0\0SARC", FileKind::Sarc),
            (b"\x01\0\0\0TAG0", FileKind::Tag0),
            (b"\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0FSB5", FileKind::Fsb5c),
            (H2014_SIGNATURE, FileKind::H2014),
            (RBMDL_PREFIX, FileKind::Rbmdl),
            (b"KB2j", FileKind::BinkKb2),
            (b"BIKi", FileKind::BinkBik),
            (b"GT0C", FileKind::Gtoc),
        ];
        for (prefix, kind) in cases {
            let c = classify_bytes(&padded(prefix)).expect("Test operation should succeed");
            assert_eq!(c.kind, *kind, "prefix {prefix:?}");
            assert_eq!(c.size_u, 64);
            assert!(c.magic.is_some());
        }
    }

    #[test]
    fn test_avtx_sub_kind_is_pixel_format() {
        let data = crate::avtx::tests::header(98)
            .build()
            .expect("Test operation should succeed");
        let c = classify_bytes(&data).expect("Test operation should succeed");
        assert_eq!(c.kind, FileKind::Avtx);
        assert_eq!(c.sub_kind, Some(98));
    }

    #[test]
    fn test_aaf_reports_uncompressed_size() {
        let payload = vec![0x41u8; 300];
        let data = crate::aaf::compress_aaf(&payload, 1024).expect("Test operation should succeed");
        let c = classify_bytes(&data).expect("Test operation should succeed");
        assert_eq!(c.kind, FileKind::Aaf);
        assert_eq!(c.size_u, 300);
    }

    #[test]
    fn test_short_blob_is_not_probed() {
        let c = classify_bytes(b"RTPC\x01\0\0\0").expect("Test operation should succeed");
        assert_eq!(c.kind, FileKind::Unknown);
        assert_eq!(c.magic, None);
    }

    #[test]
    fn test_obc_size_heuristic() {
        let mut data = 4u32.to_le_bytes().to_vec();
        data.extend_from_slice(&2u32.to_le_bytes());
        data.resize(8 + 160, 0xFF);
        let c = classify_bytes(&data).expect("Test operation should succeed");
        assert_eq!(c.kind, FileKind::Obc);
    }

    #[test]
    fn test_text_scan() {
        let c = classify_bytes(b"{\"0\": [\"a/b.txt\"],\r\n\t\"1\": []}").expect("Test operation should succeed");
        assert_eq!(c.kind, FileKind::Txt);

        let c = classify_bytes(b"Hello, Apex!\n\0\0\0").expect("Test operation should succeed");
        assert_eq!(c.kind, FileKind::Unknown);
    }

    #[test]
    fn test_classify_by_name() {
        assert_eq!(classify_by_name(b"tex/a.atx1"), Some(FileKind::Atx));
        assert_eq!(classify_by_name(b"tex/a.hmddsc"), Some(FileKind::Hmddsc));
        assert_eq!(classify_by_name(b"tex/a.ddsc"), None);
    }
}
