//! Path hashes for Apex engine asset archives
//!
//! The engine addresses every virtual file by a hash of its path. Depending
//! on the title and archive generation the stored hash is one of:
//!
//! - **H32**: Jenkins lookup3 `hashlittle` with seed 0
//! - **H48**: bits 16..64 of `MurmurHash3_x64_128`
//! - **H64**: the low 64 bits of the same Murmur digest, stored signed
//!
//! An **extension hash** is H32 of the last dotted suffix of a path
//! (including the dot), or of the empty string when there is none.
//!
//! # Examples
//!
//! ```
//! use apex_hash::{hash32, hash_all, ext_hash};
//!
//! let triple = hash_all(b"foo/bar.txt");
//! assert_eq!(triple.h32, hash32(b"foo/bar.txt"));
//! assert_eq!(ext_hash(b"foo/bar.txt"), hash32(b".txt"));
//! ```

pub mod jenkins;
pub mod murmur;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mask applied to the 48-bit hash
pub const HASH48_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// 32-bit path hash
pub fn hash32(data: &[u8]) -> u32 {
    jenkins::hashlittle(data, 0)
}

/// 48-bit path hash
pub fn hash48(data: &[u8]) -> u64 {
    let (h1, _) = murmur::murmur3_x64_128(data, 0);
    (h1 >> 16) & HASH48_MASK
}

/// 64-bit path hash, reinterpreted as signed for storage
pub fn hash64(data: &[u8]) -> i64 {
    let (h1, _) = murmur::murmur3_x64_128(data, 0);
    h1 as i64
}

/// All three hash widths of the same input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashTriple {
    /// Jenkins lookup3 hash
    pub h32: u32,
    /// Murmur-derived 48-bit hash
    pub h48: u64,
    /// Murmur-derived 64-bit hash, signed
    pub h64: i64,
}

impl HashTriple {
    /// The 64-bit hash reinterpreted as unsigned
    pub fn h64_unsigned(&self) -> u64 {
        self.h64 as u64
    }

    /// Select the value for a given width, as an unsigned integer
    pub fn for_width(&self, width: HashWidth) -> u64 {
        match width {
            HashWidth::W32 => u64::from(self.h32),
            HashWidth::W48 => self.h48,
            HashWidth::W64 => self.h64_unsigned(),
        }
    }
}

impl fmt::Display for HashTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{:012x}:{:016x}", self.h32, self.h48, self.h64_unsigned())
    }
}

/// Compute H32, H48 and H64 in one call
pub fn hash_all(data: &[u8]) -> HashTriple {
    let (h1, _) = murmur::murmur3_x64_128(data, 0);
    HashTriple {
        h32: hash32(data),
        h48: (h1 >> 16) & HASH48_MASK,
        h64: h1 as i64,
    }
}

/// Return the last dotted suffix of a path including the dot
///
/// Only the final path component is considered, so `dir.d/file` has no
/// extension.
pub fn extension(path: &[u8]) -> &[u8] {
    let name_start = path
        .iter()
        .rposition(|&b| b == b'/' || b == b'\\')
        .map_or(0, |p| p + 1);
    let name = &path[name_start..];
    match name.iter().rposition(|&b| b == b'.') {
        // Leading dots belong to the stem
        Some(p) if name[..p].iter().any(|&b| b != b'.') => &name[p..],
        _ => &[],
    }
}

/// H32 of the last dotted suffix of `path`, or of the empty string
pub fn ext_hash(path: &[u8]) -> u32 {
    hash32(extension(path))
}

/// Width of the v_hash stored for a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HashWidth {
    /// 4-byte Jenkins hash
    #[default]
    W32,
    /// 6-byte Murmur hash
    W48,
    /// 8-byte Murmur hash
    W64,
}

impl HashWidth {
    /// Width from a byte count (4, 6 or 8)
    pub fn from_bytes(bytes: u32) -> Option<Self> {
        match bytes {
            4 => Some(Self::W32),
            6 => Some(Self::W48),
            8 => Some(Self::W64),
            _ => None,
        }
    }

    /// Width from the two-bit code stored in node flags
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::W32),
            2 => Some(Self::W48),
            3 => Some(Self::W64),
            _ => None,
        }
    }

    /// Two-bit code stored in node flags
    pub fn code(self) -> u8 {
        match self {
            Self::W32 => 1,
            Self::W48 => 2,
            Self::W64 => 3,
        }
    }

    /// Size of the hash in bytes
    pub fn byte_size(self) -> u32 {
        match self {
            Self::W32 => 4,
            Self::W48 => 6,
            Self::W64 => 8,
        }
    }

    /// Hash `data` at this width, returned unsigned
    pub fn hash(self, data: &[u8]) -> u64 {
        match self {
            Self::W32 => u64::from(hash32(data)),
            Self::W48 => hash48(data),
            Self::W64 => hash64(data) as u64,
        }
    }

    /// Largest value representable at this width
    pub fn max_value(self) -> u64 {
        match self {
            Self::W32 => u64::from(u32::MAX),
            Self::W48 => HASH48_MASK,
            Self::W64 => u64::MAX,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_golden_triples() {
        let vectors: [(&[u8], u32, u64, i64); 13] = [
            (b"", 0xdead_beef, 0, 0),
            (b"a", 0x58d6_8708, 0x8555_5565_f659, -8_839_064_797_231_613_815),
            (b"abcdefghijkl", 0x4012_f87b, 0x8ef3_9bb1_e67a, -8_145_996_112_604_765_804),
            (b"abcdefghijklm", 0x9281_28f9, 0x1648_288d_a7c0, 1_605_577_856_027_523_699),
            (
                b"Four score and seven years ago",
                0x1777_0551,
                0xdf32_826e_c5fd,
                -2_363_683_442_136_361_951,
            ),
            (b"inner.bin", 0x9186_1970, 0xeec0_041d_5adf, -1_242_988_973_029_065_432),
            (b"foo/bar.txt", 0x7cd1_6812, 0xf69b_cc39_a80e, -676_722_770_984_373_673),
            (b".txt", 0x0ee6_5cf3, 0x99de_06eb_af48, -7_359_437_131_748_995_602),
            (b".bin", 0xd274_19c1, 0x94d8_d30e_a38f, -7_721_189_501_299_628_462),
            (b"gdc/global.gdcc", 0x9918_acfa, 0x974e_8421_b12f, -7_543_947_045_557_524_345),
            (
                b"settings/hp_settings/reserve_0.bin",
                0xbe27_0ce7,
                0x1a76_e929_e9c5,
                1_906_967_858_462_946_495,
            ),
            (b"_class", 0x1473_b179, 0x75f0_8b6a_ffd8, 8_498_445_788_523_280_084),
            (b"name", 0xd31a_b684, 0x67ce_95df_fc08, 7_480_080_820_347_656_939),
        ];

        for (input, h32, h48, h64) in vectors {
            let label = String::from_utf8_lossy(input);
            assert_eq!(hash32(input), h32, "h32 of {label:?}");
            assert_eq!(hash48(input), h48, "h48 of {label:?}");
            assert_eq!(hash64(input), h64, "h64 of {label:?}");
            assert_eq!(hash_all(input), HashTriple { h32, h48, h64 });
        }
    }

    #[test]
    fn test_ext_hash() {
        assert_eq!(ext_hash(b"foo/bar.txt"), hash32(b".txt"));
        assert_eq!(ext_hash(b"inner.bin"), 0xd274_19c1);
        assert_eq!(ext_hash(b"archive.tar.gz"), hash32(b".gz"));
        assert_eq!(ext_hash(b"no_extension"), 0xdead_beef);
        assert_eq!(ext_hash(b"dir.d/file"), 0xdead_beef);
    }

    #[test]
    fn test_extension_of_dotfile_is_empty() {
        assert_eq!(extension(b"dir/.hidden"), b"");
        assert_eq!(extension(b"a/b.c"), b".c");
        assert_eq!(extension(b"..."), b"");
        assert_eq!(extension(b"dir/.a.b"), b".b");
    }

    #[test]
    fn test_width_codes() {
        for width in [HashWidth::W32, HashWidth::W48, HashWidth::W64] {
            assert_eq!(HashWidth::from_code(width.code()), Some(width));
            assert_eq!(HashWidth::from_bytes(width.byte_size()), Some(width));
        }
        assert_eq!(HashWidth::from_bytes(5), None);
        assert_eq!(HashWidth::from_code(0), None);
    }

    #[test]
    fn test_width_hash_matches_triple() {
        let triple = hash_all(b"inner.bin");
        assert_eq!(HashWidth::W32.hash(b"inner.bin"), triple.for_width(HashWidth::W32));
        assert_eq!(HashWidth::W48.hash(b"inner.bin"), triple.for_width(HashWidth::W48));
        assert_eq!(HashWidth::W64.hash(b"inner.bin"), triple.for_width(HashWidth::W64));
    }
}
