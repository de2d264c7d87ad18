//! Catalog node records

use apex_formats::tab::EntryBlock;
use apex_formats::{CompressionType, FileKind};
use apex_hash::HashWidth;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

const COMPRESSION_TYPE_MASK: u32 = 0xFF;
const COMPRESSION_FLAG_MASK: u32 = 0xFF00;
const COMPRESSION_FLAG_SHIFT: u32 = 8;
const HASH_WIDTH_MASK: u32 = 0x3 << 16;
const HASH_WIDTH_SHIFT: u32 = 16;
const TEMPORARY: u32 = 1 << 20;

/// Classification passes that record their visit in a node's flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessPass {
    /// Raw classification while the node has no name
    RawNoName,
    /// Raw classification once the node has a name
    RawWithName,
    /// Kind-specific handler (container expansion, string harvest)
    ByType,
    /// One-off handlers keyed on a specific name
    Specific,
}

impl ProcessPass {
    const fn bit(self) -> u32 {
        match self {
            Self::RawNoName => 1 << 21,
            Self::RawWithName => 1 << 22,
            Self::ByType => 1 << 23,
            Self::Specific => 1 << 24,
        }
    }
}

/// Packed node flags
///
/// Bits 0..8 hold the compression type, 8..16 the compression flag, 16..18
/// the v_hash width code, bit 20 marks temporary nodes and bits 21..25 the
/// processed passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeFlags(pub u32);

impl NodeFlags {
    /// Raw compression type code
    pub const fn compression_code(self) -> u8 {
        (self.0 & COMPRESSION_TYPE_MASK) as u8
    }

    /// Compression type, `None` for codes outside the known set
    pub fn compression(self) -> Option<CompressionType> {
        CompressionType::from_code(self.compression_code())
    }

    /// Store a compression type code
    pub fn set_compression_code(&mut self, code: u8) {
        self.0 = (self.0 & !COMPRESSION_TYPE_MASK) | u32::from(code);
    }

    /// Compression flag byte
    pub const fn compression_flag(self) -> u8 {
        ((self.0 & COMPRESSION_FLAG_MASK) >> COMPRESSION_FLAG_SHIFT) as u8
    }

    /// Store the compression flag byte
    pub fn set_compression_flag(&mut self, flag: u8) {
        self.0 = (self.0 & !COMPRESSION_FLAG_MASK) | (u32::from(flag) << COMPRESSION_FLAG_SHIFT);
    }

    /// Width of the node's v_hash
    pub fn hash_width(self) -> Option<HashWidth> {
        HashWidth::from_code(((self.0 & HASH_WIDTH_MASK) >> HASH_WIDTH_SHIFT) as u8)
    }

    /// Store the v_hash width
    pub fn set_hash_width(&mut self, width: HashWidth) {
        self.0 = (self.0 & !HASH_WIDTH_MASK) | (u32::from(width.code()) << HASH_WIDTH_SHIFT);
    }

    /// Whether the node was registered as temporary
    pub const fn is_temporary(self) -> bool {
        self.0 & TEMPORARY != 0
    }

    /// Mark or unmark the node as temporary
    pub fn set_temporary(&mut self, temporary: bool) {
        if temporary {
            self.0 |= TEMPORARY;
        } else {
            self.0 &= !TEMPORARY;
        }
    }

    /// Whether a pass has already examined the node
    pub const fn is_processed(self, pass: ProcessPass) -> bool {
        self.0 & pass.bit() != 0
    }

    /// Record that a pass examined the node; never cleared
    pub fn set_processed(&mut self, pass: ProcessPass) {
        self.0 |= pass.bit();
    }
}

/// One blob in the virtual file system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfsNode {
    /// Catalog identity; `0` until the node is stored
    pub uid: u64,
    /// Containing node
    pub parent: Option<u64>,
    /// Position in the parent's entry list
    pub index: Option<u64>,
    /// Byte offset in the parent; `None` for symlink entries
    pub offset: Option<u64>,
    /// Stored size
    pub size_c: Option<u64>,
    /// Uncompressed size
    pub size_u: Option<u64>,
    /// Engine hash of the virtual path
    pub v_hash: Option<u64>,
    /// Virtual path
    pub v_path: Option<Vec<u8>>,
    /// Physical path for nodes backed by an on-disk file
    pub p_path: Option<PathBuf>,
    /// Hex sha256 of the uncompressed bytes
    pub content_hash: Option<String>,
    /// First four bytes, little-endian
    pub magic: Option<u32>,
    /// Assigned kind
    pub file_kind: Option<FileKind>,
    /// Format-specific discriminator
    pub sub_kind: Option<u32>,
    /// H32 of the path extension
    pub ext_hash: Option<u32>,
    /// Packed flags
    pub flags: NodeFlags,
    /// Distance from a node referenced at runtime
    pub used_at_runtime_depth: Option<u32>,
    /// Segments of a block-coded node; stored in their own table
    #[serde(skip)]
    pub blocks: Vec<EntryBlock>,
}

impl VfsNode {
    /// Node with a v_hash of the given width
    pub fn with_hash(width: HashWidth, v_hash: Option<u64>) -> Self {
        let mut node = Self {
            v_hash,
            ..Self::default()
        };
        node.flags.set_hash_width(width);
        node
    }

    /// Node named by `v_path`, hashed at `width`
    pub fn named(width: HashWidth, v_path: &[u8]) -> Self {
        let mut node = Self::with_hash(width, Some(width.hash(v_path)));
        node.v_path = Some(v_path.to_vec());
        node.ext_hash = Some(apex_hash::ext_hash(v_path));
        node
    }

    /// Whether the node's body lives at an offset in its parent
    pub const fn is_embedded(&self) -> bool {
        self.parent.is_some() && self.offset.is_some()
    }

    /// Whether the node is a sub-archive entry without a body
    pub fn is_symlink(&self) -> bool {
        self.file_kind == Some(FileKind::Symlink)
    }

    /// v_hash formatted at the node's width
    pub fn v_hash_to_str(&self) -> String {
        match (self.v_hash, self.flags.hash_width()) {
            (None, _) => "None".to_string(),
            (Some(h), Some(HashWidth::W48)) => format!("{h:012x}"),
            (Some(h), Some(HashWidth::W64)) => format!("{h:016x}"),
            (Some(h), _) => format!("{h:08x}"),
        }
    }

    /// Virtual path as text, lossily decoded
    pub fn v_path_lossy(&self) -> Option<String> {
        self.v_path
            .as_ref()
            .map(|p| String::from_utf8_lossy(p).into_owned())
    }
}

impl fmt::Display for VfsNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.uid, self.v_hash_to_str())?;
        if let Some(path) = self.v_path_lossy() {
            write!(f, " {path}")?;
        }
        if let Some(p) = &self.p_path {
            write!(f, " {}", p.display())?;
        }
        Ok(())
    }
}
