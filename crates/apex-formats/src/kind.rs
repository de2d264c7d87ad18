//! File kinds assigned by the classifier

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bitmap value meaning "a node with no kind"
pub const NO_KIND_BIT: u64 = 1;

/// Bitmap value meaning "any kind"
pub const ANY_KIND_MASK: u64 = u64::MAX;

/// Closed set of blob kinds recognised in Apex archives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileKind {
    /// Game executable
    #[serde(rename = "exe")]
    Exe,
    /// Index half of an on-disk archive pair
    #[serde(rename = "tab")]
    Tab,
    /// Data half of an on-disk archive pair
    #[serde(rename = "arc")]
    Arc,
    /// Sub-archive with named entries
    #[serde(rename = "sarc")]
    Sarc,
    /// Compressed wrapper
    #[serde(rename = "aaf")]
    Aaf,
    /// Sub-index listing archive definitions
    #[serde(rename = "gt0c")]
    Gtoc,
    /// Archive described by a sub-index
    #[serde(rename = "garc")]
    Garc,
    /// Typed structure with full header
    #[serde(rename = "adf")]
    Adf,
    /// Typed structure with an 8-byte prefix
    #[serde(rename = "adf0")]
    Adf0,
    /// Typed structure with a 5-byte prefix
    #[serde(rename = "adf5")]
    Adf5,
    /// Headerless typed-structure instance
    #[serde(rename = "adfb")]
    AdfBare,
    /// Body of the global GDCC directory
    #[serde(rename = "gdc")]
    GdcBody,
    /// Property container
    #[serde(rename = "rtpc")]
    Rtpc,
    /// Texture header
    #[serde(rename = "avtx")]
    Avtx,
    /// Texture mip tail
    #[serde(rename = "atx")]
    Atx,
    /// High resolution texture mip tail
    #[serde(rename = "hmddsc")]
    Hmddsc,
    /// DirectDraw surface
    #[serde(rename = "dds")]
    Dds,
    /// Bitmap image
    #[serde(rename = "bmp")]
    Bmp,
    /// Scaleform movie
    #[serde(rename = "gfx")]
    Gfx,
    /// Plain text
    #[serde(rename = "txt")]
    Txt,
    /// RIFF container
    #[serde(rename = "riff")]
    Riff,
    /// Ogg stream
    #[serde(rename = "ogg")]
    Ogg,
    /// FMOD sound bank
    #[serde(rename = "FSB5c")]
    Fsb5c,
    /// Bink 2 video
    #[serde(rename = "kb2")]
    BinkKb2,
    /// Bink video
    #[serde(rename = "bik")]
    BinkBik,
    /// MDI blob
    #[serde(rename = "mdi")]
    Mdi,
    /// PFX blob
    #[serde(rename = "pfx")]
    Pfx,
    /// Object placement table
    #[serde(rename = "obc")]
    Obc,
    /// RBMDL model
    #[serde(rename = "rbmdl")]
    Rbmdl,
    /// Heightfield blob
    #[serde(rename = "h2014")]
    H2014,
    /// TAG0 blob
    #[serde(rename = "tag0")]
    Tag0,
    /// Sub-archive entry without body bytes
    #[serde(rename = "symlink")]
    Symlink,
    /// Examined but not recognised
    #[serde(rename = "unknown")]
    Unknown,
}

impl FileKind {
    /// All kinds, in bitmap order
    pub const ALL: [Self; 33] = [
        Self::Unknown,
        Self::Symlink,
        Self::Arc,
        Self::Tab,
        Self::Aaf,
        Self::Sarc,
        Self::Bmp,
        Self::Dds,
        Self::Avtx,
        Self::Atx,
        Self::Hmddsc,
        Self::Adf,
        Self::AdfBare,
        Self::Txt,
        Self::Obc,
        Self::Riff,
        Self::Rtpc,
        Self::Tag0,
        Self::H2014,
        Self::Mdi,
        Self::Pfx,
        Self::Fsb5c,
        Self::Rbmdl,
        Self::GdcBody,
        Self::Gfx,
        Self::Ogg,
        Self::BinkKb2,
        Self::BinkBik,
        Self::Gtoc,
        Self::Garc,
        Self::Adf0,
        Self::Adf5,
        Self::Exe,
    ];

    /// Stable short name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exe => "exe",
            Self::Tab => "tab",
            Self::Arc => "arc",
            Self::Sarc => "sarc",
            Self::Aaf => "aaf",
            Self::Gtoc => "gt0c",
            Self::Garc => "garc",
            Self::Adf => "adf",
            Self::Adf0 => "adf0",
            Self::Adf5 => "adf5",
            Self::AdfBare => "adfb",
            Self::GdcBody => "gdc",
            Self::Rtpc => "rtpc",
            Self::Avtx => "avtx",
            Self::Atx => "atx",
            Self::Hmddsc => "hmddsc",
            Self::Dds => "dds",
            Self::Bmp => "bmp",
            Self::Gfx => "gfx",
            Self::Txt => "txt",
            Self::Riff => "riff",
            Self::Ogg => "ogg",
            Self::Fsb5c => "FSB5c",
            Self::BinkKb2 => "kb2",
            Self::BinkBik => "bik",
            Self::Mdi => "mdi",
            Self::Pfx => "pfx",
            Self::Obc => "obc",
            Self::Rbmdl => "rbmdl",
            Self::H2014 => "h2014",
            Self::Tag0 => "tag0",
            Self::Symlink => "symlink",
            Self::Unknown => "unknown",
        }
    }

    /// Bit used in possible-kind bitmaps
    ///
    /// `Unknown` shares the bit for "no kind".
    pub fn bit(self) -> u64 {
        match self {
            Self::Exe => 1 << 63,
            other => {
                let idx = Self::ALL.iter().position(|k| *k == other).unwrap_or(0);
                1 << idx
            }
        }
    }

    /// Whether nodes of this kind may own child nodes
    pub fn is_container(self) -> bool {
        matches!(
            self,
            Self::Exe
                | Self::Arc
                | Self::Tab
                | Self::Sarc
                | Self::Aaf
                | Self::Gtoc
                | Self::Garc
                | Self::Adf
                | Self::Adf0
                | Self::Adf5
                | Self::AdfBare
                | Self::GdcBody
                | Self::Rtpc
        )
    }

    /// Whether this kind is decoded by the typed-structure reader
    pub fn is_adf_family(self) -> bool {
        matches!(self, Self::Adf | Self::Adf0 | Self::Adf5 | Self::AdfBare)
    }
}

/// Bitmap bit for an optional kind; `None` maps to [`NO_KIND_BIT`]
pub fn kind_bit(kind: Option<FileKind>) -> u64 {
    kind.map_or(NO_KIND_BIT, FileKind::bit)
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown file kind: {s}"))
    }
}
