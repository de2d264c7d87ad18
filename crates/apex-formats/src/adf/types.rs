//! Type descriptors and the shared type registry

use crate::error::{FormatError, FormatResult};
use crate::stream::ArchiveReader;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Seek};

/// Type hashes of the built-in scalar types
pub mod primitive {
    /// `int8`
    pub const S8: u32 = 0x580D_0A62;
    /// `uint8`
    pub const U8: u32 = 0x0CA2_821D;
    /// `int16`
    pub const S16: u32 = 0xD13F_CF93;
    /// `uint16`
    pub const U16: u32 = 0x86D1_52BD;
    /// `int32`
    pub const S32: u32 = 0x192F_E633;
    /// `uint32`
    pub const U32: u32 = 0x075E_4E4F;
    /// `int64`
    pub const S64: u32 = 0xAF41_354F;
    /// `uint64`
    pub const U64: u32 = 0xA139_E01F;
    /// `float`
    pub const F32: u32 = 0x7515_A207;
    /// `double`
    pub const F64: u32 = 0xC609_F663;
    /// Offset/length string reference
    pub const STRING: u32 = 0x8955_583E;
    /// Deferred (type-tagged) pointer
    pub const DEFERRED: u32 = 0xDEFE_88ED;
}

/// Structural category of a type descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaType {
    /// Scalar; never defined in files
    Primitive,
    /// Struct with members
    Struct,
    /// Typed pointer
    Pointer,
    /// Out-of-line array
    Array,
    /// Fixed-length inline array
    InlineArray,
    /// String
    String,
    /// Metatype 6; never seen
    Metatype6,
    /// Single-bit field
    Bitfield,
    /// Enumeration
    Enumeration,
    /// Hash resolved through the string hash table
    StringHash,
}

impl MetaType {
    /// Decode the on-disk metatype id
    pub fn from_code(code: u32) -> FormatResult<Self> {
        Ok(match code {
            0 => Self::Primitive,
            1 => Self::Struct,
            2 => Self::Pointer,
            3 => Self::Array,
            4 => Self::InlineArray,
            5 => Self::String,
            6 => Self::Metatype6,
            7 => Self::Bitfield,
            8 => Self::Enumeration,
            9 => Self::StringHash,
            other => return Err(FormatError::Unsupported(format!("ADF metatype {other}"))),
        })
    }
}

/// A struct member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDef {
    /// Member name
    pub name: Vec<u8>,
    /// Type hash of the member
    pub type_hash: u32,
    /// Member size
    pub size: u32,
    /// Byte offset within the struct
    pub offset: u32,
    /// Bit offset for bitfield members
    pub bit_offset: u8,
    /// Default value type
    pub default_type: u32,
    /// Default value
    pub default_value: u64,
}

/// An enumeration member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDef {
    /// Member name
    pub name: Vec<u8>,
    /// Member value
    pub value: u32,
}

/// A type descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Structural category
    pub metatype: MetaType,
    /// Size in bytes
    pub size: u32,
    /// Alignment
    pub alignment: u32,
    /// Type hash
    pub type_hash: u32,
    /// Type name
    pub name: Vec<u8>,
    /// Flags
    pub flags: u32,
    /// Element type for pointers and arrays
    pub element_type_hash: u32,
    /// Element count for inline arrays
    pub element_length: u32,
    /// Struct members
    pub members: Vec<MemberDef>,
    /// Enumeration members
    pub enums: Vec<EnumDef>,
}

fn name_at(names: &[Vec<u8>], index: u64) -> FormatResult<Vec<u8>> {
    usize::try_from(index)
        .ok()
        .and_then(|i| names.get(i))
        .cloned()
        .ok_or_else(|| FormatError::incorrect(format!("ADF name index {index} out of range")))
}

impl TypeDef {
    /// Read one descriptor, resolving names through the file's name table
    pub fn read<R: Read + Seek>(r: &mut ArchiveReader<R>, names: &[Vec<u8>]) -> FormatResult<Self> {
        let metatype = MetaType::from_code(r.read_u32()?)?;
        let size = r.read_u32()?;
        let alignment = r.read_u32()?;
        let type_hash = r.read_u32()?;
        let name = name_at(names, r.read_u64()?)?;
        let flags = r.read_u32()?;
        let element_type_hash = r.read_u32()?;
        let element_length = r.read_u32()?;

        let mut members = Vec::new();
        let mut enums = Vec::new();
        match metatype {
            MetaType::Primitive => {}
            MetaType::Struct => {
                let count = r.read_u32()?;
                for _ in 0..count {
                    let name = name_at(names, r.read_u64()?)?;
                    let type_hash = r.read_u32()?;
                    let size = r.read_u32()?;
                    let packed = r.read_u32()?;
                    members.push(MemberDef {
                        name,
                        type_hash,
                        size,
                        offset: packed & 0x00FF_FFFF,
                        bit_offset: (packed >> 24) as u8,
                        default_type: r.read_u32()?,
                        default_value: r.read_u64()?,
                    });
                }
            }
            MetaType::Enumeration => {
                let count = r.read_u32()?;
                for _ in 0..count {
                    let name = name_at(names, r.read_u64()?)?;
                    enums.push(EnumDef {
                        name,
                        value: r.read_u32()?,
                    });
                }
            }
            MetaType::Pointer
            | MetaType::Array
            | MetaType::InlineArray
            | MetaType::String
            | MetaType::Bitfield
            | MetaType::StringHash => {
                let count = r.read_u32()?;
                if count != 0 {
                    return Err(FormatError::Unsupported(format!(
                        "{metatype:?} type 0x{type_hash:08x} with {count} trailing members"
                    )));
                }
            }
            MetaType::Metatype6 => {
                return Err(FormatError::Unsupported(format!(
                    "metatype 6 in type 0x{type_hash:08x}"
                )));
            }
        }

        Ok(Self {
            metatype,
            size,
            alignment,
            type_hash,
            name,
            flags,
            element_type_hash,
            element_length,
            members,
            enums,
        })
    }

    /// Name of the enumeration member with `value`
    pub fn enum_name(&self, value: u32) -> Option<&[u8]> {
        self.enums
            .iter()
            .find(|e| e.value == value)
            .map(|e| e.name.as_slice())
    }
}

/// Process-wide map from type hash to descriptor
///
/// Descriptors are never replaced once known. Type hashes referenced by
/// instances without a descriptor are recorded against the node that needed
/// them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeRegistry {
    types: BTreeMap<u32, TypeDef>,
    missing: BTreeSet<(u32, u64)>,
    #[serde(skip)]
    changed: bool,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a descriptor
    pub fn get(&self, type_hash: u32) -> Option<&TypeDef> {
        self.types.get(&type_hash)
    }

    /// Whether a descriptor is known
    pub fn contains(&self, type_hash: u32) -> bool {
        self.types.contains_key(&type_hash)
    }

    /// Insert a descriptor unless one with the same hash exists
    pub fn insert(&mut self, def: TypeDef) -> bool {
        if self.types.contains_key(&def.type_hash) {
            return false;
        }
        self.types.insert(def.type_hash, def);
        self.changed = true;
        true
    }

    /// Insert every descriptor; returns the number added
    pub fn extend<I: IntoIterator<Item = TypeDef>>(&mut self, defs: I) -> usize {
        defs.into_iter().map(|d| self.insert(d)).filter(|added| *added).count()
    }

    /// Record that node `uid` referenced an unknown type
    pub fn record_missing(&mut self, type_hash: u32, uid: u64) {
        if self.missing.insert((type_hash, uid)) {
            self.changed = true;
        }
    }

    /// `(type_hash, node uid)` pairs for every unknown type seen
    pub fn missing(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.missing.iter().copied()
    }

    /// All descriptors
    pub fn iter(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the registry has no descriptors
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Whether anything was added since the last [`Self::clear_changed`]
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Reset the change flag, typically after persisting
    pub fn clear_changed(&mut self) {
        self.changed = false;
    }
}

/// Lookup over a file's own descriptors layered on the shared registry
#[derive(Clone, Copy)]
pub(crate) struct TypeLookup<'a> {
    pub(crate) local: &'a BTreeMap<u32, TypeDef>,
    pub(crate) shared: &'a TypeRegistry,
}

impl<'a> TypeLookup<'a> {
    pub(crate) fn get(&self, type_hash: u32) -> Option<&'a TypeDef> {
        self.local
            .get(&type_hash)
            .or_else(|| self.shared.get(type_hash))
    }
}
