//! Decoded instance values and the instance walker

use super::gdc::{GDCC_TYPE_HASH, GdcEntry, parse_gdc_directory};
use super::types::{MetaType, TypeDef, TypeLookup, primitive};
use crate::bytes::{f32_at, f64_at, slice_at, strz_at, u8_at, u16_at, u32_at, u64_at};
use crate::error::{FormatError, FormatResult};
use std::collections::{BTreeMap, BTreeSet};

/// Instances nested deeper than this are rejected
pub const MAX_NESTING: usize = 64;

/// A decoded typed value
#[derive(Debug, Clone, PartialEq)]
pub enum AdfValue {
    /// `int8`
    S8(i8),
    /// `uint8`
    U8(u8),
    /// `int16`
    S16(i16),
    /// `uint16`
    U16(u16),
    /// `int32`
    S32(i32),
    /// `uint32`
    U32(u32),
    /// `int64`
    S64(i64),
    /// `uint64`
    U64(u64),
    /// `float`
    F32(f32),
    /// `double`
    F64(f64),
    /// Referenced string
    String {
        /// String bytes
        value: Vec<u8>,
        /// Absolute offset of the string data
        data_offset: u64,
    },
    /// Type-tagged pointer; `value` is `None` for null pointers and unknown types
    Deferred {
        /// Type of the target
        type_hash: u32,
        /// Absolute offset of the target
        data_offset: u64,
        /// Decoded target
        value: Option<Box<AdfValue>>,
    },
    /// Structure
    Struct {
        /// Structure type
        type_hash: u32,
        /// Absolute offset of the structure
        data_offset: u64,
        /// Member name and value, in declaration order
        fields: Vec<(Vec<u8>, AdfValue)>,
    },
    /// Raw pointer
    Pointer {
        /// Pointer type
        type_hash: u32,
        /// Stored pointer value
        target: u64,
    },
    /// Out-of-line or inline array
    Array {
        /// Array type
        type_hash: u32,
        /// Absolute offset of the first element
        data_offset: u64,
        /// Elements
        items: AdfArray,
    },
    /// Single bit
    Bitfield {
        /// Bitfield type
        type_hash: u32,
        /// Bit value
        value: bool,
        /// Bit position within the containing word
        bit_offset: u8,
    },
    /// Enumeration value
    Enum {
        /// Enumeration type
        type_hash: u32,
        /// Stored value
        value: u32,
        /// Member name with this value
        name: Option<Vec<u8>>,
    },
    /// Hash resolved through the file's string hash table
    StringHash {
        /// String hash type
        type_hash: u32,
        /// Stored hash
        hash: u64,
        /// Matching string, when the table has one
        value: Option<Vec<u8>>,
    },
    /// String hash of an unusual width, kept as raw bytes
    RawHash {
        /// String hash type
        type_hash: u32,
        /// Stored bytes
        bytes: Vec<u8>,
    },
    /// Container directory
    GdcDirectory(Vec<GdcEntry>),
}

/// Array payloads; scalar element types are read in bulk
#[derive(Debug, Clone, PartialEq)]
pub enum AdfArray {
    /// `int8` / `uint8` elements
    Bytes(Vec<u8>),
    /// Signed integer elements
    Ints(Vec<i64>),
    /// Unsigned integer elements
    UInts(Vec<u64>),
    /// Floating point elements
    Floats(Vec<f64>),
    /// Structured elements
    Values(Vec<AdfValue>),
}

impl AdfArray {
    /// Element count
    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(v) => v.len(),
            Self::Ints(v) => v.len(),
            Self::UInts(v) => v.len(),
            Self::Floats(v) => v.len(),
            Self::Values(v) => v.len(),
        }
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AdfValue {
    /// Member of a structure value by name
    pub fn field(&self, name: &[u8]) -> Option<&AdfValue> {
        match self {
            Self::Struct { fields, .. } => fields
                .iter()
                .find(|(n, _)| n.as_slice() == name)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Integer view of a scalar value
    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Self::S8(v) => i64::from(v),
            Self::U8(v) => i64::from(v),
            Self::S16(v) => i64::from(v),
            Self::U16(v) => i64::from(v),
            Self::S32(v) => i64::from(v),
            Self::U32(v) => i64::from(v),
            Self::S64(v) => v,
            Self::U64(v) => i64::try_from(v).ok()?,
            Self::Enum { value, .. } => i64::from(value),
            _ => return None,
        })
    }

    /// Bytes of a string value or resolved string hash
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String { value, .. } => Some(value),
            Self::StringHash { value: Some(v), .. } => Some(v),
            _ => None,
        }
    }
}

fn scalar_size(type_hash: u32) -> Option<usize> {
    Some(match type_hash {
        primitive::S8 | primitive::U8 => 1,
        primitive::S16 | primitive::U16 => 2,
        primitive::S32 | primitive::U32 | primitive::F32 => 4,
        primitive::S64 | primitive::U64 | primitive::F64 => 8,
        _ => return None,
    })
}

/// Walks instance bytes according to type descriptors
pub(crate) struct InstanceReader<'a> {
    pub(crate) buf: &'a [u8],
    pub(crate) abs_offset: u64,
    pub(crate) types: TypeLookup<'a>,
    pub(crate) string_hashes: &'a BTreeMap<u64, Vec<u8>>,
    pub(crate) found_strings: &'a mut BTreeSet<Vec<u8>>,
    pub(crate) missing: &'a mut BTreeSet<u32>,
}

impl InstanceReader<'_> {
    fn abs(&self, pos: usize) -> u64 {
        self.abs_offset + pos as u64
    }

    fn scalar(&self, pos: usize, type_hash: u32) -> FormatResult<Option<AdfValue>> {
        let b = self.buf;
        Ok(Some(match type_hash {
            primitive::S8 => AdfValue::S8(u8_at(b, pos)? as i8),
            primitive::U8 => AdfValue::U8(u8_at(b, pos)?),
            primitive::S16 => AdfValue::S16(u16_at(b, pos)? as i16),
            primitive::U16 => AdfValue::U16(u16_at(b, pos)?),
            primitive::S32 => AdfValue::S32(u32_at(b, pos)? as i32),
            primitive::U32 => AdfValue::U32(u32_at(b, pos)?),
            primitive::S64 => AdfValue::S64(u64_at(b, pos)? as i64),
            primitive::U64 => AdfValue::U64(u64_at(b, pos)?),
            primitive::F32 => AdfValue::F32(f32_at(b, pos)?),
            primitive::F64 => AdfValue::F64(f64_at(b, pos)?),
            _ => return Ok(None),
        }))
    }

    fn scalar_array(
        &self,
        pos: usize,
        elem: u32,
        count: usize,
    ) -> FormatResult<Option<(AdfArray, usize)>> {
        let Some(width) = scalar_size(elem) else {
            return Ok(None);
        };
        let len = count.checked_mul(width).ok_or(FormatError::OutOfData)?;
        let raw = slice_at(self.buf, pos, len)?;
        let words = raw.chunks_exact(width);
        let items = match elem {
            primitive::S8 | primitive::U8 => AdfArray::Bytes(raw.to_vec()),
            primitive::S16 => AdfArray::Ints(
                words.map(|c| i64::from(i16::from_le_bytes([c[0], c[1]]))).collect(),
            ),
            primitive::U16 => AdfArray::UInts(
                words.map(|c| u64::from(u16::from_le_bytes([c[0], c[1]]))).collect(),
            ),
            primitive::S32 => AdfArray::Ints(
                words
                    .map(|c| i64::from(i32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                    .collect(),
            ),
            primitive::U32 => AdfArray::UInts(
                words
                    .map(|c| u64::from(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                    .collect(),
            ),
            primitive::F32 => AdfArray::Floats(
                words
                    .map(|c| f64::from(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                    .collect(),
            ),
            primitive::S64 => AdfArray::Ints(
                words
                    .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            primitive::U64 => AdfArray::UInts(
                words
                    .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            _ => AdfArray::Floats(
                words
                    .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
        };
        Ok(Some((items, len)))
    }

    fn elements(
        &mut self,
        pos: &mut usize,
        elem: u32,
        count: usize,
        depth: usize,
    ) -> FormatResult<AdfArray> {
        if let Some((items, len)) = self.scalar_array(*pos, elem, count)? {
            *pos += len;
            return Ok(items);
        }
        if count > self.buf.len() {
            return Err(FormatError::OutOfData);
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.read(pos, elem, None, depth + 1)?);
        }
        Ok(AdfArray::Values(items))
    }

    /// Decode a value of `type_hash` at `*pos`, advancing `*pos` past it
    pub(crate) fn read(
        &mut self,
        pos: &mut usize,
        type_hash: u32,
        bit_offset: Option<u8>,
        depth: usize,
    ) -> FormatResult<AdfValue> {
        if depth > MAX_NESTING {
            return Err(FormatError::incorrect(format!(
                "ADF instance nested deeper than {MAX_NESTING}"
            )));
        }

        if let Some(v) = self.scalar(*pos, type_hash)? {
            *pos += scalar_size(type_hash).unwrap_or(0);
            return Ok(v);
        }

        match type_hash {
            primitive::STRING => {
                let offset = u32_at(self.buf, *pos)? as usize;
                let value = strz_at(self.buf, offset)?;
                *pos += 8;
                self.found_strings.insert(value.clone());
                return Ok(AdfValue::String {
                    value,
                    data_offset: self.abs(offset),
                });
            }
            primitive::DEFERRED => {
                let target = u32_at(self.buf, *pos)? as usize;
                let target_type = u32_at(self.buf, *pos + 8)?;
                // fourth word must be present too
                u32_at(self.buf, *pos + 12)?;
                *pos += 16;
                let data_offset = self.abs(target);
                if target == 0 || target_type == 0 {
                    return Ok(AdfValue::Deferred {
                        type_hash: target_type,
                        data_offset,
                        value: None,
                    });
                }
                if self.types.get(target_type).is_none() && scalar_size(target_type).is_none() {
                    tracing::debug!("deferred value of unknown type 0x{target_type:08x}");
                    self.missing.insert(target_type);
                    return Ok(AdfValue::Deferred {
                        type_hash: target_type,
                        data_offset,
                        value: None,
                    });
                }
                let mut p = target;
                let value = self.read(&mut p, target_type, None, depth + 1)?;
                return Ok(AdfValue::Deferred {
                    type_hash: target_type,
                    data_offset,
                    value: Some(Box::new(value)),
                });
            }
            GDCC_TYPE_HASH => {
                let dir = self.buf.get(*pos..).ok_or(FormatError::OutOfData)?;
                let entries = parse_gdc_directory(dir)?;
                for e in &entries {
                    self.found_strings.insert(e.v_path.clone());
                }
                *pos = self.buf.len();
                return Ok(AdfValue::GdcDirectory(entries));
            }
            _ => {}
        }

        let def: &TypeDef = self
            .types
            .get(type_hash)
            .ok_or(FormatError::MissingAdfType(type_hash))?;

        match def.metatype {
            MetaType::Primitive => Err(FormatError::MissingAdfType(type_hash)),
            MetaType::Struct => {
                let p0 = *pos;
                let mut fields = Vec::with_capacity(def.members.len());
                for m in &def.members {
                    let mut p = p0 + m.offset as usize;
                    let v = self.read(&mut p, m.type_hash, Some(m.bit_offset), depth + 1)?;
                    fields.push((m.name.clone(), v));
                }
                *pos = p0 + def.size as usize;
                Ok(AdfValue::Struct {
                    type_hash,
                    data_offset: self.abs(p0),
                    fields,
                })
            }
            MetaType::Pointer => {
                let target = u64_at(self.buf, *pos)?;
                *pos += 8;
                Ok(AdfValue::Pointer { type_hash, target })
            }
            MetaType::Array => {
                let offset = u32_at(self.buf, *pos)? as usize;
                let _flags = u32_at(self.buf, *pos + 4)?;
                let count = u32_at(self.buf, *pos + 8)? as usize;
                *pos += 12;
                let mut p = offset;
                let items = self.elements(&mut p, def.element_type_hash, count, depth)?;
                Ok(AdfValue::Array {
                    type_hash,
                    data_offset: self.abs(offset),
                    items,
                })
            }
            MetaType::InlineArray => {
                let start = *pos;
                let items = self.elements(
                    pos,
                    def.element_type_hash,
                    def.element_length as usize,
                    depth,
                )?;
                Ok(AdfValue::Array {
                    type_hash,
                    data_offset: self.abs(start),
                    items,
                })
            }
            MetaType::Bitfield => {
                let word = match def.size {
                    1 => u64::from(u8_at(self.buf, *pos)?),
                    2 => u64::from(u16_at(self.buf, *pos)?),
                    4 => u64::from(u32_at(self.buf, *pos)?),
                    8 => u64_at(self.buf, *pos)?,
                    other => {
                        return Err(FormatError::Unsupported(format!(
                            "bitfield of size {other}"
                        )));
                    }
                };
                *pos += def.size as usize;
                let bit_offset = bit_offset.unwrap_or(0);
                Ok(AdfValue::Bitfield {
                    type_hash,
                    value: (word >> bit_offset) & 1 == 1,
                    bit_offset,
                })
            }
            MetaType::Enumeration => {
                if def.size != 4 {
                    return Err(FormatError::Unsupported(format!(
                        "enumeration of size {}",
                        def.size
                    )));
                }
                let value = u32_at(self.buf, *pos)?;
                *pos += 4;
                Ok(AdfValue::Enum {
                    type_hash,
                    value,
                    name: def.enum_name(value).map(<[u8]>::to_vec),
                })
            }
            MetaType::StringHash => {
                let hash = match def.size {
                    4 => Some(u64::from(u32_at(self.buf, *pos)?)),
                    6 => {
                        let w0 = u64::from(u16_at(self.buf, *pos)?);
                        let w1 = u64::from(u16_at(self.buf, *pos + 2)?);
                        let w2 = u64::from(u16_at(self.buf, *pos + 4)?);
                        Some((w0 << 32) | (w1 << 16) | w2)
                    }
                    8 => Some(u64_at(self.buf, *pos)?),
                    _ => None,
                };
                let size = def.size as usize;
                let value = match hash {
                    Some(hash) => AdfValue::StringHash {
                        type_hash,
                        hash,
                        value: self.string_hashes.get(&hash).cloned(),
                    },
                    None => AdfValue::RawHash {
                        type_hash,
                        bytes: slice_at(self.buf, *pos, size)?.to_vec(),
                    },
                };
                *pos += size;
                Ok(value)
            }
            MetaType::String | MetaType::Metatype6 => Err(FormatError::Unsupported(format!(
                "{:?} instance of type 0x{type_hash:08x}",
                def.metatype
            ))),
        }
    }
}
