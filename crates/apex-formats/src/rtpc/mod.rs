//! RTPC property containers
//!
//! An RTPC file is a tree of nodes. Each node header points at its property
//! table; the headers of its children follow the property table, aligned to
//! four bytes. Properties hold small values inline and larger ones at an
//! absolute offset.
//!
//! Walking is done through [`RtpcVisitor`]; [`Rtpc::parse`] builds an owned
//! tree with one.

mod gather;

pub use gather::{RtpcGather, RtpcObject};

use crate::bytes::{f32_at, slice_at, strz_at, u8_at, u16_at, u32_at, u64_at};
use crate::error::{FormatError, FormatResult};

/// RTPC magic
pub const RTPC_MAGIC: [u8; 4] = *b"RTPC";

/// Nodes nested deeper than this are rejected
pub const MAX_DEPTH: usize = 256;

/// Property value type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropType {
    /// Raw word
    None = 0,
    /// Inline `u32`
    U32 = 1,
    /// Inline `f32`
    F32 = 2,
    /// String at offset
    Str = 3,
    /// Two floats
    Vec2 = 4,
    /// Three floats
    Vec3 = 5,
    /// Four floats
    Vec4 = 6,
    /// 3x3 matrix
    Mat3x3 = 7,
    /// 4x4 matrix
    Mat4x4 = 8,
    /// Counted `u32` array
    ArrayU32 = 9,
    /// Counted `f32` array
    ArrayF32 = 10,
    /// Counted byte array
    ArrayU8 = 11,
    /// Retired type 12
    Deprecated12 = 12,
    /// 64-bit object id
    ObjectId = 13,
    /// Counted array of 64-bit event ids
    Event = 14,
    /// Raw word
    Unk15 = 15,
    /// Raw word
    Unk16 = 16,
}

impl PropType {
    /// Decode a type tag
    pub fn from_u8(tag: u8) -> FormatResult<Self> {
        Ok(match tag {
            0 => Self::None,
            1 => Self::U32,
            2 => Self::F32,
            3 => Self::Str,
            4 => Self::Vec2,
            5 => Self::Vec3,
            6 => Self::Vec4,
            7 => Self::Mat3x3,
            8 => Self::Mat4x4,
            9 => Self::ArrayU32,
            10 => Self::ArrayF32,
            11 => Self::ArrayU8,
            12 => Self::Deprecated12,
            13 => Self::ObjectId,
            14 => Self::Event,
            15 => Self::Unk15,
            16 => Self::Unk16,
            other => return Err(FormatError::incorrect(format!("RTPC property type {other}"))),
        })
    }

    /// Short display name
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::U32 => "u32",
            Self::F32 => "f32",
            Self::Str => "str",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::Mat3x3 => "mat3x3",
            Self::Mat4x4 => "mat4x4",
            Self::ArrayU32 => "A[u32]",
            Self::ArrayF32 => "A[f32]",
            Self::ArrayU8 => "A[u8]",
            Self::Deprecated12 => "d12",
            Self::ObjectId => "objid",
            Self::Event => "event",
            Self::Unk15 => "unk_15",
            Self::Unk16 => "unk_16",
        }
    }
}

/// 12-byte node header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// Position of the header
    pub pos: usize,
    /// H32 of the node name
    pub name_hash: u32,
    /// Offset of the property table
    pub data_offset: u32,
    /// Number of properties
    pub prop_count: u16,
    /// Number of children
    pub child_count: u16,
}

impl NodeInfo {
    fn read(buf: &[u8], pos: usize) -> FormatResult<Self> {
        Ok(Self {
            pos,
            name_hash: u32_at(buf, pos)?,
            data_offset: u32_at(buf, pos + 4)?,
            prop_count: u16_at(buf, pos + 8)?,
            child_count: u16_at(buf, pos + 10)?,
        })
    }
}

/// 9-byte property entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropInfo {
    /// Position of the entry
    pub pos: usize,
    /// H32 of the property name
    pub name_hash: u32,
    /// Inline word, or the offset of out-of-line data
    pub raw: u32,
    /// Value type
    pub prop_type: PropType,
}

impl PropInfo {
    fn read(buf: &[u8], pos: usize) -> FormatResult<Self> {
        Ok(Self {
            pos,
            name_hash: u32_at(buf, pos)?,
            raw: u32_at(buf, pos + 4)?,
            prop_type: PropType::from_u8(u8_at(buf, pos + 8)?)?,
        })
    }

    /// Position of the value bytes
    pub fn data_pos(&self) -> usize {
        match self.prop_type {
            PropType::None | PropType::U32 | PropType::F32 | PropType::Unk15 | PropType::Unk16 => {
                self.pos + 4
            }
            _ => self.raw as usize,
        }
    }

    /// Decode the value
    pub fn value(&self, buf: &[u8]) -> FormatResult<PropValue> {
        let at = self.raw as usize;
        Ok(match self.prop_type {
            PropType::None => PropValue::None(self.raw),
            PropType::U32 => PropValue::U32(self.raw),
            PropType::F32 => PropValue::F32(f32::from_bits(self.raw)),
            PropType::Str => PropValue::Str(strz_at(buf, at)?),
            PropType::Vec2 => PropValue::Vec2(f32s(buf, at, 2)?),
            PropType::Vec3 => PropValue::Vec3(f32s(buf, at, 3)?),
            PropType::Vec4 => PropValue::Vec4(f32s(buf, at, 4)?),
            PropType::Mat3x3 => PropValue::Mat3x3(f32s(buf, at, 9)?),
            PropType::Mat4x4 => PropValue::Mat4x4(f32s(buf, at, 16)?),
            PropType::ArrayU32 => {
                let n = u32_at(buf, at)? as usize;
                let raw = slice_at(buf, at + 4, n.checked_mul(4).ok_or(FormatError::OutOfData)?)?;
                PropValue::ArrayU32(
                    raw.chunks_exact(4)
                        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                )
            }
            PropType::ArrayF32 => {
                let n = u32_at(buf, at)? as usize;
                PropValue::ArrayF32(f32s(buf, at + 4, n)?)
            }
            PropType::ArrayU8 => {
                let n = u32_at(buf, at)? as usize;
                PropValue::ArrayU8(slice_at(buf, at + 4, n)?.to_vec())
            }
            PropType::Deprecated12 => {
                return Err(FormatError::Unsupported(format!(
                    "RTPC property type 12 at 0x{:x}",
                    self.pos
                )));
            }
            PropType::ObjectId => PropValue::ObjectId(u64_at(buf, at)? as i64),
            PropType::Event => {
                let n = u32_at(buf, at)? as usize;
                let raw = slice_at(buf, at + 4, n.checked_mul(8).ok_or(FormatError::OutOfData)?)?;
                PropValue::Events(
                    raw.chunks_exact(8)
                        .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                        .collect(),
                )
            }
            PropType::Unk15 => PropValue::Unk15(self.raw),
            PropType::Unk16 => PropValue::Unk16(self.raw),
        })
    }
}

fn f32s(buf: &[u8], pos: usize, n: usize) -> FormatResult<Vec<f32>> {
    slice_at(buf, pos, n.checked_mul(4).ok_or(FormatError::OutOfData)?)?;
    (0..n).map(|i| f32_at(buf, pos + i * 4)).collect()
}

/// A decoded property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    /// Raw word
    None(u32),
    /// `u32`
    U32(u32),
    /// `f32`
    F32(f32),
    /// String
    Str(Vec<u8>),
    /// Two floats
    Vec2(Vec<f32>),
    /// Three floats
    Vec3(Vec<f32>),
    /// Four floats
    Vec4(Vec<f32>),
    /// Nine floats
    Mat3x3(Vec<f32>),
    /// Sixteen floats
    Mat4x4(Vec<f32>),
    /// `u32` array
    ArrayU32(Vec<u32>),
    /// `f32` array
    ArrayF32(Vec<f32>),
    /// Byte array
    ArrayU8(Vec<u8>),
    /// Object id
    ObjectId(i64),
    /// Event ids
    Events(Vec<i64>),
    /// Raw word
    Unk15(u32),
    /// Raw word
    Unk16(u32),
}

/// Callbacks for a depth-first RTPC walk
///
/// Every method has an empty default. Calls nest as
/// `node_start, props_start, prop*, props_end, children_start, (node...)*,
/// children_end, node_end`.
pub trait RtpcVisitor {
    /// Entering a node
    fn node_start(&mut self, _buf: &[u8], _index: usize, _node: &NodeInfo) -> FormatResult<()> {
        Ok(())
    }

    /// Leaving a node
    fn node_end(&mut self, _buf: &[u8], _index: usize, _node: &NodeInfo) -> FormatResult<()> {
        Ok(())
    }

    /// Before the first property of a node
    fn props_start(&mut self, _buf: &[u8], _pos: usize, _count: u16) -> FormatResult<()> {
        Ok(())
    }

    /// After the last property of a node
    fn props_end(&mut self, _buf: &[u8], _pos: usize, _count: u16) -> FormatResult<()> {
        Ok(())
    }

    /// One property
    fn prop(&mut self, _buf: &[u8], _index: usize, _prop: &PropInfo) -> FormatResult<()> {
        Ok(())
    }

    /// Before the first child of a node
    fn children_start(&mut self, _buf: &[u8], _pos: usize, _count: u16) -> FormatResult<()> {
        Ok(())
    }

    /// After the last child of a node
    fn children_end(&mut self, _buf: &[u8], _pos: usize, _count: u16) -> FormatResult<()> {
        Ok(())
    }
}

fn visit_node<V: RtpcVisitor + ?Sized>(
    buf: &[u8],
    pos: usize,
    index: usize,
    depth: usize,
    visitor: &mut V,
) -> FormatResult<usize> {
    if depth > MAX_DEPTH {
        return Err(FormatError::incorrect(format!(
            "RTPC nodes nested deeper than {MAX_DEPTH}"
        )));
    }
    let node = NodeInfo::read(buf, pos)?;
    visitor.node_start(buf, index, &node)?;

    let mut p = node.data_offset as usize;
    visitor.props_start(buf, p, node.prop_count)?;
    for i in 0..usize::from(node.prop_count) {
        let prop = PropInfo::read(buf, p)?;
        visitor.prop(buf, i, &prop)?;
        p += 9;
    }
    visitor.props_end(buf, p, node.prop_count)?;

    p = p.next_multiple_of(4);
    visitor.children_start(buf, p, node.child_count)?;
    for i in 0..usize::from(node.child_count) {
        p = visit_node(buf, p, i, depth + 1, visitor)?;
    }
    visitor.children_end(buf, p, node.child_count)?;

    visitor.node_end(buf, index, &node)?;
    Ok(pos + 12)
}

/// Walk an RTPC buffer, returning its version
pub fn visit<V: RtpcVisitor + ?Sized>(buf: &[u8], visitor: &mut V) -> FormatResult<u32> {
    let magic = slice_at(buf, 0, 4)?;
    if magic != RTPC_MAGIC {
        return Err(FormatError::incorrect(format!(
            "Invalid RTPC magic: {}",
            hex::encode(magic)
        )));
    }
    let version = u32_at(buf, 4)?;
    visit_node(buf, 8, 0, 0, visitor)?;
    Ok(version)
}

/// A property with its decoded value
#[derive(Debug, Clone, PartialEq)]
pub struct RtpcProp {
    /// Entry as stored
    pub info: PropInfo,
    /// Decoded value
    pub value: PropValue,
}

/// An owned RTPC node
#[derive(Debug, Clone, PartialEq)]
pub struct RtpcNode {
    /// Header as stored
    pub info: NodeInfo,
    /// Properties in table order
    pub props: Vec<RtpcProp>,
    /// Children in table order
    pub children: Vec<RtpcNode>,
}

impl RtpcNode {
    /// Property by name hash
    pub fn prop(&self, name_hash: u32) -> Option<&PropValue> {
        self.props
            .iter()
            .find(|p| p.info.name_hash == name_hash)
            .map(|p| &p.value)
    }

    /// Child by name hash
    pub fn child(&self, name_hash: u32) -> Option<&RtpcNode> {
        self.children.iter().find(|c| c.info.name_hash == name_hash)
    }
}

/// A decoded RTPC file
#[derive(Debug, Clone, PartialEq)]
pub struct Rtpc {
    /// Format version
    pub version: u32,
    /// Root node
    pub root: RtpcNode,
}

#[derive(Default)]
struct TreeBuilder {
    stack: Vec<RtpcNode>,
    root: Option<RtpcNode>,
}

impl RtpcVisitor for TreeBuilder {
    fn node_start(&mut self, _buf: &[u8], _index: usize, node: &NodeInfo) -> FormatResult<()> {
        self.stack.push(RtpcNode {
            info: *node,
            props: Vec::with_capacity(usize::from(node.prop_count)),
            children: Vec::with_capacity(usize::from(node.child_count)),
        });
        Ok(())
    }

    fn prop(&mut self, buf: &[u8], _index: usize, prop: &PropInfo) -> FormatResult<()> {
        let value = prop.value(buf)?;
        if let Some(top) = self.stack.last_mut() {
            top.props.push(RtpcProp { info: *prop, value });
        }
        Ok(())
    }

    fn node_end(&mut self, _buf: &[u8], _index: usize, _node: &NodeInfo) -> FormatResult<()> {
        let node = self
            .stack
            .pop()
            .ok_or_else(|| FormatError::incorrect("RTPC node end without start"))?;
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.root = Some(node),
        }
        Ok(())
    }
}

impl Rtpc {
    /// Parse a buffer into an owned tree
    pub fn parse(buf: &[u8]) -> FormatResult<Self> {
        let mut builder = TreeBuilder::default();
        let version = visit(buf, &mut builder)?;
        let root = builder
            .root
            .ok_or_else(|| FormatError::incorrect("RTPC file without a root node"))?;
        Ok(Self { version, root })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use apex_hash::hash32;
    use pretty_assertions::assert_eq;

    /// Test property: name, type tag, and either an inline word or out-of-line bytes
    pub(crate) enum P<'a> {
        Inline(&'a str, u8, u32),
        Data(&'a str, u8, Vec<u8>),
    }

    /// Test node: name, properties, children
    pub(crate) struct N<'a>(pub(crate) &'a str, pub(crate) Vec<P<'a>>, pub(crate) Vec<N<'a>>);

    fn write_node(out: &mut Vec<u8>, header_pos: usize, node: &N<'_>) {
        let N(name, props, children) = node;
        // property table
        let table = out.len();
        out.resize(table + props.len() * 9, 0);
        out.resize(out.len().next_multiple_of(4), 0);
        let child_headers = out.len();
        out.resize(child_headers + children.len() * 12, 0);

        for (i, p) in props.iter().enumerate() {
            let (pname, tag, raw) = match p {
                P::Inline(n, t, w) => (*n, *t, *w),
                P::Data(n, t, bytes) => {
                    out.resize(out.len().next_multiple_of(4), 0);
                    let at = out.len() as u32;
                    out.extend_from_slice(bytes);
                    (*n, *t, at)
                }
            };
            let at = table + i * 9;
            out[at..at + 4].copy_from_slice(&hash32(pname.as_bytes()).to_le_bytes());
            out[at + 4..at + 8].copy_from_slice(&raw.to_le_bytes());
            out[at + 8] = tag;
        }

        out[header_pos..header_pos + 4].copy_from_slice(&hash32(name.as_bytes()).to_le_bytes());
        out[header_pos + 4..header_pos + 8].copy_from_slice(&(table as u32).to_le_bytes());
        out[header_pos + 8..header_pos + 10].copy_from_slice(&(props.len() as u16).to_le_bytes());
        out[header_pos + 10..header_pos + 12]
            .copy_from_slice(&(children.len() as u16).to_le_bytes());

        for (i, c) in children.iter().enumerate() {
            out.resize(out.len().next_multiple_of(4), 0);
            write_node(out, child_headers + i * 12, c);
        }
    }

    /// Serialise a test tree
    pub(crate) fn build(root: &N<'_>) -> Vec<u8> {
        let mut out = b"RTPC".to_vec();
        out.extend_from_slice(&1u32.to_le_bytes());
        out.resize(20, 0);
        write_node(&mut out, 8, root);
        out
    }

    pub(crate) fn strz(s: &str) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.push(0);
        v
    }

    fn sample() -> Vec<u8> {
        let mut events = 2u32.to_le_bytes().to_vec();
        events.extend_from_slice(&11i64.to_le_bytes());
        events.extend_from_slice(&(-5i64).to_le_bytes());
        let mut vec3 = Vec::new();
        for f in [1.0f32, 2.0, 3.0] {
            vec3.extend_from_slice(&f.to_le_bytes());
        }
        build(&N(
            "root",
            vec![P::Inline("count", 1, 3)],
            vec![
                N(
                    "a",
                    vec![
                        P::Data("_class", 3, strz("CSpawn")),
                        P::Data("pos", 5, vec3),
                        P::Data("_object_id", 13, 77i64.to_le_bytes().to_vec()),
                    ],
                    vec![],
                ),
                N(
                    "b",
                    vec![
                        P::Data("model", 3, strz("models/tree.model_xml")),
                        P::Data("on_hit", 14, events),
                        P::Inline("scale", 2, 1.5f32.to_bits()),
                    ],
                    vec![N("c", vec![P::Data("name", 3, strz("leaf"))], vec![])],
                ),
            ],
        ))
    }

    #[test]
    fn test_parse_tree() {
        let rtpc = Rtpc::parse(&sample()).expect("Test operation should succeed");
        assert_eq!(rtpc.version, 1);
        assert_eq!(rtpc.root.prop(hash32(b"count")), Some(&PropValue::U32(3)));
        assert_eq!(rtpc.root.children.len(), 2);

        let a = rtpc.root.child(hash32(b"a")).expect("Test operation should succeed");
        assert_eq!(a.prop(hash32(b"_class")), Some(&PropValue::Str(b"CSpawn".to_vec())));
        assert_eq!(a.prop(hash32(b"pos")), Some(&PropValue::Vec3(vec![1.0, 2.0, 3.0])));
        assert_eq!(a.prop(hash32(b"_object_id")), Some(&PropValue::ObjectId(77)));

        let b = rtpc.root.child(hash32(b"b")).expect("Test operation should succeed");
        assert_eq!(b.prop(hash32(b"on_hit")), Some(&PropValue::Events(vec![11, -5])));
        assert_eq!(b.prop(hash32(b"scale")), Some(&PropValue::F32(1.5)));
        let c = b.child(hash32(b"c")).expect("Test operation should succeed");
        assert_eq!(c.prop(hash32(b"name")), Some(&PropValue::Str(b"leaf".to_vec())));
    }

    #[test]
    fn test_bad_magic() {
        let mut data = sample();
        data[0] = b'X';
        assert!(matches!(Rtpc::parse(&data), Err(FormatError::IncorrectFormat(_))));
    }

    #[test]
    fn test_type_12_is_unsupported() {
        let data = build(&N("root", vec![P::Inline("old", 12, 0)], vec![]));
        assert!(matches!(Rtpc::parse(&data), Err(FormatError::Unsupported(_))));
    }

    #[test]
    fn test_self_referencing_node_is_rejected() {
        // root with one child whose header points back at the root's table
        let mut data = build(&N("root", vec![], vec![N("loop", vec![], vec![])]));
        let table = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        let child_header = table as usize;
        data[child_header + 4..child_header + 8].copy_from_slice(&table.to_le_bytes());
        data[child_header + 10..child_header + 12].copy_from_slice(&1u16.to_le_bytes());
        assert!(matches!(Rtpc::parse(&data), Err(FormatError::IncorrectFormat(_))));
    }
}
