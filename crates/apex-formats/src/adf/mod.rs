//! Self-describing typed-structure files (ADF)
//!
//! An ADF file carries its own type descriptors, a string-hash table, a name
//! table and a list of instances. Headerless variants (`Adf0`, `AdfBare`)
//! carry only instance bytes and rely on descriptors learned from other files,
//! which are kept in a [`TypeRegistry`].
//!
//! # Layout
//!
//! ```text
//! 0x00  " FDA" magic, version
//! 0x08  instance count / offset
//! 0x10  typedef count / offset
//! 0x18  string-hash count / offset
//! 0x20  name count / offset
//! 0x28  total size, 5 reserved words
//! 0x40  comment (NUL-terminated)
//! ```

pub mod gdc;
pub mod types;
pub mod value;

pub use gdc::{GDCC_TYPE_HASH, GdcEntry, RTPC_FILETYPE_HASH, parse_gdc_directory};
pub use types::{EnumDef, MemberDef, MetaType, TypeDef, TypeRegistry, primitive};
pub use value::{AdfArray, AdfValue, MAX_NESTING};

use crate::bytes::slice_at;
use crate::error::{FormatError, FormatResult};
use crate::kind::FileKind;
use crate::stream::ArchiveReader;
use binrw::{BinRead, BinWrite};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use types::TypeLookup;
use value::InstanceReader;

/// ADF magic
pub const ADF_MAGIC: [u8; 4] = *b" FDA";

/// Header size
pub const ADF_HEADER_SIZE: usize = 0x40;

/// Byte pattern marking ADF blobs embedded in executables
pub const EMBEDDED_ADF_SIGNATURE: &[u8] = b" FDA\x04\x00\x00\x00";

/// Fixed header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct AdfHeader {
    /// " FDA"
    #[br(assert(magic == ADF_MAGIC, "Invalid ADF magic: {:?}", magic))]
    pub magic: [u8; 4],
    /// Format version
    pub version: u32,
    /// Number of instances
    pub instance_count: u32,
    /// Offset of the instance table
    pub instance_offset: u32,
    /// Number of type descriptors
    pub typedef_count: u32,
    /// Offset of the type descriptor table
    pub typedef_offset: u32,
    /// Number of string-hash entries
    pub stringhash_count: u32,
    /// Offset of the string-hash table
    pub stringhash_offset: u32,
    /// Number of names
    pub nametable_count: u32,
    /// Offset of the name table
    pub nametable_offset: u32,
    /// Total file size
    pub total_size: u32,
    /// Reserved
    pub unknown: [u32; 5],
}

/// Instance table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEntry {
    /// Hash of the instance name
    pub name_hash: u32,
    /// Instance type
    pub type_hash: u32,
    /// Offset of the instance bytes
    pub offset: u32,
    /// Size of the instance bytes
    pub size: u32,
    /// Instance name
    pub name: Vec<u8>,
}

/// An instance and its decoded value
#[derive(Debug, Clone, PartialEq)]
pub struct AdfInstance {
    /// Table entry
    pub entry: InstanceEntry,
    /// Decoded value; `None` when the type is unknown
    pub value: Option<AdfValue>,
}

/// A decoded ADF file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdfFile {
    /// Header, absent for headerless variants
    pub header: Option<AdfHeader>,
    /// Comment following the header
    pub comment: Vec<u8>,
    /// Name table
    pub names: Vec<Vec<u8>>,
    /// String-hash table
    pub string_hashes: BTreeMap<u64, Vec<u8>>,
    /// Type descriptors defined by this file
    pub types: Vec<TypeDef>,
    /// Instances in table order
    pub instances: Vec<AdfInstance>,
    /// Strings met in string-typed values
    pub found_strings: BTreeSet<Vec<u8>>,
    /// Types referenced but not described anywhere
    pub missing_types: BTreeSet<u32>,
}

impl AdfFile {
    /// Parse a full ADF file
    ///
    /// Types are looked up in the file's own table first, then in `registry`.
    /// Instances of unknown types are left undecoded and their type hash is
    /// added to [`Self::missing_types`].
    pub fn parse(data: &[u8], registry: &TypeRegistry) -> FormatResult<Self> {
        let mut r = ArchiveReader::new(Cursor::new(data));
        let header = AdfHeader::read(r.get_mut())?;
        let comment = r.read_strz()?;

        r.seek(u64::from(header.nametable_offset))?;
        let lengths = r.read_u8s(header.nametable_count as usize)?;
        let mut names = Vec::with_capacity(lengths.len());
        for len in lengths {
            let mut name = r.read_bytes(usize::from(len) + 1)?;
            name.pop();
            names.push(name);
        }

        r.seek(u64::from(header.stringhash_offset))?;
        let mut string_hashes = BTreeMap::new();
        for _ in 0..header.stringhash_count {
            let value = r.read_strz()?;
            let hash = r.read_u64()?;
            string_hashes.insert(hash, value);
        }

        r.seek(u64::from(header.typedef_offset))?;
        let mut local = BTreeMap::new();
        let mut types = Vec::with_capacity(header.typedef_count as usize);
        for _ in 0..header.typedef_count {
            let def = TypeDef::read(&mut r, &names)?;
            local.insert(def.type_hash, def.clone());
            types.push(def);
        }

        r.seek(u64::from(header.instance_offset))?;
        let mut entries = Vec::with_capacity(header.instance_count as usize);
        for _ in 0..header.instance_count {
            let name_hash = r.read_u32()?;
            let type_hash = r.read_u32()?;
            let offset = r.read_u32()?;
            let size = r.read_u32()?;
            let name_index = r.read_u64()?;
            let name = usize::try_from(name_index)
                .ok()
                .and_then(|i| names.get(i))
                .cloned()
                .ok_or_else(|| {
                    FormatError::incorrect(format!("ADF name index {name_index} out of range"))
                })?;
            entries.push(InstanceEntry {
                name_hash,
                type_hash,
                offset,
                size,
                name,
            });
        }

        let mut file = Self {
            header: Some(header),
            comment,
            names,
            string_hashes,
            types,
            ..Self::default()
        };

        let lookup = TypeLookup {
            local: &local,
            shared: registry,
        };
        for entry in entries {
            let buf = slice_at(data, entry.offset as usize, entry.size as usize)?;
            let mut reader = InstanceReader {
                buf,
                abs_offset: u64::from(entry.offset),
                types: lookup,
                string_hashes: &file.string_hashes,
                found_strings: &mut file.found_strings,
                missing: &mut file.missing_types,
            };
            let mut pos = 0;
            let value = match reader.read(&mut pos, entry.type_hash, None, 0) {
                Ok(v) => Some(v),
                Err(FormatError::MissingAdfType(t)) => {
                    tracing::debug!(
                        "ADF instance {} has unknown type 0x{t:08x}",
                        String::from_utf8_lossy(&entry.name)
                    );
                    file.missing_types.insert(t);
                    None
                }
                Err(e) => return Err(e),
            };
            file.instances.push(AdfInstance { entry, value });
        }

        Ok(file)
    }

    /// Decode one headerless instance of `type_hash` at `offset` in `buffer`
    ///
    /// Offsets inside the instance are relative to the start of `buffer`.
    pub fn parse_bare(
        buffer: &[u8],
        type_hash: u32,
        offset: u64,
        registry: &TypeRegistry,
    ) -> FormatResult<Self> {
        if !registry.contains(type_hash) {
            return Err(FormatError::MissingAdfType(type_hash));
        }
        let local = BTreeMap::new();
        let mut file = Self::default();
        let start = usize::try_from(offset).map_err(|_| FormatError::OutOfData)?;
        let mut reader = InstanceReader {
            buf: buffer,
            abs_offset: 0,
            types: TypeLookup {
                local: &local,
                shared: registry,
            },
            string_hashes: &file.string_hashes,
            found_strings: &mut file.found_strings,
            missing: &mut file.missing_types,
        };
        let mut pos = start;
        let value = reader.read(&mut pos, type_hash, None, 0)?;
        let size = u32::try_from(pos.saturating_sub(start)).unwrap_or(u32::MAX);
        file.instances.push(AdfInstance {
            entry: InstanceEntry {
                name_hash: 0,
                type_hash,
                offset: u32::try_from(start).unwrap_or(u32::MAX),
                size,
                name: b"instance".to_vec(),
            },
            value: Some(value),
        });
        Ok(file)
    }

    /// Decode any ADF variant
    ///
    /// For `AdfBare`, `data` is the parent buffer and `offset` the node's
    /// offset in it. `sub_kind` carries the type hash of headerless variants
    /// when known.
    pub fn parse_kind(
        kind: FileKind,
        data: &[u8],
        sub_kind: Option<u32>,
        offset: u64,
        registry: &TypeRegistry,
    ) -> FormatResult<Self> {
        match kind {
            FileKind::AdfBare => {
                let type_hash = sub_kind.ok_or_else(|| {
                    FormatError::incorrect("bare ADF instance without a type hash")
                })?;
                Self::parse_bare(data, type_hash, offset, registry)
            }
            FileKind::Adf0 => {
                let type_hash = match sub_kind {
                    Some(t) => t,
                    None => crate::bytes::u32_at(data, 4)?,
                };
                let body = data.get(8..).ok_or(FormatError::OutOfData)?;
                Self::parse_bare(body, type_hash, 0, registry)
            }
            FileKind::Adf5 => Self::parse(data.get(5..).ok_or(FormatError::OutOfData)?, registry),
            _ => Self::parse(data, registry),
        }
    }

    /// Directory entries when instance 0 is a GDCC directory
    pub fn gdc_entries(&self) -> Option<&[GdcEntry]> {
        match self.instances.first()?.value.as_ref()? {
            AdfValue::GdcDirectory(entries) => Some(entries),
            _ => None,
        }
    }

    /// Member names of every structure type this file defines
    pub fn field_names(&self) -> BTreeSet<&[u8]> {
        self.types
            .iter()
            .filter(|t| t.metatype == MetaType::Struct)
            .flat_map(|t| t.members.iter().map(|m| m.name.as_slice()))
            .collect()
    }
}

/// Locate ADF blobs embedded in an executable and collect their type descriptors
///
/// Blobs that fail to parse are skipped. Returns `(offset, total_size)` of
/// each blob that parsed.
pub fn scan_embedded(exe: &[u8], registry: &mut TypeRegistry) -> Vec<(usize, u32)> {
    let empty = TypeRegistry::new();
    let mut found = Vec::new();
    let mut start = 0;
    while let Some(hit) = exe
        .get(start..)
        .and_then(|tail| {
            tail.windows(EMBEDDED_ADF_SIGNATURE.len())
                .position(|w| w == EMBEDDED_ADF_SIGNATURE)
        })
    {
        let at = start + hit;
        match AdfFile::parse(&exe[at..], &empty) {
            Ok(adf) => {
                let size = adf.header.as_ref().map_or(0, |h| h.total_size);
                registry.extend(adf.types);
                found.push((at, size));
            }
            Err(e) => tracing::debug!("skipping embedded ADF at 0x{at:x}: {e}"),
        }
        start = at + 1;
    }
    found
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const THING: u32 = 0x1111_1111;
    const MODE: u32 = 0x2222_2222;
    const HASH: u32 = 0x3333_3333;
    const BITS: u32 = 0x4444_4444;
    const VALUES: u32 = 0x5555_5555;

    fn words(out: &mut Vec<u8>, ws: &[u32]) {
        for w in ws {
            out.extend_from_slice(&w.to_le_bytes());
        }
    }

    /// Minimal ADF writer for tests
    pub(crate) struct TestAdf {
        pub(crate) names: Vec<&'static [u8]>,
        pub(crate) string_hashes: Vec<(&'static [u8], u64)>,
        pub(crate) typedefs: Vec<u8>,
        pub(crate) typedef_count: u32,
        pub(crate) instances: Vec<(u32, u32, u64, Vec<u8>)>,
    }

    impl TestAdf {
        pub(crate) fn build(&self) -> Vec<u8> {
            let mut out = vec![0u8; ADF_HEADER_SIZE];
            out.push(0);
            let mut table = Vec::new();
            for (name_hash, type_hash, name, payload) in &self.instances {
                out.resize(out.len().next_multiple_of(8), 0);
                let offset = out.len() as u32;
                out.extend_from_slice(payload);
                words(&mut table, &[*name_hash, *type_hash, offset, payload.len() as u32]);
                table.extend_from_slice(&name.to_le_bytes());
            }
            out.resize(out.len().next_multiple_of(8), 0);
            let instance_offset = out.len() as u32;
            out.extend_from_slice(&table);
            let typedef_offset = out.len() as u32;
            out.extend_from_slice(&self.typedefs);
            let stringhash_offset = out.len() as u32;
            for (s, h) in &self.string_hashes {
                out.extend_from_slice(s);
                out.push(0);
                out.extend_from_slice(&h.to_le_bytes());
            }
            let nametable_offset = out.len() as u32;
            for n in &self.names {
                out.push(n.len() as u8);
            }
            for n in &self.names {
                out.extend_from_slice(n);
                out.push(0);
            }
            let header = AdfHeader {
                magic: ADF_MAGIC,
                version: 4,
                instance_count: self.instances.len() as u32,
                instance_offset,
                typedef_count: self.typedef_count,
                typedef_offset,
                stringhash_count: self.string_hashes.len() as u32,
                stringhash_offset,
                nametable_count: self.names.len() as u32,
                nametable_offset,
                total_size: out.len() as u32,
                unknown: [0; 5],
            };
            let mut head = Cursor::new(Vec::new());
            header.write(&mut head).expect("Test operation should succeed");
            out[..ADF_HEADER_SIZE].copy_from_slice(&head.into_inner());
            out
        }
    }

    fn typedef(out: &mut Vec<u8>, head: [u32; 4], name: u64, tail: [u32; 3]) {
        words(out, &head);
        out.extend_from_slice(&name.to_le_bytes());
        words(out, &tail);
    }

    fn member(out: &mut Vec<u8>, name: u64, type_hash: u32, size: u32, offset: u32, bit: u8) {
        out.extend_from_slice(&name.to_le_bytes());
        words(out, &[type_hash, size, (u32::from(bit) << 24) | offset, 0]);
        out.extend_from_slice(&0u64.to_le_bytes());
    }

    const NAMES: [&[u8]; 14] = [
        b"Thing", b"count", b"label", b"mode", b"ref", b"flag", b"values", b"Mode", b"A", b"B",
        b"C", b"thing0", b"Hash", b"Bits",
    ];

    fn sample_typedefs() -> Vec<u8> {
        let mut t = Vec::new();
        // Thing: struct, 48 bytes
        typedef(&mut t, [1, 48, 4, THING], 0, [0, 0, 0]);
        words(&mut t, &[6]);
        member(&mut t, 1, primitive::U32, 4, 0, 0);
        member(&mut t, 2, primitive::STRING, 8, 8, 0);
        member(&mut t, 3, MODE, 4, 16, 0);
        member(&mut t, 4, HASH, 4, 20, 0);
        member(&mut t, 5, BITS, 4, 24, 3);
        member(&mut t, 6, VALUES, 12, 32, 0);
        // Mode: enum
        typedef(&mut t, [8, 4, 4, MODE], 7, [0, 0, 0]);
        words(&mut t, &[3]);
        for (i, name) in [8u64, 9, 10].iter().enumerate() {
            t.extend_from_slice(&name.to_le_bytes());
            words(&mut t, &[i as u32]);
        }
        typedef(&mut t, [9, 4, 4, HASH], 12, [0, 0, 0]);
        words(&mut t, &[0]);
        typedef(&mut t, [7, 4, 4, BITS], 13, [0, 0, 0]);
        words(&mut t, &[0]);
        typedef(&mut t, [3, 12, 4, VALUES], 6, [0, primitive::U32, 0]);
        words(&mut t, &[0]);
        t
    }

    fn thing_payload() -> Vec<u8> {
        let mut p = Vec::new();
        words(&mut p, &[7, 0, 60, 5, 2, 0xABCD, 0b1000, 0, 48, 0, 3, 0, 1, 2, 3]);
        p.extend_from_slice(b"hello\0");
        p
    }

    pub(crate) fn sample_adf(instance_type: u32) -> Vec<u8> {
        TestAdf {
            names: NAMES.to_vec(),
            string_hashes: vec![(b"foo/bar.txt", 0xABCD)],
            typedefs: sample_typedefs(),
            typedef_count: 5,
            instances: vec![(0x99, instance_type, 11, thing_payload())],
        }
        .build()
    }

    #[test]
    fn test_parse_struct_instance() {
        let data = sample_adf(THING);
        let adf = AdfFile::parse(&data, &TypeRegistry::new()).expect("Test operation should succeed");

        assert_eq!(adf.types.len(), 5);
        assert_eq!(adf.names.len(), 14);
        assert_eq!(adf.string_hashes.get(&0xABCD), Some(&b"foo/bar.txt".to_vec()));
        assert!(adf.missing_types.is_empty());

        let inst = &adf.instances[0];
        assert_eq!(inst.entry.name, b"thing0".to_vec());
        let v = inst.value.as_ref().expect("Test operation should succeed");
        assert_eq!(v.field(b"count"), Some(&AdfValue::U32(7)));
        assert_eq!(v.field(b"label").and_then(AdfValue::as_bytes), Some(&b"hello"[..]));
        assert_eq!(
            v.field(b"mode"),
            Some(&AdfValue::Enum {
                type_hash: MODE,
                value: 2,
                name: Some(b"C".to_vec())
            })
        );
        assert_eq!(
            v.field(b"ref").and_then(AdfValue::as_bytes),
            Some(&b"foo/bar.txt"[..])
        );
        assert!(matches!(
            v.field(b"flag"),
            Some(AdfValue::Bitfield {
                value: true,
                bit_offset: 3,
                ..
            })
        ));
        match v.field(b"values") {
            Some(AdfValue::Array { items, data_offset, .. }) => {
                assert_eq!(items, &AdfArray::UInts(vec![1, 2, 3]));
                assert_eq!(*data_offset, u64::from(inst.entry.offset) + 48);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(adf.found_strings.contains(&b"hello".to_vec()));
        assert!(adf.field_names().contains(&b"values"[..]));
    }

    #[test]
    fn test_unknown_instance_type_is_recorded() {
        let data = sample_adf(0xFEED_F00D);
        let adf = AdfFile::parse(&data, &TypeRegistry::new()).expect("Test operation should succeed");
        assert_eq!(adf.instances.len(), 1);
        assert_eq!(adf.instances[0].value, None);
        assert!(adf.missing_types.contains(&0xFEED_F00D));
    }

    #[test]
    fn test_bare_instance_uses_registry() {
        let full = AdfFile::parse(&sample_adf(THING), &TypeRegistry::new())
            .expect("Test operation should succeed");
        let mut registry = TypeRegistry::new();
        registry.extend(full.types);

        let mut buffer = vec![0xEEu8; 16];
        // offsets inside a bare instance are relative to the whole buffer
        let mut payload = Vec::new();
        words(&mut payload, &[9, 0, 76, 5, 0, 0, 0, 0, 64, 0, 0, 0, 0, 0, 0]);
        payload.extend_from_slice(b"bare!\0");
        buffer.extend_from_slice(&payload);

        let adf = AdfFile::parse_kind(FileKind::AdfBare, &buffer, Some(THING), 16, &registry)
            .expect("Test operation should succeed");
        let v = adf.instances[0].value.as_ref().expect("Test operation should succeed");
        assert_eq!(v.field(b"count"), Some(&AdfValue::U32(9)));
        assert_eq!(v.field(b"label").and_then(AdfValue::as_bytes), Some(&b"bare!"[..]));

        assert!(matches!(
            AdfFile::parse_bare(&buffer, 0x7777, 16, &registry),
            Err(FormatError::MissingAdfType(0x7777))
        ));
    }

    #[test]
    fn test_adf0_prefix() {
        let full = AdfFile::parse(&sample_adf(THING), &TypeRegistry::new())
            .expect("Test operation should succeed");
        let mut registry = TypeRegistry::new();
        registry.extend(full.types);

        let mut data = b"\0FDA".to_vec();
        data.extend_from_slice(&MODE.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        let adf = AdfFile::parse_kind(FileKind::Adf0, &data, None, 0, &registry)
            .expect("Test operation should succeed");
        assert_eq!(
            adf.instances[0].value,
            Some(AdfValue::Enum {
                type_hash: MODE,
                value: 1,
                name: Some(b"B".to_vec())
            })
        );
    }

    #[test]
    fn test_scan_embedded() {
        let mut exe = vec![0x90u8; 100];
        exe.extend_from_slice(&sample_adf(THING));
        exe.extend_from_slice(b" FDA\x04\0\0\0 truncated");
        let mut registry = TypeRegistry::new();
        let found = scan_embedded(&exe, &mut registry);
        assert_eq!(found, vec![(100, sample_adf(THING).len() as u32)]);
        assert_eq!(registry.len(), 5);
        assert!(registry.contains(MODE));
    }

    #[test]
    fn test_bad_magic() {
        let mut data = sample_adf(THING);
        data[0] = b'X';
        assert!(matches!(
            AdfFile::parse(&data, &TypeRegistry::new()),
            Err(FormatError::IncorrectFormat(_))
        ));
    }
}
