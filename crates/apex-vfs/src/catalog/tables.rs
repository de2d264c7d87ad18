//! Table layout of the catalog store
//!
//! Records are serde_json blobs keyed by integer row ids; secondary indexes
//! are multimap tables from the indexed value to the row id.

use apex_hash::HashTriple;
use redb::{MultimapTableDefinition, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

pub(crate) const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub(crate) const NODES: TableDefinition<u64, Vec<u8>> = TableDefinition::new("nodes");
pub(crate) const NODE_BLOCKS: TableDefinition<(u64, u32), (u64, u32, u32)> =
    TableDefinition::new("node_blocks");
pub(crate) const NODES_BY_PARENT: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("nodes_by_parent");
pub(crate) const NODES_BY_V_PATH: MultimapTableDefinition<&[u8], u64> =
    MultimapTableDefinition::new("nodes_by_v_path");
pub(crate) const NODES_BY_V_HASH: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("nodes_by_v_hash");
pub(crate) const NODES_BY_CONTENT_HASH: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("nodes_by_content_hash");

pub(crate) const STRINGS: TableDefinition<u64, Vec<u8>> = TableDefinition::new("strings");
pub(crate) const STRINGS_BY_VALUE: TableDefinition<&[u8], u64> =
    TableDefinition::new("strings_by_value");
pub(crate) const STRINGS_BY_H32: MultimapTableDefinition<u32, u64> =
    MultimapTableDefinition::new("strings_by_h32");
pub(crate) const STRINGS_BY_H48: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("strings_by_h48");
pub(crate) const STRINGS_BY_H64: MultimapTableDefinition<i64, u64> =
    MultimapTableDefinition::new("strings_by_h64");
/// `(string rowid, node uid or 0)` to a merged [`StringRef`]
pub(crate) const STRING_REFS: TableDefinition<(u64, u64), Vec<u8>> =
    TableDefinition::new("string_refs");

pub(crate) const OBJECTS: TableDefinition<u64, Vec<u8>> = TableDefinition::new("objects");
pub(crate) const OBJECTS_BY_SOURCE: TableDefinition<(u64, u64), u64> =
    TableDefinition::new("objects_by_source");
pub(crate) const OBJECT_ID_REFS: MultimapTableDefinition<i64, (u64, u32)> =
    MultimapTableDefinition::new("object_id_refs");
pub(crate) const OBJECT_ID_REFS_BY_OBJECT: MultimapTableDefinition<u64, (i64, u32)> =
    MultimapTableDefinition::new("object_id_refs_by_object");
pub(crate) const EVENT_ID_REFS: MultimapTableDefinition<i64, (u64, u32)> =
    MultimapTableDefinition::new("event_id_refs");
pub(crate) const EVENT_ID_REFS_BY_OBJECT: MultimapTableDefinition<u64, (i64, u32)> =
    MultimapTableDefinition::new("event_id_refs_by_object");

pub(crate) const TYPE_DESCRIPTORS: TableDefinition<u32, Vec<u8>> =
    TableDefinition::new("type_descriptors");
pub(crate) const TYPE_MISSING: MultimapTableDefinition<u32, u64> =
    MultimapTableDefinition::new("type_missing");

pub(crate) const SUB_ARCHIVE_DEFS: TableDefinition<u64, Vec<u8>> =
    TableDefinition::new("sub_archive_defs");
pub(crate) const SUB_ARCHIVE_DEFS_BY_KEY: TableDefinition<(u64, u32, u32), u64> =
    TableDefinition::new("sub_archive_defs_by_key");
pub(crate) const SUB_ARCHIVE_DEFS_BY_HASH: MultimapTableDefinition<u32, u64> =
    MultimapTableDefinition::new("sub_archive_defs_by_hash");
pub(crate) const SUB_ARCHIVE_FILES: TableDefinition<(u64, u32), Vec<u8>> =
    TableDefinition::new("sub_archive_files");

pub(crate) const NEXT_NODE_UID: &str = "next_node_uid";
pub(crate) const NEXT_STRING_ROWID: &str = "next_string_rowid";
pub(crate) const NEXT_OBJECT_ROWID: &str = "next_object_rowid";
pub(crate) const NEXT_SUB_ARCHIVE_ROWID: &str = "next_sub_archive_rowid";

/// A known string with every hash of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringEntry {
    /// Row id in the strings table
    #[serde(skip)]
    pub rowid: u64,
    /// The string
    pub string: Vec<u8>,
    /// H32, H48 and H64 of the string
    pub hashes: HashTriple,
    /// H32 of the string's extension
    pub ext_hash: u32,
}

/// Where and how a string was seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StringRef {
    /// Seen as a structure member name
    pub is_field_name: bool,
    /// Seen in data the engine reads at runtime
    pub used_at_runtime: bool,
    /// Bitmap of kinds the string may name; `0` means unconstrained
    pub possible_kinds: u64,
}

impl StringRef {
    /// Combine two observations of the same string in the same node
    pub const fn merge(self, other: Self) -> Self {
        Self {
            is_field_name: self.is_field_name || other.is_field_name,
            used_at_runtime: self.used_at_runtime || other.used_at_runtime,
            possible_kinds: self.possible_kinds | other.possible_kinds,
        }
    }
}

/// One property-container object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Row id in the objects table
    #[serde(skip)]
    pub rowid: u64,
    /// Node the object was read from
    pub src_uid: u64,
    /// Offset of the object in that node
    pub offset: u64,
    /// Row id of the class name string
    pub class_string: Option<u64>,
    /// Row id of the object name string
    pub name_string: Option<u64>,
    /// Object identifier, when the object declares one
    pub object_id: Option<i64>,
}

/// A sub-archive described by a sub-index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubArchiveDef {
    /// Row id in the definitions table
    #[serde(skip)]
    pub rowid: u64,
    /// Sub-index node the definition was read from
    pub src_uid: u64,
    /// H32 of the archive path
    pub path_hash: u32,
    /// Magic of the archive file
    pub archive_magic: u32,
}

/// One file listed by a sub-archive definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubArchiveFile {
    /// Position in the definition's list
    #[serde(skip)]
    pub index: u32,
    /// Offset in the archive
    pub offset: u64,
    /// Size in bytes
    pub file_size: u64,
    /// Row id of the path string
    pub path_string: Option<u64>,
    /// H32 of the path as listed
    pub path_hash: u32,
    /// H32 of the extension as listed
    pub ext_hash: u32,
}

/// Open every table, creating the missing ones
pub(crate) fn create_schema(txn: &WriteTransaction) -> Result<(), redb::TableError> {
    txn.open_table(META)?;
    txn.open_table(NODES)?;
    txn.open_table(NODE_BLOCKS)?;
    txn.open_multimap_table(NODES_BY_PARENT)?;
    txn.open_multimap_table(NODES_BY_V_PATH)?;
    txn.open_multimap_table(NODES_BY_V_HASH)?;
    txn.open_multimap_table(NODES_BY_CONTENT_HASH)?;
    txn.open_table(STRINGS)?;
    txn.open_table(STRINGS_BY_VALUE)?;
    txn.open_multimap_table(STRINGS_BY_H32)?;
    txn.open_multimap_table(STRINGS_BY_H48)?;
    txn.open_multimap_table(STRINGS_BY_H64)?;
    txn.open_table(STRING_REFS)?;
    txn.open_table(OBJECTS)?;
    txn.open_table(OBJECTS_BY_SOURCE)?;
    txn.open_multimap_table(OBJECT_ID_REFS)?;
    txn.open_multimap_table(OBJECT_ID_REFS_BY_OBJECT)?;
    txn.open_multimap_table(EVENT_ID_REFS)?;
    txn.open_multimap_table(EVENT_ID_REFS_BY_OBJECT)?;
    txn.open_table(TYPE_DESCRIPTORS)?;
    txn.open_multimap_table(TYPE_MISSING)?;
    txn.open_table(SUB_ARCHIVE_DEFS)?;
    txn.open_table(SUB_ARCHIVE_DEFS_BY_KEY)?;
    txn.open_multimap_table(SUB_ARCHIVE_DEFS_BY_HASH)?;
    txn.open_table(SUB_ARCHIVE_FILES)?;
    Ok(())
}

/// Delete every table
pub(crate) fn drop_schema(txn: &WriteTransaction) -> Result<(), redb::TableError> {
    txn.delete_table(META)?;
    txn.delete_table(NODES)?;
    txn.delete_table(NODE_BLOCKS)?;
    txn.delete_multimap_table(NODES_BY_PARENT)?;
    txn.delete_multimap_table(NODES_BY_V_PATH)?;
    txn.delete_multimap_table(NODES_BY_V_HASH)?;
    txn.delete_multimap_table(NODES_BY_CONTENT_HASH)?;
    txn.delete_table(STRINGS)?;
    txn.delete_table(STRINGS_BY_VALUE)?;
    txn.delete_multimap_table(STRINGS_BY_H32)?;
    txn.delete_multimap_table(STRINGS_BY_H48)?;
    txn.delete_multimap_table(STRINGS_BY_H64)?;
    txn.delete_table(STRING_REFS)?;
    txn.delete_table(OBJECTS)?;
    txn.delete_table(OBJECTS_BY_SOURCE)?;
    txn.delete_multimap_table(OBJECT_ID_REFS)?;
    txn.delete_multimap_table(OBJECT_ID_REFS_BY_OBJECT)?;
    txn.delete_multimap_table(EVENT_ID_REFS)?;
    txn.delete_multimap_table(EVENT_ID_REFS_BY_OBJECT)?;
    txn.delete_table(TYPE_DESCRIPTORS)?;
    txn.delete_multimap_table(TYPE_MISSING)?;
    txn.delete_table(SUB_ARCHIVE_DEFS)?;
    txn.delete_table(SUB_ARCHIVE_DEFS_BY_KEY)?;
    txn.delete_multimap_table(SUB_ARCHIVE_DEFS_BY_HASH)?;
    txn.delete_table(SUB_ARCHIVE_FILES)?;
    Ok(())
}
