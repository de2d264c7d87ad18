//! Mutations applied inside one write transaction

use super::tables::*;
use crate::node::VfsNode;
use crate::{Result, VfsError};
use apex_formats::adf::TypeRegistry;
use apex_formats::gtoc::GtocArchive;
use apex_hash::HashWidth;
use redb::{MultimapTable, ReadableTable, Table, WriteTransaction};

/// A string observation queued for the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProposedString {
    /// The string
    pub string: Vec<u8>,
    /// Node the string was found in
    pub node: Option<u64>,
    /// How it was seen
    pub reference: StringRef,
}

/// A property-container object queued for the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingObject {
    /// Node the object was read from
    pub src_uid: u64,
    /// Offset of the object in that node
    pub offset: u64,
    /// Class name
    pub class_name: Option<Vec<u8>>,
    /// Object name
    pub name: Option<Vec<u8>>,
    /// Declared object id
    pub object_id: Option<i64>,
    /// `(id, flags)` object references
    pub object_refs: Vec<(i64, u32)>,
    /// `(id, flags)` event references
    pub event_refs: Vec<(i64, u32)>,
}

/// Open tables of one write transaction
pub struct CatalogWriter<'txn> {
    width: HashWidth,
    meta: Table<'txn, &'static str, u64>,
    nodes: Table<'txn, u64, Vec<u8>>,
    node_blocks: Table<'txn, (u64, u32), (u64, u32, u32)>,
    nodes_by_parent: MultimapTable<'txn, u64, u64>,
    nodes_by_v_path: MultimapTable<'txn, &'static [u8], u64>,
    nodes_by_v_hash: MultimapTable<'txn, u64, u64>,
    nodes_by_content_hash: MultimapTable<'txn, &'static str, u64>,
    strings: Table<'txn, u64, Vec<u8>>,
    strings_by_value: Table<'txn, &'static [u8], u64>,
    strings_by_h32: MultimapTable<'txn, u32, u64>,
    strings_by_h48: MultimapTable<'txn, u64, u64>,
    strings_by_h64: MultimapTable<'txn, i64, u64>,
    string_refs: Table<'txn, (u64, u64), Vec<u8>>,
    objects: Table<'txn, u64, Vec<u8>>,
    objects_by_source: Table<'txn, (u64, u64), u64>,
    object_id_refs: MultimapTable<'txn, i64, (u64, u32)>,
    object_id_refs_by_object: MultimapTable<'txn, u64, (i64, u32)>,
    event_id_refs: MultimapTable<'txn, i64, (u64, u32)>,
    event_id_refs_by_object: MultimapTable<'txn, u64, (i64, u32)>,
    type_descriptors: Table<'txn, u32, Vec<u8>>,
    type_missing: MultimapTable<'txn, u32, u64>,
    sub_archive_defs: Table<'txn, u64, Vec<u8>>,
    sub_archive_defs_by_key: Table<'txn, (u64, u32, u32), u64>,
    sub_archive_defs_by_hash: MultimapTable<'txn, u32, u64>,
    sub_archive_files: Table<'txn, (u64, u32), Vec<u8>>,
}

impl<'txn> CatalogWriter<'txn> {
    pub(crate) fn open(txn: &'txn WriteTransaction, width: HashWidth) -> Result<Self> {
        Ok(Self {
            width,
            meta: txn.open_table(META)?,
            nodes: txn.open_table(NODES)?,
            node_blocks: txn.open_table(NODE_BLOCKS)?,
            nodes_by_parent: txn.open_multimap_table(NODES_BY_PARENT)?,
            nodes_by_v_path: txn.open_multimap_table(NODES_BY_V_PATH)?,
            nodes_by_v_hash: txn.open_multimap_table(NODES_BY_V_HASH)?,
            nodes_by_content_hash: txn.open_multimap_table(NODES_BY_CONTENT_HASH)?,
            strings: txn.open_table(STRINGS)?,
            strings_by_value: txn.open_table(STRINGS_BY_VALUE)?,
            strings_by_h32: txn.open_multimap_table(STRINGS_BY_H32)?,
            strings_by_h48: txn.open_multimap_table(STRINGS_BY_H48)?,
            strings_by_h64: txn.open_multimap_table(STRINGS_BY_H64)?,
            string_refs: txn.open_table(STRING_REFS)?,
            objects: txn.open_table(OBJECTS)?,
            objects_by_source: txn.open_table(OBJECTS_BY_SOURCE)?,
            object_id_refs: txn.open_multimap_table(OBJECT_ID_REFS)?,
            object_id_refs_by_object: txn.open_multimap_table(OBJECT_ID_REFS_BY_OBJECT)?,
            event_id_refs: txn.open_multimap_table(EVENT_ID_REFS)?,
            event_id_refs_by_object: txn.open_multimap_table(EVENT_ID_REFS_BY_OBJECT)?,
            type_descriptors: txn.open_table(TYPE_DESCRIPTORS)?,
            type_missing: txn.open_multimap_table(TYPE_MISSING)?,
            sub_archive_defs: txn.open_table(SUB_ARCHIVE_DEFS)?,
            sub_archive_defs_by_key: txn.open_table(SUB_ARCHIVE_DEFS_BY_KEY)?,
            sub_archive_defs_by_hash: txn.open_multimap_table(SUB_ARCHIVE_DEFS_BY_HASH)?,
            sub_archive_files: txn.open_table(SUB_ARCHIVE_FILES)?,
        })
    }

    /// v_hash width of the catalog
    pub const fn hash_width(&self) -> HashWidth {
        self.width
    }

    // Row ids start at 1 so that 0 can stand for "no node" in composite keys.
    fn next_id(&mut self, counter: &'static str) -> Result<u64> {
        let next = self.meta.get(counter)?.map_or(1, |g| g.value());
        self.meta.insert(counter, next + 1)?;
        Ok(next)
    }

    fn index_node(&mut self, node: &VfsNode) -> Result<()> {
        if let Some(parent) = node.parent {
            self.nodes_by_parent.insert(parent, node.uid)?;
        }
        if let Some(v_path) = &node.v_path {
            self.nodes_by_v_path.insert(v_path.as_slice(), node.uid)?;
        }
        if let Some(v_hash) = node.v_hash {
            self.nodes_by_v_hash.insert(v_hash, node.uid)?;
        }
        if let Some(content_hash) = &node.content_hash {
            self.nodes_by_content_hash.insert(content_hash.as_str(), node.uid)?;
        }
        Ok(())
    }

    fn unindex_node(&mut self, node: &VfsNode) -> Result<()> {
        if let Some(parent) = node.parent {
            self.nodes_by_parent.remove(parent, node.uid)?;
        }
        if let Some(v_path) = &node.v_path {
            self.nodes_by_v_path.remove(v_path.as_slice(), node.uid)?;
        }
        if let Some(v_hash) = node.v_hash {
            self.nodes_by_v_hash.remove(v_hash, node.uid)?;
        }
        if let Some(content_hash) = &node.content_hash {
            self.nodes_by_content_hash
                .remove(content_hash.as_str(), node.uid)?;
        }
        Ok(())
    }

    fn stored_node(&self, uid: u64) -> Result<Option<VfsNode>> {
        let Some(record) = self.nodes.get(uid)? else {
            return Ok(None);
        };
        let mut node: VfsNode = serde_json::from_slice(&record.value())?;
        node.uid = uid;
        Ok(Some(node))
    }

    /// Store a new node and assign its uid
    pub fn node_add(&mut self, node: &mut VfsNode) -> Result<u64> {
        let uid = self.next_id(NEXT_NODE_UID)?;
        node.uid = uid;
        self.nodes.insert(uid, serde_json::to_vec(&*node)?)?;
        self.index_node(node)?;
        for (i, block) in node.blocks.iter().enumerate() {
            let index = u32::try_from(i)
                .map_err(|_| VfsError::Catalog(format!("node {uid}: too many blocks")))?;
            self.node_blocks.insert(
                (uid, index),
                (block.offset, block.compressed_len, block.uncompressed_len),
            )?;
        }
        Ok(uid)
    }

    /// Rewrite a stored node's record and indexes
    ///
    /// Blocks are written once by [`Self::node_add`] and left untouched.
    pub fn node_update(&mut self, node: &VfsNode) -> Result<()> {
        let old = self
            .stored_node(node.uid)?
            .ok_or_else(|| VfsError::Catalog(format!("update of unknown node {}", node.uid)))?;
        self.unindex_node(&old)?;
        self.nodes.insert(node.uid, serde_json::to_vec(node)?)?;
        self.index_node(node)?;
        Ok(())
    }

    /// Delete a node with its blocks
    pub fn node_delete(&mut self, uid: u64) -> Result<bool> {
        let Some(old) = self.stored_node(uid)? else {
            return Ok(false);
        };
        self.unindex_node(&old)?;
        self.nodes.remove(uid)?;
        let keys = self
            .node_blocks
            .range((uid, 0)..=(uid, u32::MAX))?
            .map(|item| item.map(|(k, _)| k.value()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for key in keys {
            self.node_blocks.remove(key)?;
        }
        Ok(true)
    }

    fn string_rowid(&mut self, string: &[u8]) -> Result<(u64, bool)> {
        if let Some(rowid) = self.strings_by_value.get(string)?.map(|g| g.value()) {
            return Ok((rowid, false));
        }
        let rowid = self.next_id(NEXT_STRING_ROWID)?;
        let entry = StringEntry {
            rowid,
            string: string.to_vec(),
            hashes: apex_hash::hash_all(string),
            ext_hash: apex_hash::ext_hash(string),
        };
        self.strings.insert(rowid, serde_json::to_vec(&entry)?)?;
        self.strings_by_value.insert(string, rowid)?;
        self.strings_by_h32.insert(entry.hashes.h32, rowid)?;
        self.strings_by_h48.insert(entry.hashes.h48, rowid)?;
        self.strings_by_h64.insert(entry.hashes.h64, rowid)?;
        Ok((rowid, true))
    }

    /// Record a string observation; returns whether the string was new
    ///
    /// Observations of the same string in the same node are merged.
    pub fn string_propose(&mut self, proposed: &ProposedString) -> Result<bool> {
        let (rowid, added) = self.string_rowid(&proposed.string)?;
        let key = (rowid, proposed.node.unwrap_or(0));
        let reference = match self.string_refs.get(key)? {
            Some(old) => {
                let old: StringRef = serde_json::from_slice(&old.value())?;
                old.merge(proposed.reference)
            }
            None => proposed.reference,
        };
        self.string_refs.insert(key, serde_json::to_vec(&reference)?)?;
        Ok(added)
    }

    /// Store an object and its references, replacing one read earlier from the same place
    pub fn object_add(&mut self, object: &PendingObject) -> Result<u64> {
        let source = (object.src_uid, object.offset);
        let existing = self.objects_by_source.get(source)?.map(|g| g.value());
        let rowid = match existing {
            Some(rowid) => {
                self.clear_object_refs(rowid)?;
                rowid
            }
            None => self.next_id(NEXT_OBJECT_ROWID)?,
        };

        let class_string = match &object.class_name {
            Some(s) => Some(self.string_rowid(s)?.0),
            None => None,
        };
        let name_string = match &object.name {
            Some(s) => Some(self.string_rowid(s)?.0),
            None => None,
        };
        let record = ObjectRecord {
            rowid,
            src_uid: object.src_uid,
            offset: object.offset,
            class_string,
            name_string,
            object_id: object.object_id,
        };
        self.objects.insert(rowid, serde_json::to_vec(&record)?)?;
        self.objects_by_source.insert(source, rowid)?;

        for &(id, flags) in &object.object_refs {
            self.object_id_refs.insert(id, (rowid, flags))?;
            self.object_id_refs_by_object.insert(rowid, (id, flags))?;
        }
        for &(id, flags) in &object.event_refs {
            self.event_id_refs.insert(id, (rowid, flags))?;
            self.event_id_refs_by_object.insert(rowid, (id, flags))?;
        }
        Ok(rowid)
    }

    fn clear_object_refs(&mut self, rowid: u64) -> Result<()> {
        let refs = self
            .object_id_refs_by_object
            .remove_all(rowid)?
            .map(|item| item.map(|g| g.value()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (id, flags) in refs {
            self.object_id_refs.remove(id, (rowid, flags))?;
        }
        let refs = self
            .event_id_refs_by_object
            .remove_all(rowid)?
            .map(|item| item.map(|g| g.value()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (id, flags) in refs {
            self.event_id_refs.remove(id, (rowid, flags))?;
        }
        Ok(())
    }

    /// Persist every descriptor and missing-type pair of a registry
    ///
    /// Stored descriptors are never replaced. Returns the number added.
    pub fn type_registry_save(&mut self, registry: &TypeRegistry) -> Result<usize> {
        let mut added = 0;
        for def in registry.iter() {
            if self.type_descriptors.get(def.type_hash)?.is_some() {
                continue;
            }
            self.type_descriptors
                .insert(def.type_hash, serde_json::to_vec(def)?)?;
            added += 1;
        }
        for (type_hash, uid) in registry.missing() {
            self.type_missing.insert(type_hash, uid)?;
        }
        Ok(added)
    }

    /// Store a sub-archive definition and its file list
    ///
    /// A definition already read from the same node is kept as is.
    pub fn sub_archive_add(&mut self, src_uid: u64, archive: &GtocArchive) -> Result<u64> {
        let key = (src_uid, archive.path_hash32, archive.archive_magic);
        if let Some(rowid) = self.sub_archive_defs_by_key.get(key)?.map(|g| g.value()) {
            return Ok(rowid);
        }
        let rowid = self.next_id(NEXT_SUB_ARCHIVE_ROWID)?;
        let def = SubArchiveDef {
            rowid,
            src_uid,
            path_hash: archive.path_hash32,
            archive_magic: archive.archive_magic,
        };
        self.sub_archive_defs.insert(rowid, serde_json::to_vec(&def)?)?;
        self.sub_archive_defs_by_key.insert(key, rowid)?;
        self.sub_archive_defs_by_hash.insert(archive.path_hash32, rowid)?;

        for (i, entry) in archive.file_entries.iter().enumerate() {
            let index = u32::try_from(i)
                .map_err(|_| VfsError::Catalog("sub-archive file list too long".to_string()))?;
            let path_string = if entry.path.is_empty() {
                None
            } else {
                Some(self.string_rowid(&entry.path)?.0)
            };
            let file = SubArchiveFile {
                index,
                offset: u64::from(entry.offset_in_archive),
                file_size: u64::from(entry.file_size),
                path_string,
                path_hash: entry.path_hash32,
                ext_hash: entry.ext_hash32,
            };
            self.sub_archive_files
                .insert((rowid, index), serde_json::to_vec(&file)?)?;
        }
        Ok(rowid)
    }
}
