use super::Catalog;
use super::tables::{
    EVENT_ID_REFS, EVENT_ID_REFS_BY_OBJECT, OBJECT_ID_REFS, OBJECT_ID_REFS_BY_OBJECT, OBJECTS,
    OBJECTS_BY_SOURCE, ObjectRecord, SUB_ARCHIVE_DEFS, SUB_ARCHIVE_DEFS_BY_HASH,
    SUB_ARCHIVE_FILES, SubArchiveDef, SubArchiveFile, TYPE_DESCRIPTORS, TYPE_MISSING,
};
use crate::Result;
use apex_formats::adf::{TypeDef, TypeRegistry};
use redb::{
    MultimapTableDefinition, ReadOnlyTable, ReadableMultimapTable, ReadableTable,
    ReadableTableMetadata,
};

fn object_at(objects: &ReadOnlyTable<u64, Vec<u8>>, rowid: u64) -> Result<Option<ObjectRecord>> {
    let Some(record) = objects.get(rowid)? else {
        return Ok(None);
    };
    let mut object: ObjectRecord = serde_json::from_slice(&record.value())?;
    object.rowid = rowid;
    Ok(Some(object))
}

impl Catalog {
    /// Object read from `offset` in node `src_uid`
    pub fn object_where_source(&self, src_uid: u64, offset: u64) -> Result<Option<ObjectRecord>> {
        let txn = self.db.begin_read()?;
        let by_source = txn.open_table(OBJECTS_BY_SOURCE)?;
        let Some(rowid) = by_source.get((src_uid, offset))?.map(|g| g.value()) else {
            return Ok(None);
        };
        object_at(&txn.open_table(OBJECTS)?, rowid)
    }

    /// Every object read from a node
    pub fn objects_in_node(&self, src_uid: u64) -> Result<Vec<ObjectRecord>> {
        let txn = self.db.begin_read()?;
        let by_source = txn.open_table(OBJECTS_BY_SOURCE)?;
        let objects = txn.open_table(OBJECTS)?;
        let mut out = Vec::new();
        for item in by_source.range((src_uid, 0)..=(src_uid, u64::MAX))? {
            let (_, rowid) = item?;
            if let Some(object) = object_at(&objects, rowid.value())? {
                out.push(object);
            }
        }
        Ok(out)
    }

    /// Number of objects
    pub fn object_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        Ok(txn.open_table(OBJECTS)?.len()?)
    }

    fn objects_referencing(
        &self,
        index: MultimapTableDefinition<'_, i64, (u64, u32)>,
        id: i64,
    ) -> Result<Vec<(ObjectRecord, u32)>> {
        let txn = self.db.begin_read()?;
        let refs = txn.open_multimap_table(index)?;
        let objects = txn.open_table(OBJECTS)?;
        let mut out = Vec::new();
        for item in refs.get(id)? {
            let (rowid, flags) = item?.value();
            if let Some(object) = object_at(&objects, rowid)? {
                out.push((object, flags));
            }
        }
        Ok(out)
    }

    fn refs_of_object(
        &self,
        index: MultimapTableDefinition<'_, u64, (i64, u32)>,
        rowid: u64,
    ) -> Result<Vec<(i64, u32)>> {
        let txn = self.db.begin_read()?;
        let refs = txn.open_multimap_table(index)?;
        let out = refs
            .get(rowid)?
            .map(|item| item.map(|g| g.value()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(out)
    }

    /// Objects referencing object id `id`, with the reference flags
    pub fn objects_referencing_object_id(&self, id: i64) -> Result<Vec<(ObjectRecord, u32)>> {
        self.objects_referencing(OBJECT_ID_REFS, id)
    }

    /// Objects referencing event id `id`, with the reference flags
    pub fn objects_referencing_event_id(&self, id: i64) -> Result<Vec<(ObjectRecord, u32)>> {
        self.objects_referencing(EVENT_ID_REFS, id)
    }

    /// `(id, flags)` object references held by an object
    pub fn object_id_refs_of(&self, rowid: u64) -> Result<Vec<(i64, u32)>> {
        self.refs_of_object(OBJECT_ID_REFS_BY_OBJECT, rowid)
    }

    /// `(id, flags)` event references held by an object
    pub fn event_id_refs_of(&self, rowid: u64) -> Result<Vec<(i64, u32)>> {
        self.refs_of_object(EVENT_ID_REFS_BY_OBJECT, rowid)
    }

    /// Rebuild the type registry from stored descriptors and missing-type records
    pub fn type_registry_load(&self) -> Result<TypeRegistry> {
        let txn = self.db.begin_read()?;
        let mut registry = TypeRegistry::new();
        for item in txn.open_table(TYPE_DESCRIPTORS)?.iter()? {
            let (_, record) = item?;
            let def: TypeDef = serde_json::from_slice(&record.value())?;
            registry.insert(def);
        }
        for item in txn.open_multimap_table(TYPE_MISSING)?.iter()? {
            let (type_hash, uids) = item?;
            for uid in uids {
                registry.record_missing(type_hash.value(), uid?.value());
            }
        }
        registry.clear_changed();
        Ok(registry)
    }

    /// `(type hash, node uid)` pairs for types referenced without a descriptor
    ///
    /// Types that gained a descriptor since are left out.
    pub fn type_missing(&self) -> Result<Vec<(u32, u64)>> {
        let txn = self.db.begin_read()?;
        let known = txn.open_table(TYPE_DESCRIPTORS)?;
        let mut out = Vec::new();
        for item in txn.open_multimap_table(TYPE_MISSING)?.iter()? {
            let (type_hash, uids) = item?;
            let type_hash = type_hash.value();
            if known.get(type_hash)?.is_some() {
                continue;
            }
            for uid in uids {
                out.push((type_hash, uid?.value()));
            }
        }
        Ok(out)
    }

    /// Sub-archive definitions whose archive path hashes to `path_hash`
    pub fn sub_archive_defs_where_path_hash(&self, path_hash: u32) -> Result<Vec<SubArchiveDef>> {
        let txn = self.db.begin_read()?;
        let by_hash = txn.open_multimap_table(SUB_ARCHIVE_DEFS_BY_HASH)?;
        let defs = txn.open_table(SUB_ARCHIVE_DEFS)?;
        let mut out = Vec::new();
        for item in by_hash.get(path_hash)? {
            let rowid = item?.value();
            if let Some(record) = defs.get(rowid)? {
                let mut def: SubArchiveDef = serde_json::from_slice(&record.value())?;
                def.rowid = rowid;
                out.push(def);
            }
        }
        Ok(out)
    }

    /// Every sub-archive definition
    pub fn sub_archive_defs_all(&self) -> Result<Vec<SubArchiveDef>> {
        let txn = self.db.begin_read()?;
        let mut out = Vec::new();
        for item in txn.open_table(SUB_ARCHIVE_DEFS)?.iter()? {
            let (rowid, record) = item?;
            let mut def: SubArchiveDef = serde_json::from_slice(&record.value())?;
            def.rowid = rowid.value();
            out.push(def);
        }
        Ok(out)
    }

    /// Files listed by a sub-archive definition, in list order
    pub fn sub_archive_files(&self, def_rowid: u64) -> Result<Vec<SubArchiveFile>> {
        let txn = self.db.begin_read()?;
        let files = txn.open_table(SUB_ARCHIVE_FILES)?;
        let mut out = Vec::new();
        for item in files.range((def_rowid, 0)..=(def_rowid, u32::MAX))? {
            let (key, record) = item?;
            let mut file: SubArchiveFile = serde_json::from_slice(&record.value())?;
            file.index = key.value().1;
            out.push(file);
        }
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::super::PendingObject;
    use super::*;
    use apex_formats::gtoc::{GtocArchive, GtocFileEntry};
    use apex_hash::HashWidth;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_objects_and_refs() {
        let catalog = Catalog::in_memory(HashWidth::W32).expect("Test operation should succeed");
        let object = PendingObject {
            src_uid: 3,
            offset: 8,
            class_name: Some(b"CSpawn".to_vec()),
            name: Some(b"spawn_01".to_vec()),
            object_id: Some(42),
            object_refs: vec![(42, 0), (7, 1)],
            event_refs: vec![(99, 0)],
        };
        let rowid = catalog
            .write(|w| w.object_add(&object))
            .expect("Test operation should succeed");

        let stored = catalog
            .object_where_source(3, 8)
            .expect("Test operation should succeed")
            .expect("Test operation should succeed");
        assert_eq!(stored.rowid, rowid);
        assert_eq!(stored.object_id, Some(42));
        let class = catalog
            .string_where_rowid(stored.class_string.expect("Test operation should succeed"))
            .expect("Test operation should succeed")
            .expect("Test operation should succeed");
        assert_eq!(class.string, b"CSpawn".to_vec());

        let referencing = catalog
            .objects_referencing_object_id(7)
            .expect("Test operation should succeed");
        assert_eq!(referencing.len(), 1);
        assert_eq!(referencing[0].1, 1);
        assert_eq!(
            catalog
                .objects_referencing_event_id(99)
                .expect("Test operation should succeed")
                .len(),
            1
        );

        // reading the same object again replaces its references
        let again = PendingObject {
            object_refs: vec![(5, 0)],
            event_refs: vec![],
            ..object
        };
        let second = catalog
            .write(|w| w.object_add(&again))
            .expect("Test operation should succeed");
        assert_eq!(second, rowid);
        assert_eq!(catalog.object_count().expect("Test operation should succeed"), 1);
        assert_eq!(
            catalog.object_id_refs_of(rowid).expect("Test operation should succeed"),
            vec![(5, 0)]
        );
        assert!(
            catalog
                .objects_referencing_event_id(99)
                .expect("Test operation should succeed")
                .is_empty()
        );
        assert_eq!(
            catalog.objects_in_node(3).expect("Test operation should succeed").len(),
            1
        );
    }

    #[test]
    fn test_sub_archive_defs() {
        let catalog = Catalog::in_memory(HashWidth::W32).expect("Test operation should succeed");
        let archive = GtocArchive {
            path_hash32: 0xAABB_CCDD,
            archive_magic: 0x1122_3344,
            file_entries: vec![GtocFileEntry {
                offset_in_archive: 16,
                path_hash32: apex_hash::hash32(b"a/b.bin"),
                ext_hash32: apex_hash::hash32(b".bin"),
                file_size: 32,
                path: b"a/b.bin".to_vec(),
            }],
        };
        let first = catalog
            .write(|w| w.sub_archive_add(9, &archive))
            .expect("Test operation should succeed");
        let second = catalog
            .write(|w| w.sub_archive_add(9, &archive))
            .expect("Test operation should succeed");
        assert_eq!(first, second);

        let defs = catalog
            .sub_archive_defs_where_path_hash(0xAABB_CCDD)
            .expect("Test operation should succeed");
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].archive_magic, 0x1122_3344);

        let files = catalog
            .sub_archive_files(defs[0].rowid)
            .expect("Test operation should succeed");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].offset, 16);
        assert_eq!(files[0].file_size, 32);
        let path = catalog
            .string_where_rowid(files[0].path_string.expect("Test operation should succeed"))
            .expect("Test operation should succeed")
            .expect("Test operation should succeed");
        assert_eq!(path.string, b"a/b.bin".to_vec());
    }

    #[test]
    fn test_type_registry_persists() {
        let catalog = Catalog::in_memory(HashWidth::W32).expect("Test operation should succeed");
        let mut registry = TypeRegistry::new();
        registry.record_missing(0xDEAD_0001, 12);
        catalog
            .write(|w| w.type_registry_save(&registry))
            .expect("Test operation should succeed");

        let loaded = catalog.type_registry_load().expect("Test operation should succeed");
        assert!(!loaded.is_changed());
        assert_eq!(loaded.missing().collect::<Vec<_>>(), vec![(0xDEAD_0001, 12)]);
        assert_eq!(
            catalog.type_missing().expect("Test operation should succeed"),
            vec![(0xDEAD_0001, 12)]
        );
    }
}
