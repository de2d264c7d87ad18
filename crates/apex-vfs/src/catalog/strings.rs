use super::tables::{
    STRING_REFS, STRINGS, STRINGS_BY_H32, STRINGS_BY_H48, STRINGS_BY_H64, STRINGS_BY_VALUE,
    StringEntry, StringRef,
};
use super::Catalog;
use crate::Result;
use apex_hash::{HASH48_MASK, HashWidth};
use redb::{ReadableTable, ReadableTableMetadata};

/// Lookup key for [`Catalog::hash_string_match`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashQuery<'a> {
    /// Strings whose H32 equals the value
    H32(u64),
    /// Strings whose H48 equals the value
    H48(u64),
    /// Strings whose H64, read unsigned, equals the value
    H64(u64),
    /// The string itself
    String(&'a [u8]),
}

impl HashQuery<'_> {
    /// Query for a hash of the given width
    pub const fn for_width(width: HashWidth, value: u64) -> Self {
        match width {
            HashWidth::W32 => Self::H32(value),
            HashWidth::W48 => Self::H48(value),
            HashWidth::W64 => Self::H64(value),
        }
    }
}

impl Catalog {
    /// Strings matching a hash or a literal
    ///
    /// Hash values outside the range of their width match nothing.
    pub fn hash_string_match(&self, query: HashQuery<'_>) -> Result<Vec<StringEntry>> {
        let txn = self.db.begin_read()?;
        let rowids: Vec<u64> = match query {
            HashQuery::H32(value) => {
                let Ok(value) = u32::try_from(value) else {
                    return Ok(Vec::new());
                };
                let table = txn.open_multimap_table(STRINGS_BY_H32)?;
                table
                    .get(value)?
                    .map(|item| item.map(|g| g.value()))
                    .collect::<std::result::Result<_, _>>()?
            }
            HashQuery::H48(value) => {
                if value > HASH48_MASK {
                    return Ok(Vec::new());
                }
                let table = txn.open_multimap_table(STRINGS_BY_H48)?;
                table
                    .get(value)?
                    .map(|item| item.map(|g| g.value()))
                    .collect::<std::result::Result<_, _>>()?
            }
            HashQuery::H64(value) => {
                let table = txn.open_multimap_table(STRINGS_BY_H64)?;
                table
                    .get(value as i64)?
                    .map(|item| item.map(|g| g.value()))
                    .collect::<std::result::Result<_, _>>()?
            }
            HashQuery::String(s) => {
                let table = txn.open_table(STRINGS_BY_VALUE)?;
                table.get(s)?.map(|g| g.value()).into_iter().collect()
            }
        };

        let strings = txn.open_table(STRINGS)?;
        let mut out = Vec::with_capacity(rowids.len());
        for rowid in rowids {
            if let Some(record) = strings.get(rowid)? {
                let mut entry: StringEntry = serde_json::from_slice(&record.value())?;
                entry.rowid = rowid;
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Every known string, in insertion order
    pub fn strings_all(&self) -> Result<Vec<StringEntry>> {
        let txn = self.db.begin_read()?;
        let strings = txn.open_table(STRINGS)?;
        let mut out = Vec::new();
        for item in strings.iter()? {
            let (rowid, record) = item?;
            let mut entry: StringEntry = serde_json::from_slice(&record.value())?;
            entry.rowid = rowid.value();
            out.push(entry);
        }
        Ok(out)
    }

    /// Number of known strings
    pub fn string_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        Ok(txn.open_table(STRINGS)?.len()?)
    }

    /// String by row id
    pub fn string_where_rowid(&self, rowid: u64) -> Result<Option<StringEntry>> {
        let txn = self.db.begin_read()?;
        let strings = txn.open_table(STRINGS)?;
        let Some(record) = strings.get(rowid)? else {
            return Ok(None);
        };
        let mut entry: StringEntry = serde_json::from_slice(&record.value())?;
        entry.rowid = rowid;
        Ok(Some(entry))
    }

    /// Every observation of a string as `(node uid, reference)`
    pub fn string_refs(&self, rowid: u64) -> Result<Vec<(Option<u64>, StringRef)>> {
        let txn = self.db.begin_read()?;
        let refs = txn.open_table(STRING_REFS)?;
        let mut out = Vec::new();
        for item in refs.range((rowid, 0)..=(rowid, u64::MAX))? {
            let (key, record) = item?;
            let (_, node) = key.value();
            let reference: StringRef = serde_json::from_slice(&record.value())?;
            out.push(((node != 0).then_some(node), reference));
        }
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::super::ProposedString;
    use super::*;
    use pretty_assertions::assert_eq;

    fn propose(catalog: &Catalog, s: &[u8], node: Option<u64>, reference: StringRef) -> bool {
        catalog
            .write(|w| {
                w.string_propose(&ProposedString {
                    string: s.to_vec(),
                    node,
                    reference,
                })
            })
            .expect("Test operation should succeed")
    }

    #[test]
    fn test_match_every_width() {
        let catalog = Catalog::in_memory(HashWidth::W32).expect("Test operation should succeed");
        assert!(propose(&catalog, b"foo/bar.txt", None, StringRef::default()));
        let h = apex_hash::hash_all(b"foo/bar.txt");

        for query in [
            HashQuery::H32(u64::from(h.h32)),
            HashQuery::H48(h.h48),
            HashQuery::H64(h.h64_unsigned()),
            HashQuery::String(b"foo/bar.txt"),
        ] {
            let found = catalog
                .hash_string_match(query)
                .expect("Test operation should succeed");
            assert_eq!(found.len(), 1, "{query:?}");
            assert_eq!(found[0].string, b"foo/bar.txt".to_vec());
            assert_eq!(found[0].ext_hash, apex_hash::hash32(b".txt"));
        }
    }

    #[test]
    fn test_out_of_range_hash_matches_nothing() {
        let catalog = Catalog::in_memory(HashWidth::W32).expect("Test operation should succeed");
        propose(&catalog, b"a", None, StringRef::default());
        let found = catalog
            .hash_string_match(HashQuery::H32(1 << 32))
            .expect("Test operation should succeed");
        assert!(found.is_empty());
        let found = catalog
            .hash_string_match(HashQuery::H48(1 << 48))
            .expect("Test operation should succeed");
        assert!(found.is_empty());
    }

    #[test]
    fn test_refs_merge_per_node() {
        let catalog = Catalog::in_memory(HashWidth::W32).expect("Test operation should succeed");
        let first = StringRef {
            is_field_name: true,
            used_at_runtime: false,
            possible_kinds: 0b01,
        };
        let second = StringRef {
            is_field_name: false,
            used_at_runtime: true,
            possible_kinds: 0b10,
        };
        assert!(propose(&catalog, b"x.bin", Some(4), first));
        assert!(!propose(&catalog, b"x.bin", Some(4), second));
        propose(&catalog, b"x.bin", None, StringRef::default());
        assert_eq!(catalog.string_count().expect("Test operation should succeed"), 1);

        let entry = catalog
            .hash_string_match(HashQuery::String(b"x.bin"))
            .expect("Test operation should succeed")
            .remove(0);
        let refs = catalog
            .string_refs(entry.rowid)
            .expect("Test operation should succeed");
        assert_eq!(
            refs,
            vec![
                (None, StringRef::default()),
                (
                    Some(4),
                    StringRef {
                        is_field_name: true,
                        used_at_runtime: true,
                        possible_kinds: 0b11,
                    }
                ),
            ]
        );
    }
}
