//! Embedded catalog store
//!
//! Every node, string, object, type descriptor and sub-archive definition
//! discovered in a project lives here. The store is a single `redb` file;
//! writes are grouped into transactions through [`Catalog::write`], and
//! every commit notifies the registered [`CatalogObserver`]s.

mod objects;
mod strings;
pub(crate) mod tables;
mod writer;

pub use strings::HashQuery;
pub use tables::{ObjectRecord, StringEntry, StringRef, SubArchiveDef, SubArchiveFile};
pub use writer::{CatalogWriter, PendingObject, ProposedString};

use crate::node::VfsNode;
use crate::{Result, VfsError};
use apex_formats::tab::EntryBlock;
use apex_hash::HashWidth;
use parking_lot::Mutex;
use redb::{Database, ReadableMultimapTable, ReadableTable, ReadableTableMetadata};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tables::{NODE_BLOCKS, NODES, NODES_BY_CONTENT_HASH, NODES_BY_PARENT, NODES_BY_V_HASH, NODES_BY_V_PATH};
use tracing::{debug, warn};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Receives a call after every committed write
pub trait CatalogObserver: Send + Sync {
    /// The catalog changed; cached query results are stale
    fn catalog_changed(&self);
}

/// The project's embedded store
pub struct Catalog {
    db: Database,
    width: HashWidth,
    observers: Mutex<Vec<Weak<dyn CatalogObserver>>>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("width", &self.width)
            .field("observers", &self.observers.lock().len())
            .finish_non_exhaustive()
    }
}

impl Catalog {
    /// Open or create the store at `path`
    ///
    /// A store held open elsewhere is retried with backoff until it is
    /// released.
    pub fn open<P: AsRef<Path>>(path: P, width: HashWidth) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut delay = Duration::from_millis(10);
        let db = loop {
            match Database::create(path) {
                Ok(db) => break db,
                Err(redb::DatabaseError::DatabaseAlreadyOpen) => {
                    warn!("catalog {} is locked, retrying in {delay:?}", path.display());
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        };
        Self::with_database(db, width)
    }

    /// Create a store that lives only in memory
    pub fn in_memory(width: HashWidth) -> Result<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::with_database(db, width)
    }

    fn with_database(db: Database, width: HashWidth) -> Result<Self> {
        let txn = db.begin_write()?;
        tables::create_schema(&txn)?;
        txn.commit()?;
        Ok(Self {
            db,
            width,
            observers: Mutex::new(Vec::new()),
        })
    }

    /// v_hash width of the project
    pub const fn hash_width(&self) -> HashWidth {
        self.width
    }

    /// Drop every table and recreate an empty schema
    pub fn reset(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        tables::drop_schema(&txn)?;
        tables::create_schema(&txn)?;
        txn.commit()?;
        debug!("catalog reset");
        self.notify();
        Ok(())
    }

    /// Register an observer; it is dropped from the list once released
    pub fn subscribe(&self, observer: Weak<dyn CatalogObserver>) {
        self.observers.lock().push(observer);
    }

    fn notify(&self) {
        let live: Vec<Arc<dyn CatalogObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.catalog_changed();
        }
    }

    /// Run `f` in one write transaction and commit if it succeeds
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut CatalogWriter<'_>) -> Result<T>,
    {
        let txn = self.db.begin_write()?;
        let out = {
            let mut writer = CatalogWriter::open(&txn, self.width)?;
            f(&mut writer)?
        };
        txn.commit()?;
        self.notify();
        Ok(out)
    }

    /// Store one node and return its uid
    pub fn node_add(&self, node: &mut VfsNode) -> Result<u64> {
        self.write(|w| w.node_add(node))
    }

    /// Rewrite one node
    pub fn node_update(&self, node: &VfsNode) -> Result<()> {
        self.write(|w| w.node_update(node))
    }

    /// Node by uid, with its blocks
    pub fn node_where_uid(&self, uid: u64) -> Result<Option<VfsNode>> {
        let txn = self.db.begin_read()?;
        let nodes = txn.open_table(NODES)?;
        let blocks = txn.open_table(NODE_BLOCKS)?;
        load_node(&nodes, &blocks, uid)
    }

    /// Node by uid; a missing node is an error
    pub fn node_required(&self, uid: u64) -> Result<VfsNode> {
        self.node_where_uid(uid)?
            .ok_or_else(|| VfsError::FileMissing(format!("node {uid}")))
    }

    /// Nodes by uid, skipping unknown ones
    pub fn nodes_where_uids<I: IntoIterator<Item = u64>>(&self, uids: I) -> Result<Vec<VfsNode>> {
        let txn = self.db.begin_read()?;
        let nodes = txn.open_table(NODES)?;
        let blocks = txn.open_table(NODE_BLOCKS)?;
        let mut out = Vec::new();
        for uid in uids {
            if let Some(node) = load_node(&nodes, &blocks, uid)? {
                out.push(node);
            }
        }
        Ok(out)
    }

    fn nodes_via_index<'k, K>(
        &self,
        index: redb::MultimapTableDefinition<'_, K, u64>,
        key: K::SelfType<'k>,
    ) -> Result<Vec<VfsNode>>
    where
        K: redb::Key + 'static,
    {
        let uids = {
            let txn = self.db.begin_read()?;
            let table = txn.open_multimap_table(index)?;
            table
                .get(key)?
                .map(|item| item.map(|g| g.value()))
                .collect::<std::result::Result<Vec<u64>, _>>()?
        };
        self.nodes_where_uids(uids)
    }

    /// Nodes with the given virtual path
    pub fn nodes_where_v_path(&self, v_path: &[u8]) -> Result<Vec<VfsNode>> {
        self.nodes_via_index(NODES_BY_V_PATH, v_path)
    }

    /// Nodes with the given v_hash
    pub fn nodes_where_v_hash(&self, v_hash: u64) -> Result<Vec<VfsNode>> {
        self.nodes_via_index(NODES_BY_V_HASH, v_hash)
    }

    /// Nodes with the given content hash
    pub fn nodes_where_content_hash(&self, content_hash: &str) -> Result<Vec<VfsNode>> {
        self.nodes_via_index(NODES_BY_CONTENT_HASH, content_hash)
    }

    /// Direct children of a node
    pub fn children_of(&self, uid: u64) -> Result<Vec<VfsNode>> {
        self.nodes_via_index(NODES_BY_PARENT, uid)
    }

    /// Every node, in uid order
    pub fn nodes_all(&self) -> Result<Vec<VfsNode>> {
        self.nodes_filtered(|_| true)
    }

    /// Every node for which `keep` holds, in uid order
    pub fn nodes_filtered<F: FnMut(&VfsNode) -> bool>(&self, mut keep: F) -> Result<Vec<VfsNode>> {
        let txn = self.db.begin_read()?;
        let nodes = txn.open_table(NODES)?;
        let blocks = txn.open_table(NODE_BLOCKS)?;
        let mut out = Vec::new();
        for item in nodes.iter()? {
            let (uid, record) = item?;
            let mut node: VfsNode = serde_json::from_slice(&record.value())?;
            node.uid = uid.value();
            if keep(&node) {
                node.blocks = load_blocks(&blocks, node.uid)?;
                out.push(node);
            }
        }
        Ok(out)
    }

    /// Number of nodes
    pub fn node_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        Ok(txn.open_table(NODES)?.len()?)
    }

    /// Every v_hash carried by at least one node
    pub fn v_hashes(&self) -> Result<BTreeSet<u64>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(NODES_BY_V_HASH)?;
        let mut out = BTreeSet::new();
        for item in table.iter()? {
            let (key, _) = item?;
            out.insert(key.value());
        }
        Ok(out)
    }

    /// Nodes grouped by v_hash
    pub fn nodes_by_v_hash(&self) -> Result<BTreeMap<u64, Vec<VfsNode>>> {
        let mut out: BTreeMap<u64, Vec<VfsNode>> = BTreeMap::new();
        for node in self.nodes_filtered(|n| n.v_hash.is_some())? {
            if let Some(h) = node.v_hash {
                out.entry(h).or_default().push(node);
            }
        }
        Ok(out)
    }

    /// Ancestors of a node, nearest first
    pub fn ancestors(&self, node: &VfsNode) -> Result<Vec<VfsNode>> {
        let mut out: Vec<VfsNode> = Vec::new();
        let mut next = node.parent;
        while let Some(uid) = next {
            if uid == node.uid || out.iter().any(|n| n.uid == uid) {
                return Err(VfsError::Catalog(format!("parent cycle at node {uid}")));
            }
            let parent = self.node_required(uid)?;
            next = parent.parent;
            out.push(parent);
        }
        Ok(out)
    }
}

fn load_blocks<T>(blocks: &T, uid: u64) -> Result<Vec<EntryBlock>>
where
    T: ReadableTable<(u64, u32), (u64, u32, u32)>,
{
    let mut out = Vec::new();
    for item in blocks.range((uid, 0)..=(uid, u32::MAX))? {
        let (_, value) = item?;
        let (offset, compressed_len, uncompressed_len) = value.value();
        out.push(EntryBlock {
            offset,
            compressed_len,
            uncompressed_len,
        });
    }
    Ok(out)
}

fn load_node<N, B>(nodes: &N, blocks: &B, uid: u64) -> Result<Option<VfsNode>>
where
    N: ReadableTable<u64, Vec<u8>>,
    B: ReadableTable<(u64, u32), (u64, u32, u32)>,
{
    let Some(record) = nodes.get(uid)? else {
        return Ok(None);
    };
    let mut node: VfsNode = serde_json::from_slice(&record.value())?;
    node.uid = uid;
    node.blocks = load_blocks(blocks, uid)?;
    Ok(Some(node))
}
