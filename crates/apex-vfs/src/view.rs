//! Live filtered projections over the catalog
//!
//! A view keeps two derived sets. The visible set holds every node whose
//! virtual path matches the view's mask and which lies under the view's
//! restriction. The selected set is the visible set narrowed to the view's
//! path list. Both are computed on demand and dropped whenever the catalog
//! commits, so a reader always sees the state after the last transaction.
//!
//! Views observe the catalog through a weak link and the catalog observes
//! views the same way; neither keeps the other alive.

use crate::catalog::{Catalog, CatalogObserver};
use crate::node::VfsNode;
use crate::{Result, VfsError};
use apex_formats::FileKind;
use parking_lot::{Mutex, RwLock};
use regex::bytes::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Nodes sharing one virtual path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathNodes {
    /// Nodes carrying a body
    pub referenced: Vec<u64>,
    /// Symlink entries and nodes without a position
    pub symlinks: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
struct NodeSet {
    by_path: BTreeMap<Vec<u8>, PathNodes>,
    uids: BTreeSet<u64>,
    uids_no_v_path: BTreeSet<u64>,
}

impl NodeSet {
    fn insert(&mut self, node: &VfsNode) {
        let Some(v_path) = &node.v_path else {
            self.uids_no_v_path.insert(node.uid);
            return;
        };
        self.uids.insert(node.uid);
        let entry = self.by_path.entry(v_path.clone()).or_default();
        if node.file_kind != Some(FileKind::Symlink) && node.offset.is_some() {
            entry.referenced.push(node.uid);
        } else {
            entry.symlinks.push(node.uid);
        }
    }
}

/// Match `text` against a pattern where `%` is any run and `_` any one byte
fn like_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some(b'%') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'_' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p.min(pattern.len())..].iter().all(|&c| c == b'%')
}

fn compile_mask(mask: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{mask})"))
        .map_err(|e| VfsError::Config(format!("invalid view mask {mask:?}: {e}")))
}

struct ViewParams {
    paths: Vec<Vec<u8>>,
    mask: Regex,
}

struct ViewShared {
    catalog: Weak<Catalog>,
    parent: Option<Arc<ViewShared>>,
    parent_uid: Option<u64>,
    params: RwLock<ViewParams>,
    visible_dirty: AtomicBool,
    selected_dirty: AtomicBool,
    visible: RwLock<NodeSet>,
    selected: RwLock<NodeSet>,
    observers: Mutex<Vec<Weak<dyn CatalogObserver>>>,
}

impl ViewShared {
    fn restrictions(&self) -> Vec<u64> {
        let mut out: Vec<u64> = self.parent_uid.into_iter().collect();
        let mut parent = self.parent.as_deref();
        while let Some(view) = parent {
            out.extend(view.parent_uid);
            parent = view.parent.as_deref();
        }
        out
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

    fn refresh(&self) -> Result<()> {
        if self.visible_dirty.swap(false, Ordering::AcqRel) {
            let catalog = self
                .catalog
                .upgrade()
                .ok_or_else(|| VfsError::Catalog("catalog closed".to_string()))?;
            let nodes = catalog.nodes_all()?;
            let parents: HashMap<u64, Option<u64>> =
                nodes.iter().map(|n| (n.uid, n.parent)).collect();
            let restrictions = self.restrictions();
            let under = |node: &VfsNode| {
                restrictions.iter().all(|&r| {
                    let mut cur = node.parent;
                    while let Some(uid) = cur {
                        if uid == r {
                            return true;
                        }
                        cur = parents.get(&uid).copied().flatten();
                    }
                    false
                })
            };

            let params = self.params.read();
            let mut visible = NodeSet::default();
            for node in nodes.iter().filter(|n| under(n)) {
                match &node.v_path {
                    Some(p) if !params.mask.is_match(p) => {}
                    _ => visible.insert(node),
                }
            }
            debug!(
                "view: {} visible paths, {} unnamed nodes",
                visible.by_path.len(),
                visible.uids_no_v_path.len()
            );
            *self.visible.write() = visible;
            self.selected_dirty.store(true, Ordering::Release);
        }

        if self.selected_dirty.swap(false, Ordering::AcqRel) {
            let params = self.params.read();
            let visible = self.visible.read();
            let mut selected = NodeSet::default();
            for (v_path, entry) in &visible.by_path {
                if params.paths.iter().any(|p| like_match(p, v_path)) {
                    selected.uids.extend(&entry.referenced);
                    selected.uids.extend(&entry.symlinks);
                    selected.by_path.insert(v_path.clone(), entry.clone());
                }
            }
            *self.selected.write() = selected;
        }
        Ok(())
    }
}

impl CatalogObserver for ViewShared {
    fn catalog_changed(&self) {
        self.visible_dirty.store(true, Ordering::Release);
        self.selected_dirty.store(true, Ordering::Release);
        self.notify();
    }
}

/// A filtered, lazily refreshed projection over the catalog
///
/// Path-list entries are patterns in which `%` matches any run of bytes
/// and `_` matches one byte; entries without wildcards match exactly.
pub struct VfsView {
    shared: Arc<ViewShared>,
}

impl std::fmt::Debug for VfsView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params = self.shared.params.read();
        f.debug_struct("VfsView")
            .field("mask", &params.mask.as_str())
            .field("paths", &params.paths.len())
            .field("parent_uid", &self.shared.parent_uid)
            .finish_non_exhaustive()
    }
}

impl VfsView {
    /// Create a root view over `catalog`
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::Config`] if `mask` is not a valid regular expression.
    pub fn new(catalog: &Arc<Catalog>, paths: Vec<Vec<u8>>, mask: &str) -> Result<Self> {
        let shared = Arc::new(ViewShared {
            catalog: Arc::downgrade(catalog),
            parent: None,
            parent_uid: None,
            params: RwLock::new(ViewParams {
                paths,
                mask: compile_mask(mask)?,
            }),
            visible_dirty: AtomicBool::new(true),
            selected_dirty: AtomicBool::new(true),
            visible: RwLock::new(NodeSet::default()),
            selected: RwLock::new(NodeSet::default()),
            observers: Mutex::new(Vec::new()),
        });
        let observer: Weak<ViewShared> = Arc::downgrade(&shared);
        catalog.subscribe(observer);
        Ok(Self { shared })
    }

    /// Create a view nested in `parent`, optionally restricted to the
    /// descendants of `parent_uid`
    ///
    /// The child starts with its parent's paths and mask, inherits its
    /// restriction and goes stale whenever the parent does.
    pub fn child(parent: &Self, parent_uid: Option<u64>) -> Self {
        let (paths, mask) = {
            let params = parent.shared.params.read();
            (params.paths.clone(), params.mask.clone())
        };
        let shared = Arc::new(ViewShared {
            catalog: parent.shared.catalog.clone(),
            parent: Some(parent.shared.clone()),
            parent_uid,
            params: RwLock::new(ViewParams { paths, mask }),
            visible_dirty: AtomicBool::new(true),
            selected_dirty: AtomicBool::new(true),
            visible: RwLock::new(NodeSet::default()),
            selected: RwLock::new(NodeSet::default()),
            observers: Mutex::new(Vec::new()),
        });
        let observer: Weak<ViewShared> = Arc::downgrade(&shared);
        parent.shared.observers.lock().push(observer);
        Self { shared }
    }

    /// Notify `observer` whenever this view goes stale
    pub fn subscribe(&self, observer: Weak<dyn CatalogObserver>) {
        self.shared.observers.lock().push(observer);
    }

    /// Replace the mask; the visible set is recomputed on next access
    pub fn mask_set(&self, mask: &str) -> Result<()> {
        self.shared.params.write().mask = compile_mask(mask)?;
        self.shared.visible_dirty.store(true, Ordering::Release);
        self.shared.notify();
        Ok(())
    }

    /// Current mask, without the anchor added at compile time
    pub fn mask(&self) -> String {
        let params = self.shared.params.read();
        let anchored = params.mask.as_str();
        anchored
            .strip_prefix("^(?:")
            .and_then(|m| m.strip_suffix(')'))
            .unwrap_or(anchored)
            .to_string()
    }

    /// Replace the path list; the selected set is recomputed on next access
    pub fn paths_set(&self, paths: Vec<Vec<u8>>) {
        self.shared.params.write().paths = paths;
        self.shared.selected_dirty.store(true, Ordering::Release);
        self.shared.notify();
    }

    /// Number of entries in the path list
    pub fn paths_count(&self) -> usize {
        self.shared.params.read().paths.len()
    }

    /// Longest common prefix of the path list
    pub fn common_prefix(&self) -> Vec<u8> {
        let params = self.shared.params.read();
        let mut paths = params.paths.iter();
        let Some(first) = paths.next() else {
            return Vec::new();
        };
        let mut len = first.len();
        for p in paths {
            len = first
                .iter()
                .zip(p.iter())
                .take(len)
                .take_while(|(a, b)| a == b)
                .count();
        }
        first[..len].to_vec()
    }

    /// Whether the next access will recompute the visible set
    pub fn is_visible_dirty(&self) -> bool {
        self.shared.visible_dirty.load(Ordering::Acquire)
    }

    /// Whether the next access will recompute the selected set
    pub fn is_selected_dirty(&self) -> bool {
        self.shared.selected_dirty.load(Ordering::Acquire)
    }

    /// Number of distinct visible virtual paths
    pub fn node_visible_count(&self) -> Result<usize> {
        self.shared.refresh()?;
        Ok(self.shared.visible.read().by_path.len())
    }

    /// Visible nodes grouped by virtual path
    pub fn nodes_visible_map_get(&self) -> Result<BTreeMap<Vec<u8>, PathNodes>> {
        self.shared.refresh()?;
        Ok(self.shared.visible.read().by_path.clone())
    }

    /// Uids of every visible node with a virtual path
    pub fn nodes_visible_uids_get(&self) -> Result<BTreeSet<u64>> {
        self.shared.refresh()?;
        Ok(self.shared.visible.read().uids.clone())
    }

    /// Uids of nodes under the restriction that have no virtual path yet
    pub fn nodes_visible_uids_no_v_path_get(&self) -> Result<BTreeSet<u64>> {
        self.shared.refresh()?;
        Ok(self.shared.visible.read().uids_no_v_path.clone())
    }

    /// Whether any of `uids` is visible
    pub fn node_visible_has(&self, uids: &[u64]) -> Result<bool> {
        self.shared.refresh()?;
        let visible = self.shared.visible.read();
        Ok(uids.iter().any(|u| visible.uids.contains(u)))
    }

    /// Number of distinct selected virtual paths
    pub fn node_selected_count(&self) -> Result<usize> {
        self.shared.refresh()?;
        Ok(self.shared.selected.read().by_path.len())
    }

    /// Selected nodes grouped by virtual path
    pub fn nodes_selected_get(&self) -> Result<BTreeMap<Vec<u8>, PathNodes>> {
        self.shared.refresh()?;
        Ok(self.shared.selected.read().by_path.clone())
    }

    /// Uids of every selected node
    pub fn nodes_selected_uids_get(&self) -> Result<BTreeSet<u64>> {
        self.shared.refresh()?;
        Ok(self.shared.selected.read().uids.clone())
    }

    /// Whether any of `uids` is selected
    pub fn node_selected_has(&self, uids: &[u64]) -> Result<bool> {
        self.shared.refresh()?;
        let selected = self.shared.selected.read();
        Ok(uids.iter().any(|u| selected.uids.contains(u)))
    }
}
