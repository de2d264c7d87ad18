//! Retroactive naming
//!
//! Nodes discovered by hash alone get a virtual path once a string with a
//! matching hash turns up. A string may carry a bitmap of the kinds it can
//! name; a node only takes a name whose bitmap admits the node's kind.

use super::{Resolver, split_ext};
use crate::Result;
use crate::catalog::HashQuery;
use crate::node::VfsNode;
use apex_formats::classify::classify_by_name;
use apex_formats::kind::{ANY_KIND_MASK, kind_bit};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use tracing::{debug, info, trace};

impl Resolver<'_> {
    /// Propose the sibling names of every known string in an association group
    ///
    /// Only siblings whose hash matches an unnamed node are kept.
    pub(super) fn find_vpath_by_assoc(&mut self) -> Result<u64> {
        let project = self.project;
        let groups = &project.config().file_assoc;
        let catalog = project.catalog();

        let unnamed: BTreeSet<u64> = catalog
            .nodes_filtered(|n| n.v_path.is_none() && n.v_hash.is_some())?
            .into_iter()
            .filter_map(|n| n.v_hash)
            .collect();
        if unnamed.is_empty() {
            return Ok(0);
        }

        let mut siblings = BTreeSet::new();
        for entry in catalog.strings_all()? {
            let (stem, ext) = split_ext(&entry.string);
            if stem.is_empty() || ext.is_empty() {
                continue;
            }
            for group in groups.iter().filter(|g| g.iter().any(|e| e.as_bytes() == ext)) {
                for other in group {
                    siblings.insert([stem, other.as_bytes()].concat());
                }
            }
        }

        let mut proposed = 0u64;
        for name in &siblings {
            if unnamed.contains(&project.file_hash(name)) {
                self.batch.propose(name, None);
                proposed += 1;
            }
        }
        let flushed = self.flush()?;
        info!(
            "Association: {} sibling names, {proposed} match unnamed nodes, {} new strings",
            siblings.len(),
            flushed.strings_added
        );
        Ok(proposed)
    }

    /// Give every unnamed node the first admissible string with its hash
    ///
    /// Also marks nodes whose name was observed in live file access as
    /// runtime depth zero, and fills kinds and extension hashes that follow
    /// from a name.
    pub(super) fn name_by_hash(&mut self) -> Result<u64> {
        let project = self.project;
        let width = project.hash_width();
        let catalog = project.catalog();
        let mut named = 0u64;

        for (v_hash, nodes) in catalog.nodes_by_v_hash()? {
            let strings = catalog.hash_string_match(HashQuery::for_width(width, v_hash))?;
            if strings.is_empty() {
                continue;
            }
            let mut candidates = Vec::with_capacity(strings.len());
            for s in strings {
                let refs = catalog.string_refs(s.rowid)?;
                candidates.push((s.string, refs));
            }

            for mut node in nodes {
                let before = node.clone();
                let bit = kind_bit(node.file_kind);

                for (string, refs) in &candidates {
                    if node.v_path.is_none() {
                        let admitted = refs.iter().any(|(_, r)| {
                            let mask = if r.possible_kinds == 0 {
                                ANY_KIND_MASK
                            } else {
                                r.possible_kinds
                            };
                            mask & bit != 0
                        });
                        if admitted {
                            trace!("vpath:add {} {v_hash:08x}", String::from_utf8_lossy(string));
                            node.v_path = Some(string.clone());
                            named += 1;
                        } else {
                            trace!("vpath:skip {} {v_hash:08x}", String::from_utf8_lossy(string));
                        }
                    }
                    if node.v_path.as_ref() == Some(string)
                        && refs.iter().any(|(_, r)| r.used_at_runtime)
                    {
                        node.used_at_runtime_depth = Some(0);
                    }
                }

                if let Some(v_path) = &node.v_path {
                    if node.file_kind.is_none()
                        && let Some(kind) = classify_by_name(v_path)
                    {
                        node.file_kind = Some(kind);
                    }
                    if node.ext_hash.is_none() {
                        node.ext_hash = Some(apex_hash::ext_hash(v_path));
                    }
                }

                if node != before {
                    self.batch.node_update(node);
                }
            }
        }

        self.flush()?;
        self.stats.nodes_named += named;
        info!("Named {named} nodes by hash");
        Ok(named)
    }

    /// Propagate runtime depth from parents to children
    ///
    /// A child's depth is one more than the smallest depth among the paths
    /// reaching it from a depth-zero node. Returns the nodes rewritten.
    pub(crate) fn update_used_depths(&mut self) -> Result<u64> {
        let nodes = self.project.catalog().nodes_all()?;
        let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
        let mut depth: BTreeMap<u64, u32> = BTreeMap::new();
        let mut by_uid: HashMap<u64, VfsNode> = HashMap::with_capacity(nodes.len());
        let mut heap = BinaryHeap::new();

        for node in nodes {
            if let Some(parent) = node.parent {
                children.entry(parent).or_default().push(node.uid);
            }
            if let Some(d) = node.used_at_runtime_depth {
                depth.insert(node.uid, d);
                heap.push(Reverse((d, node.uid)));
            }
            by_uid.insert(node.uid, node);
        }

        let mut changed = BTreeSet::new();
        while let Some(Reverse((d, uid))) = heap.pop() {
            if depth.get(&uid).is_some_and(|&best| best < d) {
                continue;
            }
            for &child in children.get(&uid).map(Vec::as_slice).unwrap_or_default() {
                let next = d.saturating_add(1);
                if depth.get(&child).is_none_or(|&best| best > next) {
                    depth.insert(child, next);
                    changed.insert(child);
                    heap.push(Reverse((next, child)));
                }
            }
        }

        for uid in &changed {
            if let Some(mut node) = by_uid.remove(uid) {
                node.used_at_runtime_depth = depth.get(uid).copied();
                self.batch.node_update(node);
            }
        }
        self.flush()?;
        debug!("Runtime depth updated on {} nodes", changed.len());
        Ok(changed.len() as u64)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::{ProposedString, StringRef};
    use crate::config::ProjectConfig;
    use crate::project::Project;
    use apex_formats::FileKind;
    use apex_hash::HashWidth;
    use pretty_assertions::assert_eq;

    fn project() -> (tempfile::TempDir, Project) {
        let dir = tempfile::tempdir().expect("Test operation should succeed");
        let project = Project::create(dir.path().join("p"), ProjectConfig::new("gz", dir.path()))
            .expect("Test operation should succeed");
        (dir, project)
    }

    fn add(project: &Project, mut node: VfsNode) -> VfsNode {
        project
            .catalog()
            .node_add(&mut node)
            .expect("Test operation should succeed");
        node
    }

    fn propose(project: &Project, s: &[u8], reference: StringRef) {
        project
            .catalog()
            .write(|w| {
                w.string_propose(&ProposedString {
                    string: s.to_vec(),
                    node: None,
                    reference,
                })
            })
            .expect("Test operation should succeed");
    }

    #[test]
    fn test_name_by_hash_respects_possible_kinds() {
        let (_dir, project) = project();
        let h = project.file_hash(b"textures/a.ddsc");
        let mut tex = VfsNode::with_hash(HashWidth::W32, Some(h));
        tex.file_kind = Some(FileKind::Avtx);
        let tex = add(&project, tex);
        let mut other = VfsNode::with_hash(HashWidth::W32, Some(h));
        other.file_kind = Some(FileKind::Rtpc);
        let other = add(&project, other);

        propose(
            &project,
            b"textures/a.ddsc",
            StringRef {
                possible_kinds: FileKind::Avtx.bit() | FileKind::Dds.bit(),
                ..StringRef::default()
            },
        );

        let mut resolver = Resolver::new(&project);
        assert_eq!(resolver.name_by_hash().expect("Test operation should succeed"), 1);
        let catalog = project.catalog();
        let tex = catalog.node_required(tex.uid).expect("Test operation should succeed");
        assert_eq!(tex.v_path.as_deref(), Some(&b"textures/a.ddsc"[..]));
        assert_eq!(tex.ext_hash, Some(apex_hash::ext_hash(b"textures/a.ddsc")));
        assert_eq!(
            catalog
                .node_required(other.uid)
                .expect("Test operation should succeed")
                .v_path,
            None
        );
    }

    #[test]
    fn test_name_by_hash_sets_kind_from_name_and_runtime_depth() {
        let (_dir, project) = project();
        let node = add(
            &project,
            VfsNode::with_hash(HashWidth::W32, Some(project.file_hash(b"t/x.atx1"))),
        );
        propose(
            &project,
            b"t/x.atx1",
            StringRef {
                used_at_runtime: true,
                ..StringRef::default()
            },
        );
        Resolver::new(&project)
            .name_by_hash()
            .expect("Test operation should succeed");
        let node = project
            .catalog()
            .node_required(node.uid)
            .expect("Test operation should succeed");
        assert_eq!(node.file_kind, Some(FileKind::Atx));
        assert_eq!(node.used_at_runtime_depth, Some(0));
    }

    #[test]
    fn test_assoc_proposes_matching_siblings_only() {
        let (_dir, project) = project();
        add(
            &project,
            VfsNode::with_hash(HashWidth::W32, Some(project.file_hash(b"m/a.ee"))),
        );
        propose(&project, b"m/a.epe", StringRef::default());

        let mut resolver = Resolver::new(&project);
        assert_eq!(
            resolver
                .find_vpath_by_assoc()
                .expect("Test operation should succeed"),
            1
        );
        let catalog = project.catalog();
        assert_eq!(
            catalog
                .hash_string_match(HashQuery::String(b"m/a.ee"))
                .expect("Test operation should succeed")
                .len(),
            1
        );
        assert!(
            catalog
                .hash_string_match(HashQuery::String(b"m/a.bl"))
                .expect("Test operation should succeed")
                .is_empty()
        );
    }

    #[test]
    fn test_used_depths_take_shortest_path() {
        let (_dir, project) = project();
        let mut root = VfsNode::with_hash(HashWidth::W32, None);
        root.used_at_runtime_depth = Some(0);
        let root = add(&project, root);
        let mut mid = VfsNode::with_hash(HashWidth::W32, None);
        mid.parent = Some(root.uid);
        let mid = add(&project, mid);
        let mut leaf = VfsNode::with_hash(HashWidth::W32, None);
        leaf.parent = Some(mid.uid);
        leaf.used_at_runtime_depth = Some(7);
        let leaf = add(&project, leaf);

        assert_eq!(
            project
                .update_used_depths()
                .expect("Test operation should succeed"),
            2
        );
        let catalog = project.catalog();
        let depth = |uid| {
            catalog
                .node_required(uid)
                .expect("Test operation should succeed")
                .used_at_runtime_depth
        };
        assert_eq!(depth(mid.uid), Some(1));
        assert_eq!(depth(leaf.uid), Some(2));
    }
}
