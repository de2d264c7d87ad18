//! Buffered catalog writes
//!
//! Handlers queue their results here; the resolver commits the queue in a
//! single transaction at the end of each pass.

use crate::Result;
use crate::catalog::{Catalog, PendingObject, ProposedString, StringRef};
use crate::node::VfsNode;
use apex_formats::FileKind;
use apex_formats::gtoc::GtocArchive;
use std::collections::BTreeMap;
use tracing::trace;

/// Counts from one commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Nodes created
    pub nodes_added: u64,
    /// Nodes rewritten
    pub nodes_updated: u64,
    /// Nodes removed
    pub nodes_deleted: u64,
    /// Strings that were not known before
    pub strings_added: u64,
}

/// Bitmap of kinds a proposed string may name
pub fn kinds(kinds: &[FileKind]) -> u64 {
    kinds.iter().fold(0, |mask, k| mask | k.bit())
}

/// Pending catalog writes
#[derive(Debug, Default)]
pub struct Batch {
    added: Vec<VfsNode>,
    updated: BTreeMap<u64, VfsNode>,
    deleted: Vec<u64>,
    strings: Vec<ProposedString>,
    objects: Vec<PendingObject>,
    sub_archives: Vec<(u64, GtocArchive)>,
}

impl Batch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a new node
    pub fn node_add(&mut self, node: VfsNode) {
        self.added.push(node);
    }

    /// Queue a rewrite of a stored node; a later rewrite of the same uid wins
    pub fn node_update(&mut self, node: VfsNode) {
        self.updated.insert(node.uid, node);
    }

    /// Queue removal of a stored node
    pub fn node_delete(&mut self, uid: u64) {
        self.deleted.push(uid);
    }

    /// Queue a string observation with no kind constraint
    pub fn propose(&mut self, string: &[u8], node: Option<u64>) {
        self.propose_ref(string, node, StringRef::default());
    }

    /// Queue a string that may only name nodes of the given kinds
    pub fn propose_kinds(&mut self, string: &[u8], node: Option<u64>, possible: &[FileKind]) {
        self.propose_ref(
            string,
            node,
            StringRef {
                possible_kinds: kinds(possible),
                ..StringRef::default()
            },
        );
    }

    /// Queue a string observation
    ///
    /// Strings that are not UTF-8 are dropped. Backslashes become forward
    /// slashes. Lists separated by `,` or `|` also propose each element.
    pub fn propose_ref(&mut self, string: &[u8], node: Option<u64>, reference: StringRef) {
        let Ok(text) = std::str::from_utf8(string) else {
            trace!("dropped non UTF-8 string {}", hex::encode(string));
            return;
        };
        let text = text.replace("\\\\", "/").replace('\\', "/");
        if text.is_empty() {
            return;
        }

        for part in text.split([',', '|']).map(str::trim) {
            if !part.is_empty() && part != text {
                self.strings.push(ProposedString {
                    string: part.as_bytes().to_vec(),
                    node,
                    reference: StringRef {
                        is_field_name: false,
                        ..reference
                    },
                });
            }
        }
        self.strings.push(ProposedString {
            string: text.into_bytes(),
            node,
            reference,
        });
    }

    /// Queue a property-container object
    pub fn object_add(&mut self, object: PendingObject) {
        self.objects.push(object);
    }

    /// Queue a sub-archive definition read from node `src_uid`
    pub fn sub_archive_add(&mut self, src_uid: u64, archive: GtocArchive) {
        self.sub_archives.push((src_uid, archive));
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.strings.is_empty()
            && self.objects.is_empty()
            && self.sub_archives.is_empty()
    }

    /// Commit everything queued in one transaction and empty the batch
    ///
    /// Deletes run first, then rewrites, then new nodes, so children queued
    /// in the same pass as their parent's rewrite see the parent stored.
    pub fn flush(&mut self, catalog: &Catalog) -> Result<FlushStats> {
        if self.is_empty() {
            return Ok(FlushStats::default());
        }
        let mut stats = FlushStats::default();
        let mut batch = std::mem::take(self);
        catalog.write(|w| {
            for uid in &batch.deleted {
                if w.node_delete(*uid)? {
                    stats.nodes_deleted += 1;
                }
            }
            for node in batch.updated.values() {
                w.node_update(node)?;
                stats.nodes_updated += 1;
            }
            for node in &mut batch.added {
                w.node_add(node)?;
                stats.nodes_added += 1;
            }
            for proposed in &batch.strings {
                if w.string_propose(proposed)? {
                    stats.strings_added += 1;
                }
            }
            for object in &batch.objects {
                w.object_add(object)?;
            }
            for (src_uid, archive) in &batch.sub_archives {
                w.sub_archive_add(*src_uid, archive)?;
            }
            Ok(())
        })?;
        trace!(
            "flushed {} added, {} updated, {} deleted, {} new strings",
            stats.nodes_added, stats.nodes_updated, stats.nodes_deleted, stats.strings_added
        );
        Ok(stats)
    }
}
