//! Classification passes
//!
//! Ingest runs a fixed list of passes over the catalog until none of them
//! makes progress. Each pass picks the nodes its flag has not yet marked,
//! runs a handler on each, and commits the handler output in one
//! transaction. A handler that fails leaves its node unmarked so a later
//! round may retry it with more context.
//!
//! Once the passes settle, strings gathered so far are matched against
//! unnamed nodes by hash. New names can unlock further passes, so the whole
//! cycle repeats until no new strings turn up.

mod batch;
mod containers;
mod harvest;
mod naming;
mod roots;

pub use batch::{Batch, FlushStats, kinds};
pub use harvest::{companion_paths, split_ext};

use crate::node::{ProcessPass, VfsNode};
use crate::project::Project;
use crate::{Result, VfsError};
use apex_formats::FileKind;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Virtual path of the global container directory
pub const GLOBAL_GDCC_PATH: &[u8] = b"gdc/global.gdcc";

/// Virtual path given to the body of the global container directory
pub const GLOBAL_GDC_BODY_PATH: &[u8] = b"gdc/global.gdc.DECA";

/// Summary of one ingest run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Rounds of the pass list
    pub phases: u32,
    /// Nodes created
    pub nodes_added: u64,
    /// Strings not known before
    pub strings_added: u64,
    /// Nodes that received a virtual path
    pub nodes_named: u64,
    /// Handler invocations that failed
    pub failures: u64,
}

/// One entry of the pass list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Pass {
    /// Digest of the uncompressed bytes
    ContentHash,
    /// Magic-based classification
    RawNoName,
    /// Name-based classification
    RawWithName,
    /// Kind handler
    ByType(FileKind),
    /// The global container directory
    GlobalGdcc,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentHash => f.write_str("content hash"),
            Self::RawNoName => f.write_str("raw (no name)"),
            Self::RawWithName => f.write_str("raw (with name)"),
            Self::ByType(kind) => write!(f, "{kind}"),
            Self::GlobalGdcc => f.write_str("global gdcc"),
        }
    }
}

const PASSES: &[Pass] = &[
    Pass::ContentHash,
    Pass::RawNoName,
    Pass::RawWithName,
    Pass::ByType(FileKind::Exe),
    Pass::ByType(FileKind::Arc),
    Pass::ByType(FileKind::Tab),
    Pass::RawNoName,
    Pass::ByType(FileKind::Aaf),
    Pass::ByType(FileKind::Gtoc),
    Pass::ByType(FileKind::Garc),
    Pass::RawNoName,
    Pass::ByType(FileKind::Sarc),
    Pass::GlobalGdcc,
    Pass::ByType(FileKind::GdcBody),
    Pass::RawNoName,
    Pass::ByType(FileKind::Adf),
    Pass::ByType(FileKind::AdfBare),
    Pass::ByType(FileKind::Adf0),
    Pass::ByType(FileKind::Adf5),
    Pass::ByType(FileKind::Rtpc),
    Pass::ByType(FileKind::Txt),
    Pass::ByType(FileKind::Symlink),
];

impl Pass {
    /// Flag recording a successful visit
    const fn flag(self) -> Option<ProcessPass> {
        match self {
            Self::ContentHash => None,
            Self::RawNoName => Some(ProcessPass::RawNoName),
            Self::RawWithName => Some(ProcessPass::RawWithName),
            Self::ByType(_) => Some(ProcessPass::ByType),
            Self::GlobalGdcc => Some(ProcessPass::Specific),
        }
    }

    /// Whether nodes sharing a v_hash are handled once for the group
    const fn per_v_hash(self) -> bool {
        matches!(self, Self::ByType(_) | Self::GlobalGdcc)
    }

    fn wants(self, node: &VfsNode, gdcc_hash: u64) -> bool {
        match self {
            Self::ContentHash => {
                node.content_hash.is_none()
                    && node.parent.is_some()
                    && node.offset.is_some()
                    && node.size_u.or(node.size_c).is_some()
            }
            Self::RawNoName => node.file_kind.is_none(),
            Self::RawWithName => {
                node.v_path.is_some() && matches!(node.file_kind, None | Some(FileKind::Unknown))
            }
            Self::ByType(kind) => node.file_kind == Some(kind),
            Self::GlobalGdcc => {
                node.v_hash == Some(gdcc_hash) && node.file_kind.is_some_and(FileKind::is_adf_family)
            }
        }
    }

    fn is_done(self, node: &VfsNode) -> bool {
        self.flag().is_some_and(|f| node.flags.is_processed(f))
    }
}

/// Drives the classification passes of one project
pub struct Resolver<'p> {
    project: &'p Project,
    batch: Batch,
    stats: IngestStats,
    names_pending: bool,
    deferred: HashSet<(u64, Pass)>,
}

impl<'p> Resolver<'p> {
    /// Create a resolver over `project`
    pub fn new(project: &'p Project) -> Self {
        Self {
            project,
            batch: Batch::new(),
            stats: IngestStats::default(),
            names_pending: true,
            deferred: HashSet::new(),
        }
    }

    /// Run every pass to a fixed point
    ///
    /// A fresh catalog is first seeded with the installation's root files.
    ///
    /// # Errors
    ///
    /// Only catalog failures abort the run. Errors from individual nodes
    /// are logged and counted in [`IngestStats::failures`].
    pub fn run(mut self) -> Result<IngestStats> {
        let catalog = self.project.catalog();
        info!(
            "Ingest of {} starting with {} nodes",
            self.project.config().game_id,
            catalog.node_count()?
        );

        if catalog.node_count()? == 0 {
            self.find_initial_files()?;
        }
        self.remove_temporary_nodes()?;
        self.propose_guesses()?;

        loop {
            loop {
                self.stats.phases += 1;
                self.deferred.clear();
                let mut progress = false;
                for &pass in PASSES {
                    progress |= self.run_pass(pass)?;
                }
                if !progress {
                    break;
                }
            }

            if !self.names_pending {
                break;
            }
            self.names_pending = false;
            self.find_vpath_by_assoc()?;
            self.name_by_hash()?;
        }

        self.update_used_depths()?;
        self.project.save_types()?;
        info!(
            "Ingest finished after {} phases: {} nodes added, {} named, {} new strings, {} failures",
            self.stats.phases,
            self.stats.nodes_added,
            self.stats.nodes_named,
            self.stats.strings_added,
            self.stats.failures
        );
        Ok(self.stats)
    }

    fn candidates(&self, pass: Pass) -> Result<Vec<VfsNode>> {
        let gdcc_hash = self.project.file_hash(GLOBAL_GDCC_PATH);
        let nodes = self
            .project
            .catalog()
            .nodes_filtered(|n| pass.wants(n, gdcc_hash))?;

        if !pass.per_v_hash() {
            return Ok(nodes
                .into_iter()
                .filter(|n| !pass.is_done(n) && !self.deferred.contains(&(n.uid, pass)))
                .collect());
        }

        let done: BTreeSet<u64> = nodes
            .iter()
            .filter(|n| pass.is_done(n))
            .filter_map(|n| n.v_hash)
            .collect();
        let mut taken = BTreeSet::new();
        Ok(nodes
            .into_iter()
            .filter(|n| !pass.is_done(n) && !self.deferred.contains(&(n.uid, pass)))
            .filter(|n| match n.v_hash {
                None => true,
                Some(h) => !done.contains(&h) && taken.insert(h),
            })
            .collect())
    }

    fn handle(&mut self, pass: Pass, node: &mut VfsNode) -> Result<bool> {
        match pass {
            Pass::ContentHash => self.content_hash(node),
            Pass::RawNoName => self.classify_raw(node),
            Pass::RawWithName => self.classify_by_path(node),
            Pass::GlobalGdcc => self.expand_global_gdcc(node),
            Pass::ByType(kind) => match kind {
                FileKind::Exe => self.expand_exe(node),
                FileKind::Arc => self.expand_arc(node),
                FileKind::Tab => self.expand_tab(node),
                FileKind::Aaf => self.expand_aaf(node),
                FileKind::Gtoc => self.expand_gtoc(node),
                FileKind::Garc => self.expand_garc(node),
                FileKind::Sarc => self.expand_sarc(node),
                FileKind::GdcBody => self.expand_gdc_body(node),
                FileKind::Adf | FileKind::AdfBare | FileKind::Adf0 | FileKind::Adf5 => {
                    self.harvest_adf(node)
                }
                FileKind::Rtpc => self.harvest_rtpc(node),
                FileKind::Txt => self.harvest_txt(node),
                FileKind::Symlink => self.harvest_symlink(node),
                _ => Ok(false),
            },
        }
    }

    /// Returns whether any node was handled
    fn run_pass(&mut self, pass: Pass) -> Result<bool> {
        let candidates = self.candidates(pass)?;
        if candidates.is_empty() {
            return Ok(false);
        }
        debug!("Pass {pass}: {} candidates", candidates.len());

        let mut handled = 0u64;
        for mut node in candidates {
            match self.handle(pass, &mut node) {
                Ok(true) => {
                    if let Some(flag) = pass.flag() {
                        node.flags.set_processed(flag);
                    }
                    self.batch.node_update(node);
                    handled += 1;
                }
                Ok(false) => {
                    self.deferred.insert((node.uid, pass));
                }
                Err(e @ VfsError::Catalog(_)) => return Err(e),
                Err(e) => {
                    warn!("Pass {pass} skipped node {node}: {e}");
                    self.deferred.insert((node.uid, pass));
                    self.stats.failures += 1;
                }
            }
        }

        let flushed = self.flush()?;
        if handled > 0 {
            info!(
                "Pass {pass}: {handled} handled, {} nodes added",
                flushed.nodes_added
            );
        }
        Ok(handled > 0)
    }

    /// Commit the batch and any new type descriptors
    fn flush(&mut self) -> Result<FlushStats> {
        let flushed = self.batch.flush(self.project.catalog())?;
        self.project.save_types()?;
        self.stats.nodes_added += flushed.nodes_added;
        self.stats.strings_added += flushed.strings_added;
        if flushed.strings_added > 0 || flushed.nodes_added > 0 {
            self.names_pending = true;
        }
        Ok(flushed)
    }
}

impl Project {
    /// Register a loose file as a root node
    ///
    /// Its virtual path is `__EXTERNAL_FILES__/` followed by the file's path
    /// with separators normalised. Temporary nodes are dropped at the start
    /// of the next ingest.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::FileMissing`] if `path` does not exist.
    pub fn external_file_add<P: AsRef<std::path::Path>>(
        &self,
        path: P,
        temporary: bool,
    ) -> Result<VfsNode> {
        Resolver::new(self).external_file_add(path.as_ref(), temporary)
    }

    /// Delete every node registered as temporary, with its descendants
    pub fn remove_temporary_nodes(&self) -> Result<u64> {
        Resolver::new(self).remove_temporary_nodes()
    }

    /// Propose every line of a string list file
    ///
    /// Lines name no node; `used_at_runtime` marks the strings as observed
    /// in live engine file access. Returns the number of new strings.
    pub fn strings_add_from_file<P: AsRef<std::path::Path>>(
        &self,
        path: P,
        used_at_runtime: bool,
    ) -> Result<u64> {
        Resolver::new(self).strings_add_from_file(path.as_ref(), used_at_runtime)
    }

    /// Recompute runtime depths from the nodes at depth zero
    pub fn update_used_depths(&self) -> Result<u64> {
        Resolver::new(self).update_used_depths()
    }
}
