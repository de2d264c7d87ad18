//! Container expansion
//!
//! Each handler reads one container node and queues a child node per entry.

use super::{GLOBAL_GDC_BODY_PATH, Resolver};
use crate::catalog::{HashQuery, SubArchiveDef};
use crate::node::VfsNode;
use crate::{Result, VfsError};
use apex_formats::FileKind;
use apex_formats::adf::scan_embedded;
use apex_formats::gtoc::GtocFile;
use apex_formats::sarc::SarcFile;
use apex_formats::tab::{TabFile, TabVersion};
use tracing::{debug, trace};

impl Resolver<'_> {
    fn child_of(&self, parent: &VfsNode, v_path: Option<&[u8]>, v_hash: Option<u64>) -> VfsNode {
        let width = self.project.hash_width();
        let mut child = match v_path {
            Some(p) if !p.is_empty() => VfsNode::named(width, p),
            _ => VfsNode::with_hash(width, v_hash),
        };
        child.parent = Some(parent.uid);
        child
    }

    /// Typed structures embedded in the executable
    pub(super) fn expand_exe(&mut self, node: &mut VfsNode) -> Result<bool> {
        let exe = self.project.read_node(node)?;
        let found = scan_embedded(&exe, &mut self.project.types_mut());
        let exe_name = node
            .p_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for (index, (offset, size)) in found.iter().enumerate() {
            let v_path = format!("{exe_name}/{offset:09}.adf");
            let mut child = self.child_of(node, Some(v_path.as_bytes()), None);
            child.file_kind = Some(FileKind::Adf);
            child.index = Some(index as u64);
            child.offset = Some(*offset as u64);
            child.size_c = Some(u64::from(*size));
            child.size_u = Some(u64::from(*size));
            self.batch.node_add(child);
        }
        debug!("{exe_name}: {} embedded typed structures", found.len());
        Ok(true)
    }

    /// A data archive owns its index as a child
    pub(super) fn expand_arc(&mut self, node: &mut VfsNode) -> Result<bool> {
        let Some(arc) = &node.p_path else {
            return Err(VfsError::IncorrectFormat(format!(
                "data archive {node} has no physical path"
            )));
        };
        let mut tab = self.child_of(node, None, None);
        tab.file_kind = Some(FileKind::Tab);
        tab.p_path = Some(arc.with_extension("tab"));
        self.batch.node_add(tab);
        Ok(true)
    }

    /// One child per index entry, positioned in the data archive
    pub(super) fn expand_tab(&mut self, node: &mut VfsNode) -> Result<bool> {
        let version = self.project.config().archive_version;
        let layout = TabVersion::from_archive_version(version)
            .ok_or_else(|| VfsError::Config(format!("unsupported archive version {version}")))?;
        let Some(path) = &node.p_path else {
            return Err(VfsError::IncorrectFormat(format!("index {node} has no physical path")));
        };
        let data = std::fs::read(path)?;
        let tab = TabFile::parse(&data, layout)?;

        let mut skipped = 0usize;
        for (index, entry) in tab.entries.iter().enumerate() {
            if entry.size_c == 0 || entry.size_u == 0 {
                skipped += 1;
                continue;
            }
            let mut child = self.child_of(node, None, Some(entry.hash));
            child.index = Some(index as u64);
            child.offset = Some(u64::from(entry.offset));
            child.size_c = Some(u64::from(entry.size_c));
            child.size_u = Some(u64::from(entry.size_u));
            child.flags.set_compression_code(entry.compression_type);
            child.flags.set_compression_flag(entry.compression_flags);
            child.blocks = tab.entry_blocks(entry)?.unwrap_or_default();
            self.batch.node_add(child);
        }
        debug!(
            "{}: {} entries, {skipped} empty",
            path.display(),
            tab.entries.len()
        );
        Ok(true)
    }

    /// The decompressed body of a wrapper becomes its only child
    pub(super) fn expand_aaf(&mut self, node: &mut VfsNode) -> Result<bool> {
        let mut child = self.child_of(node, node.v_path.as_deref(), node.v_hash);
        child.ext_hash = node.ext_hash;
        child.index = Some(0);
        child.offset = Some(0);
        child.size_c = node.size_u;
        child.size_u = node.size_u;
        self.batch.node_add(child);
        Ok(true)
    }

    /// One child per sub-archive entry; zero offsets are symlinks
    pub(super) fn expand_sarc(&mut self, node: &mut VfsNode) -> Result<bool> {
        let mut reader = self.project.open_node(node)?;
        let sarc = SarcFile::read_header(&mut reader)?;
        for entry in &sarc.entries {
            let mut child =
                self.child_of(node, Some(&entry.v_path), Some(u64::from(entry.v_hash)));
            if let Some(ext) = entry.ext_hash {
                child.ext_hash = Some(ext);
            }
            child.index = Some(entry.index as u64);
            child.offset = (!entry.symlink).then_some(u64::from(entry.offset));
            child.size_c = Some(u64::from(entry.length));
            child.size_u = Some(u64::from(entry.length));
            self.batch.node_add(child);
            self.batch.propose(&entry.v_path, Some(node.uid));
        }
        trace!("SARC v{} {node}: {} entries", sarc.version, sarc.entries.len());
        Ok(true)
    }

    /// Persist sub-archive definitions and propose every listed path
    pub(super) fn expand_gtoc(&mut self, node: &mut VfsNode) -> Result<bool> {
        let data = self.project.read_node(node)?;
        let gtoc = GtocFile::parse(&data)?;
        for path in &gtoc.paths {
            self.batch.propose(path, Some(node.uid));
        }
        debug!(
            "GTOC {node}: {} archives, {} paths",
            gtoc.archives.len(),
            gtoc.paths.len()
        );
        for archive in gtoc.archives {
            self.batch.sub_archive_add(node.uid, archive);
        }
        Ok(true)
    }

    /// Sub-archive definitions matching a node's path hash and magic
    fn garc_defs(&self, node: &VfsNode) -> Result<Vec<SubArchiveDef>> {
        let catalog = self.project.catalog();
        let path_hashes: Vec<u32> = match (&node.v_path, node.v_hash) {
            (Some(p), _) => vec![apex_hash::hash32(p)],
            (None, Some(h)) => catalog
                .hash_string_match(HashQuery::for_width(self.project.hash_width(), h))?
                .into_iter()
                .map(|s| s.hashes.h32)
                .collect(),
            (None, None) => Vec::new(),
        };
        let mut defs = Vec::new();
        for hash in path_hashes {
            defs.extend(
                catalog
                    .sub_archive_defs_where_path_hash(hash)?
                    .into_iter()
                    .filter(|d| Some(d.archive_magic) == node.magic),
            );
        }
        defs.sort_by_key(|d| d.rowid);
        defs.dedup_by_key(|d| d.rowid);
        Ok(defs)
    }

    pub(super) fn is_garc(&self, node: &VfsNode) -> Result<bool> {
        Ok(self.garc_defs(node)?.len() == 1)
    }

    /// One child per file the sub-index lists for this archive
    pub(super) fn expand_garc(&mut self, node: &mut VfsNode) -> Result<bool> {
        let defs = self.garc_defs(node)?;
        let def = match defs.as_slice() {
            [def] => def,
            [] => {
                trace!("GARC {node}: no sub-archive definition");
                return Ok(false);
            }
            many => {
                debug!("GARC {node}: {} candidate definitions", many.len());
                return Ok(false);
            }
        };

        let catalog = self.project.catalog();
        for file in catalog.sub_archive_files(def.rowid)? {
            let path = match file.path_string {
                Some(rowid) => catalog.string_where_rowid(rowid)?.map(|s| s.string),
                None => None,
            };
            let mut child = self.child_of(node, path.as_deref(), Some(u64::from(file.path_hash)));
            child.ext_hash = Some(file.ext_hash);
            child.index = Some(u64::from(file.index));
            child.offset = Some(file.offset);
            child.size_c = Some(file.file_size);
            child.size_u = Some(file.file_size);
            self.batch.node_add(child);
        }
        node.file_kind = Some(FileKind::Garc);
        Ok(true)
    }

    /// The directory instance of `gdc/global.gdcc` becomes a body child
    pub(super) fn expand_global_gdcc(&mut self, node: &mut VfsNode) -> Result<bool> {
        let adf = match self.project.read_adf(node) {
            Ok(adf) => adf,
            Err(VfsError::MissingAdfType(t)) => {
                debug!("global gdcc {node}: missing ADF type {t:08x}");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let Some(first) = adf.instances.first() else {
            return Err(VfsError::IncorrectFormat(format!("global gdcc {node} has no instances")));
        };
        let mut body = self.child_of(node, Some(GLOBAL_GDC_BODY_PATH), None);
        body.file_kind = Some(FileKind::GdcBody);
        body.offset = Some(u64::from(first.entry.offset));
        body.size_c = Some(u64::from(first.entry.size));
        body.size_u = Some(u64::from(first.entry.size));
        self.batch.node_add(body);
        Ok(true)
    }

    /// One child per directory entry of the global container directory
    pub(super) fn expand_gdc_body(&mut self, node: &mut VfsNode) -> Result<bool> {
        let parent_uid = node
            .parent
            .ok_or_else(|| VfsError::IncorrectFormat(format!("gdc body {node} has no parent")))?;
        let parent = self.project.catalog().node_required(parent_uid)?;
        let adf = self.project.read_adf(&parent)?;
        let Some(entries) = adf.gdc_entries() else {
            return Err(VfsError::IncorrectFormat(format!(
                "instance 0 of {parent} is not a container directory"
            )));
        };

        for entry in entries {
            let mut child = self.child_of(node, Some(&entry.v_path), Some(u64::from(entry.v_hash)));
            child.index = Some(entry.index as u64);
            child.offset = Some(entry.offset);
            child.size_c = entry.size;
            child.size_u = entry.size;
            if let Some(type_hash) = entry.adf_type_hash {
                child.file_kind = Some(FileKind::AdfBare);
                child.sub_kind = Some(type_hash);
            }
            self.batch.node_add(child);
            self.batch.propose(&entry.v_path, Some(node.uid));
        }
        debug!("gdc body {node}: {} entries", entries.len());
        Ok(true)
    }
}
