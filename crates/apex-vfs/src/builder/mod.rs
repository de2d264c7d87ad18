//! Mod builder
//!
//! Files placed under the project's `mod/` directory replace the catalog
//! entries with the same virtual path. Every container between a replaced
//! file and the top-level archive it lives in is rebuilt into `build/`,
//! innermost first, so the output tree can be overlaid on the installation.
//!
//! Besides plain replacements the mod tree may hold:
//!
//! - `<v_path>.DECA.FILE_LIST.txt`: a manifest rewriting the entry list of
//!   the sub-archive at `<v_path>` (see [`parse_manifest_str`])
//! - `<v_path>.dds` next to a compiled texture `<v_path>`: an edited texture
//!   handed to a [`TextureLayout`] helper for re-encoding

mod manifest;

pub use manifest::{MANIFEST_SUFFIX, ManifestCommand, parse_manifest, parse_manifest_str};

use crate::node::VfsNode;
use crate::project::Project;
use crate::{Result, VfsError};
use apex_formats::{CompressionType, FileKind};
use apex_formats::aaf::{AafHeader, DEFAULT_SECTION_MAX, compress_aaf};
use apex_formats::sarc::{SarcEntry, SarcFile};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Suffix of an edited texture next to its compiled form
const TEXTURE_SOURCE_SUFFIX: &str = ".dds";

/// Re-encodes edited textures into the engine's compiled layout
///
/// Texture compression is outside this crate; tools that can encode the
/// block formats plug in here.
pub trait TextureLayout: Send + Sync {
    /// Encode `source` for the compiled texture `node`
    ///
    /// Writes the compiled file, plus any high-resolution companions, below
    /// `build_dir` and returns each written file with its virtual path.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or encoded.
    fn import(
        &self,
        project: &Project,
        node: &VfsNode,
        source: &Path,
        build_dir: &Path,
    ) -> Result<Vec<(Vec<u8>, PathBuf)>>;
}

/// What a file in the mod tree contributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFile {
    /// Bytes replacing the entry as-is
    Plain(PathBuf),
    /// Edited texture for a compiled texture entry
    Texture(PathBuf),
    /// Entry list rewrite for a sub-archive
    Manifest(PathBuf),
}

/// Map every usable file under `dir` to the virtual path it targets
///
/// Tool bookkeeping files, recognisable by `DECA` in the name or a
/// `.deca_sha1sum` extension, are skipped.
///
/// # Errors
///
/// Returns an error if the directory cannot be walked.
pub fn scan_sources(dir: &Path) -> Result<BTreeMap<Vec<u8>, SourceFile>> {
    let mut sources = BTreeMap::new();
    if !dir.exists() {
        return Ok(sources);
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(dir).map_err(|e| VfsError::BuildError(e.to_string()))?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let name = entry.file_name().to_string_lossy();

        let (v_path, source) = if let Some(target) = rel.strip_suffix(MANIFEST_SUFFIX) {
            (target.to_owned(), SourceFile::Manifest(path.to_path_buf()))
        } else if name.contains("DECA") || rel.ends_with(".deca_sha1sum") {
            debug!("Skipping tool file {rel}");
            continue;
        } else if let Some(target) = rel
            .strip_suffix(TEXTURE_SOURCE_SUFFIX)
            .filter(|t| t.ends_with(".ddsc"))
        {
            (target.to_owned(), SourceFile::Texture(path.to_path_buf()))
        } else {
            (rel, SourceFile::Plain(path.to_path_buf()))
        };

        if let Some(previous) = sources.insert(v_path.clone().into_bytes(), source) {
            warn!("Mod file for {v_path} shadows {previous:?}");
        }
    }
    Ok(sources)
}

/// Files produced by a build
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Virtual path of every written file with its location under `build/`
    pub outputs: BTreeMap<Vec<u8>, PathBuf>,
    /// Containers repacked
    pub containers_rebuilt: usize,
    /// Replacements copied or encoded
    pub files_replaced: usize,
}

/// Containment edges between the nodes a build touches
///
/// Edges point from container to contained node; a container is built once
/// every node it points at is built.
#[derive(Default)]
struct BuildGraph {
    graph: DiGraph<VfsNode, ()>,
    index: HashMap<u64, NodeIndex>,
}

impl BuildGraph {
    fn add(&mut self, node: &VfsNode) -> NodeIndex {
        if let Some(&i) = self.index.get(&node.uid) {
            return i;
        }
        let i = self.graph.add_node(node.clone());
        self.index.insert(node.uid, i);
        i
    }

    fn depend(&mut self, container: &VfsNode, child: &VfsNode) {
        let c = self.add(container);
        let n = self.add(child);
        self.graph.update_edge(c, n, ());
    }

    fn has_children(&self, i: NodeIndex, keep: Option<&HashSet<NodeIndex>>) -> bool {
        self.graph
            .neighbors_directed(i, Direction::Outgoing)
            .any(|c| keep.is_none_or(|k| k.contains(&c)))
    }

    /// Nodes in build order, each with whether it is a container to repack
    ///
    /// Nodes outside `keep` are neither built nor waited on.
    fn order(&self, keep: Option<&HashSet<NodeIndex>>) -> Result<Vec<(VfsNode, bool)>> {
        let wanted: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|i| keep.is_none_or(|k| k.contains(i)))
            .collect();
        let mut done: HashSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|i| keep.is_some_and(|k| !k.contains(i)))
            .collect();
        let mut order = Vec::with_capacity(wanted.len());

        while order.len() < wanted.len() {
            let ready: Vec<NodeIndex> = wanted
                .iter()
                .copied()
                .filter(|i| !done.contains(i))
                .filter(|&i| {
                    self.graph
                        .neighbors_directed(i, Direction::Outgoing)
                        .all(|c| done.contains(&c))
                })
                .collect();
            if ready.is_empty() {
                let stuck: Vec<String> = wanted
                    .iter()
                    .filter(|&i| !done.contains(i))
                    .map(|&i| self.graph[i].to_string())
                    .collect();
                return Err(VfsError::BuildError(format!(
                    "build failed: infinite loop, unresolved: {}",
                    stuck.join("; ")
                )));
            }
            for i in ready {
                done.insert(i);
                order.push((self.graph[i].clone(), self.has_children(i, keep)));
            }
        }
        Ok(order)
    }
}

#[derive(Default)]
struct BuildState {
    completed: BTreeMap<Vec<u8>, PathBuf>,
    written: BTreeSet<PathBuf>,
    containers: usize,
    replaced: usize,
}

/// Packs a mod tree into rebuilt archives
pub struct Builder<'p> {
    project: &'p Project,
    source_dir: PathBuf,
    build_dir: PathBuf,
    subset: Option<BTreeSet<u64>>,
    symlink_changed_file: bool,
    overwrite: bool,
    texture_layout: Option<Arc<dyn TextureLayout>>,
}

impl std::fmt::Debug for Builder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("source_dir", &self.source_dir)
            .field("build_dir", &self.build_dir)
            .field("subset", &self.subset.as_ref().map(BTreeSet::len))
            .field("symlink_changed_file", &self.symlink_changed_file)
            .field("overwrite", &self.overwrite)
            .field("texture_layout", &self.texture_layout.is_some())
            .finish_non_exhaustive()
    }
}

impl<'p> Builder<'p> {
    /// Builder reading `mod/` and writing `build/` of `project`
    pub fn new(project: &'p Project) -> Self {
        Self {
            project,
            source_dir: project.mod_dir(),
            build_dir: project.build_dir(),
            subset: None,
            symlink_changed_file: false,
            overwrite: false,
            texture_layout: None,
        }
    }

    #[must_use]
    pub fn with_source_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.source_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_build_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.build_dir = dir.into();
        self
    }

    /// Only build the given nodes and the containers above them
    ///
    /// A node also selects every other node with its virtual path.
    #[must_use]
    pub fn with_subset<I: IntoIterator<Item = u64>>(mut self, uids: I) -> Self {
        self.subset = Some(uids.into_iter().collect());
        self
    }

    /// Write entries without a replacement as symlinks
    ///
    /// Rebuilt sub-archives then carry only the replaced bodies; the engine
    /// resolves the rest by path. Note the direction: the replaced entries
    /// are the ones kept inline, everything untouched becomes a symlink.
    #[must_use]
    pub const fn with_symlink_changed_file(mut self, enable: bool) -> Self {
        self.symlink_changed_file = enable;
        self
    }

    /// Replace files left in `build/` by an earlier run
    #[must_use]
    pub const fn with_overwrite(mut self, enable: bool) -> Self {
        self.overwrite = enable;
        self
    }

    #[must_use]
    pub fn with_texture_layout(mut self, layout: Arc<dyn TextureLayout>) -> Self {
        self.texture_layout = Some(layout);
        self
    }

    /// Run the build
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::BuildError`] when a container on the way up from a
    /// replaced file cannot be rebuilt, when the containment graph has a
    /// cycle, or when a manifest is malformed. Returns
    /// [`VfsError::FileExists`] when an output exists and overwriting is off.
    pub fn build(&self) -> Result<BuildReport> {
        let sources = scan_sources(&self.source_dir)?;
        info!(
            "Building {} mod files from {} into {}",
            sources.len(),
            self.source_dir.display(),
            self.build_dir.display()
        );

        let graph = self.dependency_graph(&sources)?;
        let keep = self.subset_filter(&graph)?;
        let order = graph.order(keep.as_ref())?;
        debug!("Build order has {} nodes", order.len());

        let mut state = BuildState::default();
        for (node, is_container) in order {
            let source = node.v_path.as_ref().and_then(|p| sources.get(p));
            self.build_node(&node, is_container, source, &mut state)?;
        }

        info!(
            "Build finished: {} containers rebuilt, {} files replaced",
            state.containers, state.replaced
        );
        Ok(BuildReport {
            outputs: state.completed,
            containers_rebuilt: state.containers,
            files_replaced: state.replaced,
        })
    }

    fn dependency_graph(&self, sources: &BTreeMap<Vec<u8>, SourceFile>) -> Result<BuildGraph> {
        let catalog = self.project.catalog();
        let mut graph = BuildGraph::default();

        for v_path in sources.keys() {
            let nodes: Vec<VfsNode> = catalog
                .nodes_where_v_path(v_path)?
                .into_iter()
                .filter(|n| !n.is_symlink())
                .collect();
            if nodes.is_empty() {
                warn!(
                    "Mod file {} matches no catalog entry",
                    String::from_utf8_lossy(v_path)
                );
                continue;
            }

            for node in nodes {
                graph.add(&node);
                let mut child = node;
                while let Some(parent_uid) = child.parent {
                    let mut parent = catalog.node_required(parent_uid)?;
                    if parent.file_kind == Some(FileKind::GdcBody)
                        && let Some(outer) = parent.parent
                    {
                        parent = catalog.node_required(outer)?;
                    }
                    match parent.file_kind {
                        Some(FileKind::Arc | FileKind::Tab | FileKind::Exe) => break,
                        None => {
                            return Err(VfsError::BuildError(format!(
                                "missing v_path for uid {} hash {:?} when packing {}",
                                parent.uid,
                                parent.v_hash,
                                String::from_utf8_lossy(v_path)
                            )));
                        }
                        Some(_) => {}
                    }
                    graph.depend(&parent, &child);
                    child = parent;
                }
            }
        }
        Ok(graph)
    }

    /// Graph nodes selected by the subset with every container above them
    fn subset_filter(&self, graph: &BuildGraph) -> Result<Option<HashSet<NodeIndex>>> {
        let Some(subset) = &self.subset else {
            return Ok(None);
        };
        let catalog = self.project.catalog();
        let mut v_paths = BTreeSet::new();
        for &uid in subset {
            if let Some(v_path) = catalog.node_where_uid(uid)?.and_then(|n| n.v_path) {
                v_paths.insert(v_path);
            }
        }

        let reversed = Reversed(&graph.graph);
        let mut keep = HashSet::new();
        for start in graph.graph.node_indices() {
            let node = &graph.graph[start];
            let selected = subset.contains(&node.uid)
                || node.v_path.as_ref().is_some_and(|p| v_paths.contains(p));
            if !selected || keep.contains(&start) {
                continue;
            }
            let mut dfs = Dfs::new(reversed, start);
            while let Some(i) = dfs.next(reversed) {
                keep.insert(i);
            }
        }
        debug!("Subset keeps {} of {} nodes", keep.len(), graph.graph.node_count());
        Ok(Some(keep))
    }

    fn build_node(
        &self,
        node: &VfsNode,
        is_container: bool,
        source: Option<&SourceFile>,
        state: &mut BuildState,
    ) -> Result<()> {
        match (node.file_kind, source) {
            (Some(FileKind::Sarc), None | Some(SourceFile::Manifest(_)))
                if is_container || source.is_some() =>
            {
                let manifest = match source {
                    Some(SourceFile::Manifest(path)) => Some(path.as_path()),
                    _ => None,
                };
                self.build_sarc(node, manifest, state)
            }
            (Some(FileKind::Sarc), Some(other)) if is_container => Err(VfsError::BuildError(
                format!("unhandled source {other:?} for rebuilt archive {node}"),
            )),
            (Some(FileKind::Aaf), _) if is_container => self.build_aaf(node, state),
            (kind, _) if is_container => Err(VfsError::BuildError(format!(
                "cannot rebuild {} container {node}",
                kind.map_or("unknown", FileKind::as_str)
            ))),
            (_, Some(SourceFile::Plain(path))) => self.copy_plain(node, path, state),
            (_, Some(SourceFile::Texture(path))) => self.import_texture(node, path, state),
            (_, Some(SourceFile::Manifest(path))) => Err(VfsError::BuildError(format!(
                "manifest {} targets {node}, which is not a sub-archive",
                path.display()
            ))),
            (_, None) => Ok(()),
        }
    }

    /// Location under the build directory for `v_path`
    fn output_path(&self, v_path: &[u8]) -> Result<PathBuf> {
        let text = std::str::from_utf8(v_path).map_err(|_| {
            VfsError::BuildError(format!("v_path is not UTF-8: {}", hex::encode(v_path)))
        })?;
        let mut out = self.build_dir.clone();
        for part in text.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    return Err(VfsError::BuildError(format!(
                        "v_path leaves the build directory: {text}"
                    )));
                }
                _ => out.push(part),
            }
        }
        Ok(out)
    }

    /// Reserve `path` for writing in this run
    fn claim(&self, path: &Path, state: &mut BuildState) -> Result<()> {
        if state.written.contains(path) {
            return Ok(());
        }
        if path.exists() && !self.overwrite {
            return Err(VfsError::FileExists(path.display().to_string()));
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        state.written.insert(path.to_path_buf());
        Ok(())
    }

    fn copy_plain(&self, node: &VfsNode, source: &Path, state: &mut BuildState) -> Result<()> {
        let v_path = require_v_path(node)?;
        let out = self.output_path(v_path)?;
        if out != source {
            self.claim(&out, state)?;
            fs::copy(source, &out)?;
        }
        debug!("COPY {} -> {}", source.display(), out.display());
        state.completed.insert(v_path.to_vec(), out);
        state.replaced += 1;
        Ok(())
    }

    fn import_texture(&self, node: &VfsNode, source: &Path, state: &mut BuildState) -> Result<()> {
        let layout = self.texture_layout.as_ref().ok_or_else(|| {
            VfsError::BuildError(format!(
                "no texture layout helper for {}",
                source.display()
            ))
        })?;
        let files = layout.import(self.project, node, source, &self.build_dir)?;
        debug!("TEXTURE {} -> {} files", source.display(), files.len());
        for (v_path, file) in files {
            state.written.insert(file.clone());
            state.completed.insert(v_path, file);
        }
        state.replaced += 1;
        Ok(())
    }

    fn apply_manifest(&self, sarc: &mut SarcFile, manifest: &Path) -> Result<()> {
        let catalog = self.project.catalog();
        for command in parse_manifest(manifest)? {
            let (v_path, symlink) = match command {
                ManifestCommand::Clear => {
                    sarc.entries.clear();
                    continue;
                }
                ManifestCommand::Add(p) => (p, false),
                ManifestCommand::Symlink(p) => (p, true),
            };
            let shown = String::from_utf8_lossy(&v_path).into_owned();
            if sarc.entries.iter().any(|e| e.v_path == v_path) {
                warn!("{}: {shown} is listed twice", manifest.display());
            }
            let source = match self.project.node_where_v_path(&v_path) {
                Ok(node) => node,
                Err(VfsError::FileMissing(_)) => catalog
                    .nodes_where_v_path(&v_path)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        VfsError::BuildError(format!(
                            "{}: v_path does not exist in catalog: {shown}",
                            manifest.display()
                        ))
                    })?,
                Err(e) => return Err(e),
            };
            let length = packed_len(&source);
            let length = u32::try_from(length).map_err(|_| {
                VfsError::BuildError(format!("{shown}: {length} bytes do not fit an archive entry"))
            })?;
            let index = sarc.entries.len();
            sarc.entries.push(SarcEntry::new(index, &v_path, length, symlink));
        }
        for (i, entry) in sarc.entries.iter_mut().enumerate() {
            entry.index = i;
        }
        Ok(())
    }

    fn build_sarc(
        &self,
        node: &VfsNode,
        manifest: Option<&Path>,
        state: &mut BuildState,
    ) -> Result<()> {
        let v_path = require_v_path(node)?;
        info!("BUILD SARC {}", String::from_utf8_lossy(v_path));

        let mut sarc = SarcFile::read_header(&mut self.project.open_node(node)?)?;
        if let Some(manifest) = manifest {
            self.apply_manifest(&mut sarc, manifest)?;
        }

        for entry in &mut sarc.entries {
            if let Some(file) = state.completed.get(&entry.v_path) {
                let len = fs::metadata(file)?.len();
                entry.length = u32::try_from(len).map_err(|_| {
                    VfsError::BuildError(format!("{}: {len} bytes do not fit an archive entry", file.display()))
                })?;
                debug!("  replaced {}", String::from_utf8_lossy(&entry.v_path));
            } else if self.symlink_changed_file {
                entry.symlink = true;
            }
        }

        let mut originals: HashMap<Vec<u8>, VfsNode> = HashMap::new();
        for child in self.project.catalog().children_of(node.uid)? {
            if child.is_symlink() || child.offset.is_none() {
                continue;
            }
            if let Some(p) = child.v_path.clone() {
                originals.entry(p).or_insert(child);
            }
        }

        let out_path = self.output_path(v_path)?;
        self.claim(&out_path, state)?;
        let mut out = BufWriter::new(File::create(&out_path)?);
        let mut failure = None;
        let written = sarc.write_archive(&mut out, |entry| {
            self.entry_body(entry, &originals, &state.completed)
                .map_err(|e| {
                    let msg = e.to_string();
                    failure = Some(e);
                    apex_formats::FormatError::incorrect(msg)
                })
        });
        if let Some(e) = failure {
            return Err(e);
        }
        let total = written?;
        out.flush()?;

        debug!("Wrote {} ({total} bytes, {} entries)", out_path.display(), sarc.entries.len());
        state.completed.insert(v_path.to_vec(), out_path);
        state.containers += 1;
        Ok(())
    }

    fn entry_body(
        &self,
        entry: &SarcEntry,
        originals: &HashMap<Vec<u8>, VfsNode>,
        completed: &BTreeMap<Vec<u8>, PathBuf>,
    ) -> Result<Vec<u8>> {
        if let Some(file) = completed.get(&entry.v_path) {
            return Ok(fs::read(file)?);
        }
        let node = match originals.get(&entry.v_path) {
            Some(node) => node.clone(),
            None => self.project.node_where_v_path(&entry.v_path)?,
        };
        self.packed_body(&node)
    }

    /// Bytes of `node` as stored in a sub-archive entry
    ///
    /// Archive-level block coding is undone; compressed wrappers stay packed.
    fn packed_body(&self, node: &VfsNode) -> Result<Vec<u8>> {
        if is_block_coded(node) {
            self.project.read_node(node)
        } else {
            self.project.read_raw(node)
        }
    }

    fn build_aaf(&self, node: &VfsNode, state: &mut BuildState) -> Result<()> {
        let v_path = require_v_path(node)?;
        info!("BUILD AAF {}", String::from_utf8_lossy(v_path));
        let inner = state.completed.get(v_path).cloned().ok_or_else(|| {
            VfsError::BuildError(format!("compressed wrapper {node} has no rebuilt body"))
        })?;

        let header = AafHeader::read_from(&mut self.project.open_raw(node)?)?;
        let section_max = if header.section_max == 0 {
            DEFAULT_SECTION_MAX
        } else {
            header.section_max
        };
        let data = fs::read(&inner)?;
        let packed = compress_aaf(&data, section_max)?;

        let out_path = self.output_path(v_path)?;
        self.claim(&out_path, state)?;
        fs::write(&out_path, packed)?;
        state.completed.insert(v_path.to_vec(), out_path);
        state.containers += 1;
        Ok(())
    }
}

fn is_block_coded(node: &VfsNode) -> bool {
    matches!(
        node.flags.compression(),
        Some(
            CompressionType::V4Zlib
                | CompressionType::V4Unknown
                | CompressionType::V4Zstd
                | CompressionType::V4Oo
        )
    )
}

/// Length of `node` once packed by [`Builder::packed_body`]
fn packed_len(node: &VfsNode) -> u64 {
    if is_block_coded(node) {
        node.size_u.or(node.size_c)
    } else {
        node.size_c.or(node.size_u)
    }
    .unwrap_or(0)
}

fn require_v_path(node: &VfsNode) -> Result<&[u8]> {
    node.v_path
        .as_deref()
        .ok_or_else(|| VfsError::BuildError(format!("cannot place unnamed node {node}")))
}
