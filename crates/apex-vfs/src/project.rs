//! Project handle
//!
//! A project directory holds the configuration, the catalog store, the
//! decompression cache and the mod source and build trees of one game
//! installation. Everything else in the crate hangs off [`Project`].

use crate::catalog::Catalog;
use crate::config::ProjectConfig;
use crate::node::VfsNode;
use crate::resolver::{IngestStats, Resolver};
use crate::{CACHE_DIR, CATALOG_FILE, PROJECT_FILE, Result, VfsError};
use apex_formats::adf::{AdfFile, TypeRegistry};
use apex_formats::{FileKind, NativeLz};
use apex_hash::HashWidth;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// One game installation under study
pub struct Project {
    root: PathBuf,
    config: ProjectConfig,
    width: HashWidth,
    catalog: Arc<Catalog>,
    native_lz: RwLock<Option<Arc<dyn NativeLz>>>,
    types: RwLock<TypeRegistry>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("root", &self.root)
            .field("game_id", &self.config.game_id)
            .field("width", &self.width)
            .field("native_lz", &self.has_native_lz())
            .finish_non_exhaustive()
    }
}

impl Project {
    /// Create a project directory for `config`, or take over an existing one
    ///
    /// The configuration is written to `project.json`, replacing any earlier
    /// one. The catalog is kept.
    pub fn create<P: AsRef<Path>>(root: P, config: ProjectConfig) -> Result<Self> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        config.save(root.join(PROJECT_FILE))?;
        info!("Created project {} at {}", config.game_id, root.display());
        Self::with_config(root, config)
    }

    /// Open an existing project directory
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let path = root.join(PROJECT_FILE);
        if !path.exists() {
            return Err(VfsError::FileMissing(path.display().to_string()));
        }
        let config = ProjectConfig::load(&path)?;
        Self::with_config(root, config)
    }

    fn with_config(root: PathBuf, config: ProjectConfig) -> Result<Self> {
        let width = config.hash_width()?;
        let catalog = Arc::new(Catalog::open(root.join(CATALOG_FILE), width)?);
        let types = catalog.type_registry_load()?;
        debug!(
            "Opened catalog with {} nodes and {} type descriptors",
            catalog.node_count()?,
            types.len()
        );
        Ok(Self {
            root,
            config,
            width,
            catalog,
            native_lz: RwLock::new(None),
            types: RwLock::new(types),
        })
    }

    /// Project directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Project configuration
    pub const fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Catalog store
    pub const fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Width of v_hashes in this project
    pub const fn hash_width(&self) -> HashWidth {
        self.width
    }

    /// Hash `v_path` at the project's width
    pub fn file_hash(&self, v_path: &[u8]) -> u64 {
        self.width.hash(v_path)
    }

    /// Decompression cache root
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    /// Mod source tree
    pub fn mod_dir(&self) -> PathBuf {
        self.root.join("mod")
    }

    /// Mod build output
    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    /// Raw extraction output
    pub fn extracted_dir(&self) -> PathBuf {
        self.root.join("extracted")
    }

    /// Install the decoder for the engine's native LZ codec
    pub fn set_native_lz(&self, codec: Arc<dyn NativeLz>) {
        *self.native_lz.write() = Some(codec);
    }

    /// The installed native LZ decoder
    pub fn native_lz(&self) -> Option<Arc<dyn NativeLz>> {
        self.native_lz.read().clone()
    }

    /// Whether nodes compressed with the native LZ codec can be read
    pub fn has_native_lz(&self) -> bool {
        self.native_lz.read().is_some()
    }

    /// Type descriptors known to the project
    pub fn types(&self) -> RwLockReadGuard<'_, TypeRegistry> {
        self.types.read()
    }

    pub(crate) fn types_mut(&self) -> RwLockWriteGuard<'_, TypeRegistry> {
        self.types.write()
    }

    /// Persist type descriptors learned since the last save
    pub fn save_types(&self) -> Result<usize> {
        let mut types = self.types.write();
        if !types.is_changed() {
            return Ok(0);
        }
        let added = self.catalog.write(|w| w.type_registry_save(&types))?;
        types.clear_changed();
        if added > 0 {
            debug!("Saved {added} type descriptors");
        }
        Ok(added)
    }

    /// Best node for a virtual path
    ///
    /// Nodes with a body are preferred over symlink entries; a path known
    /// only through symlinks is missing.
    pub fn node_where_v_path(&self, v_path: &[u8]) -> Result<VfsNode> {
        self.catalog
            .nodes_where_v_path(v_path)?
            .into_iter()
            .filter(|n| !n.is_symlink() && (n.offset.is_some() || n.p_path.is_some() || n.parent.is_none()))
            .min_by_key(|n| n.uid)
            .ok_or_else(|| VfsError::FileMissing(String::from_utf8_lossy(v_path).into_owned()))
    }

    /// Read the uncompressed bytes of the file at `v_path`
    pub fn read_path(&self, v_path: &[u8]) -> Result<Vec<u8>> {
        let node = self.node_where_v_path(v_path)?;
        self.read_node(&node)
    }

    /// Decode a node of the ADF family
    ///
    /// Descriptors the node carries join the project registry; type hashes
    /// it references without a descriptor are recorded against the node.
    pub fn read_adf(&self, node: &VfsNode) -> Result<AdfFile> {
        let kind = node.file_kind.unwrap_or(FileKind::Adf);
        let adf = if kind == FileKind::AdfBare {
            let parent = node
                .parent
                .ok_or_else(|| VfsError::IncorrectFormat(format!("bare ADF {node} has no parent")))?;
            let buf = self.read_node(&self.catalog.node_required(parent)?)?;
            let types = self.types.read();
            AdfFile::parse_kind(kind, &buf, node.sub_kind, node.offset.unwrap_or(0), &types)
        } else {
            let buf = self.read_node(node)?;
            let types = self.types.read();
            AdfFile::parse_kind(kind, &buf, node.sub_kind, 0, &types)
        };

        let mut types = self.types.write();
        let adf = match adf {
            Ok(adf) => adf,
            Err(apex_formats::FormatError::MissingAdfType(t)) => {
                types.record_missing(t, node.uid);
                return Err(VfsError::MissingAdfType(t));
            }
            Err(e) => return Err(e.into()),
        };
        types.extend(adf.types.iter().cloned());
        for &t in &adf.missing_types {
            types.record_missing(t, node.uid);
        }
        Ok(adf)
    }

    /// Discover, classify and name everything reachable from the installation
    pub fn ingest(&self) -> Result<IngestStats> {
        Resolver::new(self).run()
    }

    /// Empty the catalog, the type registry and the decompression cache
    pub fn reset(&self) -> Result<()> {
        self.catalog.reset()?;
        *self.types.write() = TypeRegistry::new();
        let cache = self.cache_dir();
        if cache.exists() {
            std::fs::remove_dir_all(&cache)?;
        }
        info!("Reset project {}", self.config.game_id);
        Ok(())
    }
}
