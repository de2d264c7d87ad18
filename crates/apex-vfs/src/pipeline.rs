//! Byte streams for nodes
//!
//! Raw nodes are windows on their parent's stream. Compressed nodes are
//! decoded once into the project's `__CACHE__` directory and read back from
//! there; a cache file, once written, is trusted on later requests.

use crate::node::VfsNode;
use crate::project::Project;
use crate::{Result, VfsError};
use apex_formats::aaf::extract_aaf;
use apex_formats::codec::decode_block;
use apex_formats::stream::{ReadSeek, SubsetFile};
use apex_formats::tab::EntryBlock;
use apex_formats::{CompressionType, FileKind};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Readable, seekable stream over a node's bytes
pub type NodeReader = Box<dyn ReadSeek>;

fn open_file(path: &Path) -> Result<NodeReader> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => VfsError::FileMissing(path.display().to_string()),
        _ => e.into(),
    })?;
    Ok(Box::new(BufReader::new(file)))
}

fn is_tab_path(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("tab"))
}

impl Project {
    /// Open the uncompressed bytes of a node
    pub fn open_node(&self, node: &VfsNode) -> Result<NodeReader> {
        match node.file_kind {
            Some(FileKind::Arc) => {
                if let Some(p) = &node.p_path {
                    return open_file(p);
                }
            }
            Some(FileKind::Tab) => {
                if let Some(parent) = node.parent {
                    return self.open_node(&self.catalog().node_required(parent)?);
                }
            }
            Some(FileKind::Symlink) => return self.open_symlink(node),
            _ => {}
        }

        let code = node.flags.compression_code();
        match CompressionType::from_code(code) {
            Some(CompressionType::None) => {}
            Some(
                ct @ (CompressionType::V3Zlib
                | CompressionType::V4Zlib
                | CompressionType::V4Zstd
                | CompressionType::V4Oo),
            ) => {
                return open_file(&self.materialise(node, ct)?);
            }
            _ => return Err(VfsError::UnknownCompressionType(code)),
        }

        if node.file_kind == Some(FileKind::AdfBare)
            && let Some(parent) = node.parent
        {
            return self.open_node(&self.catalog().node_required(parent)?);
        }

        if let Some(parent) = node.parent {
            let Some(offset) = node.offset else {
                return self.open_symlink(node);
            };
            let parent = self.catalog().node_required(parent)?;
            let inner = self.open_node(&parent)?;
            let len = node.size_u.or(node.size_c).unwrap_or(0);
            return Ok(Box::new(SubsetFile::new(inner, offset, len)?));
        }

        match &node.p_path {
            Some(p) => open_file(p),
            None => Err(VfsError::FileMissing(format!("node {node} has no backing data"))),
        }
    }

    /// Open a node's stored bytes, before any decompression
    pub fn open_raw(&self, node: &VfsNode) -> Result<NodeReader> {
        match (node.parent, node.offset) {
            (Some(parent), Some(offset)) => {
                let parent = self.catalog().node_required(parent)?;
                let inner = self.open_node(&parent)?;
                let len = node.size_c.or(node.size_u).unwrap_or(0);
                Ok(Box::new(SubsetFile::new(inner, offset, len)?))
            }
            _ => match &node.p_path {
                Some(p) => open_file(p),
                None => self.open_node(node),
            },
        }
    }

    /// Read the whole uncompressed body of a node
    pub fn read_node(&self, node: &VfsNode) -> Result<Vec<u8>> {
        let mut reader = self.open_node(node)?;
        let mut out = Vec::with_capacity(usize::try_from(node.size_u.unwrap_or(0)).unwrap_or(0));
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Read the whole stored body of a node
    pub fn read_raw(&self, node: &VfsNode) -> Result<Vec<u8>> {
        let mut reader = self.open_raw(node)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    fn open_symlink(&self, node: &VfsNode) -> Result<NodeReader> {
        let Some(v_path) = &node.v_path else {
            return Err(VfsError::FileMissing(format!(
                "symlink {} has no path",
                node.v_hash_to_str()
            )));
        };
        let target = self.node_where_v_path(v_path)?;
        trace!("symlink {} -> node {}", node.uid, target.uid);
        self.open_node(&target)
    }

    /// Deterministic cache location of a node's decompressed bytes
    ///
    /// Ancestors contribute their physical path relative to the game
    /// directory, or a directory named by their hex v_hash when they have
    /// none. Index archives are skipped. Physical ancestors are not reduced
    /// to their basename: `game0.arc` from two archive directories must map
    /// to two cache trees.
    pub fn cache_path(&self, node: &VfsNode) -> Result<PathBuf> {
        let mut parts = vec![cache_name(node)];
        for ancestor in self.catalog().ancestors(node)? {
            match &ancestor.p_path {
                Some(p) if is_tab_path(p) => {}
                Some(p) => {
                    let rel = p
                        .strip_prefix(&self.config().game_dir)
                        .map(Path::to_path_buf)
                        .ok()
                        .or_else(|| p.file_name().map(PathBuf::from))
                        .unwrap_or_else(|| PathBuf::from("root"));
                    parts.push(rel);
                }
                None => parts.push(cache_dir_name(&ancestor)),
            }
        }
        let mut path = self.cache_dir();
        for part in parts.iter().rev() {
            path.push(part);
        }
        Ok(path)
    }

    fn materialise(&self, node: &VfsNode, compression: CompressionType) -> Result<PathBuf> {
        let path = self.cache_path(node)?;
        if path.exists() {
            return Ok(path);
        }

        let data = if compression == CompressionType::V3Zlib {
            let mut raw = self.open_raw(node)?;
            extract_aaf(&mut raw)?
        } else {
            self.decode_blocks(node, compression, &path)?
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("dat.tmp");
        std::fs::write(&tmp, &data)?;
        std::fs::rename(&tmp, &path)?;
        debug!("cached {} bytes for {} at {}", data.len(), node, path.display());
        Ok(path)
    }

    fn decode_blocks(
        &self,
        node: &VfsNode,
        compression: CompressionType,
        out_path: &Path,
    ) -> Result<Vec<u8>> {
        let native = self.native_lz();
        if compression == CompressionType::V4Oo && native.is_none() {
            return Err(VfsError::UnknownCompressionType(compression.code()));
        }

        let parent = node
            .parent
            .ok_or_else(|| VfsError::IncorrectFormat(format!("block-coded root node {node}")))?;
        let mut archive = self.open_node(&self.catalog().node_required(parent)?)?;

        let single;
        let blocks: &[EntryBlock] = if node.blocks.is_empty() {
            single = [EntryBlock {
                offset: node.offset.unwrap_or(0),
                compressed_len: u32::try_from(node.size_c.unwrap_or(0)).unwrap_or(u32::MAX),
                uncompressed_len: u32::try_from(node.size_u.unwrap_or(0)).unwrap_or(u32::MAX),
            }];
            &single
        } else {
            &node.blocks
        };

        let mut out = Vec::with_capacity(usize::try_from(node.size_u.unwrap_or(0)).unwrap_or(0));
        let mut bad = Vec::new();
        for (i, block) in blocks.iter().enumerate() {
            archive.seek(SeekFrom::Start(block.offset))?;
            let mut input = vec![0u8; block.compressed_len as usize];
            archive.read_exact(&mut input)?;
            match decode_block(
                compression,
                &input,
                block.uncompressed_len as usize,
                native.as_deref(),
            ) {
                Ok(decoded) => out.extend_from_slice(&decoded),
                Err(e) => {
                    debug!("block {i} of {node}: {e}");
                    out.extend_from_slice(&input);
                    bad.push(i);
                }
            }
        }

        if !bad.is_empty() {
            warn!(
                "BAAD blocks {:?} of {} written raw to {}",
                bad,
                blocks.len(),
                out_path.display()
            );
        }
        Ok(out)
    }
}

fn cache_dir_name(node: &VfsNode) -> PathBuf {
    match node.v_hash {
        Some(_) => PathBuf::from(node.v_hash_to_str()),
        None => PathBuf::from(format!("uid{}", node.uid)),
    }
}

fn cache_name(node: &VfsNode) -> PathBuf {
    let mut name = cache_dir_name(node);
    name.set_extension("dat");
    name
}
