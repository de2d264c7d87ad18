//! Root discovery and blob classification

use super::Resolver;
use crate::catalog::StringRef;
use crate::node::{ProcessPass, VfsNode};
use crate::{EXTERNAL_FILES_DIR, Result, VfsError};
use apex_formats::classify::classify_by_name;
use apex_formats::{CompressionType, FileKind, classify};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Sort key for archive stems; `game<N>` sorts numerically
fn archive_sort_key(stem: &str) -> String {
    match stem.strip_prefix("game").and_then(|n| n.parse::<u64>().ok()) {
        Some(n) => format!("game{n:08}"),
        None => stem.to_string(),
    }
}

fn file_size(path: &Path) -> Result<u64> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(VfsError::FileMissing(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Virtual path of an external file
fn external_v_path(path: &Path) -> Vec<u8> {
    let text = path.to_string_lossy().replace([':', '\\'], "/");
    format!("{EXTERNAL_FILES_DIR}/{}", text.trim_start_matches('/')).into_bytes()
}

impl Resolver<'_> {
    fn root_node(&self, p_path: PathBuf, size: u64) -> VfsNode {
        let mut node = VfsNode::with_hash(self.project.hash_width(), None);
        node.p_path = Some(p_path);
        node.offset = Some(0);
        node.size_c = Some(size);
        node.size_u = Some(size);
        node
    }

    /// Seed an empty catalog with the executable, loose files and archives
    pub(super) fn find_initial_files(&mut self) -> Result<()> {
        let config = self.project.config();

        if let Some(exe) = config.exe_path() {
            if exe.is_file() {
                let size = file_size(&exe)?;
                let mut node = self.root_node(exe, size);
                node.file_kind = Some(FileKind::Exe);
                self.batch.node_add(node);
            } else {
                warn!("Executable {} not found", exe.display());
            }
        }

        for name in &config.unarchived_files {
            let path = config.game_dir.join(name);
            let size = match file_size(&path) {
                Ok(size) => size,
                Err(e) => {
                    warn!("Skipping unarchived file: {e}");
                    continue;
                }
            };
            let v_path = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut node = self.root_node(path, size);
            node.v_hash = Some(self.project.file_hash(v_path.as_bytes()));
            node.ext_hash = Some(apex_hash::ext_hash(v_path.as_bytes()));
            node.v_path = Some(v_path.into_bytes());
            self.batch.node_add(node);
        }

        let mut by_dir: BTreeMap<PathBuf, Vec<(String, PathBuf)>> = BTreeMap::new();
        for dir in config.archive_dirs() {
            if !dir.is_dir() {
                warn!("Archive directory {} not found", dir.display());
                continue;
            }
            for entry in WalkDir::new(&dir).sort_by_file_name() {
                let entry = entry?;
                let path = entry.path();
                if !entry.file_type().is_file()
                    || !path.extension().is_some_and(|e| e.eq_ignore_ascii_case("tab"))
                {
                    continue;
                }
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
                by_dir
                    .entry(parent)
                    .or_default()
                    .push((archive_sort_key(&stem), path.with_extension("arc")));
            }
        }

        for (dir, mut archives) in by_dir {
            debug!("Archive directory {}: {} pairs", dir.display(), archives.len());
            archives.sort();
            for (_, arc) in archives {
                match file_size(&arc) {
                    Ok(size) => {
                        let mut node = self.root_node(arc, size);
                        node.file_kind = Some(FileKind::Arc);
                        self.batch.node_add(node);
                    }
                    Err(e) => warn!("Index without data archive: {e}"),
                }
            }
        }

        let flushed = self.flush()?;
        info!("Found {} root files", flushed.nodes_added);
        Ok(())
    }

    /// Register a loose file as a root node and classify it
    pub(super) fn external_file_add(&mut self, path: &Path, temporary: bool) -> Result<VfsNode> {
        let size = file_size(path)?;
        let v_path = external_v_path(path);
        let mut node = VfsNode::named(self.project.hash_width(), &v_path);
        node.p_path = Some(path.to_path_buf());
        node.offset = Some(0);
        node.size_c = Some(size);
        node.size_u = Some(size);
        node.flags.set_temporary(temporary);

        if let Some(kind) = classify_by_name(&v_path) {
            node.file_kind = Some(kind);
        } else {
            let mut reader = self.project.open_raw(&node)?;
            let found = classify(&mut reader, size)?;
            apply_classification(&mut node, &found, false);
        }
        node.flags.set_processed(ProcessPass::RawNoName);

        let uid = self.project.catalog().write(|w| {
            let uid = w.node_add(&mut node)?;
            w.string_propose(&crate::catalog::ProposedString {
                string: v_path.clone(),
                node: Some(uid),
                reference: StringRef::default(),
            })?;
            Ok(uid)
        })?;
        info!(
            "Added external file {} as node {uid} ({})",
            path.display(),
            node.file_kind.map_or("untyped", FileKind::as_str)
        );
        Ok(node)
    }

    /// Delete temporary nodes and everything below them
    pub(super) fn remove_temporary_nodes(&mut self) -> Result<u64> {
        let catalog = self.project.catalog();
        let mut pending: Vec<u64> = catalog
            .nodes_filtered(|n| n.flags.is_temporary())?
            .into_iter()
            .map(|n| n.uid)
            .collect();
        while let Some(uid) = pending.pop() {
            pending.extend(catalog.children_of(uid)?.into_iter().map(|n| n.uid));
            self.batch.node_delete(uid);
        }
        let flushed = self.flush()?;
        if flushed.nodes_deleted > 0 {
            info!("Removed {} temporary nodes", flushed.nodes_deleted);
        }
        Ok(flushed.nodes_deleted)
    }

    /// Propose names that are known to exist in most installations
    pub(super) fn propose_guesses(&mut self) -> Result<()> {
        self.batch
            .propose_kinds(super::GLOBAL_GDCC_PATH, None, &[FileKind::Adf]);
        for i in 0..10 {
            let bin = format!("settings/hp_settings/reserve_{i}.bin");
            self.batch
                .propose_kinds(bin.as_bytes(), None, &[FileKind::Rtpc]);
            let bl = format!("settings/hp_settings/reserve_{i}.bl");
            self.batch
                .propose_kinds(bl.as_bytes(), None, &[FileKind::Sarc]);
        }
        self.flush()?;
        Ok(())
    }

    /// Propose each non-empty line of a text file
    pub(super) fn strings_add_from_file(&mut self, path: &Path, used_at_runtime: bool) -> Result<u64> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VfsError::FileMissing(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let reference = StringRef {
            used_at_runtime,
            ..StringRef::default()
        };
        let mut lines = 0usize;
        for line in data.split(|&b| b == b'\n').map(<[u8]>::trim_ascii) {
            if !line.is_empty() {
                self.batch.propose_ref(line, None, reference);
                lines += 1;
            }
        }
        let flushed = self.flush()?;
        info!(
            "{}: {lines} strings, {} new",
            path.display(),
            flushed.strings_added
        );
        Ok(flushed.strings_added)
    }

    pub(super) fn content_hash(&mut self, node: &mut VfsNode) -> Result<bool> {
        let mut reader = self.project.open_node(node)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut reader, &mut hasher)?;
        node.content_hash = Some(hex::encode(hasher.finalize()));
        Ok(true)
    }

    /// Classify a node by its bytes
    ///
    /// Sub-archive entries without a body become symlinks. AAF wrappers get
    /// their compression variant and uncompressed size from the header.
    pub(super) fn classify_raw(&mut self, node: &mut VfsNode) -> Result<bool> {
        if node.parent.is_some() && node.offset.is_none() {
            node.file_kind = Some(FileKind::Symlink);
            return Ok(true);
        }

        let block_coded = node
            .flags
            .compression()
            .is_some_and(CompressionType::is_block_coded);
        let size = if block_coded {
            node.size_u.or(node.size_c)
        } else {
            node.size_c.or(node.size_u)
        }
        .unwrap_or(0);

        let mut reader = self.project.open_node(node)?;
        let found = classify(&mut reader, size)?;
        apply_classification(node, &found, block_coded);
        trace!("node {node} classified as {}", found.kind);
        Ok(true)
    }

    /// Refine a named node's kind from its path or the sub-archive index
    pub(super) fn classify_by_path(&mut self, node: &mut VfsNode) -> Result<bool> {
        let Some(v_path) = node.v_path.clone() else {
            return Ok(false);
        };
        let kind = if node.parent.is_some() && node.offset.is_none() {
            Some(FileKind::Symlink)
        } else if let Some(kind) = classify_by_name(&v_path) {
            Some(kind)
        } else if self.is_garc(node)? {
            Some(FileKind::Garc)
        } else {
            None
        };
        match kind {
            Some(kind) => {
                node.file_kind = Some(kind);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn apply_classification(node: &mut VfsNode, found: &apex_formats::Classification, block_coded: bool) {
    node.file_kind = Some(found.kind);
    if found.magic.is_some() {
        node.magic = found.magic;
    }
    if found.sub_kind.is_some() {
        node.sub_kind = found.sub_kind;
    }
    if !block_coded {
        node.size_u = Some(found.size_u);
    }
    if found.kind == FileKind::Aaf {
        node.flags
            .set_compression_code(CompressionType::V3Zlib.code());
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::project::Project;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_archive_sort_key() {
        let mut stems = vec!["game10", "game2", "boot", "game1"];
        stems.sort_by_key(|s| archive_sort_key(s));
        assert_eq!(stems, vec!["boot", "game1", "game2", "game10"]);
    }

    #[test]
    fn test_external_v_path() {
        assert_eq!(
            external_v_path(Path::new("/tmp/mods/a.bin")),
            b"__EXTERNAL_FILES__/tmp/mods/a.bin".to_vec()
        );
        assert_eq!(
            external_v_path(Path::new("C:\\mods\\a.bin")),
            b"__EXTERNAL_FILES__/C//mods/a.bin".to_vec()
        );
    }

    #[test]
    fn test_external_file_add_and_remove() {
        let dir = tempfile::tempdir().expect("Test operation should succeed");
        let project = Project::create(dir.path().join("p"), ProjectConfig::new("gz", dir.path()))
            .expect("Test operation should succeed");
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, b"gdc/global.gdcc\nsettings/a.bin\n").expect("Test operation should succeed");

        let node = project
            .external_file_add(&file, true)
            .expect("Test operation should succeed");
        assert_eq!(node.file_kind, Some(FileKind::Txt));
        assert!(node.flags.is_temporary());
        assert!(node.v_path.as_ref().is_some_and(|p| p.starts_with(b"__EXTERNAL_FILES__/")));

        let removed = project
            .remove_temporary_nodes()
            .expect("Test operation should succeed");
        assert_eq!(removed, 1);
        assert_eq!(
            project.catalog().node_count().expect("Test operation should succeed"),
            0
        );
    }

    #[test]
    fn test_external_file_missing() {
        let dir = tempfile::tempdir().expect("Test operation should succeed");
        let project = Project::create(dir.path().join("p"), ProjectConfig::new("gz", dir.path()))
            .expect("Test operation should succeed");
        assert!(matches!(
            project.external_file_add(dir.path().join("nope.bin"), false),
            Err(VfsError::FileMissing(_))
        ));
    }

    #[test]
    fn test_strings_from_file() {
        let dir = tempfile::tempdir().expect("Test operation should succeed");
        let project = Project::create(dir.path().join("p"), ProjectConfig::new("gz", dir.path()))
            .expect("Test operation should succeed");
        let list = dir.path().join("strings.txt");
        std::fs::write(&list, b"a/b.bin\r\n\n  c\\d.bin  \n").expect("Test operation should succeed");
        let added = project
            .strings_add_from_file(&list, true)
            .expect("Test operation should succeed");
        assert_eq!(added, 2);

        let found = project
            .catalog()
            .hash_string_match(crate::catalog::HashQuery::String(b"c/d.bin"))
            .expect("Test operation should succeed");
        let refs = project
            .catalog()
            .string_refs(found[0].rowid)
            .expect("Test operation should succeed");
        assert!(refs[0].1.used_at_runtime);
    }
}
