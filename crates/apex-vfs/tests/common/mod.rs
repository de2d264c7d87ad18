//! Synthetic game installations for end-to-end tests

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use apex_formats::CompressionType;
use apex_formats::codec::encode_block;
use apex_formats::sarc::{SarcEntry, SarcFile};
use apex_formats::tab::{NO_BLOCK, TAB_MAGIC, TabBlock, TabEntry, TabFile, TabHeader, TabVersion};
use apex_vfs::{Project, ProjectConfig};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const ARCHIVE_DIR: &str = "archives_win64";

/// One blob as stored in the data archive
struct Stored {
    hash: u64,
    bytes: Vec<u8>,
    size_u: u32,
    compression: CompressionType,
}

/// A game directory holding one index/data archive pair
pub struct Install {
    pub dir: TempDir,
    version: TabVersion,
    entries: Vec<Stored>,
}

impl Install {
    /// Installation indexed by a v3 TAB
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Test operation should succeed"),
            version: TabVersion::V3,
            entries: Vec::new(),
        }
    }

    /// Installation indexed by a v4 TAB, which may carry compressed entries
    pub fn v4() -> Self {
        Self {
            version: TabVersion::V4,
            ..Self::new()
        }
    }

    pub fn game_dir(&self) -> PathBuf {
        self.dir.path().join("game")
    }

    /// Store `body` under a raw path hash
    #[must_use]
    pub fn entry(mut self, hash: u64, body: &[u8]) -> Self {
        self.entries.push(Stored {
            hash,
            bytes: body.to_vec(),
            size_u: body.len() as u32,
            compression: CompressionType::None,
        });
        self
    }

    /// Store `body` under the hash of `v_path`
    #[must_use]
    pub fn named(self, v_path: &str, body: &[u8]) -> Self {
        let hash = u64::from(apex_hash::hash32(v_path.as_bytes()));
        self.entry(hash, body)
    }

    /// Store `body` block-coded with `compression` under the hash of `v_path`
    #[must_use]
    pub fn compressed(mut self, v_path: &str, body: &[u8], compression: CompressionType) -> Self {
        assert_eq!(self.version, TabVersion::V4, "v3 indexes cannot describe compression");
        self.entries.push(Stored {
            hash: u64::from(apex_hash::hash32(v_path.as_bytes())),
            bytes: encode_block(compression, body).expect("Test operation should succeed"),
            size_u: body.len() as u32,
            compression,
        });
        self
    }

    /// Write `game0.tab` and `game0.arc` and open a project over them
    pub fn project(&self) -> Project {
        let archives = self.game_dir().join(ARCHIVE_DIR);
        std::fs::create_dir_all(&archives).expect("Test operation should succeed");

        let mut arc = Vec::new();
        let mut tab = TabFile {
            header: TabHeader {
                magic: TAB_MAGIC,
                version: 2,
                minor: 1,
                alignment: 16,
            },
            version: self.version,
            unknown: [0; 3],
            blocks: Vec::new(),
            entries: Vec::new(),
        };
        for stored in &self.entries {
            arc.resize(arc.len().next_multiple_of(16), 0);
            let block_index = tab.blocks.len() as u16;
            if self.version == TabVersion::V4 {
                tab.blocks.push(match stored.compression {
                    CompressionType::None => NO_BLOCK,
                    _ => TabBlock {
                        compressed_len: stored.bytes.len() as u32,
                        uncompressed_len: stored.size_u,
                    },
                });
            }
            tab.entries.push(TabEntry {
                hash: stored.hash,
                offset: arc.len() as u32,
                size_c: stored.bytes.len() as u32,
                size_u: stored.size_u,
                block_index,
                compression_type: stored.compression.code(),
                compression_flags: 0,
            });
            arc.extend_from_slice(&stored.bytes);
        }
        std::fs::write(
            archives.join("game0.tab"),
            tab.build().expect("Test operation should succeed"),
        )
        .expect("Test operation should succeed");
        std::fs::write(archives.join("game0.arc"), arc).expect("Test operation should succeed");

        let archive_version = if self.version == TabVersion::V4 { 4 } else { 3 };
        let config = ProjectConfig::new("gz", self.game_dir())
            .with_archive_paths(vec![format!("${{GAME_DIR}}/{ARCHIVE_DIR}")])
            .with_archive_version(archive_version);
        Project::create(self.dir.path().join("project"), config)
            .expect("Test operation should succeed")
    }
}

/// A v3 sub-archive; entries flagged `true` are symlinks
pub fn sarc(entries: &[(&str, &[u8], bool)]) -> Vec<u8> {
    let mut sarc = SarcFile::new(3).expect("Test operation should succeed");
    for (i, (path, body, symlink)) in entries.iter().enumerate() {
        let len = if *symlink { 0 } else { body.len() as u32 };
        sarc.entries
            .push(SarcEntry::new(i, path.as_bytes(), len, *symlink));
    }
    let mut out = Cursor::new(Vec::new());
    sarc.write_archive(&mut out, |e| Ok(entries[e.index].1.to_vec()))
        .expect("Test operation should succeed");
    out.into_inner()
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    std::fs::create_dir_all(path.parent().expect("Test operation should succeed"))
        .expect("Test operation should succeed");
    std::fs::write(path, bytes).expect("Test operation should succeed");
}
