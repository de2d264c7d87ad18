//! Project configuration
//!
//! Stored as `project.json` at the project root.

use crate::{Result, VfsError};
use apex_hash::HashWidth;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder in archive paths replaced by the installation root
pub const GAME_DIR_VAR: &str = "${GAME_DIR}";

/// Extension groups whose members name each other
pub const DEFAULT_FILE_ASSOC: &[&[&str]] = &[
    &[".epe", ".ee"],
    &[".blo", ".bl", ".nl", ".fl"],
    &[".meshc", ".modelc", ".hrmeshc"],
    &[".ddsc", ".hmddsc", ".atx1", ".atx2"],
];

/// Configuration for one game project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Title identifier
    pub game_id: String,

    /// Installation root
    pub game_dir: PathBuf,

    /// Executable name, relative to `game_dir`
    pub exe_name: String,

    /// Directories scanned for `.tab`/`.arc` pairs
    pub archive_paths: Vec<String>,

    /// Index archive generation
    pub archive_version: u32,

    /// v_hash width in bytes
    pub file_hash_size: u32,

    /// Loose files registered as roots, relative to `game_dir`
    #[serde(default)]
    pub unarchived_files: Vec<String>,

    /// Location of the native LZ library
    #[serde(default)]
    pub oo_decompress_dll: Option<PathBuf>,

    /// Whether GTOC sub-indices are expected
    #[serde(default)]
    pub has_garcs: bool,

    /// Extension groups used by name association
    #[serde(default = "default_file_assoc")]
    pub file_assoc: Vec<Vec<String>>,
}

fn default_file_assoc() -> Vec<Vec<String>> {
    DEFAULT_FILE_ASSOC
        .iter()
        .map(|group| group.iter().map(|e| (*e).to_string()).collect())
        .collect()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            game_id: String::new(),
            game_dir: PathBuf::from("."),
            exe_name: String::new(),
            archive_paths: Vec::new(),
            archive_version: 3,
            file_hash_size: 4,
            unarchived_files: Vec::new(),
            oo_decompress_dll: None,
            has_garcs: false,
            file_assoc: default_file_assoc(),
        }
    }
}

impl ProjectConfig {
    /// Create a configuration for a game installed at `game_dir`
    pub fn new<P: AsRef<Path>>(game_id: &str, game_dir: P) -> Self {
        Self {
            game_id: game_id.to_string(),
            game_dir: game_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set the executable name
    #[must_use]
    pub fn with_exe_name(mut self, exe_name: &str) -> Self {
        self.exe_name = exe_name.to_string();
        self
    }

    /// Set the archive directories
    #[must_use]
    pub fn with_archive_paths(mut self, paths: Vec<String>) -> Self {
        self.archive_paths = paths;
        self
    }

    /// Set the index archive generation
    #[must_use]
    pub const fn with_archive_version(mut self, version: u32) -> Self {
        self.archive_version = version;
        self
    }

    /// Set the v_hash width in bytes
    #[must_use]
    pub const fn with_file_hash_size(mut self, size: u32) -> Self {
        self.file_hash_size = size;
        self
    }

    /// Set the loose files registered as roots
    #[must_use]
    pub fn with_unarchived_files(mut self, files: Vec<String>) -> Self {
        self.unarchived_files = files;
        self
    }

    /// Set the native LZ library location
    #[must_use]
    pub fn with_oo_decompress_dll<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.oo_decompress_dll = Some(path.as_ref().to_path_buf());
        self
    }

    /// Declare whether GTOC sub-indices are expected
    #[must_use]
    pub const fn with_garcs(mut self, has_garcs: bool) -> Self {
        self.has_garcs = has_garcs;
        self
    }

    /// v_hash width for this project
    pub fn hash_width(&self) -> Result<HashWidth> {
        HashWidth::from_bytes(self.file_hash_size).ok_or_else(|| {
            VfsError::Config(format!(
                "file_hash_size must be 4, 6 or 8, got {}",
                self.file_hash_size
            ))
        })
    }

    /// Reject unknown hash widths and archive generations
    pub fn validate(&self) -> Result<()> {
        self.hash_width()?;
        if !(3..=5).contains(&self.archive_version) {
            return Err(VfsError::Config(format!(
                "archive_version must be 3, 4 or 5, got {}",
                self.archive_version
            )));
        }
        Ok(())
    }

    /// Archive directories with `${GAME_DIR}` expanded
    pub fn archive_dirs(&self) -> Vec<PathBuf> {
        let game_dir = self.game_dir.to_string_lossy();
        self.archive_paths
            .iter()
            .map(|p| PathBuf::from(p.replace(GAME_DIR_VAR, &game_dir)))
            .collect()
    }

    /// Full path of the executable, when one is configured
    pub fn exe_path(&self) -> Option<PathBuf> {
        (!self.exe_name.is_empty()).then(|| self.game_dir.join(&self.exe_name))
    }

    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| VfsError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| VfsError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
