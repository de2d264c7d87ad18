//! Virtual file system over Apex engine game archives
//!
//! A project points at a game installation. Ingest walks the on-disk
//! index/data archive pairs, records every blob as a node in an embedded
//! catalog, classifies it and recurses into containers until nothing new
//! turns up. String evidence harvested from typed structures, property
//! containers and text files names the nodes whose hashes were known before
//! their paths.
//!
//! # Layout
//!
//! - [`catalog`]: the embedded store of nodes, strings, objects and types
//! - [`pipeline`]: byte streams for nodes, with a disk-backed decompression cache
//! - [`resolver`]: classification passes driven to a fixed point
//! - [`view`]: live filtered projections over the catalog
//! - [`builder`]: rebuilds sub-archives from a mod source tree
//!
//! # Example
//!
//! ```rust,ignore
//! use apex_vfs::{Project, ProjectConfig};
//!
//! # fn example() -> apex_vfs::Result<()> {
//! let config = ProjectConfig::new("gz", "/games/generationzero")
//!     .with_archive_paths(vec!["${GAME_DIR}/archives_win64".to_string()]);
//! let project = Project::create("/work/gz", config)?;
//! project.ingest()?;
//! let bytes = project.read_path(b"settings/hp_settings/codex_data.bin")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use apex_formats::FormatError;
use thiserror::Error;

// Embedded catalog store
pub mod catalog;

// Project configuration (project.json)
pub mod config;

// Log file setup
pub mod logging;

// Node records and flag bits
pub mod node;

// Node byte streams and the decompression cache
pub mod pipeline;

// Project handle tying configuration, catalog and cache together
pub mod project;

// Classification passes
pub mod resolver;

// Filtered catalog views
pub mod view;

// Mod builder
pub mod builder;

pub use builder::{Builder, TextureLayout};
pub use catalog::{Catalog, CatalogObserver};
pub use config::ProjectConfig;
pub use node::{NodeFlags, ProcessPass, VfsNode};
pub use project::Project;
pub use view::VfsView;

/// Result type for VFS operations.
pub type Result<T> = std::result::Result<T, VfsError>;

/// Errors that can occur while ingesting, reading or building.
#[derive(Debug, Error)]
pub enum VfsError {
    /// A requested virtual path has no node in the catalog.
    #[error("File missing: {0}")]
    FileMissing(String),

    /// An output file exists and overwriting is disabled.
    #[error("File exists: {0}")]
    FileExists(String),

    /// A magic check or structural invariant failed.
    #[error("Incorrect format: {0}")]
    IncorrectFormat(String),

    /// A reader hit end of stream inside a structural field.
    #[error("Out of data")]
    OutOfData,

    /// Mod build failed.
    #[error("Build error: {0}")]
    BuildError(String),

    /// Compression variant that cannot be decoded here.
    #[error("Unknown compression type: {0}")]
    UnknownCompressionType(u8),

    /// A typed structure references a type with no descriptor.
    #[error("Missing ADF type: 0x{0:08x}")]
    MissingAdfType(u32),

    /// Embedded store failure.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Invalid project configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for VfsError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::OutOfData
        } else {
            Self::Io(err)
        }
    }
}

impl From<FormatError> for VfsError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::IncorrectFormat(msg) => Self::IncorrectFormat(msg),
            FormatError::Unsupported(msg) => Self::IncorrectFormat(format!("unsupported: {msg}")),
            FormatError::OutOfData => Self::OutOfData,
            FormatError::UnknownCompressionType(code) => Self::UnknownCompressionType(code),
            FormatError::MissingAdfType(hash) => Self::MissingAdfType(hash),
            FormatError::Io(e) => e.into(),
        }
    }
}

impl From<walkdir::Error> for VfsError {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.into())
    }
}

impl From<serde_json::Error> for VfsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Catalog(format!("record encoding: {err}"))
    }
}

impl From<redb::Error> for VfsError {
    fn from(err: redb::Error) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<redb::DatabaseError> for VfsError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<redb::TableError> for VfsError {
    fn from(err: redb::TableError) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<redb::TransactionError> for VfsError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<redb::StorageError> for VfsError {
    fn from(err: redb::StorageError) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<redb::CommitError> for VfsError {
    fn from(err: redb::CommitError) -> Self {
        Self::Catalog(err.to_string())
    }
}

/// Version information for the VFS crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Project file name inside a project directory.
pub const PROJECT_FILE: &str = "project.json";

/// Catalog store location relative to the project directory.
pub const CATALOG_FILE: &str = "db/core.db";

/// Decompression cache directory name.
pub const CACHE_DIR: &str = "__CACHE__";

/// Append-only diagnostic log file name.
pub const LOG_FILE: &str = "log.txt";

/// Virtual directory under which loose external files are registered.
pub const EXTERNAL_FILES_DIR: &str = "__EXTERNAL_FILES__";
