//! Parsers and builders for Apex engine archive and typed-data formats
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_possible_wrap)] // Intentional for binary operations
#![allow(clippy::cast_sign_loss)] // Signed fields stored as raw words
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::doc_markdown)] // Many format names don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // Domain-specific naming patterns
#![allow(clippy::float_cmp)] // Binary format requirements
#![allow(clippy::missing_errors_doc)] // Every parser returns FormatError
#![allow(clippy::redundant_closure_for_method_calls)] // Iterator chains
#![allow(clippy::derive_partial_eq_without_eq)] // Binary format structs
//! This crate reads the container and data formats of the Apex engine and
//! writes the ones a mod build has to regenerate.
//!
//! # Supported Formats
//!
//! - **TAB/ARC**: paired index and data archives, versions 3, 4 and 5
//! - **SARC**: sub-archives with named entries, versions 2 and 3
//! - **AAF**: sectioned deflate wrapper
//! - **GT0C**: sub-index describing archives not listed in any TAB
//! - **ADF**: self-describing typed structures, including GDCC directories
//! - **RTPC**: property container trees
//! - **AVTX**: texture headers
//!
//! Blobs of unknown origin are identified with [`classify::classify`].

#![warn(missing_docs)]

pub mod aaf;
/// Typed-structure files and the shared type registry
pub mod adf;
pub mod avtx;
pub(crate) mod bytes;
pub mod classify;
/// Per-block decompression for TAB entries
///
/// Zlib and zstd are handled in-crate; the proprietary LZ codec is reached
/// through an injected [`codec::NativeLz`].
pub mod codec;
pub mod error;
pub mod gtoc;
/// File kinds and the possible-kinds bitmap
pub mod kind;
/// Property container trees and the visitor used to walk them
pub mod rtpc;
pub mod sarc;
/// Little-endian binary streams and bounded windows
pub mod stream;
pub mod tab;
pub mod txt;

pub use classify::{Classification, classify, classify_bytes};
pub use codec::{CompressionType, NativeLz};
pub use error::{FormatError, FormatResult};
pub use kind::FileKind;

/// Common trait for formats that parse from and build to a standalone buffer
pub trait ApexFormat: Sized {
    /// Parse from bytes
    fn parse(data: &[u8]) -> FormatResult<Self>;

    /// Build to bytes
    fn build(&self) -> FormatResult<Vec<u8>>;

    /// Verify round-trip correctness
    fn verify_round_trip(data: &[u8]) -> FormatResult<()> {
        let parsed = Self::parse(data)?;
        let rebuilt = parsed.build()?;
        if data != rebuilt.as_slice() {
            return Err(FormatError::incorrect("Round-trip verification failed"));
        }
        Ok(())
    }
}
