//! Error types shared by every format parser

use thiserror::Error;

/// Format-level error type
#[derive(Debug, Error)]
pub enum FormatError {
    /// A magic check or structural invariant failed
    #[error("incorrect format: {0}")]
    IncorrectFormat(String),

    /// The reader hit end of stream inside a structural field
    #[error("out of data")]
    OutOfData,

    /// A compression variant that cannot be decoded here
    #[error("unknown compression type: {0}")]
    UnknownCompressionType(u8),

    /// A structure that is recognised but not supported
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A typed-structure instance references a type hash with no descriptor
    #[error("missing ADF type: 0x{0:08x}")]
    MissingAdfType(u32),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl FormatError {
    /// Convenience constructor for `IncorrectFormat`
    pub fn incorrect(msg: impl Into<String>) -> Self {
        Self::IncorrectFormat(msg.into())
    }
}

impl From<std::io::Error> for FormatError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::OutOfData
        } else {
            Self::Io(err)
        }
    }
}

impl From<binrw::Error> for FormatError {
    fn from(err: binrw::Error) -> Self {
        if err.is_eof() {
            return Self::OutOfData;
        }
        match err {
            binrw::Error::Io(e) => e.into(),
            other => Self::IncorrectFormat(other.to_string()),
        }
    }
}

/// Result type for format operations
pub type FormatResult<T> = Result<T, FormatError>;

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_out_of_data() {
        let err: FormatError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, FormatError::OutOfData));
    }

    #[test]
    fn test_binrw_assert_maps_to_incorrect_format() {
        let err = binrw::Error::AssertFail {
            pos: 0,
            message: "bad magic".to_string(),
        };
        let err: FormatError = err.into();
        assert!(matches!(err, FormatError::IncorrectFormat(m) if m.contains("bad magic")));
    }
}
