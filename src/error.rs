//! Error types shared by the decoder, the processors and the filters.

use thiserror::Error;

/// Result type for decode / processing / filtering operations
pub type Result<T> = std::result::Result<T, QcError>;

/// Errors raised by the core library
#[derive(Error, Debug)]
pub enum QcError {
    /// A read ran past the end of the byte buffer
    #[error("read of {needed} bytes at offset {offset} exceeds buffer ({remaining} bytes remaining)")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// Malformed file contents
    #[error("format error: {0}")]
    Format(String),

    /// Two spectra (or a spectrum and a header) disagree on shape
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// File version this reader does not decode
    #[error("unsupported cross-spectra file version {0}")]
    UnsupportedVersion(i16),

    /// Too few samples to fit the requested number of components
    #[error("insufficient data: {samples} samples for {components} components")]
    InsufficientData { samples: usize, components: usize },

    /// Input whose statistics make the operation undefined (e.g. all zeros)
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Invalid construction parameters
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stage inside a composite processor failed
    #[error("stage {index} ({name}) failed: {source}")]
    Stage {
        index: usize,
        name: String,
        #[source]
        source: Box<QcError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl QcError {
    /// Whether this error rejects a file as malformed.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            QcError::Format(_) | QcError::ShapeMismatch { .. } | QcError::UnsupportedVersion(_)
        )
    }
}
