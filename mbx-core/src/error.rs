//! Error types for minibatch exchange primitives

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core minibatch exchange operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for core minibatch exchange operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A named mapping could not be opened
    #[error("Mapping [{}] could not be opened: {source}", path.display())]
    MappingUnavailable {
        /// Path of the mapping
        path: PathBuf,
        /// Underlying OS error
        source: io::Error,
    },

    /// The mapping is smaller than the layout requires
    #[error("Mapping [{}] holds {actual} bytes, expected at least {expected}", path.display())]
    MappingTooSmall {
        /// Path of the mapping
        path: PathBuf,
        /// Bytes required by the layout
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Index out of bounds
    #[error("Index {index} out of bounds (length {len})")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Number of addressable elements
        len: usize,
    },

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unsupported data layout or storage
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Layout error (alignment, stride, etc.)
    #[error("Memory layout error: {0}")]
    LayoutError(String),
}
