//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A backing file could not be opened, created, sized or mapped.
    #[error("failed to open storage file {}: {source}", path.display())]
    Open {
        /// The file that could not be opened.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Truncating, mapping or flushing failed after the storage was opened.
    ///
    /// The storage cannot guarantee consistency after this error.
    #[error("storage I/O error during {op}: {source}")]
    Io {
        /// The operation that failed.
        op: &'static str,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A byte window was requested outside of the mapped region.
    #[error("byte range [{start}, {end}) is out of bounds [{valid_start}, {valid_end})")]
    OutOfBounds {
        /// Requested start offset.
        start: u64,
        /// Requested end offset (exclusive).
        end: u64,
        /// First valid offset.
        valid_start: u64,
        /// One past the last valid offset.
        valid_end: u64,
    },

    /// The header does not agree with the backing files.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    pub(crate) fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }
}
