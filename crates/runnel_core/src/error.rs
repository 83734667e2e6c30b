//! Error types for Runnel streams.

use std::io;
use thiserror::Error;

/// Result type for stream operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while writing to or reading from a stream.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] runnel_storage::StorageError),

    /// I/O error, e.g. while starting a background thread.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A reservation did not fit even after growing the storage.
    #[error("storage full: tail {tail}, capacity {capacity}")]
    StorageFull {
        /// Tail observed when the reservation was refused.
        tail: u64,
        /// Capacity observed when the reservation was refused.
        capacity: u64,
    },

    /// Concurrent writers left the header in a state the protocol forbids.
    #[error("race detected at offset {offset}: observed {observed}")]
    RaceInconsistency {
        /// Offset the writer was working on.
        offset: u64,
        /// Conflicting header value.
        observed: u64,
    },

    /// The requested record exists in the region but is not published yet.
    ///
    /// This is benign; the same read may succeed later.
    #[error("record at offset {offset} not yet published (watermark {watermark})")]
    NotYetPublished {
        /// Offset of the requested record.
        offset: u64,
        /// Current watermark.
        watermark: u64,
    },

    /// The writer, reader or stream is closed.
    #[error("stream is closed")]
    Closed,

    /// Operation not permitted with these arguments.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotYetPublished { .. })
    }
}
