//! CLI command implementations.

pub mod demo;
pub mod dump;
pub mod inspect;
pub mod remove;

use runnel_core::StreamConfig;
use runnel_storage::StorageOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures detected by the commands themselves.
#[derive(Debug, Error)]
pub enum CliError {
    /// No files exist for the log.
    #[error("no log '{id}' found in {}", root.display())]
    NotFound {
        /// Log id.
        id: String,
        /// Directory searched.
        root: PathBuf,
    },

    /// The header file is shorter than a header.
    #[error("header file {} is truncated ({len} bytes)", path.display())]
    TruncatedHeader {
        /// Header file path.
        path: PathBuf,
        /// Actual length.
        len: usize,
    },

    /// A demo reader did not see what the writers wrote.
    #[error("reader {reader} summed {actual}, expected {expected}")]
    SumMismatch {
        /// Reader index.
        reader: usize,
        /// Expected sum.
        expected: i64,
        /// Observed sum.
        actual: i64,
    },

    /// A worker thread panicked.
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// Storage options for logs under `root`.
pub fn storage_options(root: Option<&Path>) -> StorageOptions {
    match root {
        Some(root) => StorageOptions::new().root(root),
        None => StorageOptions::new(),
    }
}

/// Stream configuration for logs under `root`.
pub fn stream_config(root: Option<&Path>) -> StreamConfig {
    match root {
        Some(root) => StreamConfig::new().root(root),
        None => StreamConfig::new(),
    }
}

/// Fails with [`CliError::NotFound`] unless the files of `id` exist.
pub fn ensure_exists(options: &StorageOptions, id: &str) -> Result<(), CliError> {
    if options.data_path(id).exists() && options.header_path(id).exists() {
        Ok(())
    } else {
        Err(CliError::NotFound {
            id: id.to_string(),
            root: options.root_dir(),
        })
    }
}
