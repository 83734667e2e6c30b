//! # Runnel Core
//!
//! Persistent, append-only logs of fixed-size records, shared between
//! threads and processes through memory-mapped files.
//!
//! This crate provides:
//! - [`Stream`] - A typed handle binding a log id to its storage
//! - [`StreamWriter`] - Lock-free reservation and in-order publication
//! - [`StreamReader`] - Independent cursors that follow the log as it grows
//!
//! Records are any fixed-size plain-data type; see [`Record`].
//!
//! ## Example
//!
//! ```rust
//! use runnel_core::{Stream, StreamConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = StreamConfig::new().root(dir.path());
//! let stream: Stream<u64> = Stream::open_with_config("counters", Some("c1"), None, config).unwrap();
//!
//! let writer = stream.writer().unwrap();
//! for i in 0..3 {
//!     writer.write(&i).unwrap();
//! }
//!
//! let reader = stream.reader(8).unwrap();
//! assert_eq!(reader.read().unwrap(), 1);
//! assert_eq!(reader.read().unwrap(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod reader;
mod record;
mod stream;
mod writer;

pub use config::StreamConfig;
pub use error::{CoreError, CoreResult};
pub use reader::StreamReader;
pub use record::Record;
pub use stream::Stream;
pub use writer::StreamWriter;

// Re-export storage types callers need to inject or inspect storage.
pub use runnel_storage::{InMemoryStorage, MmapStorage, Storage, StorageError, StreamHeader};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
