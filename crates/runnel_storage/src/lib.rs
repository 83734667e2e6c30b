//! # Runnel Storage
//!
//! Growable byte regions and the shared header for Runnel logs.
//!
//! This crate provides the lowest layer of a Runnel log. A storage is an
//! **opaque byte region** plus a [`HeaderCell`] recording how much of it is
//! reserved and published; it does not know about records.
//!
//! ## Design Principles
//!
//! - The header lives in its own region so growth never moves it
//! - Regions only grow; bytes below the old size survive a resize
//! - Windows into a region are borrowed, never retained across a remap
//! - All shared counters are atomics, usable across processes
//!
//! ## Available Storages
//!
//! - [`MmapStorage`] - Memory-mapped data and header files
//! - [`InMemoryStorage`] - For testing and injection
//!
//! ## Example
//!
//! ```rust
//! use runnel_storage::{InMemoryStorage, Reservation, Storage};
//!
//! let mut storage = InMemoryStorage::new("scratch");
//! let Reservation::Reserved { offset } = storage.header().reserve(5) else {
//!     panic!("no room");
//! };
//! storage.get_bytes_mut(offset, offset + 5).unwrap().copy_from_slice(b"hello");
//! storage.return_bytes(offset, offset + 5);
//! storage.header().try_publish(offset, 5);
//! assert_eq!(storage.header().entry_count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod header;
mod memory;
mod mmap;

pub use backend::Storage;
pub use error::{StorageError, StorageResult};
pub use header::{HeaderCell, Publication, Reservation, StreamHeader, HEADER_SIZE};
pub use memory::InMemoryStorage;
pub use mmap::{MmapStorage, StorageOptions, DEFAULT_PAGE_SIZE};
