//! In-memory storage for testing.

use crate::backend::{window, Storage};
use crate::error::{StorageError, StorageResult};
use crate::header::HeaderCell;
use crate::mmap::DEFAULT_PAGE_SIZE;

/// A process-local storage.
///
/// Behaves like [`super::MmapStorage`] without touching the file system, and
/// is suitable for:
/// - Unit tests
/// - Injecting a storage into a stream
/// - Ephemeral logs that don't need to be shared between processes
///
/// # Example
///
/// ```rust
/// use runnel_storage::{InMemoryStorage, Storage};
///
/// let mut storage = InMemoryStorage::new("scratch");
/// storage.get_bytes_mut(0, 4).unwrap().copy_from_slice(b"test");
/// storage.return_bytes(0, 4);
/// assert_eq!(storage.get_bytes(0, 4).unwrap(), b"test");
/// assert_eq!(storage.capacity(), 4096);
/// ```
#[derive(Debug)]
pub struct InMemoryStorage {
    id: String,
    data: Vec<u8>,
    header: HeaderCell,
    closed: bool,
}

impl InMemoryStorage {
    /// Creates a storage of one page.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_capacity(id, DEFAULT_PAGE_SIZE)
    }

    /// Creates a storage with `capacity` zeroed bytes.
    #[must_use]
    pub fn with_capacity(id: impl Into<String>, capacity: u64) -> Self {
        let header = HeaderCell::new();
        header.grow_capacity(capacity);
        Self {
            id: id.into(),
            data: vec![0; capacity as usize],
            header,
            closed: false,
        }
    }

    /// Returns a copy of the data region.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.clone()
    }
}

impl Storage for InMemoryStorage {
    fn id(&self) -> &str {
        &self.id
    }

    fn resize(&mut self, new_size: u64) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        if new_size > self.data.len() as u64 {
            self.data.resize(new_size as usize, 0);
            self.header.grow_capacity(new_size);
        }
        Ok(())
    }

    fn get_bytes(&self, start: u64, end: u64) -> StorageResult<&[u8]> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        let range = window(start, end, self.data.len() as u64)?;
        Ok(&self.data[range])
    }

    fn get_bytes_mut(&mut self, start: u64, end: u64) -> StorageResult<&mut [u8]> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        let range = window(start, end, self.data.len() as u64)?;
        Ok(&mut self.data[range])
    }

    fn mapped_len(&self) -> u64 {
        self.data.len() as u64
    }

    fn header(&self) -> &HeaderCell {
        &self.header
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing to write back
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn refresh(&mut self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        self.closed = true;
        self.data = Vec::new();
        self.header.reset();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_starts_at_one_page() {
        let storage = InMemoryStorage::new("id");
        assert_eq!(storage.id(), "id");
        assert_eq!(storage.capacity(), 4096);
        assert_eq!(storage.mapped_len(), 4096);
        assert_eq!(storage.header().tail(), 0);
    }

    #[test]
    fn memory_write_and_read() {
        let mut storage = InMemoryStorage::new("id");
        storage.get_bytes_mut(10, 15).unwrap().copy_from_slice(b"hello");
        storage.return_bytes(10, 15);

        assert_eq!(storage.get_bytes(10, 15).unwrap(), b"hello");
        assert_eq!(&storage.data()[10..15], b"hello");
    }

    #[test]
    fn memory_resize_preserves_bytes() {
        let mut storage = InMemoryStorage::with_capacity("id", 8);
        storage.get_bytes_mut(0, 8).unwrap().copy_from_slice(b"abcdefgh");
        storage.resize(16).unwrap();

        assert_eq!(storage.capacity(), 16);
        assert_eq!(storage.get_bytes(0, 8).unwrap(), b"abcdefgh");

        storage.resize(4).unwrap();
        assert_eq!(storage.capacity(), 16);
    }

    #[test]
    fn memory_out_of_bounds() {
        let storage = InMemoryStorage::with_capacity("id", 8);
        assert!(matches!(
            storage.get_bytes(4, 12),
            Err(StorageError::OutOfBounds {
                valid_end: 8,
                ..
            })
        ));
    }

    #[test]
    fn memory_close() {
        let mut storage = InMemoryStorage::new("id");
        storage.header().reserve(8);
        storage.close().unwrap();

        assert!(storage.is_closed());
        assert_eq!(storage.capacity(), 0);
        assert_eq!(storage.utilization(), 0);
        assert!(matches!(storage.get_bytes(0, 8), Err(StorageError::Closed)));
    }
}
