//! Storage trait definition.

use crate::error::StorageResult;
use crate::header::HeaderCell;
use std::fmt;

/// A growable byte region plus the shared header describing it.
///
/// A storage owns everything that backs one log id: the data region, the
/// header region, and whatever files or buffers hold them. It does not know
/// about records; the stream layer interprets the bytes.
///
/// # Windows
///
/// [`Storage::get_bytes`] and [`Storage::get_bytes_mut`] lend out a view into
/// the live region. The view must not outlive the call that uses it, because
/// [`Storage::resize`] and [`Storage::refresh`] may replace the region
/// wholesale; the borrow checker enforces this since both take `&mut self`.
/// Every window is handed back with [`Storage::return_bytes`] once the caller
/// is done with it.
///
/// # Capacity
///
/// [`Storage::capacity`] is the shared capacity recorded in the header, which
/// another party may already have raised. [`Storage::mapped_len`] is how much
/// of the region this instance can currently address; [`Storage::refresh`]
/// brings it up to date.
///
/// # Implementors
///
/// - [`super::MmapStorage`] - Memory-mapped files, shareable across processes
/// - [`super::InMemoryStorage`] - Process-local buffers for tests
pub trait Storage: Send + Sync + fmt::Debug {
    /// The log id this storage backs.
    fn id(&self) -> &str;

    /// Grows the data region to `new_size` bytes and records the new capacity.
    ///
    /// All bytes below the old size are preserved. Requests at or below the
    /// current capacity only bring the local view up to date.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Io`] if the region cannot be extended or
    /// remapped, and [`crate::StorageError::Closed`] after [`Storage::close`].
    fn resize(&mut self, new_size: u64) -> StorageResult<()>;

    /// Borrows the bytes in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::OutOfBounds`] if the range is not inside
    /// the mapped region.
    fn get_bytes(&self, start: u64, end: u64) -> StorageResult<&[u8]>;

    /// Mutably borrows the bytes in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::OutOfBounds`] if the range is not inside
    /// the mapped region.
    fn get_bytes_mut(&mut self, start: u64, end: u64) -> StorageResult<&mut [u8]>;

    /// Signals that the window `[start, end)` is no longer in use.
    fn return_bytes(&self, _start: u64, _end: u64) {}

    /// Shared capacity of the data region in bytes.
    fn capacity(&self) -> u64 {
        self.header().capacity()
    }

    /// Number of bytes this instance can currently address.
    fn mapped_len(&self) -> u64;

    /// The live header.
    fn header(&self) -> &HeaderCell;

    /// Reserved bytes as an integer percentage of capacity.
    fn utilization(&self) -> u64 {
        self.header().utilization()
    }

    /// Forces the data and header regions to their backing medium.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Io`] if the flush fails.
    fn flush(&self) -> StorageResult<()>;

    /// Picks up growth performed by another party.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Io`] if remapping fails.
    fn refresh(&mut self) -> StorageResult<()>;

    /// Releases the regions and their backing resources.
    ///
    /// Afterwards the header reads as all zeros and every window request
    /// fails with [`crate::StorageError::Closed`]. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Io`] if the final flush fails.
    fn close(&mut self) -> StorageResult<()>;

    /// Whether [`Storage::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// Validates `[start, end)` against `[0, len)` and converts it to indices.
pub(crate) fn window(start: u64, end: u64, len: u64) -> StorageResult<std::ops::Range<usize>> {
    if start > end || end > len {
        return Err(crate::StorageError::OutOfBounds {
            start,
            end,
            valid_start: 0,
            valid_end: len,
        });
    }
    Ok(start as usize..end as usize)
}
