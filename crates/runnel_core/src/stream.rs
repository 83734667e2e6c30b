//! The stream handle.

use crate::config::StreamConfig;
use crate::error::{CoreError, CoreResult};
use crate::reader::StreamReader;
use crate::record::{decode, record_size, Record};
use crate::writer::StreamWriter;
use parking_lot::{Condvar, Mutex, RwLock};
use runnel_storage::{MmapStorage, Storage, StorageError, StreamHeader};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// State shared by a stream and every writer and reader attached to it.
pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) id: String,
    pub(crate) record_size: u64,
    pub(crate) config: StreamConfig,
    /// Header atomics and windows for reading take the read lock; resize,
    /// refresh and payload copies take the write lock.
    pub(crate) storage: RwLock<Box<dyn Storage>>,
    /// Capacity this process last mapped.
    pub(crate) known_capacity: AtomicU64,
    alive: AtomicBool,
    publish_lock: Mutex<()>,
    published: Condvar,
}

impl Shared {
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn header(&self) -> StreamHeader {
        self.storage.read().header().load()
    }

    pub(crate) fn watermark(&self) -> u64 {
        self.storage.read().header().last_message()
    }

    /// Makes sure the local mapping covers `[0, end)`.
    pub(crate) fn ensure_mapped(&self, end: u64) -> CoreResult<()> {
        if self.storage.read().mapped_len() >= end {
            return Ok(());
        }
        let mut storage = self.storage.write();
        if storage.mapped_len() < end {
            storage.refresh()?;
        }
        Ok(())
    }

    /// Remaps when another party has grown the region since we last looked.
    pub(crate) fn refresh_if_grown(&self) -> CoreResult<()> {
        let capacity = self.storage.read().capacity();
        if capacity == self.known_capacity.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut storage = self.storage.write();
        storage.refresh()?;
        self.known_capacity
            .store(storage.capacity(), Ordering::Release);
        Ok(())
    }

    /// Wakes every same-process thread waiting on the watermark.
    pub(crate) fn notify_published(&self) {
        let _guard = self.publish_lock.lock();
        self.published.notify_all();
    }

    /// Waits until the watermark reaches `end`, the stream closes, or
    /// `timeout` passes, whichever comes first.
    ///
    /// Publications from other processes are not signalled; callers re-check
    /// after the timeout.
    pub(crate) fn wait_for_publish(&self, end: u64, timeout: Duration) {
        let mut guard = self.publish_lock.lock();
        if !self.is_alive() || self.watermark() >= end {
            return;
        }
        self.published.wait_for(&mut guard, timeout);
    }

    fn close(&self) -> CoreResult<()> {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let closed = self.storage.write().close();
        self.notify_published();
        debug!(name = %self.name, id = %self.id, "closed stream");
        closed.map_err(CoreError::from)
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("record_size", &self.record_size)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

/// A typed handle to one append-only log.
///
/// A stream binds a log id to a [`Storage`] and fixes the record size from
/// `T`. Any number of [`StreamWriter`]s and [`StreamReader`]s may be attached,
/// and any number of streams, in this process or others, may be opened on the
/// same id; they all see the same header and records.
///
/// Cloning a stream yields another handle to the same open log. Closing any
/// clone closes them all.
///
/// # Example
///
/// ```rust
/// use runnel_core::{Stream, StreamConfig};
///
/// let dir = tempfile::tempdir().unwrap();
/// let config = StreamConfig::new().root(dir.path());
/// let stream: Stream<i64> = Stream::open_with_config("prices", Some("ticks"), None, config).unwrap();
///
/// let writer = stream.writer().unwrap();
/// writer.write(&42).unwrap();
///
/// let reader = stream.reader(0).unwrap();
/// assert_eq!(reader.read().unwrap(), 42);
/// assert_eq!(stream.size(), 1);
/// ```
pub struct Stream<T: Record> {
    shared: Arc<Shared>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _record: PhantomData,
        }
    }
}

impl<T: Record> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("shared", &self.shared)
            .finish()
    }
}

impl<T: Record> Stream<T> {
    /// Opens a stream with the default configuration.
    ///
    /// See [`Stream::open_with_config`].
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be opened or `T` is zero-sized.
    pub fn open(
        name: &str,
        id: Option<&str>,
        storage: Option<Box<dyn Storage>>,
    ) -> CoreResult<Self> {
        Self::open_with_config(name, id, storage, StreamConfig::default())
    }

    /// Opens a stream.
    ///
    /// # Arguments
    ///
    /// * `name` - Human-readable label, used only for diagnostics
    /// * `id` - Log id; a fresh UUID is generated when `None`. When a storage
    ///   is injected and no id is given, the storage's id is used
    /// * `storage` - Storage to use; a [`MmapStorage`] under the configured
    ///   root is opened when `None`
    /// * `config` - Stream configuration
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `T` is zero-sized, and
    /// [`CoreError::Storage`] if the storage cannot be opened.
    pub fn open_with_config(
        name: &str,
        id: Option<&str>,
        storage: Option<Box<dyn Storage>>,
        config: StreamConfig,
    ) -> CoreResult<Self> {
        let record_size = record_size::<T>();
        if record_size == 0 {
            return Err(CoreError::invalid_operation(
                "zero-sized records cannot be stored",
            ));
        }

        let (id, storage) = match (id, storage) {
            (Some(id), Some(storage)) => (id.to_string(), storage),
            (None, Some(storage)) => (storage.id().to_string(), storage),
            (id, None) => {
                let id = id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
                let storage: Box<dyn Storage> =
                    Box::new(MmapStorage::init(&id, config.storage_options())?);
                (id, storage)
            }
        };

        let capacity = storage.capacity();
        debug!(name, id = %id, record_size, capacity, "opened stream");

        Ok(Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                id,
                record_size,
                config,
                storage: RwLock::new(storage),
                known_capacity: AtomicU64::new(capacity),
                alive: AtomicBool::new(true),
                publish_lock: Mutex::new(()),
                published: Condvar::new(),
            }),
            _record: PhantomData,
        })
    }

    /// The diagnostic name given at open.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The log id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Size of one record in bytes.
    #[must_use]
    pub fn record_size(&self) -> u64 {
        self.shared.record_size
    }

    /// The configuration this stream was opened with.
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    /// Whether the stream is open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Number of published records. 0 once closed.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.shared.storage.read().header().entry_count()
    }

    /// A snapshot of the header.
    #[must_use]
    pub fn header(&self) -> StreamHeader {
        self.shared.header()
    }

    /// Reserved bytes as an integer percentage of capacity.
    #[must_use]
    pub fn utilization(&self) -> u64 {
        self.shared.storage.read().utilization()
    }

    /// Returns the record at `index`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotYetPublished`] if the record lies at or past the
    ///   watermark. This is not a failure; the record may appear later.
    /// - [`CoreError::Storage`] with [`StorageError::OutOfBounds`] if the
    ///   record lies past the end of the data region.
    /// - [`CoreError::Closed`] if the stream is closed.
    /// - [`CoreError::InvalidOperation`] if the byte offset of `index` does
    ///   not fit in a `u64`.
    pub fn get(&self, index: u64) -> CoreResult<T> {
        if !self.is_alive() {
            return Err(CoreError::Closed);
        }
        let len = self.record_size();
        let offset = index
            .checked_mul(len)
            .ok_or_else(|| CoreError::invalid_operation(format!("index {index} overflows")))?;
        let end = offset
            .checked_add(len)
            .ok_or_else(|| CoreError::invalid_operation(format!("index {index} overflows")))?;

        let header = self.header();
        if end > header.capacity {
            return Err(StorageError::OutOfBounds {
                start: offset,
                end,
                valid_start: 0,
                valid_end: header.capacity,
            }
            .into());
        }
        if end > header.last_message {
            return Err(CoreError::NotYetPublished {
                offset,
                watermark: header.last_message,
            });
        }

        self.shared.ensure_mapped(end)?;
        let storage = self.shared.storage.read();
        let record = decode(storage.get_bytes(offset, end)?);
        storage.return_bytes(offset, end);
        record
    }

    /// Attaches a new writer.
    ///
    /// # Errors
    ///
    /// See [`StreamWriter::attach`].
    pub fn writer(&self) -> CoreResult<StreamWriter<T>> {
        StreamWriter::attach(self)
    }

    /// Attaches a new reader starting at byte offset `base`.
    ///
    /// # Errors
    ///
    /// See [`StreamReader::attach`].
    pub fn reader(&self, base: u64) -> CoreResult<StreamReader<T>> {
        StreamReader::attach(self, base)
    }

    /// Flushes records and header to the backing medium.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Storage`] if the flush fails or the stream is
    /// closed.
    pub fn flush(&self) -> CoreResult<()> {
        self.shared.storage.read().flush()?;
        Ok(())
    }

    /// Closes the stream.
    ///
    /// Attached writers and readers stop, waiting readers are woken, and the
    /// storage is released. The files stay on disk. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Storage`] if the final flush fails.
    pub fn close(&self) -> CoreResult<()> {
        self.shared.close()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runnel_storage::InMemoryStorage;
    use tempfile::tempdir;

    fn memory_stream(capacity: u64) -> Stream<i64> {
        let storage = Box::new(InMemoryStorage::with_capacity("mem", capacity));
        Stream::open("test", None, Some(storage)).unwrap()
    }

    #[test]
    fn open_with_injected_storage() {
        let stream = memory_stream(4096);
        assert_eq!(stream.name(), "test");
        assert_eq!(stream.id(), "mem");
        assert_eq!(stream.record_size(), 8);
        assert!(stream.is_alive());
        assert_eq!(stream.size(), 0);
        assert_eq!(stream.header().capacity, 4096);
    }

    #[test]
    fn explicit_id_overrides_storage_id() {
        let storage = Box::new(InMemoryStorage::new("mem"));
        let stream: Stream<i64> = Stream::open("test", Some("named"), Some(storage)).unwrap();
        assert_eq!(stream.id(), "named");
    }

    #[test]
    fn open_generates_uuid_id() {
        let dir = tempdir().unwrap();
        let config = StreamConfig::new().root(dir.path());
        let stream: Stream<u32> = Stream::open_with_config("test", None, None, config).unwrap();

        assert!(Uuid::parse_str(stream.id()).is_ok());
        assert!(dir.path().join(stream.id()).exists());
        assert!(dir.path().join(format!("{}_header", stream.id())).exists());
    }

    #[test]
    fn zero_sized_records_rejected() {
        let storage = Box::new(InMemoryStorage::new("mem"));
        let result = Stream::<()>::open("test", None, Some(storage));
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn get_distinguishes_unpublished_from_out_of_bounds() {
        let stream = memory_stream(64);
        let writer = stream.writer().unwrap();
        writer.write(&7).unwrap();

        assert_eq!(stream.get(0).unwrap(), 7);
        assert!(matches!(
            stream.get(1),
            Err(CoreError::NotYetPublished {
                offset: 8,
                watermark: 8
            })
        ));
        assert!(matches!(
            stream.get(1000),
            Err(CoreError::Storage(StorageError::OutOfBounds { .. }))
        ));
        assert!(stream.get(1).unwrap_err().is_transient());
    }

    #[test]
    fn get_rejects_indexes_past_the_address_space() {
        let stream = memory_stream(64);
        stream.writer().unwrap().write(&7).unwrap();

        // The offset fits in a u64 but the end of the record does not.
        assert!(matches!(
            stream.get(u64::MAX / 8),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            stream.get(u64::MAX),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let stream = memory_stream(4096);
        let clone = stream.clone();
        stream.close().unwrap();
        stream.close().unwrap();

        assert!(!clone.is_alive());
        assert!(matches!(clone.get(0), Err(CoreError::Closed)));
    }

    #[test]
    fn closed_mapped_stream_reports_zero() {
        let dir = tempdir().unwrap();
        let config = StreamConfig::new().root(dir.path());
        let stream: Stream<i64> =
            Stream::open_with_config("test", Some("zero"), None, config).unwrap();
        stream.writer().unwrap().write(&1).unwrap();
        assert_eq!(stream.size(), 1);

        stream.close().unwrap();
        assert_eq!(stream.size(), 0);
        assert_eq!(stream.header(), StreamHeader::default());
        assert_eq!(stream.utilization(), 0);
    }

    #[test]
    fn wait_for_publish_returns_when_closed() {
        let stream = memory_stream(4096);
        stream.close().unwrap();
        // Must not block for the full timeout.
        stream
            .shared()
            .wait_for_publish(8, Duration::from_secs(60));
    }
}
