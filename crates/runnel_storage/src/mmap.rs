//! Memory-mapped file storage.
//!
//! Each log id is backed by two files in the same directory:
//!
//! ```text
//! <root>/
//! ├─ <id>          # record data, grows by doubling
//! └─ <id>_header   # 32-byte StreamHeader
//! ```
//!
//! Both files are mapped shared, so every process that maps the same id sees
//! the same bytes. Growth takes an advisory lock on the header file, which
//! keeps two parties from extending the data file at the same time.

// Mapping a file is unsafe: the mapped bytes may be changed by other
// processes. Every access in this module goes through bounds-checked slices
// or through the atomics of `HeaderCell`.
#![allow(unsafe_code)]

use crate::backend::{window, Storage};
use crate::error::{StorageError, StorageResult};
use crate::header::{HeaderCell, HEADER_SIZE};
use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tracing::{debug, info, warn};

/// Initial size of a new data file: one page.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Suffix appended to the id to name the header file.
const HEADER_SUFFIX: &str = "_header";

/// Options for opening a [`MmapStorage`].
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Directory holding the files. `None` means [`std::env::temp_dir`].
    pub root: Option<PathBuf>,

    /// Size of a newly created data file.
    pub initial_size: u64,

    /// Whether to schedule a flush of every window handed back through
    /// [`Storage::return_bytes`].
    pub flush_on_return: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            root: None,
            initial_size: DEFAULT_PAGE_SIZE,
            flush_on_return: false,
        }
    }
}

impl StorageOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory holding the files.
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Sets the size of a newly created data file.
    #[must_use]
    pub const fn initial_size(mut self, size: u64) -> Self {
        self.initial_size = size;
        self
    }

    /// Sets whether returned windows are flushed.
    #[must_use]
    pub const fn flush_on_return(mut self, value: bool) -> Self {
        self.flush_on_return = value;
        self
    }

    /// The directory holding the files.
    #[must_use]
    pub fn root_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Path of the data file for `id`.
    #[must_use]
    pub fn data_path(&self, id: &str) -> PathBuf {
        self.root_dir().join(id)
    }

    /// Path of the header file for `id`. Always next to the data file.
    #[must_use]
    pub fn header_path(&self, id: &str) -> PathBuf {
        self.root_dir().join(format!("{id}{HEADER_SUFFIX}"))
    }
}

/// Header file mapping with the [`HeaderCell`] overlaid on it.
struct MappedHeader {
    map: MmapMut,
    cell: NonNull<HeaderCell>,
}

// SAFETY: `cell` points into `map`, which is owned by the same struct and
// never remapped. The cell is only accessed through atomics.
unsafe impl Send for MappedHeader {}
// SAFETY: see above; shared access is through `&HeaderCell`, which is `Sync`.
unsafe impl Sync for MappedHeader {}

impl MappedHeader {
    fn new(mut map: MmapMut, path: &Path) -> StorageResult<Self> {
        let ptr = map.as_mut_ptr();
        if map.len() < HEADER_SIZE || ptr.align_offset(std::mem::align_of::<HeaderCell>()) != 0 {
            return Err(StorageError::Corrupted(format!(
                "header mapping for {} is too short or misaligned",
                path.display()
            )));
        }
        let cell = NonNull::new(ptr.cast::<HeaderCell>())
            .ok_or_else(|| StorageError::Corrupted("null header mapping".to_string()))?;
        Ok(Self { map, cell })
    }

    fn cell(&self) -> &HeaderCell {
        // SAFETY: the pointer is non-null, aligned, covers HEADER_SIZE bytes
        // and stays valid for as long as `self.map` is alive.
        unsafe { self.cell.as_ref() }
    }
}

impl fmt::Debug for MappedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedHeader")
            .field("header", &self.cell().load())
            .finish()
    }
}

/// Exclusive advisory lock on the header file, released on drop.
struct GrowthLock<'a> {
    file: &'a File,
}

impl<'a> GrowthLock<'a> {
    fn acquire(file: &'a File) -> io::Result<Self> {
        FileExt::lock_exclusive(file)?;
        Ok(Self { file })
    }
}

impl Drop for GrowthLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

/// Storage backed by a pair of memory-mapped files.
///
/// Any number of instances, in any number of processes, may be opened on the
/// same id; they share the header and the record bytes through the mappings.
///
/// # Example
///
/// ```no_run
/// use runnel_storage::{MmapStorage, Storage, StorageOptions};
///
/// let mut storage = MmapStorage::init("events", StorageOptions::new().root("/tmp/runnel")).unwrap();
/// storage.get_bytes_mut(0, 5).unwrap().copy_from_slice(b"hello");
/// storage.return_bytes(0, 5);
/// storage.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct MmapStorage {
    id: String,
    options: StorageOptions,
    data_path: PathBuf,
    header_path: PathBuf,
    data_file: Option<File>,
    header_file: Option<File>,
    data: Option<MmapMut>,
    header: Option<MappedHeader>,
    /// Header view served once the mappings are gone.
    detached: HeaderCell,
}

impl MmapStorage {
    /// Opens or creates the files for `id` and maps them.
    ///
    /// A new data file is sized to `options.initial_size` and that size is
    /// recorded as the capacity.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if either file cannot be opened, sized
    /// or mapped, and [`StorageError::Corrupted`] if the header records more
    /// capacity than the data file holds.
    pub fn init(id: &str, options: StorageOptions) -> StorageResult<Self> {
        let root = options.root_dir();
        fs::create_dir_all(&root).map_err(|e| StorageError::open(&root, e))?;

        if options.initial_size == 0 {
            return Err(StorageError::open(
                options.data_path(id),
                io::Error::new(io::ErrorKind::InvalidInput, "initial size must be non-zero"),
            ));
        }

        let data_path = options.data_path(id);
        let header_path = options.header_path(id);

        let header_file = open_file(&header_path)?;
        let header_len = header_file
            .metadata()
            .map_err(|e| StorageError::open(&header_path, e))?
            .len();
        if header_len < HEADER_SIZE as u64 {
            // Zero-filled, so a new header starts with every field at 0.
            header_file
                .set_len(HEADER_SIZE as u64)
                .map_err(|e| StorageError::open(&header_path, e))?;
        }
        // SAFETY: the file is at least HEADER_SIZE bytes long and the mapping
        // is owned by MappedHeader for its whole lifetime.
        let header_map = unsafe { MmapOptions::new().len(HEADER_SIZE).map_mut(&header_file) }
            .map_err(|e| StorageError::open(&header_path, e))?;
        let header = MappedHeader::new(header_map, &header_path)?;

        let data_file = open_file(&data_path)?;
        let capacity = {
            let _lock =
                GrowthLock::acquire(&header_file).map_err(|e| StorageError::open(&header_path, e))?;
            prepare_data_file(&data_file, header.cell(), options.initial_size, &data_path)?
        };

        // SAFETY: the file is non-empty; the mapping is replaced, never
        // shrunk, and slices into it never outlive a borrow of `self`.
        let data = unsafe { MmapMut::map_mut(&data_file) }
            .map_err(|e| StorageError::open(&data_path, e))?;

        debug!(id, path = %data_path.display(), capacity, "opened mapped storage");

        Ok(Self {
            id: id.to_string(),
            options,
            data_path,
            header_path,
            data_file: Some(data_file),
            header_file: Some(header_file),
            data: Some(data),
            header: Some(header),
            detached: HeaderCell::new(),
        })
    }

    /// Deletes the data and header files for `id`. Missing files are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if a file exists but cannot be removed.
    pub fn remove(id: &str, options: &StorageOptions) -> StorageResult<()> {
        for path in [options.data_path(id), options.header_path(id)] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed storage file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io("remove", e)),
            }
        }
        Ok(())
    }

    /// Path of the data file.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Path of the header file.
    #[must_use]
    pub fn header_path(&self) -> &Path {
        &self.header_path
    }

    /// The options this storage was opened with.
    #[must_use]
    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Maps the data file again if its size differs from the current mapping.
    fn remap(&mut self) -> StorageResult<()> {
        let file = self.data_file.as_ref().ok_or(StorageError::Closed)?;
        let len = file
            .metadata()
            .map_err(|e| StorageError::io("stat", e))?
            .len();
        if self.data.as_ref().is_some_and(|map| map.len() as u64 == len) {
            return Ok(());
        }

        // SAFETY: as in `init`; `&mut self` guarantees no window into the
        // old mapping is still borrowed.
        let map = unsafe { MmapMut::map_mut(file) }.map_err(|e| StorageError::io("map", e))?;

        // The old mapping is released only once the new one is in place.
        let old = self.data.replace(map);
        debug!(
            id = %self.id,
            from = old.as_ref().map_or(0, |m| m.len()),
            to = len,
            "remapped data region"
        );
        drop(old);
        Ok(())
    }
}

impl Storage for MmapStorage {
    fn id(&self) -> &str {
        &self.id
    }

    fn resize(&mut self, new_size: u64) -> StorageResult<()> {
        let (Some(data_file), Some(header_file), Some(header)) =
            (&self.data_file, &self.header_file, &self.header)
        else {
            return Err(StorageError::Closed);
        };

        {
            let _lock = GrowthLock::acquire(header_file).map_err(|e| StorageError::io("lock", e))?;
            // Another party may have grown the file while we waited for the lock.
            let capacity = header.cell().capacity();
            if new_size > capacity {
                data_file
                    .set_len(new_size)
                    .map_err(|e| StorageError::io("truncate", e))?;
                header.cell().grow_capacity(new_size);
                info!(id = %self.id, from = capacity, to = new_size, "grew data region");
            }
        }

        self.remap()
    }

    fn get_bytes(&self, start: u64, end: u64) -> StorageResult<&[u8]> {
        let map = self.data.as_ref().ok_or(StorageError::Closed)?;
        let range = window(start, end, map.len() as u64)?;
        Ok(&map[range])
    }

    fn get_bytes_mut(&mut self, start: u64, end: u64) -> StorageResult<&mut [u8]> {
        let map = self.data.as_mut().ok_or(StorageError::Closed)?;
        let range = window(start, end, map.len() as u64)?;
        Ok(&mut map[range])
    }

    fn return_bytes(&self, start: u64, end: u64) {
        if !self.options.flush_on_return || end <= start {
            return;
        }
        if let Some(map) = &self.data {
            if let Err(e) = map.flush_async_range(start as usize, (end - start) as usize) {
                warn!(id = %self.id, start, end, error = %e, "failed to flush returned window");
            }
        }
    }

    fn mapped_len(&self) -> u64 {
        self.data.as_ref().map_or(0, |map| map.len() as u64)
    }

    fn header(&self) -> &HeaderCell {
        self.header.as_ref().map_or(&self.detached, MappedHeader::cell)
    }

    fn flush(&self) -> StorageResult<()> {
        let (Some(data), Some(header)) = (&self.data, &self.header) else {
            return Err(StorageError::Closed);
        };
        data.flush().map_err(|e| StorageError::io("flush", e))?;
        header.map.flush().map_err(|e| StorageError::io("flush", e))?;
        Ok(())
    }

    fn refresh(&mut self) -> StorageResult<()> {
        self.remap()
    }

    fn close(&mut self) -> StorageResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let flushed = self.flush();

        self.data = None;
        self.header = None;
        self.data_file = None;
        self.header_file = None;
        self.detached.reset();

        debug!(id = %self.id, "closed mapped storage");
        flushed
    }

    fn is_closed(&self) -> bool {
        self.header.is_none()
    }
}

fn open_file(path: &Path) -> StorageResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| StorageError::open(path, e))
}

/// Sizes a new data file and reconciles its length with the header.
///
/// Must be called with the growth lock held.
fn prepare_data_file(
    file: &File,
    header: &HeaderCell,
    initial_size: u64,
    path: &Path,
) -> StorageResult<u64> {
    let mut len = file
        .metadata()
        .map_err(|e| StorageError::open(path, e))?
        .len();
    if len == 0 {
        file.set_len(initial_size)
            .map_err(|e| StorageError::open(path, e))?;
        len = initial_size;
    }

    let capacity = header.capacity();
    if capacity > len {
        return Err(StorageError::Corrupted(format!(
            "header records capacity {capacity} but {} holds {len} bytes",
            path.display()
        )));
    }
    if capacity < len {
        if capacity != 0 {
            warn!(path = %path.display(), capacity, len, "header capacity behind data file, repairing");
        }
        header.grow_capacity(len);
    }
    Ok(len)
}
