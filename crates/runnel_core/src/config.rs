//! Stream configuration.

use runnel_storage::{StorageOptions, DEFAULT_PAGE_SIZE};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for opening a stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Directory holding the log files. `None` means the OS temp directory.
    pub root: Option<PathBuf>,

    /// Size of the data region when a log is first created.
    pub initial_capacity: u64,

    /// Utilization percentage above which writers double the region.
    pub growth_threshold: u64,

    /// Capacity of each writer's input queue.
    pub queue_capacity: usize,

    /// Whether to flush the storage after every write (safer but slower).
    pub flush_on_write: bool,

    /// Longest a reader sleeps before polling the header again.
    pub poll_interval: Duration,

    /// How long a writer waits for earlier reservations to be published.
    pub publish_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            root: None,
            initial_capacity: DEFAULT_PAGE_SIZE,
            growth_threshold: 75,
            queue_capacity: 10,
            flush_on_write: true,
            poll_interval: Duration::from_millis(1),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

impl StreamConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory holding the log files.
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Sets the initial size of the data region.
    #[must_use]
    pub const fn initial_capacity(mut self, size: u64) -> Self {
        self.initial_capacity = size;
        self
    }

    /// Sets the growth threshold percentage.
    #[must_use]
    pub const fn growth_threshold(mut self, percent: u64) -> Self {
        self.growth_threshold = percent;
        self
    }

    /// Sets the writer queue capacity.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets whether to flush after every write.
    #[must_use]
    pub const fn flush_on_write(mut self, value: bool) -> Self {
        self.flush_on_write = value;
        self
    }

    /// Sets the reader poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the publication timeout.
    #[must_use]
    pub const fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Storage options matching this configuration.
    #[must_use]
    pub fn storage_options(&self) -> StorageOptions {
        let options = StorageOptions::new().initial_size(self.initial_capacity);
        match &self.root {
            Some(root) => options.root(root),
            None => options,
        }
    }
}
