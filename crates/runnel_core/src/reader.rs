//! Consuming records from a stream.

use crate::error::{CoreError, CoreResult};
use crate::record::{decode, Record};
use crate::stream::{Shared, Stream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Reads the records of a stream in order, starting from a byte offset.
///
/// Each reader has its own cursor and its own polling thread, which watches
/// the watermark and hands records over one at a time as they are published.
/// Readers never modify the log; any number of them can follow the same
/// stream independently.
#[derive(Debug)]
pub struct StreamReader<T: Record> {
    inner: Arc<ReaderInner>,
    rx: Option<Receiver<CoreResult<T>>>,
    worker: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct ReaderInner {
    shared: Arc<Shared>,
    alive: AtomicBool,
    base: u64,
    /// Bytes delivered since `base`.
    offset: AtomicU64,
}

impl<T: Record> StreamReader<T> {
    /// Attaches a reader to `stream` that starts at byte offset `base`.
    ///
    /// `base` 0 reads the stream from the beginning; `index * record_size`
    /// starts at record `index`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidOperation`] if `base` is not a multiple of the
    ///   record size
    /// - [`CoreError::Closed`] if the stream is closed
    /// - [`CoreError::Io`] if the polling thread cannot be started
    pub fn attach(stream: &Stream<T>, base: u64) -> CoreResult<Self> {
        let shared = Arc::clone(stream.shared());
        if base % shared.record_size != 0 {
            return Err(CoreError::invalid_operation(format!(
                "base {base} is not a multiple of the record size {}",
                shared.record_size
            )));
        }
        if !shared.is_alive() {
            return Err(CoreError::Closed);
        }

        let inner = Arc::new(ReaderInner {
            shared,
            alive: AtomicBool::new(true),
            base,
            offset: AtomicU64::new(0),
        });
        let (tx, rx) = mpsc::sync_channel(0);

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name(format!("runnel-reader-{}", inner.shared.id))
            .spawn(move || worker_inner.poll::<T>(&tx))?;

        debug!(id = %inner.shared.id, base, "attached reader");

        Ok(Self {
            inner,
            rx: Some(rx),
            worker: Some(worker),
        })
    }

    /// Returns the next record, blocking until one is published.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] once the reader or its stream is closed,
    /// or a storage error that stopped the polling thread.
    pub fn read(&self) -> CoreResult<T> {
        let rx = self.receiver()?;
        rx.recv().map_err(|_| CoreError::Closed)?
    }

    /// Returns the next record, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` if nothing was published in time.
    ///
    /// # Errors
    ///
    /// As [`StreamReader::read`].
    pub fn read_timeout(&self, timeout: Duration) -> CoreResult<Option<T>> {
        let rx = self.receiver()?;
        match rx.recv_timeout(timeout) {
            Ok(record) => record.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CoreError::Closed),
        }
    }

    /// Returns the next record if one is ready now.
    ///
    /// # Errors
    ///
    /// As [`StreamReader::read`].
    pub fn try_read(&self) -> CoreResult<Option<T>> {
        let rx = self.receiver()?;
        match rx.try_recv() {
            Ok(record) => record.map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(CoreError::Closed),
        }
    }

    /// Byte offset of the next record to be delivered.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    /// The offset this reader started at.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.inner.base
    }

    /// Whether this reader and its stream are open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    /// Closes the reader. Its polling thread stops on its next iteration.
    pub fn close(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }

    fn receiver(&self) -> CoreResult<&Receiver<CoreResult<T>>> {
        if !self.inner.is_alive() {
            return Err(CoreError::Closed);
        }
        self.rx.as_ref().ok_or(CoreError::Closed)
    }
}

impl<T: Record> Drop for StreamReader<T> {
    fn drop(&mut self) {
        self.close();
        // Unblocks a polling thread waiting on a hand-off.
        self.rx.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl ReaderInner {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.shared.is_alive()
    }

    fn position(&self) -> u64 {
        self.base + self.offset.load(Ordering::Acquire)
    }

    fn poll<T: Record>(&self, tx: &SyncSender<CoreResult<T>>) {
        let len = self.shared.record_size;
        while self.is_alive() {
            match self.next::<T>() {
                Ok(Some(record)) => {
                    if tx.send(Ok(record)).is_err() {
                        break;
                    }
                    self.offset.fetch_add(len, Ordering::AcqRel);
                }
                Ok(None) => self
                    .shared
                    .wait_for_publish(self.position() + len, self.shared.config.poll_interval),
                Err(e) => {
                    // Storage errors after a close are expected.
                    if self.is_alive() {
                        error!(id = %self.shared.id, position = self.position(), error = %e, "reader stopped");
                        let _ = tx.send(Err(e));
                    }
                    break;
                }
            }
        }
        debug!(id = %self.shared.id, position = self.position(), "reader finished");
    }

    /// The record at the cursor, if it has been published.
    fn next<T: Record>(&self) -> CoreResult<Option<T>> {
        self.shared.refresh_if_grown()?;

        let start = self.position();
        let end = start + self.shared.record_size;
        if end > self.shared.watermark() {
            return Ok(None);
        }

        self.shared.ensure_mapped(end)?;
        let storage = self.shared.storage.read();
        let record = decode(storage.get_bytes(start, end)?);
        storage.return_bytes(start, end);
        record.map(Some)
    }
}
