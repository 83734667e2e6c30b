//! Appending records to a stream.

use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::stream::{Shared, Stream};
use parking_lot::Mutex;
use runnel_storage::{Publication, Reservation, StreamHeader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, warn};
use zerocopy::IntoBytes;

/// Reservations refused for lack of room before giving up.
const MAX_GROWTH_ATTEMPTS: usize = 8;

/// Appends records to a stream.
///
/// A write goes through three steps:
///
/// 1. **Reserve**: move `tail` past the record with a compare-and-swap,
///    doubling the data region first when it is over the growth threshold
/// 2. **Copy**: write the record bytes into the reserved window
/// 3. **Publish**: once every earlier reservation is published, move the
///    watermark past the record and count it
///
/// Records therefore become visible in reservation order, and readers never
/// see a window that is still being written, no matter how many writers in
/// how many processes share the log.
///
/// Records can be written synchronously with [`StreamWriter::write`] or
/// handed to the writer's delivery thread with [`StreamWriter::send`].
#[derive(Debug)]
pub struct StreamWriter<T: Record> {
    inner: Arc<WriterInner>,
    queue: Mutex<Option<SyncSender<T>>>,
    worker: Option<JoinHandle<CoreResult<()>>>,
}

#[derive(Debug)]
struct WriterInner {
    shared: Arc<Shared>,
    alive: AtomicBool,
}

impl<T: Record> StreamWriter<T> {
    /// Attaches a writer to `stream` and starts its delivery thread.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] if the stream is closed and
    /// [`CoreError::Io`] if the thread cannot be started.
    pub fn attach(stream: &Stream<T>) -> CoreResult<Self> {
        let shared = Arc::clone(stream.shared());
        if !shared.is_alive() {
            return Err(CoreError::Closed);
        }

        let inner = Arc::new(WriterInner {
            shared,
            alive: AtomicBool::new(true),
        });
        let (tx, rx) = mpsc::sync_channel::<T>(inner.shared.config.queue_capacity);

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name(format!("runnel-writer-{}", inner.shared.id))
            .spawn(move || {
                for record in rx {
                    if !worker_inner.is_alive() {
                        break;
                    }
                    if let Err(e) = worker_inner.append(record.as_bytes()) {
                        error!(id = %worker_inner.shared.id, error = %e, "writer stopped");
                        return Err(e);
                    }
                }
                Ok(())
            })?;

        debug!(id = %inner.shared.id, "attached writer");

        Ok(Self {
            inner,
            queue: Mutex::new(Some(tx)),
            worker: Some(worker),
        })
    }

    /// Writes one record and returns its byte offset.
    ///
    /// The record is visible to readers when this returns.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Closed`] if this writer or its stream is closed; nothing
    ///   is written
    /// - [`CoreError::StorageFull`] if no room could be made for the record
    /// - [`CoreError::RaceInconsistency`] if the header was changed in a way
    ///   the write protocol forbids
    /// - [`CoreError::Storage`] if growing, mapping, copying or flushing
    ///   fails. A record that could not be copied is published empty.
    pub fn write(&self, record: &T) -> CoreResult<u64> {
        self.inner.append(record.as_bytes())
    }

    /// Queues one record for the delivery thread.
    ///
    /// Blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] if the writer is closed or its delivery
    /// thread has stopped. [`StreamWriter::finish`] reports why it stopped.
    pub fn send(&self, record: T) -> CoreResult<()> {
        if !self.is_alive() {
            return Err(CoreError::Closed);
        }
        let sender = self.queue.lock().clone().ok_or(CoreError::Closed)?;
        sender.send(record).map_err(|_| CoreError::Closed)
    }

    /// Whether this writer and its stream are open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    /// Closes the writer. Queued records that were not written yet are
    /// discarded.
    pub fn close(&self) {
        self.inner.alive.store(false, Ordering::Release);
        self.queue.lock().take();
    }

    /// Writes every queued record, stops the delivery thread and closes the
    /// writer.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the delivery thread, if any.
    pub fn finish(mut self) -> CoreResult<()> {
        self.queue.lock().take();
        let result = self.join();
        self.inner.alive.store(false, Ordering::Release);
        result
    }

    fn join(&mut self) -> CoreResult<()> {
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(CoreError::invalid_operation("writer thread panicked"))),
            None => Ok(()),
        }
    }
}

impl<T: Record> Drop for StreamWriter<T> {
    fn drop(&mut self) {
        self.close();
        if let Err(e) = self.join() {
            debug!(id = %self.inner.shared.id, error = %e, "dropped writer whose delivery thread failed");
        }
    }
}

impl WriterInner {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.shared.is_alive()
    }

    fn append(&self, bytes: &[u8]) -> CoreResult<u64> {
        if !self.is_alive() {
            return Err(CoreError::Closed);
        }
        let len = bytes.len() as u64;
        let offset = self.reserve(len)?;

        if let Err(e) = self.copy(offset, bytes) {
            // An unpublished reservation would stall every later writer.
            warn!(id = %self.shared.id, offset, error = %e, "write failed, publishing an empty record");
            let _ = self.clear(offset, len);
            let _ = self.publish(offset, len);
            self.shared.notify_published();
            return Err(e);
        }

        self.publish(offset, len)?;
        self.shared.notify_published();

        if self.shared.config.flush_on_write {
            self.shared.storage.read().flush()?;
        }
        Ok(offset)
    }

    fn copy(&self, offset: u64, bytes: &[u8]) -> CoreResult<()> {
        let end = offset + bytes.len() as u64;
        self.shared.ensure_mapped(end)?;
        let mut storage = self.shared.storage.write();
        storage.get_bytes_mut(offset, end)?.copy_from_slice(bytes);
        storage.return_bytes(offset, end);
        Ok(())
    }

    fn clear(&self, offset: u64, len: u64) -> CoreResult<()> {
        let end = offset + len;
        self.shared.ensure_mapped(end)?;
        let mut storage = self.shared.storage.write();
        storage.get_bytes_mut(offset, end)?.fill(0);
        storage.return_bytes(offset, end);
        Ok(())
    }

    fn reserve(&self, len: u64) -> CoreResult<u64> {
        let mut refused = None;
        for _ in 0..MAX_GROWTH_ATTEMPTS {
            self.grow_if_needed(len)?;
            let reservation = self.shared.storage.read().header().reserve(len);
            match reservation {
                Reservation::Reserved { offset } => return Ok(offset),
                Reservation::Full { tail, capacity } => refused = Some((tail, capacity)),
                Reservation::Regressed { expected, observed } => {
                    return Err(CoreError::RaceInconsistency {
                        offset: expected,
                        observed,
                    });
                }
            }
        }
        let (tail, capacity) = refused.unwrap_or_default();
        Err(CoreError::StorageFull { tail, capacity })
    }

    /// Doubles the region while it is over the growth threshold or too small
    /// for `len` more bytes.
    fn grow_if_needed(&self, len: u64) -> CoreResult<()> {
        let threshold = self.shared.config.growth_threshold;
        let needs_growth = |header: &StreamHeader| {
            header.utilization() > threshold || header.tail.saturating_add(len) > header.capacity
        };

        if !needs_growth(&self.shared.header()) {
            return Ok(());
        }

        let mut storage = self.shared.storage.write();
        let header = storage.header().load();
        if !needs_growth(&header) {
            return Ok(());
        }

        let mut new_size = header.capacity.max(1).saturating_mul(2);
        while header.tail.saturating_add(len) > new_size {
            new_size = new_size.saturating_mul(2);
        }
        storage.resize(new_size)?;
        self.shared
            .known_capacity
            .store(storage.capacity(), Ordering::Release);
        Ok(())
    }

    /// Moves the watermark past `[offset, offset + len)` once everything
    /// before `offset` is published.
    ///
    /// Every window below `offset` was reserved before ours. Once we have
    /// waited `publish_timeout` for one of them, its writer is presumed dead
    /// and the window is published empty in its place.
    fn publish(&self, offset: u64, len: u64) -> CoreResult<()> {
        let deadline = Instant::now() + self.shared.config.publish_timeout;
        loop {
            if !self.shared.is_alive() {
                return Err(CoreError::Closed);
            }
            let outcome = self.shared.storage.read().header().try_publish(offset, len);
            match outcome {
                Publication::Published => return Ok(()),
                Publication::Overrun { watermark } => {
                    return Err(CoreError::RaceInconsistency {
                        offset,
                        observed: watermark,
                    });
                }
                Publication::Pending { watermark } => {
                    if Instant::now() < deadline {
                        self.shared
                            .wait_for_publish(offset, self.shared.config.poll_interval);
                    } else if watermark + len > offset {
                        // The stalled window does not line up with ours.
                        return Err(CoreError::RaceInconsistency {
                            offset,
                            observed: watermark,
                        });
                    } else {
                        self.release_stalled(watermark, len)?;
                    }
                }
            }
        }
    }

    /// Publishes the window at `watermark` empty on behalf of its writer.
    fn release_stalled(&self, watermark: u64, len: u64) -> CoreResult<()> {
        let end = watermark + len;
        self.shared.ensure_mapped(end)?;
        {
            let mut storage = self.shared.storage.write();
            // Its writer may have published while we waited for the lock.
            if storage.header().last_message() != watermark {
                return Ok(());
            }
            storage.get_bytes_mut(watermark, end)?.fill(0);
            storage.return_bytes(watermark, end);
            if storage.header().try_publish(watermark, len) == Publication::Published {
                warn!(id = %self.shared.id, offset = watermark, "published stalled record as empty");
            }
        }
        self.shared.notify_published();
        Ok(())
    }
}
