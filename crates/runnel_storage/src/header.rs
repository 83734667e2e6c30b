//! The shared stream header.
//!
//! Every log keeps its extent and visibility watermark in a 32-byte header
//! that lives in its own file, separate from the record data, so that growing
//! the data region never moves it:
//!
//! ```text
//! offset  field         meaning
//! 0       capacity      size of the data region in bytes
//! 8       tail          one past the last reserved byte
//! 16      last_message  one past the last published byte (watermark)
//! 24      entry_count   number of published records
//! ```
//!
//! Fields are native-endian `u64`. Any party with the header mapped sees
//! updates from every other party on its next atomic load, so the header is
//! manipulated exclusively through [`HeaderCell`]. [`StreamHeader`] is a plain
//! snapshot of the same layout.
//!
//! Invariant: `last_message <= tail <= capacity` at every observation.

use std::sync::atomic::{AtomicU64, Ordering};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of the persisted header in bytes.
pub const HEADER_SIZE: usize = 32;

/// A point-in-time copy of the stream header.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct StreamHeader {
    /// Current size in bytes of the data region.
    pub capacity: u64,
    /// One past the end of the last reserved record.
    pub tail: u64,
    /// One past the end of the last published record.
    pub last_message: u64,
    /// Number of published records.
    pub entry_count: u64,
}

const _: () = assert!(std::mem::size_of::<StreamHeader>() == HEADER_SIZE);

impl StreamHeader {
    /// Decodes a header from the start of `bytes`.
    ///
    /// Returns `None` if fewer than [`HEADER_SIZE`] bytes are given.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        Self::read_from_prefix(bytes).ok().map(|(header, _)| header)
    }

    /// Reserved bytes as an integer percentage of capacity.
    ///
    /// Returns 0 when the capacity is 0.
    #[must_use]
    pub fn utilization(&self) -> u64 {
        if self.capacity == 0 {
            return 0;
        }
        self.tail.saturating_mul(100) / self.capacity
    }
}

/// Outcome of an attempt to reserve space at the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Space was reserved at `offset`; `tail` now points past it.
    Reserved {
        /// Start of the reserved window.
        offset: u64,
    },
    /// The reservation would exceed capacity. `tail` was left unchanged.
    Full {
        /// Tail observed when the reservation was refused.
        tail: u64,
        /// Capacity observed when the reservation was refused.
        capacity: u64,
    },
    /// `tail` was observed moving backwards between two loads.
    Regressed {
        /// Tail the reservation expected.
        expected: u64,
        /// Smaller tail actually found.
        observed: u64,
    },
}

/// Outcome of an attempt to publish a written window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    /// The watermark now covers the window.
    Published,
    /// An earlier reservation has not been published yet.
    Pending {
        /// Current watermark.
        watermark: u64,
    },
    /// The watermark already lies past the start of the window.
    Overrun {
        /// Current watermark.
        watermark: u64,
    },
}

/// The live header, overlaid on mapped memory or owned in process.
#[repr(C)]
#[derive(Debug, Default)]
pub struct HeaderCell {
    capacity: AtomicU64,
    tail: AtomicU64,
    last_message: AtomicU64,
    entry_count: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<HeaderCell>() == HEADER_SIZE);
const _: () = assert!(std::mem::align_of::<HeaderCell>() == 8);

impl HeaderCell {
    /// Creates a zeroed header.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            capacity: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            last_message: AtomicU64::new(0),
            entry_count: AtomicU64::new(0),
        }
    }

    /// Takes a snapshot of all four fields.
    ///
    /// Fields are loaded one by one; under concurrent writers the snapshot is
    /// not atomic as a whole, but each field is individually up to date.
    #[must_use]
    pub fn load(&self) -> StreamHeader {
        StreamHeader {
            capacity: self.capacity(),
            tail: self.tail(),
            last_message: self.last_message(),
            entry_count: self.entry_count(),
        }
    }

    /// Current capacity of the data region.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Acquire)
    }

    /// Current tail.
    #[must_use]
    pub fn tail(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    /// Current watermark.
    #[must_use]
    pub fn last_message(&self) -> u64 {
        self.last_message.load(Ordering::Acquire)
    }

    /// Number of published records.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::Acquire)
    }

    /// Reserved bytes as an integer percentage of capacity.
    #[must_use]
    pub fn utilization(&self) -> u64 {
        self.load().utilization()
    }

    /// Raises the capacity to `capacity`. Never lowers it.
    pub fn grow_capacity(&self, capacity: u64) {
        self.capacity.fetch_max(capacity, Ordering::AcqRel);
    }

    /// Reserves `len` bytes at the tail with a compare-and-swap.
    ///
    /// The reservation is refused, without touching `tail`, if it would end
    /// past the current capacity.
    pub fn reserve(&self, len: u64) -> Reservation {
        let mut current = self.tail();
        loop {
            let capacity = self.capacity();
            let end = current.saturating_add(len);
            if end > capacity {
                return Reservation::Full {
                    tail: current,
                    capacity,
                };
            }
            match self
                .tail
                .compare_exchange_weak(current, end, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Reservation::Reserved { offset: current },
                Err(observed) if observed < current => {
                    return Reservation::Regressed {
                        expected: current,
                        observed,
                    };
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Moves the watermark from `offset` to `offset + len` and counts the record.
    ///
    /// Succeeds only when every earlier reservation has been published, so
    /// the watermark never covers a window that is still being written.
    pub fn try_publish(&self, offset: u64, len: u64) -> Publication {
        match self.last_message.compare_exchange(
            offset,
            offset + len,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.entry_count.fetch_add(1, Ordering::AcqRel);
                Publication::Published
            }
            Err(watermark) if watermark < offset => Publication::Pending { watermark },
            Err(watermark) => Publication::Overrun { watermark },
        }
    }

    /// Zeroes every field.
    pub fn reset(&self) {
        self.capacity.store(0, Ordering::Release);
        self.tail.store(0, Ordering::Release);
        self.last_message.store(0, Ordering::Release);
        self.entry_count.store(0, Ordering::Release);
    }
}
