//! Fixed-size record types.

use crate::error::{CoreError, CoreResult};
use zerocopy::{FromBytes, Immutable, IntoBytes};

/// A value that can be stored in a stream.
///
/// Records are copied byte for byte into the log, so they must have a fixed
/// size and no padding or pointers. Every type implementing the `zerocopy`
/// traits below is a record: the primitive integers and floats, arrays of
/// them, and `#[repr(C)]` structs deriving `FromBytes`, `IntoBytes` and
/// `Immutable`.
///
/// ```rust
/// use zerocopy::{FromBytes, Immutable, IntoBytes};
///
/// #[repr(C)]
/// #[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable)]
/// struct Tick {
///     timestamp: u64,
///     price: u64,
/// }
///
/// fn assert_record<T: runnel_core::Record>() {}
/// assert_record::<Tick>();
/// assert_record::<i64>();
/// ```
pub trait Record: FromBytes + IntoBytes + Immutable + Copy + Send + 'static {}

impl<T> Record for T where T: FromBytes + IntoBytes + Immutable + Copy + Send + 'static {}

/// Size of one record of type `T` in bytes.
pub(crate) fn record_size<T: Record>() -> u64 {
    std::mem::size_of::<T>() as u64
}

/// Copies a record out of a window of exactly its size.
pub(crate) fn decode<T: Record>(bytes: &[u8]) -> CoreResult<T> {
    T::read_from_bytes(bytes).map_err(|_| {
        CoreError::invalid_operation(format!(
            "window of {} bytes does not hold a {}-byte record",
            bytes.len(),
            record_size::<T>()
        ))
    })
}
