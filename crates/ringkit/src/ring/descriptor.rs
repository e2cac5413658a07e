//! Byte-exact record and trailer geometry shared by both ring buffers.
//!
//! A record is an 8-byte header followed by the payload, aligned to 8 bytes:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |R|                       Record Length                         |
//! +-+-------------------------------------------------------------+
//! |                         Message Type                          |
//! +---------------------------------------------------------------+
//! |                        Encoded Message                       ...
//!...                                                              |
//! +---------------------------------------------------------------+
//! ```
//!
//! A negative length marks a claimed record that is not yet published; the
//! release-store of the positive length is the publication point.

use crate::bits::CACHE_LINE_LENGTH;
use crate::error::{Error, Result};

/// Length of a record header: 32-bit length then 32-bit type id.
pub const HEADER_LENGTH: usize = std::mem::size_of::<i32>() * 2;

/// Records start on multiples of this within the data region.
pub const ALIGNMENT: usize = HEADER_LENGTH;

/// Reserved type id for records that pad out the tail of the data region.
pub const PADDING_MSG_TYPE_ID: i32 = -1;

/// Offset of the length field from the start of a record.
#[inline]
pub const fn length_offset(record_offset: usize) -> usize {
    record_offset
}

/// Offset of the type-id field from the start of a record.
#[inline]
pub const fn type_offset(record_offset: usize) -> usize {
    record_offset + std::mem::size_of::<i32>()
}

/// Offset of the payload from the start of a record.
#[inline]
pub const fn encoded_msg_offset(record_offset: usize) -> usize {
    record_offset + HEADER_LENGTH
}

/// Pack a header so it can be staged with a single 64-bit store.
///
/// Length occupies the low word and type id the high word, matching the
/// field order of the native-endian record layout.
#[inline]
pub const fn make_header(length: i32, msg_type_id: i32) -> i64 {
    ((msg_type_id as i64 & 0xFFFF_FFFF) << 32) | (length as i64 & 0xFFFF_FFFF)
}

/// Extract the record length (possibly negative while claimed).
#[inline]
pub const fn record_length(header: i64) -> i32 {
    header as i32
}

/// Extract the message type id.
#[inline]
pub const fn message_type_id(header: i64) -> i32 {
    (header >> 32) as i32
}

/// Reject reserved message type ids.
#[inline]
pub fn check_msg_type_id(msg_type_id: i32) -> Result<()> {
    if msg_type_id < 1 {
        return Err(Error::MsgTypeId { msg_type_id });
    }
    Ok(())
}

/// Trailer counter offsets, measured from the end of the data region.
///
/// Each counter sits two cache lines past the previous one so no two share a
/// line even with adjacent-line prefetching; the first gap also absorbs the
/// one-to-one producer's pre-zeroing of the header slot that follows a record
/// ending exactly at the region boundary.
pub mod trailer {
    use super::CACHE_LINE_LENGTH;

    /// Write cursor, advanced by producers.
    pub const TAIL_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 2;

    /// Producers' cached copy of the consumer position.
    pub const HEAD_CACHE_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 4;

    /// Consumer position, advanced on read.
    pub const HEAD_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 6;

    /// Monotonic correlation-id counter.
    pub const CORRELATION_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 8;

    /// Consumer liveness timestamp.
    pub const CONSUMER_HEARTBEAT_OFFSET: usize = CACHE_LINE_LENGTH * 10;

    /// Total trailer size appended to the data region.
    pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 12;
}

/// Validate a total region size and return the data capacity it carries.
pub fn check_capacity(total_capacity: usize) -> Result<usize> {
    let capacity = total_capacity.wrapping_sub(trailer::TRAILER_LENGTH);
    if total_capacity < trailer::TRAILER_LENGTH || !crate::bits::is_power_of_two(capacity) {
        return Err(Error::CapacityNotPowerOfTwo { capacity });
    }
    Ok(capacity)
}

/// Maximum payload length accepted by a ring over `capacity` data bytes.
#[inline]
pub const fn max_msg_length(capacity: usize) -> usize {
    capacity / 8
}
