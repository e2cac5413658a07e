//! Lossy one-to-many transmission over a shared byte region.
//!
//! One transmitter publishes; any number of receivers poll independently and
//! without coordinating with the transmitter. A receiver that falls more than
//! a buffer's length behind is lapped: it loses the overwritten messages and
//! rejoins at the latest record.

mod receiver;
mod transmitter;

pub use receiver::{BroadcastReceiver, CopyBroadcastReceiver};
pub use transmitter::BroadcastTransmitter;

/// Byte layout of the broadcast buffer: record geometry plus the three-field
/// trailer (`tail_intent` is advanced before any bytes move, `tail` after the
/// record is complete, `latest` marks the rejoin point for lapped receivers).
pub mod descriptor {
    use crate::bits::{is_power_of_two, CACHE_LINE_LENGTH};
    use crate::error::{Error, Result};

    /// Offset within the trailer of the intended tail.
    pub const TAIL_INTENT_COUNTER_OFFSET: usize = 0;

    /// Offset within the trailer of the committed tail.
    pub const TAIL_COUNTER_OFFSET: usize = TAIL_INTENT_COUNTER_OFFSET + std::mem::size_of::<i64>();

    /// Offset within the trailer of the start of the latest record.
    pub const LATEST_COUNTER_OFFSET: usize = TAIL_COUNTER_OFFSET + std::mem::size_of::<i64>();

    /// Total trailer size appended to the data region.
    pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 2;

    /// Record header: 32-bit length then 32-bit type id.
    pub const HEADER_LENGTH: usize = std::mem::size_of::<i32>() * 2;

    /// Records start on multiples of this within the data region.
    pub const RECORD_ALIGNMENT: usize = HEADER_LENGTH;

    /// Reserved type id for padding records at the end of the region.
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

    /// Offset of the message payload from the start of a record.
    #[inline]
    pub const fn msg_offset(record_offset: usize) -> usize {
        record_offset + HEADER_LENGTH
    }

    /// Validate a total region size and return the data capacity it carries.
    pub fn check_capacity(total_capacity: usize) -> Result<usize> {
        let capacity = total_capacity.wrapping_sub(TRAILER_LENGTH);
        if total_capacity < TRAILER_LENGTH || !is_power_of_two(capacity) {
            return Err(Error::CapacityNotPowerOfTwo { capacity });
        }
        Ok(capacity)
    }

    /// Maximum payload length accepted over `capacity` data bytes.
    #[inline]
    pub const fn max_msg_length(capacity: usize) -> usize {
        capacity / 8
    }

}
