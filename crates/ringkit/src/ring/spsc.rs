//! One-producer/one-consumer ring buffer.
//!
//! Same record format and drain as the MPSC ring, but the sole producer owns
//! the tail outright: claiming is a pair of plain loads and a release store,
//! with no compare-and-set. The producer also pre-zeroes the header slot that
//! follows each claimed record so the consumer's next acquire load always
//! observes either zero (nothing yet) or a complete header.

use crate::bits::align;
use crate::buffer::AtomicBuffer;
use crate::error::Result;
use crate::ring::descriptor::{self, PADDING_MSG_TYPE_ID};
use crate::ring::{self, RingBuffer, RingLayout};

/// Lock-free SPSC ring buffer over an [`AtomicBuffer`] region.
///
/// Exactly one thread may produce and one may consume. Messages are strictly
/// FIFO. The trailer layout is identical to the MPSC ring, so a region can be
/// re-attached under either coordination scheme.
pub struct OneToOneRingBuffer<A: AtomicBuffer> {
    buffer: A,
    layout: RingLayout,
}

impl<A: AtomicBuffer> OneToOneRingBuffer<A> {
    /// Wrap `buffer`, validating capacity and alignment.
    pub fn new(buffer: A) -> Result<Self> {
        let layout = RingLayout::new(&buffer)?;
        Ok(Self { buffer, layout })
    }

    fn claim_capacity(&self, required: usize) -> Option<usize> {
        let buffer = &self.buffer;
        let layout = &self.layout;
        let capacity = layout.capacity;
        let mask = layout.mask();

        // Only this producer writes the tail and the head cache, so both are
        // plain loads; the real head is re-read only when the cache is stale.
        let mut head = buffer.get_i64(layout.head_cache_position_index);
        let tail = buffer.get_i64(layout.tail_position_index);

        let available = capacity as i64 - (tail - head);
        if required as i64 > available {
            head = buffer.get_i64_volatile(layout.head_position_index);
            if required as i64 > capacity as i64 - (tail - head) {
                return None;
            }
            buffer.put_i64(layout.head_cache_position_index, head);
        }

        let mut padding = 0;
        let mut record_index = (tail & mask) as usize;
        let to_buffer_end = capacity - record_index;

        if required > to_buffer_end {
            let mut head_index = (head & mask) as usize;
            if required > head_index {
                head = buffer.get_i64_volatile(layout.head_position_index);
                head_index = (head & mask) as usize;
                if required > head_index {
                    return None;
                }
                buffer.put_i64(layout.head_cache_position_index, head);
            }
            padding = to_buffer_end;
        }

        if padding != 0 {
            buffer.put_i64(0, 0);
            buffer.put_i64_ordered(
                record_index,
                descriptor::make_header(padding as i32, PADDING_MSG_TYPE_ID),
            );
            record_index = 0;
        }

        // Pre-zero the header slot after the record; it may spill into the
        // dead space ahead of the first trailer counter.
        buffer.put_i64(record_index + required, 0);
        buffer.put_i64_ordered(layout.tail_position_index, tail + (required + padding) as i64);

        Some(record_index)
    }
}

impl<A: AtomicBuffer> RingBuffer for OneToOneRingBuffer<A> {
    type Buffer = A;

    fn buffer(&self) -> &A {
        &self.buffer
    }

    fn capacity(&self) -> usize {
        self.layout.capacity
    }

    fn max_msg_length(&self) -> usize {
        self.layout.max_msg_length
    }

    fn write(&self, msg_type_id: i32, src: &[u8]) -> Result<bool> {
        descriptor::check_msg_type_id(msg_type_id)?;
        self.layout.check_msg_length(src.len())?;

        let record_length = src.len() + descriptor::HEADER_LENGTH;
        let required = align(record_length, descriptor::ALIGNMENT);

        let Some(record_index) = self.claim_capacity(required) else {
            return Ok(false);
        };

        self.buffer.put_i64_ordered(
            record_index,
            descriptor::make_header(-(record_length as i32), msg_type_id),
        );
        self.buffer
            .put_bytes(descriptor::encoded_msg_offset(record_index), src);
        self.buffer.put_i32_ordered(
            descriptor::length_offset(record_index),
            record_length as i32,
        );

        Ok(true)
    }

    fn try_claim(&self, msg_type_id: i32, length: usize) -> Result<Option<usize>> {
        descriptor::check_msg_type_id(msg_type_id)?;
        self.layout.check_msg_length(length)?;

        let record_length = length + descriptor::HEADER_LENGTH;
        let required = align(record_length, descriptor::ALIGNMENT);

        let Some(record_index) = self.claim_capacity(required) else {
            return Ok(None);
        };

        self.buffer.put_i64_ordered(
            record_index,
            descriptor::make_header(-(record_length as i32), msg_type_id),
        );

        Ok(Some(descriptor::encoded_msg_offset(record_index)))
    }

    fn commit(&self, index: usize) -> Result<()> {
        ring::commit_claim(&self.buffer, &self.layout, index)
    }

    fn abort(&self, index: usize) -> Result<()> {
        ring::abort_claim(&self.buffer, &self.layout, index)
    }

    fn read<F>(&self, handler: F, message_count_limit: usize) -> usize
    where
        F: FnMut(i32, &[u8]),
    {
        ring::read_messages(&self.buffer, &self.layout, handler, message_count_limit)
    }

    /// Unreachable by construction: the single producer cannot leave a gap
    /// the consumer observes before the tail moves.
    fn unblock(&self) -> bool {
        false
    }

    fn size(&self) -> usize {
        ring::consistent_size(&self.buffer, &self.layout)
    }

    fn producer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.layout.tail_position_index)
    }

    fn consumer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.layout.head_position_index)
    }

    fn next_correlation_id(&self) -> i64 {
        self.buffer
            .get_and_add_i64(self.layout.correlation_counter_index, 1)
    }

    fn consumer_heartbeat_time(&self) -> i64 {
        self.buffer
            .get_i64_volatile(self.layout.consumer_heartbeat_index)
    }

    fn update_consumer_heartbeat_time(&self, time: i64) {
        self.buffer
            .put_i64_ordered(self.layout.consumer_heartbeat_index, time);
    }
}
