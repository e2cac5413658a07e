//! Single-writer side of the broadcast buffer.

use std::sync::atomic::{fence, Ordering};

use crate::bits::align;
use crate::broadcast::descriptor::{self, PADDING_MSG_TYPE_ID};
use crate::buffer::AtomicBuffer;
use crate::error::Result;
use crate::ring::descriptor::check_msg_type_id;

/// Publishes messages to any number of uncoordinated receivers.
///
/// Writes are never refused for lack of space: older records are simply
/// overwritten, and it is the receivers' job to detect being lapped.
pub struct BroadcastTransmitter<A: AtomicBuffer> {
    buffer: A,
    capacity: usize,
    max_msg_length: usize,
    tail_intent_counter_index: usize,
    tail_counter_index: usize,
    latest_counter_index: usize,
}

impl<A: AtomicBuffer> BroadcastTransmitter<A> {
    /// Wrap `buffer`, validating capacity and alignment.
    pub fn new(buffer: A) -> Result<Self> {
        let capacity = descriptor::check_capacity(buffer.capacity())?;
        buffer.verify_alignment()?;
        Ok(Self {
            buffer,
            capacity,
            max_msg_length: descriptor::max_msg_length(capacity),
            tail_intent_counter_index: capacity + descriptor::TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + descriptor::TAIL_COUNTER_OFFSET,
            latest_counter_index: capacity + descriptor::LATEST_COUNTER_OFFSET,
        })
    }

    /// Size of the data region in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest accepted payload: `capacity / 8`.
    pub fn max_msg_length(&self) -> usize {
        self.max_msg_length
    }

    /// The underlying region.
    pub fn buffer(&self) -> &A {
        &self.buffer
    }

    /// Publish `src` under `msg_type_id`, overwriting the oldest records.
    pub fn transmit(&mut self, msg_type_id: i32, src: &[u8]) -> Result<()> {
        check_msg_type_id(msg_type_id)?;
        self.check_msg_length(src.len())?;

        let buffer = &self.buffer;
        let mask = self.capacity - 1;

        // Single writer: the committed tail is a plain read.
        let mut current_tail = buffer.get_i64(self.tail_counter_index);
        let mut record_offset = (current_tail as usize) & mask;

        let record_length = descriptor::HEADER_LENGTH + src.len();
        let aligned_record_length = align(record_length, descriptor::RECORD_ALIGNMENT);
        let new_tail = current_tail + aligned_record_length as i64;

        let to_end_of_buffer = self.capacity - record_offset;
        if to_end_of_buffer < aligned_record_length {
            self.signal_tail_intent(new_tail + to_end_of_buffer as i64);

            buffer.put_i32(
                descriptor::length_offset(record_offset),
                to_end_of_buffer as i32,
            );
            buffer.put_i32(descriptor::type_offset(record_offset), PADDING_MSG_TYPE_ID);

            current_tail += to_end_of_buffer as i64;
            record_offset = 0;
        } else {
            self.signal_tail_intent(new_tail);
        }

        buffer.put_i32(descriptor::length_offset(record_offset), record_length as i32);
        buffer.put_i32(descriptor::type_offset(record_offset), msg_type_id);
        buffer.put_bytes(descriptor::msg_offset(record_offset), src);

        buffer.put_i64(self.latest_counter_index, current_tail);
        buffer.put_i64_ordered(
            self.tail_counter_index,
            current_tail + aligned_record_length as i64,
        );

        Ok(())
    }

    /// Advance the intent counter before touching any record bytes, so a
    /// receiver validating against it can never miss an overwrite in flight.
    fn signal_tail_intent(&self, new_tail: i64) {
        self.buffer
            .put_i64_ordered(self.tail_intent_counter_index, new_tail);
        // The release store orders what came before it; this fence keeps the
        // record stores below from moving ahead of the intent signal.
        fence(Ordering::SeqCst);
    }

    fn check_msg_length(&self, length: usize) -> Result<()> {
        if length > self.max_msg_length {
            return Err(crate::error::Error::MsgLength {
                length,
                max: self.max_msg_length,
            });
        }
        Ok(())
    }
}
