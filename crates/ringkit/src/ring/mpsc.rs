//! Many-producers/one-consumer ring buffer.
//!
//! Producers race a compare-and-set on the tail position to take exclusive
//! ownership of an aligned span of the data region, then publish with a
//! release store of the record's positive length. The consumer observes
//! publication with an acquire load of the same field; that pair is the only
//! inter-thread synchronisation point for record payloads.
//!
//! A producer that dies between winning the tail and publishing leaves a gap
//! the consumer cannot cross; [`ManyToOneRingBuffer::unblock`] converts such
//! a gap into a padding record without ever racing a live producer.

use crate::buffer::AtomicBuffer;
use crate::error::Result;
use crate::ring::descriptor::{self, PADDING_MSG_TYPE_ID};
use crate::ring::{self, RingBuffer, RingLayout};
use crate::bits::align;

/// Lock-free MPSC ring buffer over an [`AtomicBuffer`] region.
///
/// The region is the data area (power-of-two sized) followed by the counter
/// trailer described in [`descriptor::trailer`]. Any number of producer
/// threads may share one instance; exactly one thread may act as consumer.
pub struct ManyToOneRingBuffer<A: AtomicBuffer> {
    buffer: A,
    layout: RingLayout,
}

impl<A: AtomicBuffer> ManyToOneRingBuffer<A> {
    /// Wrap `buffer`, validating capacity and alignment.
    pub fn new(buffer: A) -> Result<Self> {
        let layout = RingLayout::new(&buffer)?;
        Ok(Self { buffer, layout })
    }

    /// Reserve `required` aligned bytes, inserting a padding record when the
    /// span would straddle the end of the data region.
    ///
    /// Returns the record offset, or `None` on insufficient capacity.
    fn claim_capacity(&self, required: usize) -> Option<usize> {
        let buffer = &self.buffer;
        let layout = &self.layout;
        let capacity = layout.capacity;
        let mask = layout.mask();

        // Producers work from a cached head; the real head is only re-read
        // (and the cache refreshed) when the cached view looks full.
        let mut head = buffer.get_i64(layout.head_cache_position_index);

        let mut tail: i64;
        let mut padding: usize;
        let mut record_index: usize;

        loop {
            tail = buffer.get_i64_volatile(layout.tail_position_index);

            let available = capacity as i64 - (tail - head);
            if required as i64 > available {
                head = buffer.get_i64_volatile(layout.head_position_index);
                if required as i64 > capacity as i64 - (tail - head) {
                    return None;
                }
                buffer.put_i64(layout.head_cache_position_index, head);
            }

            padding = 0;
            record_index = (tail & mask) as usize;
            let to_buffer_end = capacity - record_index;

            if required > to_buffer_end {
                // Wrap: the record must start at offset 0, which needs the
                // consumer to have cleared that much of the region start.
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

            if buffer.compare_and_set_i64(
                layout.tail_position_index,
                tail,
                tail + (required + padding) as i64,
            ) {
                break;
            }
        }

        if padding != 0 {
            buffer.put_i64_ordered(
                record_index,
                descriptor::make_header(padding as i32, PADDING_MSG_TYPE_ID),
            );
            record_index = 0;
        }

        Some(record_index)
    }
}

impl<A: AtomicBuffer> RingBuffer for ManyToOneRingBuffer<A> {
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

    fn unblock(&self) -> bool {
        let buffer = &self.buffer;
        let layout = &self.layout;
        let mask = layout.mask();

        let head = buffer.get_i64_volatile(layout.head_position_index);
        let tail = buffer.get_i64_volatile(layout.tail_position_index);
        if head == tail {
            return false;
        }

        let consumer_index = (head & mask) as usize;
        let producer_index = (tail & mask) as usize;

        let mut unblocked = false;
        let length = buffer.get_i32_volatile(descriptor::length_offset(consumer_index));
        if length < 0 {
            // Staged but never published: rewrite in place as padding.
            buffer.put_i32(
                descriptor::type_offset(consumer_index),
                PADDING_MSG_TYPE_ID,
            );
            buffer.put_i32_ordered(descriptor::length_offset(consumer_index), -length);
            unblocked = true;
        } else if length == 0 {
            // The producer won the tail but has not yet staged a header.
            // Scan forward for the next record; if everything between is
            // still zero on a second pass, the gap can be claimed as padding.
            let limit = if producer_index > consumer_index {
                producer_index
            } else {
                layout.capacity
            };

            let mut i = consumer_index + descriptor::ALIGNMENT;
            while i < limit {
                if buffer.get_i32_volatile(descriptor::length_offset(i)) != 0 {
                    if scan_back_to_confirm_still_zeroed(buffer, i, consumer_index) {
                        buffer.put_i32(
                            descriptor::type_offset(consumer_index),
                            PADDING_MSG_TYPE_ID,
                        );
                        buffer.put_i32_ordered(
                            descriptor::length_offset(consumer_index),
                            (i - consumer_index) as i32,
                        );
                        unblocked = true;
                    }
                    break;
                }
                i += descriptor::ALIGNMENT;
            }
        }

        unblocked
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

/// Re-read the gap behind a discovered record; a non-zero cell means a
/// producer got there first and the unblock must stand down.
fn scan_back_to_confirm_still_zeroed<A: AtomicBuffer>(
    buffer: &A,
    from: usize,
    limit: usize,
) -> bool {
    let mut i = from;
    while i > limit {
        i -= descriptor::ALIGNMENT;
        if buffer.get_i32_volatile(descriptor::length_offset(i)) != 0 {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AlignedBuffer;
    use crate::error::Error;
    use crate::ring::descriptor::trailer::TRAILER_LENGTH;

    const CAPACITY: usize = 1024;

    fn ring() -> ManyToOneRingBuffer<AlignedBuffer> {
        ManyToOneRingBuffer::new(AlignedBuffer::new(CAPACITY + TRAILER_LENGTH)).unwrap()
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let result = ManyToOneRingBuffer::new(AlignedBuffer::new(1000 + TRAILER_LENGTH));
        assert!(matches!(
            result.err(),
            Some(Error::CapacityNotPowerOfTwo { .. })
        ));
    }

    #[test]
    fn writes_then_reads_in_order() {
        let ring = ring();
        assert!(ring.write(7, b"first").unwrap());
        assert!(ring.write(8, b"second!").unwrap());

        let mut seen = Vec::new();
        let count = ring.read(
            |msg_type_id, payload| seen.push((msg_type_id, payload.to_vec())),
            usize::MAX,
        );

        assert_eq!(count, 2);
        assert_eq!(seen[0], (7, b"first".to_vec()));
        assert_eq!(seen[1], (8, b"second!".to_vec()));
        assert_eq!(ring.consumer_position(), ring.producer_position());
    }

    #[test]
    fn rejects_reserved_type_ids_and_oversized_messages() {
        let ring = ring();
        assert_eq!(
            ring.write(0, b"x").unwrap_err(),
            Error::MsgTypeId { msg_type_id: 0 }
        );
        assert_eq!(
            ring.write(-1, b"x").unwrap_err(),
            Error::MsgTypeId { msg_type_id: -1 }
        );

        let oversized = vec![0u8; ring.max_msg_length() + 1];
        assert_eq!(
            ring.write(1, &oversized).unwrap_err(),
            Error::MsgLength {
                length: oversized.len(),
                max: ring.max_msg_length()
            }
        );
    }

    #[test]
    fn returns_false_when_full() {
        let ring = ring();
        let payload = [0u8; 120];
        let mut accepted = 0;
        while ring.write(1, &payload).unwrap() {
            accepted += 1;
        }
        assert_eq!(accepted, CAPACITY / 128);
        assert_eq!(ring.size(), CAPACITY);

        // Draining restores capacity.
        assert_eq!(ring.read(|_, _| {}, usize::MAX), accepted);
        assert!(ring.write(1, &payload).unwrap());
    }

    #[test]
    fn wrap_inserts_padding_record() {
        // Head and tail at 56 of a 64-byte region: an aligned 16-byte record
        // cannot fit in the 8 remaining bytes.
        let ring =
            ManyToOneRingBuffer::new(AlignedBuffer::new(64 + TRAILER_LENGTH)).unwrap();
        let buffer = ring.buffer();
        buffer.put_i64(ring.layout.tail_position_index, 56);
        buffer.put_i64(ring.layout.head_position_index, 56);
        buffer.put_i64(ring.layout.head_cache_position_index, 56);

        assert!(ring.write(3, &42i64.to_ne_bytes()).unwrap());

        // Padding record fills 56..64, real record occupies 0..16.
        assert_eq!(buffer.get_i32(descriptor::length_offset(56)), 8);
        assert_eq!(
            buffer.get_i32(descriptor::type_offset(56)),
            PADDING_MSG_TYPE_ID
        );
        assert_eq!(buffer.get_i32(descriptor::length_offset(0)), 16);
        assert_eq!(ring.producer_position(), 56 + 8 + 16);

        // The drain stops at the end of the region: the first pass consumes
        // only the padding, the second delivers the wrapped record.
        let mut values = Vec::new();
        let mut handler =
            |_: i32, payload: &[u8]| values.push(i64::from_ne_bytes(payload.try_into().unwrap()));
        assert_eq!(ring.read(&mut handler, usize::MAX), 0);
        assert_eq!(ring.read(&mut handler, usize::MAX), 1);
        assert_eq!(values, [42]);
    }

    #[test]
    fn exact_fit_to_end_needs_no_padding() {
        let ring =
            ManyToOneRingBuffer::new(AlignedBuffer::new(64 + TRAILER_LENGTH)).unwrap();
        let buffer = ring.buffer();
        buffer.put_i64(ring.layout.tail_position_index, 48);
        buffer.put_i64(ring.layout.head_position_index, 48);
        buffer.put_i64(ring.layout.head_cache_position_index, 48);

        // Aligned record length is exactly the 16 bytes remaining.
        assert!(ring.write(3, &42i64.to_ne_bytes()).unwrap());
        assert_eq!(buffer.get_i32(descriptor::length_offset(48)), 16);
        assert_eq!(ring.producer_position(), 64);
    }

    #[test]
    fn try_claim_commit_publishes() {
        let ring = ring();
        let index = ring.try_claim(5, 8).unwrap().unwrap();
        ring.buffer().put_i64(index, 0x00C0FFEE);
        ring.commit(index).unwrap();

        let mut seen = Vec::new();
        ring.read(|t, payload| seen.push((t, payload.to_vec())), usize::MAX);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 5);
        assert_eq!(seen[0].1, 0x00C0FFEE_i64.to_ne_bytes());
    }

    #[test]
    fn try_claim_zero_length_yields_empty_payload() {
        let ring = ring();
        let index = ring.try_claim(5, 0).unwrap().unwrap();
        ring.commit(index).unwrap();

        let mut payload_lengths = Vec::new();
        ring.read(|_, payload| payload_lengths.push(payload.len()), usize::MAX);
        assert_eq!(payload_lengths, [0]);
    }

    #[test]
    fn aborted_claim_is_skipped_by_reader() {
        let ring = ring();
        let index = ring.try_claim(5, 8).unwrap().unwrap();
        ring.abort(index).unwrap();
        assert!(ring.write(6, b"live").unwrap());

        let mut seen = Vec::new();
        let count = ring.read(|t, _| seen.push(t), usize::MAX);
        assert_eq!(count, 1);
        assert_eq!(seen, [6]);
    }

    #[test]
    fn commit_twice_is_an_error() {
        let ring = ring();
        let index = ring.try_claim(5, 8).unwrap().unwrap();
        ring.commit(index).unwrap();
        assert_eq!(
            ring.commit(index).unwrap_err(),
            Error::ClaimFinalized { index }
        );
        assert_eq!(
            ring.abort(index).unwrap_err(),
            Error::ClaimFinalized { index }
        );
    }

    #[test]
    fn commit_validates_index() {
        let ring = ring();
        assert!(matches!(
            ring.commit(3).unwrap_err(),
            Error::ClaimIndex { .. }
        ));
        assert!(matches!(
            ring.commit(CAPACITY + 8).unwrap_err(),
            Error::ClaimIndex { .. }
        ));
        // Payload offsets are 8-aligned plus the header.
        assert!(matches!(
            ring.commit(12).unwrap_err(),
            Error::ClaimIndex { .. }
        ));
    }

    #[test]
    fn claim_guard_aborts_on_drop() {
        let ring = ring();
        {
            let claim = ring.claim(9, 8).unwrap().unwrap();
            claim.put_payload(b"dropped!");
            // Dropped without commit.
        }
        assert!(ring.write(6, b"live").unwrap());

        let mut seen = Vec::new();
        ring.read(|t, _| seen.push(t), usize::MAX);
        assert_eq!(seen, [6]);
    }

    #[test]
    fn read_limit_bounds_messages_consumed() {
        let ring = ring();
        for _ in 0..4 {
            assert!(ring.write(1, b"msg").unwrap());
        }
        assert_eq!(ring.read(|_, _| {}, 0), 0);
        assert_eq!(ring.read(|_, _| {}, 3), 3);
        assert_eq!(ring.read(|_, _| {}, usize::MAX), 1);
    }

    #[test]
    fn handler_panic_still_consumes_messages() {
        let ring = ring();
        assert!(ring.write(1, b"one").unwrap());
        assert!(ring.write(2, b"two").unwrap());

        let mut delivered = Vec::new();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ring.read(
                |t, _| {
                    delivered.push(t);
                    if t == 2 {
                        panic!("handler failure");
                    }
                },
                usize::MAX,
            )
        }));

        assert!(outcome.is_err());
        assert_eq!(delivered, [1, 2]);
        // Both records were consumed and zeroed; the ring is empty.
        assert_eq!(ring.consumer_position(), ring.producer_position());
        assert_eq!(ring.read(|_, _| {}, usize::MAX), 0);
    }

    #[test]
    fn unblock_publishes_staged_record_as_padding() {
        let ring = ring();
        let _index = ring.try_claim(5, 8).unwrap().unwrap();
        // Producer "dies" here without committing.
        assert_eq!(ring.read(|_, _| {}, usize::MAX), 0);
        assert!(ring.unblock());
        assert_eq!(ring.read(|_, _| {}, usize::MAX), 0);
        assert_eq!(ring.consumer_position(), ring.producer_position());
    }

    #[test]
    fn unblock_covers_zeroed_gap_before_later_record() {
        let ring = ring();
        let buffer = ring.buffer();
        // Simulate a producer that advanced the tail by 16 but never staged
        // its header, followed by a published record.
        buffer.put_i64(ring.layout.tail_position_index, 16);
        assert!(ring.write(4, b"after").unwrap());

        assert_eq!(ring.read(|_, _| {}, usize::MAX), 0);
        assert!(ring.unblock());

        let mut seen = Vec::new();
        assert_eq!(ring.read(|t, _| seen.push(t), usize::MAX), 1);
        assert_eq!(seen, [4]);
    }

    #[test]
    fn unblock_refuses_when_nothing_is_blocked() {
        let ring = ring();
        assert!(!ring.unblock());
        assert!(ring.write(1, b"ok").unwrap());
        assert!(!ring.unblock());
    }

    #[test]
    fn correlation_ids_are_sequential() {
        let ring = ring();
        assert_eq!(ring.next_correlation_id(), 0);
        assert_eq!(ring.next_correlation_id(), 1);
        assert_eq!(ring.next_correlation_id(), 2);
    }

    #[test]
    fn heartbeat_round_trips() {
        let ring = ring();
        ring.update_consumer_heartbeat_time(123_456);
        assert_eq!(ring.consumer_heartbeat_time(), 123_456);
    }

    #[test]
    fn size_tracks_unconsumed_bytes() {
        let ring = ring();
        assert_eq!(ring.size(), 0);
        assert!(ring.write(1, &[0u8; 8]).unwrap());
        assert_eq!(ring.size(), 16);
        ring.read(|_, _| {}, usize::MAX);
        assert_eq!(ring.size(), 0);
    }
}
