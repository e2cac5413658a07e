//! Receiving side of the broadcast buffer.

use std::sync::atomic::{fence, AtomicI64, Ordering};

use crate::bits::align;
use crate::broadcast::descriptor::{self, PADDING_MSG_TYPE_ID};
use crate::buffer::AtomicBuffer;
use crate::error::{Error, Result};

/// Polls a transmission stream without coordinating with the transmitter.
///
/// Call [`receive_next`](Self::receive_next) until it returns true, inspect
/// the exposed record, then [`validate`](Self::validate) after consuming it:
/// the transmitter may have overwritten the record mid-read, and only the
/// validate confirms the bytes were stable.
pub struct BroadcastReceiver<A: AtomicBuffer> {
    buffer: A,
    capacity: usize,
    mask: usize,
    tail_intent_counter_index: usize,
    tail_counter_index: usize,
    latest_counter_index: usize,
    record_offset: usize,
    cursor: i64,
    next_record: i64,
    lapped_count: AtomicI64,
}

impl<A: AtomicBuffer> BroadcastReceiver<A> {
    /// Wrap `buffer` and join the stream at the latest record.
    pub fn new(buffer: A) -> Result<Self> {
        let capacity = descriptor::check_capacity(buffer.capacity())?;
        buffer.verify_alignment()?;

        let latest_counter_index = capacity + descriptor::LATEST_COUNTER_OFFSET;
        let cursor = buffer.get_i64(latest_counter_index);

        Ok(Self {
            capacity,
            mask: capacity - 1,
            tail_intent_counter_index: capacity + descriptor::TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + descriptor::TAIL_COUNTER_OFFSET,
            latest_counter_index,
            record_offset: (cursor as usize) & (capacity - 1),
            cursor,
            next_record: cursor,
            lapped_count: AtomicI64::new(0),
            buffer,
        })
    }

    /// Size of the data region in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The underlying region.
    pub fn buffer(&self) -> &A {
        &self.buffer
    }

    /// Number of times the transmitter has lapped this receiver. Each lap is
    /// at least a buffer's worth of lost messages.
    pub fn lapped_count(&self) -> i64 {
        self.lapped_count.load(Ordering::SeqCst)
    }

    /// Non-blocking poll for the next record.
    ///
    /// Returns true when a record is exposed via [`msg_type_id`](Self::msg_type_id),
    /// [`offset`](Self::offset), and [`length`](Self::length). A detected lap
    /// increments [`lapped_count`](Self::lapped_count) and rejoins at the
    /// latest record before exposing it.
    pub fn receive_next(&mut self) -> bool {
        let tail = self.buffer.get_i64_volatile(self.tail_counter_index);
        let mut cursor = self.next_record;

        if tail <= cursor {
            return false;
        }

        if !self.validate_at(cursor) {
            self.lapped_count.fetch_add(1, Ordering::SeqCst);
            cursor = self.buffer.get_i64(self.latest_counter_index);
        }

        let mut record_offset = (cursor as usize) & self.mask;
        self.cursor = cursor;
        self.next_record = cursor + self.aligned_record_length(record_offset);

        if PADDING_MSG_TYPE_ID == self.buffer.get_i32(descriptor::type_offset(record_offset)) {
            record_offset = 0;
            self.cursor = self.next_record;
            self.next_record += self.aligned_record_length(0);
        }

        self.record_offset = record_offset;
        true
    }

    /// Type id of the current record.
    pub fn msg_type_id(&self) -> i32 {
        self.buffer
            .get_i32(descriptor::type_offset(self.record_offset))
    }

    /// Offset of the current record's payload in the underlying buffer.
    pub fn offset(&self) -> usize {
        descriptor::msg_offset(self.record_offset)
    }

    /// Payload length of the current record.
    pub fn length(&self) -> usize {
        let record_length = self
            .buffer
            .get_i32(descriptor::length_offset(self.record_offset));
        (record_length as i64 - descriptor::HEADER_LENGTH as i64).max(0) as usize
    }

    /// Confirm the current record was not overwritten while being consumed.
    pub fn validate(&self) -> bool {
        // Order the caller's payload reads before the intent re-check.
        fence(Ordering::Acquire);
        self.validate_at(self.cursor)
    }

    fn validate_at(&self, cursor: i64) -> bool {
        cursor + self.capacity as i64
            > self
                .buffer
                .get_i64_volatile(self.tail_intent_counter_index)
    }

    /// A lapped read can observe a torn header, so the advance is clamped;
    /// the follow-up validate rejects whatever was exposed.
    fn aligned_record_length(&self, record_offset: usize) -> i64 {
        let record_length = self
            .buffer
            .get_i32(descriptor::length_offset(record_offset))
            .max(0);
        align(record_length as usize, descriptor::RECORD_ALIGNMENT) as i64
    }
}

/// Receiver that copies each message into a private scratch buffer before
/// delivering it, so handlers never observe bytes the transmitter is
/// overwriting.
pub struct CopyBroadcastReceiver<A: AtomicBuffer> {
    receiver: BroadcastReceiver<A>,
    scratch: Vec<u8>,
}

impl<A: AtomicBuffer> CopyBroadcastReceiver<A> {
    /// Wrap `receiver` with a scratch buffer sized so any legal message fits.
    pub fn new(receiver: BroadcastReceiver<A>) -> Self {
        let scratch = vec![0u8; descriptor::max_msg_length(receiver.capacity())];
        Self { receiver, scratch }
    }

    /// Number of times the transmitter has lapped the wrapped receiver.
    pub fn lapped_count(&self) -> i64 {
        self.receiver.lapped_count()
    }

    /// Receive at most one message, delivering a stable copy to `handler`.
    ///
    /// Returns the number of messages delivered (0 or 1), or
    /// [`Error::UnableToKeepUp`] when the transmitter lapped this receiver
    /// mid-message and the copy cannot be trusted.
    pub fn receive<F>(&mut self, mut handler: F) -> Result<usize>
    where
        F: FnMut(i32, &[u8]),
    {
        let last_seen_lapped_count = self.receiver.lapped_count();

        if !self.receiver.receive_next() {
            return Ok(0);
        }
        if last_seen_lapped_count != self.receiver.lapped_count() {
            return Err(Error::UnableToKeepUp);
        }

        let length = self.receiver.length();
        if length > self.scratch.len() {
            // Longer than any legal message: the header was overwritten
            // under us.
            return Err(Error::UnableToKeepUp);
        }

        let msg_type_id = self.receiver.msg_type_id();
        self.receiver
            .buffer()
            .get_bytes(self.receiver.offset(), &mut self.scratch[..length]);

        if !self.receiver.validate() {
            return Err(Error::UnableToKeepUp);
        }

        handler(msg_type_id, &self.scratch[..length]);
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastTransmitter;
    use crate::buffer::AlignedBuffer;
    use std::sync::Arc;

    const CAPACITY: usize = 1024;

    fn pair() -> (
        BroadcastTransmitter<Arc<AlignedBuffer>>,
        BroadcastReceiver<Arc<AlignedBuffer>>,
    ) {
        let region = Arc::new(AlignedBuffer::new(CAPACITY + descriptor::TRAILER_LENGTH));
        let tx = BroadcastTransmitter::new(Arc::clone(&region)).unwrap();
        let rx = BroadcastReceiver::new(region).unwrap();
        (tx, rx)
    }

    #[test]
    fn nothing_to_receive_on_fresh_stream() {
        let (_tx, mut rx) = pair();
        assert!(!rx.receive_next());
    }

    #[test]
    fn receives_messages_in_transmission_order() {
        let (mut tx, mut rx) = pair();
        tx.transmit(5, b"alpha").unwrap();
        tx.transmit(6, b"beta!!").unwrap();

        assert!(rx.receive_next());
        assert_eq!(rx.msg_type_id(), 5);
        let mut payload = vec![0u8; rx.length()];
        rx.buffer().get_bytes(rx.offset(), &mut payload);
        assert_eq!(payload, b"alpha");
        assert!(rx.validate());

        assert!(rx.receive_next());
        assert_eq!(rx.msg_type_id(), 6);
        assert_eq!(rx.length(), 6);
        assert!(rx.validate());

        assert!(!rx.receive_next());
    }

    #[test]
    fn padding_records_are_skipped_transparently() {
        let (mut tx, mut rx) = pair();
        // Drive the tail to the wrap point.
        for _ in 0..42 {
            tx.transmit(1, &[7u8; 16]).unwrap();
        }
        let mut received = 0;
        while rx.receive_next() {
            assert_eq!(rx.msg_type_id(), 1);
            received += 1;
        }
        assert_eq!(received, 42);

        // This one wraps; the receiver must step over the padding record.
        tx.transmit(2, b"wrapped").unwrap();
        assert!(rx.receive_next());
        assert_eq!(rx.msg_type_id(), 2);
        let mut payload = vec![0u8; rx.length()];
        rx.buffer().get_bytes(rx.offset(), &mut payload);
        assert_eq!(payload, b"wrapped");
        assert!(rx.validate());
    }

    #[test]
    fn late_joiner_starts_at_latest_record() {
        let region = Arc::new(AlignedBuffer::new(CAPACITY + descriptor::TRAILER_LENGTH));
        let mut tx = BroadcastTransmitter::new(Arc::clone(&region)).unwrap();
        for i in 1..=5 {
            tx.transmit(i, &[i as u8; 8]).unwrap();
        }

        let mut rx = BroadcastReceiver::new(region).unwrap();
        // Only the most recent record is ahead of the join cursor.
        assert!(rx.receive_next());
        assert_eq!(rx.msg_type_id(), 5);
        assert!(!rx.receive_next());
    }

    #[test]
    fn lapped_receiver_rejoins_and_counts() {
        let (mut tx, mut rx) = pair();
        tx.transmit(1, &[0u8; 16]).unwrap();

        // Push far more than a buffer's worth before the receiver polls.
        for _ in 0..100 {
            tx.transmit(2, &[0u8; 64]).unwrap();
        }

        assert!(rx.receive_next());
        assert_eq!(rx.lapped_count(), 1);
        assert_eq!(rx.msg_type_id(), 2);
        assert!(rx.validate());
    }

    #[test]
    fn copy_receiver_delivers_stable_payloads() {
        let (mut tx, rx) = pair();
        let mut copy_rx = CopyBroadcastReceiver::new(rx);

        tx.transmit(3, b"copied message").unwrap();

        let mut seen = Vec::new();
        let received = copy_rx
            .receive(|msg_type_id, payload| seen.push((msg_type_id, payload.to_vec())))
            .unwrap();
        assert_eq!(received, 1);
        assert_eq!(seen, [(3, b"copied message".to_vec())]);

        assert_eq!(copy_rx.receive(|_, _| {}).unwrap(), 0);
    }

    #[test]
    fn copy_receiver_reports_lap_as_unable_to_keep_up() {
        let (mut tx, rx) = pair();
        let mut copy_rx = CopyBroadcastReceiver::new(rx);
        tx.transmit(1, &[0u8; 16]).unwrap();
        for _ in 0..100 {
            tx.transmit(2, &[0u8; 64]).unwrap();
        }

        assert_eq!(copy_rx.receive(|_, _| {}).unwrap_err(), Error::UnableToKeepUp);
        // The wrapped receiver rejoined; the next receive succeeds.
        assert_eq!(copy_rx.receive(|_, _| {}).unwrap(), 1);
    }
}
