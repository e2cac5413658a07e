//! Variable-length message rings over a shared byte region.
//!
//! Two coordination schemes share one record format and one consumer-side
//! drain: [`ManyToOneRingBuffer`] arbitrates producers with a tail CAS, while
//! [`OneToOneRingBuffer`] relies on the single producer owning the tail
//! outright. See [`descriptor`] for the byte-exact layout.

pub mod descriptor;
mod mpsc;
mod spsc;

pub use mpsc::ManyToOneRingBuffer;
pub use spsc::OneToOneRingBuffer;

use crate::bits;
use crate::buffer::AtomicBuffer;
use crate::error::{Error, Result};
use descriptor::trailer;

/// Common contract of the message rings.
///
/// Producers call [`write`](RingBuffer::write) or the two-phase
/// [`try_claim`](RingBuffer::try_claim) / [`commit`](RingBuffer::commit) /
/// [`abort`](RingBuffer::abort); the single consumer drains with
/// [`read`](RingBuffer::read). All methods take `&self`: the trailer counters
/// are atomics inside the region, and each one is written by exactly one role.
pub trait RingBuffer {
    /// Backing region type.
    type Buffer: AtomicBuffer;

    /// The underlying region (data plus trailer).
    fn buffer(&self) -> &Self::Buffer;

    /// Size of the data region in bytes, a power of two.
    fn capacity(&self) -> usize;

    /// Largest accepted payload: `capacity / 8`.
    fn max_msg_length(&self) -> usize;

    /// Reserve space and publish `src` under `msg_type_id` in one call.
    ///
    /// Returns `Ok(false)` when the ring lacks capacity. Fails if the type id
    /// is reserved or the payload exceeds [`max_msg_length`](Self::max_msg_length).
    fn write(&self, msg_type_id: i32, src: &[u8]) -> Result<bool>;

    /// Reserve `length` payload bytes, staging an unpublished record.
    ///
    /// On `Ok(Some(index))` the caller writes the payload directly at `index`
    /// via [`buffer`](Self::buffer) and then calls [`commit`](Self::commit)
    /// or [`abort`](Self::abort) with the same index. `Ok(None)` means
    /// insufficient capacity.
    fn try_claim(&self, msg_type_id: i32, length: usize) -> Result<Option<usize>>;

    /// Publish a claimed record by release-storing its positive length.
    fn commit(&self, index: usize) -> Result<()>;

    /// Discard a claimed record by converting it to padding and publishing.
    fn abort(&self, index: usize) -> Result<()>;

    /// Drain up to `message_count_limit` messages into `handler`.
    ///
    /// The handler receives `(msg_type_id, payload)`. Consumed bytes are
    /// zeroed and the head advanced even if the handler panics. Returns the
    /// number of messages consumed; padding records are skipped.
    fn read<F>(&self, handler: F, message_count_limit: usize) -> usize
    where
        F: FnMut(i32, &[u8]);

    /// Recover space wedged by a producer that died mid-publication.
    ///
    /// Returns true if a blocked record was converted to padding. Never acts
    /// when the evidence is consistent with a live producer about to publish.
    fn unblock(&self) -> bool;

    /// Bytes between the consumer and producer cursors, clamped to
    /// `[0, capacity]` and computed under a head/tail/head double read.
    fn size(&self) -> usize;

    /// Current producer position (tail).
    fn producer_position(&self) -> i64;

    /// Current consumer position (head).
    fn consumer_position(&self) -> i64;

    /// Atomic post-increment of the trailer correlation counter.
    fn next_correlation_id(&self) -> i64;

    /// Last consumer heartbeat timestamp, −1 if never set.
    fn consumer_heartbeat_time(&self) -> i64;

    /// Record consumer liveness.
    fn update_consumer_heartbeat_time(&self, time: i64);

    /// Two-phase claim with scope-bound cleanup: the returned [`Claim`]
    /// aborts on drop unless committed.
    fn claim(&self, msg_type_id: i32, length: usize) -> Result<Option<Claim<'_, Self>>>
    where
        Self: Sized,
    {
        Ok(self
            .try_claim(msg_type_id, length)?
            .map(|index| Claim::new(self, index, length)))
    }
}

/// A claimed but unpublished record.
///
/// Dropping a claim without committing converts the reservation to padding so
/// the consumer never stalls on it.
pub struct Claim<'a, R: RingBuffer> {
    ring: &'a R,
    index: usize,
    length: usize,
    finalized: bool,
}

impl<'a, R: RingBuffer> Claim<'a, R> {
    fn new(ring: &'a R, index: usize, length: usize) -> Self {
        Self {
            ring,
            index,
            length,
            finalized: false,
        }
    }

    /// Payload index inside the ring's buffer.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Claimed payload length in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Copy `src` to the start of the claimed payload region.
    pub fn put_payload(&self, src: &[u8]) {
        debug_assert!(src.len() <= self.length, "payload exceeds claimed length");
        self.ring.buffer().put_bytes(self.index, src);
    }

    /// Publish the record.
    pub fn commit(mut self) -> Result<()> {
        self.finalized = true;
        self.ring.commit(self.index)
    }

    /// Turn the record into padding.
    pub fn abort(mut self) -> Result<()> {
        self.finalized = true;
        self.ring.abort(self.index)
    }
}

impl<R: RingBuffer> Drop for Claim<'_, R> {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.ring.abort(self.index);
        }
    }
}

/// Derived geometry for one ring: data capacity plus trailer counter indices.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RingLayout {
    pub capacity: usize,
    pub max_msg_length: usize,
    pub tail_position_index: usize,
    pub head_cache_position_index: usize,
    pub head_position_index: usize,
    pub correlation_counter_index: usize,
    pub consumer_heartbeat_index: usize,
}

impl RingLayout {
    pub(crate) fn new<A: AtomicBuffer>(buffer: &A) -> Result<Self> {
        let capacity = descriptor::check_capacity(buffer.capacity())?;
        buffer.verify_alignment()?;
        Ok(Self {
            capacity,
            max_msg_length: descriptor::max_msg_length(capacity),
            tail_position_index: capacity + trailer::TAIL_POSITION_OFFSET,
            head_cache_position_index: capacity + trailer::HEAD_CACHE_POSITION_OFFSET,
            head_position_index: capacity + trailer::HEAD_POSITION_OFFSET,
            correlation_counter_index: capacity + trailer::CORRELATION_COUNTER_OFFSET,
            consumer_heartbeat_index: capacity + trailer::CONSUMER_HEARTBEAT_OFFSET,
        })
    }

    pub(crate) fn check_msg_length(&self, length: usize) -> Result<()> {
        if length > self.max_msg_length {
            return Err(Error::MsgLength {
                length,
                max: self.max_msg_length,
            });
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn mask(&self) -> i64 {
        self.capacity as i64 - 1
    }
}

/// Zeroes consumed bytes and release-advances head on every exit path,
/// including unwinding out of a message handler.
struct ReadScope<'a, A: AtomicBuffer> {
    buffer: &'a A,
    head_position_index: usize,
    head: i64,
    head_index: usize,
    bytes_read: usize,
}

impl<A: AtomicBuffer> Drop for ReadScope<'_, A> {
    fn drop(&mut self) {
        if self.bytes_read != 0 {
            self.buffer.set_memory(self.head_index, self.bytes_read, 0);
            self.buffer
                .put_i64_ordered(self.head_position_index, self.head + self.bytes_read as i64);
        }
    }
}

/// Consumer drain shared by both rings.
pub(crate) fn read_messages<A, F>(
    buffer: &A,
    layout: &RingLayout,
    mut handler: F,
    message_count_limit: usize,
) -> usize
where
    A: AtomicBuffer,
    F: FnMut(i32, &[u8]),
{
    let head = buffer.get_i64(layout.head_position_index);
    let head_index = (head & layout.mask()) as usize;
    let contiguous_block_length = layout.capacity - head_index;
    let mut messages_read = 0;

    let mut scope = ReadScope {
        buffer,
        head_position_index: layout.head_position_index,
        head,
        head_index,
        bytes_read: 0,
    };

    while scope.bytes_read < contiguous_block_length && messages_read < message_count_limit {
        let record_index = head_index + scope.bytes_read;
        let header = buffer.get_i64_volatile(descriptor::length_offset(record_index));
        let record_length = descriptor::record_length(header);
        if record_length <= 0 {
            break;
        }

        scope.bytes_read += bits::align(record_length as usize, descriptor::ALIGNMENT);

        let msg_type_id = descriptor::message_type_id(header);
        if msg_type_id == descriptor::PADDING_MSG_TYPE_ID {
            continue;
        }

        messages_read += 1;
        // SAFETY: [head, tail) is readable only by this consumer until head
        // advances; the acquire load of the positive length synchronised with
        // the producer's publishing release store.
        let payload = unsafe {
            buffer.slice(
                descriptor::encoded_msg_offset(record_index),
                record_length as usize - descriptor::HEADER_LENGTH,
            )
        };
        handler(msg_type_id, payload);
    }

    messages_read
}

fn compute_record_index(layout: &RingLayout, index: usize) -> Result<usize> {
    let record_index = index.wrapping_sub(descriptor::HEADER_LENGTH);
    if index < descriptor::HEADER_LENGTH
        || index > layout.capacity
        || record_index % descriptor::ALIGNMENT != 0
    {
        return Err(Error::ClaimIndex { index });
    }
    Ok(record_index)
}

fn verify_claimed<A: AtomicBuffer>(buffer: &A, record_index: usize) -> Result<i32> {
    let record_length = buffer.get_i32(descriptor::length_offset(record_index));
    if record_length < 0 {
        Ok(record_length)
    } else {
        Err(Error::ClaimFinalized {
            index: record_index + descriptor::HEADER_LENGTH,
        })
    }
}

/// Publish a claimed record: invert the staged negative length.
pub(crate) fn commit_claim<A: AtomicBuffer>(
    buffer: &A,
    layout: &RingLayout,
    index: usize,
) -> Result<()> {
    let record_index = compute_record_index(layout, index)?;
    let record_length = verify_claimed(buffer, record_index)?;
    buffer.put_i32_ordered(descriptor::length_offset(record_index), -record_length);
    Ok(())
}

/// Discard a claimed record: rewrite it as padding, then publish.
pub(crate) fn abort_claim<A: AtomicBuffer>(
    buffer: &A,
    layout: &RingLayout,
    index: usize,
) -> Result<()> {
    let record_index = compute_record_index(layout, index)?;
    let record_length = verify_claimed(buffer, record_index)?;
    buffer.put_i32(
        descriptor::type_offset(record_index),
        descriptor::PADDING_MSG_TYPE_ID,
    );
    buffer.put_i32_ordered(descriptor::length_offset(record_index), -record_length);
    Ok(())
}

/// Size under a head/tail/head double read so a racing consumer cannot make
/// the result negative or larger than the capacity.
pub(crate) fn consistent_size<A: AtomicBuffer>(buffer: &A, layout: &RingLayout) -> usize {
    let mut head_after = buffer.get_i64_volatile(layout.head_position_index);
    loop {
        let head_before = head_after;
        let tail = buffer.get_i64_volatile(layout.tail_position_index);
        head_after = buffer.get_i64_volatile(layout.head_position_index);
        if head_after == head_before {
            let size = tail - head_after;
            if size < 0 {
                return 0;
            }
            if size as usize > layout.capacity {
                return layout.capacity;
            }
            return size as usize;
        }
    }
}
